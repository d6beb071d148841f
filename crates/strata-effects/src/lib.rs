//! # Strata Effects
//!
//! Registry and executor for effect handlers.
//!
//! A flow that reaches an `effect` node leaves a [`Requirement`] pending. The
//! host hands that requirement to an [`EffectExecutor`], which looks up the
//! registered [`EffectHandler`], runs it against a read-only view of the
//! already-patched snapshot, and reports an [`EffectResult`]. Failures are
//! always values; the executor never panics or returns `Err`.
//!
//! [`Requirement`]: strata_core::Requirement

pub mod error;
pub mod executor;
pub mod handler;
pub mod registry;

pub use error::EffectError;
pub use executor::{EffectExecutor, EffectResult};
pub use handler::{handler_fn, EffectContext, EffectHandler, FnHandler, HandlerOutput};
pub use registry::{EffectOptions, EffectRegistry, RegisteredEffect};
