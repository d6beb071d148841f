//! Application state.

use strata_host::Host;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// The host every request is served from.
    pub host: Host,
}

impl AppState {
    pub fn new(host: Host) -> Self {
        Self { host }
    }
}
