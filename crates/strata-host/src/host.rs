//! Host façade: owns the schema, the effect registry and one mailbox/runner
//! pair per execution key.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use strata_compute::{ComputeConfig, ComputeEngine, ComputeResult};
use strata_core::{DomainSchema, Intent, Result, Snapshot, StrataError};
use strata_effects::{EffectExecutor, EffectHandler, EffectOptions, EffectRegistry};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, Notify, RwLock};
use tracing::{debug, info, warn};

use crate::config::HostConfig;
use crate::context::ExecutionContext;
use crate::dispatch::{EffectDispatchSink, ExecutorDispatcher};
use crate::fatal::{FatalSink, TracingFatalSink};
use crate::hook::Hook;
use crate::host_context::{HostContextProvider, SystemHostContext};
use crate::job::Job;
use crate::liveness::LivenessGuard;
use crate::mailbox::Mailbox;
use crate::runner::Runner;
use crate::trace::{TraceBus, TraceEvent, TraceSink};

/// Scheduler state of one execution key.
pub(crate) struct KeyState {
    key: String,
    pub(crate) mailbox: Mailbox,
    pub(crate) context: RwLock<ExecutionContext>,
    liveness: Mutex<LivenessGuard>,
    in_flight: AtomicUsize,
    idle: Notify,
}

impl KeyState {
    fn new(context: ExecutionContext, liveness_ceiling: u32) -> Self {
        Self {
            key: context.key().to_string(),
            mailbox: Mailbox::new(),
            context: RwLock::new(context),
            liveness: Mutex::new(LivenessGuard::new(liveness_ceiling)),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
        }
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn liveness(&self) -> MutexGuard<'_, LivenessGuard> {
        self.liveness.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn effect_started(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn effect_settled(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.notify_if_quiescent();
    }

    /// Mailbox idle and no effect outstanding.
    pub(crate) fn is_quiescent(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) == 0 && self.mailbox.is_idle()
    }

    pub(crate) fn notify_if_quiescent(&self) {
        if self.is_quiescent() {
            self.idle.notify_waiters();
        }
    }

    async fn wait_quiescent(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // Register before checking so a wakeup in between is not missed.
            notified.as_mut().enable();
            if self.is_quiescent() {
                return;
            }
            notified.await;
        }
    }
}

pub(crate) struct HostInner {
    pub(crate) schema: Arc<DomainSchema>,
    pub(crate) engine: ComputeEngine,
    pub(crate) config: HostConfig,
    pub(crate) hooks: Vec<Arc<dyn Hook>>,
    pub(crate) host_context: Arc<dyn HostContextProvider>,
    pub(crate) trace: TraceBus,
    pub(crate) fatal: Arc<dyn FatalSink>,
    pub(crate) dispatcher: Arc<dyn EffectDispatchSink>,
    executor_dispatcher: Option<Arc<ExecutorDispatcher>>,
    /// Runtime runner passes are spawned on, captured at build time so jobs
    /// can be queued from any thread.
    runtime: Handle,
    keys: Mutex<HashMap<String, Arc<KeyState>>>,
}

impl HostInner {
    fn keys(&self) -> MutexGuard<'_, HashMap<String, Arc<KeyState>>> {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// State for a key, created at genesis on first use.
    fn key_state(&self, key: &str) -> Arc<KeyState> {
        self.keys()
            .entry(key.to_string())
            .or_insert_with(|| {
                debug!(key, "execution key created");
                Arc::new(KeyState::new(
                    ExecutionContext::genesis(key, &self.schema),
                    self.config.liveness_ceiling,
                ))
            })
            .clone()
    }

    fn existing(&self, key: &str) -> Option<Arc<KeyState>> {
        self.keys().get(key).cloned()
    }

    fn states(&self) -> Vec<Arc<KeyState>> {
        self.keys().values().cloned().collect()
    }

    /// Queue a job and start a runner pass if the mailbox was idle.
    pub(crate) fn enqueue(self: &Arc<Self>, state: &Arc<KeyState>, job: Job) {
        if state.mailbox.enqueue(job) {
            let runner = Runner::new(self.clone(), state.clone());
            self.runtime.spawn(runner.run());
        }
    }
}

/// Handle to a running host. Cheap to clone.
#[derive(Clone)]
pub struct Host {
    inner: Arc<HostInner>,
}

impl Host {
    /// Start building a host for a schema.
    pub fn builder(schema: DomainSchema) -> HostBuilder {
        HostBuilder::new(schema)
    }

    pub fn schema(&self) -> &DomainSchema {
        &self.inner.schema
    }

    pub fn config(&self) -> &HostConfig {
        &self.inner.config
    }

    /// Dispatch an intent on a key as a new chain.
    pub fn dispatch(&self, key: &str, intent: Intent) -> Result<()> {
        self.submit(key, Job::start(intent))
    }

    /// Queue any job on a key. Safe to call from any thread.
    ///
    /// An intent without an id is rejected here, before anything is queued.
    pub fn submit(&self, key: &str, job: Job) -> Result<()> {
        if let Job::StartIntent { intent, .. } = &job {
            intent.validate()?;
        }
        let state = self.inner.key_state(key);
        self.inner.enqueue(&state, job);
        Ok(())
    }

    /// Wait until the key's mailbox is empty, its runner idle and none of its
    /// effects in flight. Returns at once for a key never used.
    pub async fn drain(&self, key: &str) {
        if let Some(state) = self.inner.existing(key) {
            state.wait_quiescent().await;
        }
    }

    /// Wait until every key is quiescent.
    pub async fn drain_all(&self) {
        loop {
            let mut waited = false;
            for state in self.inner.states() {
                if !state.is_quiescent() {
                    state.wait_quiescent().await;
                    waited = true;
                }
            }
            if !waited {
                return;
            }
        }
    }

    /// Current head of a key, `None` if the key was never used.
    pub async fn snapshot(&self, key: &str) -> Option<Arc<Snapshot>> {
        let state = self.inner.existing(key)?;
        let ctx = state.context.read().await;
        Some(ctx.head().clone())
    }

    /// Install a head for a key, e.g. one restored from storage.
    ///
    /// The snapshot must have been produced under this host's schema and must
    /// not be waiting on effects: the intents that issued its requirements are
    /// not known here, so nothing could ever fulfil them.
    pub async fn seed(&self, key: &str, snapshot: Snapshot) -> Result<()> {
        let expected = self.inner.schema.schema_hash();
        if snapshot.meta.schema_hash != expected {
            return Err(StrataError::InvalidSchema(format!(
                "snapshot schema hash {} does not match host schema {}",
                snapshot.meta.schema_hash, expected
            )));
        }
        let pending = &snapshot.system.pending_requirements;
        if !pending.is_empty() {
            return Err(StrataError::InvalidSnapshot(format!(
                "snapshot has {} pending requirement(s), first {}",
                pending.len(),
                pending[0].id
            )));
        }
        let state = self.inner.key_state(key);
        let mut ctx = state.context.write().await;
        info!(key, version = snapshot.meta.version, "head seeded");
        ctx.commit(snapshot);
        Ok(())
    }

    /// Compute an intent against a key's head without committing anything or
    /// dispatching effects.
    pub async fn preview(&self, key: &str, intent: Intent) -> Result<ComputeResult> {
        let head = match self.snapshot(key).await {
            Some(head) => head,
            None => ExecutionContext::genesis(key, &self.inner.schema).head().clone(),
        };
        let host = self
            .inner
            .host_context
            .freeze(key, 0, Some(&intent.intent_id));
        self.inner.engine.compute(&self.inner.schema, &head, &intent, &host)
    }

    /// Live trace events.
    pub fn subscribe(&self) -> broadcast::Receiver<TraceEvent> {
        self.inner.trace.subscribe()
    }

    /// Keys seen so far, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.keys().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Abort a running effect; its intent ends with `EFFECT_FAILED`.
    /// Only the built-in dispatcher supports this.
    pub fn cancel_effect(&self, requirement_id: &str) -> bool {
        match &self.inner.executor_dispatcher {
            Some(dispatcher) => dispatcher.cancel(requirement_id),
            None => false,
        }
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("schema", &self.inner.schema.id)
            .field("config", &self.inner.config)
            .field("keys", &self.keys())
            .finish()
    }
}

/// Builder for [`Host`].
pub struct HostBuilder {
    schema: DomainSchema,
    config: HostConfig,
    compute_config: ComputeConfig,
    effects: Vec<(String, Arc<dyn EffectHandler>, Option<EffectOptions>)>,
    hooks: Vec<Arc<dyn Hook>>,
    host_context: Arc<dyn HostContextProvider>,
    trace_sinks: Vec<Arc<dyn TraceSink>>,
    fatal: Arc<dyn FatalSink>,
    dispatcher: Option<Arc<dyn EffectDispatchSink>>,
    runtime: Option<Handle>,
}

impl HostBuilder {
    pub fn new(schema: DomainSchema) -> Self {
        Self {
            schema,
            config: HostConfig::default(),
            compute_config: ComputeConfig::default(),
            effects: Vec::new(),
            hooks: Vec::new(),
            host_context: Arc::new(SystemHostContext),
            trace_sinks: Vec::new(),
            fatal: Arc::new(TracingFatalSink),
            dispatcher: None,
            runtime: None,
        }
    }

    pub fn config(mut self, config: HostConfig) -> Self {
        self.config = config;
        self
    }

    pub fn compute_config(mut self, config: ComputeConfig) -> Self {
        self.compute_config = config;
        self
    }

    /// Register an effect handler with the configured default options.
    pub fn effect(mut self, effect_type: impl Into<String>, handler: impl EffectHandler + 'static) -> Self {
        self.effects.push((effect_type.into(), Arc::new(handler), None));
        self
    }

    pub fn effect_with_options(
        mut self,
        effect_type: impl Into<String>,
        handler: impl EffectHandler + 'static,
        options: EffectOptions,
    ) -> Self {
        self.effects
            .push((effect_type.into(), Arc::new(handler), Some(options)));
        self
    }

    pub fn hook(mut self, hook: impl Hook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    pub fn host_context(mut self, provider: impl HostContextProvider + 'static) -> Self {
        self.host_context = Arc::new(provider);
        self
    }

    pub fn trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace_sinks.push(sink);
        self
    }

    pub fn fatal_sink(mut self, sink: Arc<dyn FatalSink>) -> Self {
        self.fatal = sink;
        self
    }

    /// Replace the built-in executor with a custom dispatch sink.
    pub fn effect_dispatcher(mut self, sink: Arc<dyn EffectDispatchSink>) -> Self {
        self.dispatcher = Some(sink);
        self
    }

    /// Run jobs on this runtime instead of the one `build` is called from.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Validate the schema and assemble the host.
    ///
    /// Outside a tokio runtime a handle must have been given with
    /// [`HostBuilder::runtime`].
    pub fn build(self) -> Result<Host> {
        self.schema.validate(self.compute_config.max_flow_depth)?;

        let defaults = self.config.effect_options();
        let mut registry = EffectRegistry::with_defaults(defaults);
        for (effect_type, handler, options) in self.effects {
            registry
                .register_arc(effect_type, handler, options.unwrap_or(defaults))
                .map_err(|err| StrataError::Configuration(err.to_string()))?;
        }

        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|err| {
                StrataError::Configuration(format!("no tokio runtime to run jobs on: {}", err))
            })?,
        };

        let (dispatcher, executor_dispatcher) = match self.dispatcher {
            Some(sink) => {
                if !registry.is_empty() {
                    warn!(effects = registry.len(), "custom effect dispatcher set, registered handlers are unused");
                }
                (sink, None)
            }
            None => {
                let executor = Arc::new(ExecutorDispatcher::new(EffectExecutor::new(Arc::new(registry))));
                (executor.clone() as Arc<dyn EffectDispatchSink>, Some(executor))
            }
        };

        info!(
            schema = %self.schema.id,
            version = %self.schema.version,
            hooks = self.hooks.len(),
            liveness_ceiling = self.config.liveness_ceiling,
            "host ready"
        );

        let inner = HostInner {
            schema: Arc::new(self.schema),
            engine: ComputeEngine::with_config(self.compute_config),
            trace: TraceBus::new(self.config.trace_channel_capacity, self.trace_sinks),
            config: self.config,
            hooks: self.hooks,
            host_context: self.host_context,
            fatal: self.fatal,
            dispatcher,
            executor_dispatcher,
            runtime,
            keys: Mutex::new(HashMap::new()),
        };
        Ok(Host {
            inner: Arc::new(inner),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strata_effects::{handler_fn, HandlerOutput};

    fn schema() -> DomainSchema {
        DomainSchema::from_json(json!({
            "id": "counter",
            "version": "1.0.0",
            "state": {"fields": {"count": {"type": "number", "default": 0}}},
            "actions": {
                "inc": {"flow": {"kind": "patch", "op": "set", "path": "count",
                    "value": {"kind": "add", "left": {"kind": "get", "path": "count"}, "right": {"kind": "lit", "value": 1}}}}
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_build_rejects_duplicate_effect() {
        let noop = || handler_fn(|_ctx| async { Ok::<_, anyhow::Error>(HandlerOutput::None) });
        let err = Host::builder(schema())
            .effect("api.fetch", noop())
            .effect("api.fetch", noop())
            .build()
            .unwrap_err();
        assert!(matches!(err, StrataError::Configuration(_)));
    }

    #[test]
    fn test_build_rejects_bad_schema() {
        let mut bad = schema();
        bad.hash = Some("not-the-hash".to_string());
        let err = Host::builder(bad).build().unwrap_err();
        assert!(matches!(err, StrataError::InvalidSchema(_)));
    }

    #[tokio::test]
    async fn test_dispatch_and_drain() {
        let host = Host::builder(schema()).build().unwrap();
        host.dispatch("main", Intent::new("inc", json!({}), "i-1")).unwrap();
        host.dispatch("main", Intent::new("inc", json!({}), "i-2")).unwrap();
        host.drain("main").await;

        let head = host.snapshot("main").await.unwrap();
        assert_eq!(head.data["count"], json!(2));
        assert_eq!(head.meta.version, 2);
        assert_eq!(host.keys(), vec!["main".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_intent_id_rejected_before_enqueue() {
        let host = Host::builder(schema()).build().unwrap();
        let err = host.dispatch("main", Intent::new("inc", json!({}), "")).unwrap_err();
        assert!(matches!(err, StrataError::MissingIntentId { .. }));
        assert!(host.snapshot("main").await.is_none());
    }

    #[tokio::test]
    async fn test_seed_checks_schema_hash() {
        let host = Host::builder(schema()).build().unwrap();
        let foreign = Snapshot::new(json!({"count": 5}), "other-hash");
        assert!(host.seed("main", foreign).await.is_err());

        let mut own = host.schema().genesis_snapshot();
        own.data = json!({"count": 5});
        own.meta.version = 7;
        host.seed("main", own).await.unwrap();
        host.dispatch("main", Intent::new("inc", json!({}), "i-1")).unwrap();
        host.drain("main").await;

        let head = host.snapshot("main").await.unwrap();
        assert_eq!(head.data["count"], json!(6));
        assert_eq!(head.meta.version, 8);
    }

    #[tokio::test]
    async fn test_seed_rejects_pending_requirements() {
        let host = Host::builder(schema()).build().unwrap();
        let mut waiting = host.schema().genesis_snapshot();
        waiting.system.status = strata_core::SystemStatus::Pending;
        waiting.system.pending_requirements.push(strata_core::Requirement {
            id: "req-1".to_string(),
            effect_type: "api.fetch".to_string(),
            params: json!({}),
            action_id: "inc".to_string(),
            intent_id: "i-0".to_string(),
            flow_position: strata_core::FlowPosition {
                node_path: "root".to_string(),
                snapshot_version: 0,
            },
            created_at: 0,
        });

        let err = host.seed("main", waiting).await.unwrap_err();
        assert!(matches!(err, StrataError::InvalidSnapshot(_)));
        assert!(host.snapshot("main").await.is_none());
    }

    #[tokio::test]
    async fn test_preview_does_not_commit() {
        let host = Host::builder(schema()).build().unwrap();
        let result = host.preview("main", Intent::new("inc", json!({}), "i-1")).await.unwrap();
        assert_eq!(result.snapshot.data["count"], json!(1));
        assert!(host.snapshot("main").await.is_none());
    }

    #[test]
    fn test_build_outside_runtime_needs_handle() {
        let err = Host::builder(schema()).build().unwrap_err();
        assert!(matches!(err, StrataError::Configuration(_)));

        let rt = tokio::runtime::Runtime::new().unwrap();
        let host = Host::builder(schema()).runtime(rt.handle().clone()).build().unwrap();
        host.dispatch("main", Intent::new("inc", json!({}), "i-1")).unwrap();
        rt.block_on(host.drain("main"));

        let head = rt.block_on(host.snapshot("main")).unwrap();
        assert_eq!(head.data["count"], json!(1));
    }
}
