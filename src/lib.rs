//! snpe-rt: on-device SNPE inference runtime
//!
//! Loads serialized DLC networks, binds them to the best available hardware
//! runtime with a documented fallback order, and executes requests on a
//! dedicated worker thread so the host's frame loop never blocks.
//!
//! # Components
//!
//! - **Platform loader** ([`platform`]): resolves the SNPE bundle (or the
//!   pure-Rust reference platform) once per process.
//! - **Runtime probe** ([`probe`]): which accelerators are usable, sorted by
//!   performance preference.
//! - **Network container** ([`network`]): immutable, fingerprinted DLC image.
//! - **Execution session** ([`session`]): one network bound to one runtime,
//!   with staging buffers for layout and encoding conversion.
//! - **Request dispatcher** ([`scheduler`]): bounded FIFO, single worker,
//!   completions released in submission order.
//!
//! # Threading
//!
//! The host submits and drains from its own thread(s). Exactly one worker
//! thread per dispatcher touches sessions during execution. Nothing here
//! blocks the host except [`Runtime::shutdown`], which joins the worker.

pub mod accelerator;
pub mod cli;
pub mod config;
pub mod error;
pub mod network;
pub mod pipeline;
pub mod platform;
pub mod preprocess;
pub mod probe;
pub mod scheduler;
pub mod session;
pub mod telemetry;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

pub use accelerator::{Accelerator, ExecutionPriority, PerformanceProfile};
pub use error::{ErrorKind, Result, RuntimeError};
pub use network::{NetworkContainer, NetworkHandle, NetworkSource, TensorDescriptor};
pub use probe::AvailabilityList;
pub use scheduler::{
    CancelOutcome, CompletionRecord, CompletionSink, CompletionStatus, Dispatcher, DispatcherConfig,
    DispatcherState, Request,
};
pub use session::{Session, SessionConfig, SessionDescription, SessionHandle, SessionId, TensorBuffer, TensorMap};

use config::EnvConfig;
use platform::{Platform, PlatformSource, RuntimeFactory};
use telemetry::StatsSnapshot;

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub platform: PlatformSource,
    pub dispatcher: DispatcherConfig,
    /// Used by [`Runtime::open_session`].
    pub session_defaults: SessionConfig,
    pub probe_timeout: Duration,
    /// Completions between periodic stats lines in [`Runtime::tick`].
    pub stats_interval: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::from(&EnvConfig::default())
    }
}

impl From<&EnvConfig> for RuntimeConfig {
    fn from(env: &EnvConfig) -> Self {
        Self {
            platform: env.platform_source(),
            dispatcher: DispatcherConfig { capacity: env.queue_capacity },
            session_defaults: env.session_defaults(),
            probe_timeout: env.probe_timeout,
            stats_interval: env.stats_interval.max(1),
        }
    }
}

impl RuntimeConfig {
    /// Build from `SNPE_RT_*` variables and the optional config file.
    pub fn from_env() -> Self {
        Self::from(&config::load())
    }
}

/// Serializable snapshot of the whole runtime.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeReport {
    pub platform_version: String,
    pub availability: AvailabilityList,
    pub dispatcher: DispatcherState,
    pub capacity: usize,
    pub queue_depth: usize,
    pub outstanding: usize,
    pub stats: StatsSnapshot,
    pub sessions: Vec<SessionDescription>,
}

/// The runtime instance: platform, probe result, dispatcher and open sessions.
pub struct Runtime {
    platform: Arc<dyn Platform>,
    factory: Arc<dyn RuntimeFactory>,
    availability: RwLock<AvailabilityList>,
    dispatcher: Dispatcher,
    sessions: DashMap<SessionId, SessionHandle>,
    session_defaults: SessionConfig,
    probe_timeout: Duration,
    stats_interval: u64,
    drained: AtomicU64,
}

impl Runtime {
    /// Open the configured platform and start the dispatcher.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let platform = platform::open(&config.platform)?;
        Self::with_platform(platform, config)
    }

    /// Start on an already resolved platform. A probe timeout is logged and
    /// leaves the availability list empty; sessions still bind on their own.
    pub fn with_platform(platform: Arc<dyn Platform>, config: RuntimeConfig) -> Result<Self> {
        let factory = platform.create_factory();
        let availability = match probe::probe(Arc::clone(&factory), config.probe_timeout) {
            Ok(list) => list,
            Err(e) if e.kind == ErrorKind::ProbeTimeout => {
                tracing::warn!(error = %e, "starting without availability information");
                AvailabilityList::default()
            }
            Err(e) => return Err(e),
        };
        let dispatcher = Dispatcher::new(config.dispatcher)?;
        tracing::info!(
            platform = %platform.version_string(),
            available = ?availability.as_slice(),
            capacity = dispatcher.capacity(),
            "runtime started"
        );
        Ok(Self {
            platform,
            factory,
            availability: RwLock::new(availability),
            dispatcher,
            sessions: DashMap::new(),
            session_defaults: config.session_defaults,
            probe_timeout: config.probe_timeout,
            stats_interval: config.stats_interval.max(1),
            drained: AtomicU64::new(0),
        })
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    pub fn availability(&self) -> AvailabilityList {
        self.availability.read().clone()
    }

    /// Query accelerators again and replace the cached list.
    pub fn reprobe(&self) -> Result<AvailabilityList> {
        let list = probe::probe(Arc::clone(&self.factory), self.probe_timeout)?;
        *self.availability.write() = list.clone();
        Ok(list)
    }

    pub fn load_network(&self, source: impl Into<NetworkSource>) -> Result<NetworkHandle> {
        NetworkContainer::load(source)
    }

    /// Open a session with the runtime's default configuration.
    pub fn open_session(&self, network: NetworkHandle) -> Result<SessionHandle> {
        self.open_session_with(network, self.session_defaults.clone())
    }

    pub fn open_session_with(&self, network: NetworkHandle, config: SessionConfig) -> Result<SessionHandle> {
        let session = Session::open(network, config, Arc::clone(&self.factory))?;
        let handle = SessionHandle::new(session);
        self.sessions.insert(handle.id(), handle.clone());
        Ok(handle)
    }

    /// Close and forget a session. Queued requests for it complete as
    /// `Cancelled`. Closing an already closed session is a no-op.
    pub fn close_session(&self, id: SessionId) {
        match self.sessions.remove(&id) {
            Some((_, handle)) => handle.close(),
            None => tracing::debug!(session = %id, "close of unknown or closed session ignored"),
        }
    }

    pub fn session(&self, id: SessionId) -> Option<SessionHandle> {
        self.sessions.get(&id).map(|entry| entry.value().clone())
    }

    pub fn describe_session(&self, id: SessionId) -> Result<SessionDescription> {
        self.session(id)
            .map(|handle| handle.describe())
            .ok_or_else(|| RuntimeError::invalid_argument(format!("unknown {}", id)))
    }

    /// Submit an inference on `session`. Outputs missing from `outputs` are
    /// allocated by the session.
    pub fn submit(
        &self,
        session: SessionId,
        inputs: TensorMap,
        outputs: TensorMap,
        sink: Option<Arc<dyn CompletionSink>>,
    ) -> Result<u64> {
        let handle = self
            .session(session)
            .ok_or_else(|| RuntimeError::invalid_argument(format!("unknown {}", session)))?;
        let mut request = Request::new(&handle, inputs).with_outputs(outputs);
        if let Some(sink) = sink {
            request = request.with_sink(sink);
        }
        self.dispatcher.submit(request)
    }

    pub fn submit_request(&self, request: Request) -> Result<u64> {
        self.dispatcher.submit(request)
    }

    pub fn cancel(&self, sequence_id: u64) -> CancelOutcome {
        self.dispatcher.cancel(sequence_id)
    }

    pub fn drain_completions(&self, max: usize) -> Vec<CompletionRecord> {
        self.dispatcher.drain_completions(max)
    }

    pub async fn next_completion(&self, timeout: Duration) -> Option<CompletionRecord> {
        self.dispatcher.next_completion(timeout).await
    }

    /// Host frame hook: drain up to `max` completions and log running
    /// statistics every `stats_interval` drained completions.
    pub fn tick(&self, max: usize) -> Vec<CompletionRecord> {
        let records = self.dispatcher.drain_completions(max);
        if records.is_empty() {
            return records;
        }
        let before = self.drained.fetch_add(records.len() as u64, Ordering::Relaxed);
        let after = before + records.len() as u64;
        if after / self.stats_interval > before / self.stats_interval {
            let stats = self.dispatcher.stats();
            tracing::info!(
                completed = stats.completed,
                cancelled = stats.cancelled,
                failed = stats.failed,
                rejected = stats.rejected,
                avg_ms = stats.latency_ms.average(),
                max_ms = stats.latency_ms.max,
                "inference stats"
            );
        }
        records
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.dispatcher.stats()
    }

    pub fn report(&self) -> RuntimeReport {
        let mut sessions: Vec<SessionDescription> =
            self.sessions.iter().map(|entry| entry.value().describe()).collect();
        sessions.sort_by_key(|d| d.id);
        RuntimeReport {
            platform_version: self.platform.version_string(),
            availability: self.availability(),
            dispatcher: self.dispatcher.state(),
            capacity: self.dispatcher.capacity(),
            queue_depth: self.dispatcher.queue_depth(),
            outstanding: self.dispatcher.outstanding(),
            stats: self.dispatcher.stats(),
            sessions,
        }
    }

    /// Stop the dispatcher, then close every session. Idempotent.
    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
        let handles: Vec<SessionHandle> = self.sessions.iter().map(|entry| entry.value().clone()).collect();
        self.sessions.clear();
        for handle in handles {
            handle.close();
        }
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("platform", &self.platform.version_string())
            .field("sessions", &self.sessions.len())
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

static RUNTIME: Mutex<Option<Arc<Runtime>>> = parking_lot::const_mutex(None);

/// Initialize the process-wide runtime from the environment configuration.
/// Returns the existing instance when already initialized.
pub fn init_runtime() -> Result<Arc<Runtime>> {
    let mut slot = RUNTIME.lock();
    if let Some(runtime) = slot.as_ref() {
        return Ok(Arc::clone(runtime));
    }
    let env = config::load();
    let platform = platform::load_platform()?;
    let runtime = Arc::new(Runtime::with_platform(platform, RuntimeConfig::from(&env))?);
    *slot = Some(Arc::clone(&runtime));
    Ok(runtime)
}

/// Initialize the process-wide runtime with an explicit configuration.
pub fn init_runtime_with(config: RuntimeConfig) -> Result<Arc<Runtime>> {
    let mut slot = RUNTIME.lock();
    if let Some(runtime) = slot.as_ref() {
        return Ok(Arc::clone(runtime));
    }
    let platform = platform::init_platform(&config.platform)?;
    let runtime = Arc::new(Runtime::with_platform(platform, config)?);
    *slot = Some(Arc::clone(&runtime));
    Ok(runtime)
}

/// The process-wide runtime, if initialized.
pub fn runtime() -> Option<Arc<Runtime>> {
    RUNTIME.lock().clone()
}

/// Shut down and drop the process-wide runtime and platform. Idempotent.
pub fn shutdown_runtime() {
    let runtime = RUNTIME.lock().take();
    if let Some(runtime) = runtime {
        runtime.shutdown();
        tracing::info!("runtime shut down");
    }
    platform::shutdown_platform();
}

pub fn is_initialized() -> bool {
    RUNTIME.lock().is_some()
}
