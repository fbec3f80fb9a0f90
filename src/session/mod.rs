//! Execution sessions: a network bound to a concrete runtime configuration.
//!
//! State machine:
//!
//! ```text
//! Initializing -> Ready -> Executing -> Ready ... -> TearingDown -> Closed
//!      |                                                  ^
//!      +---------------------- error ---------------------+
//! ```
//!
//! A session owns its staging buffers and its executor. It is not shared
//! across threads directly; [`SessionHandle`] wraps it in a mutex so the
//! dispatcher's worker runs at most one execution at a time.

mod buffer;
pub mod config;
pub mod convert;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;

pub use buffer::{SessionId, TensorBuffer, TensorMap};
pub use config::SessionConfig;

use crate::accelerator::Accelerator;
use crate::error::{ErrorKind, Result, RuntimeError};
use crate::network::{NetworkHandle, TensorDescriptor, TensorLayout};
use crate::platform::{BuildOptions, Executor, RuntimeFactory, TensorView, TensorViewMut};
use crate::telemetry;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Initializing,
    Ready,
    Executing,
    TearingDown,
    Closed,
}

/// Result of [`Session::describe`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionDescription {
    pub id: SessionId,
    pub inputs: Vec<TensorDescriptor>,
    pub outputs: Vec<TensorDescriptor>,
    pub bound_accelerator: Option<Accelerator>,
    pub chain: Vec<Accelerator>,
    pub state: SessionState,
}

/// How an input reaches the executor.
enum Staging {
    /// Host bytes already match the network encoding and shape.
    ZeroCopy,
    /// Same shape, converted into the session's staging buffer.
    Converted,
    /// Read in the session's input layout and transposed into the network's.
    Transposed,
}

pub struct Session {
    id: SessionId,
    network: NetworkHandle,
    config: SessionConfig,
    chain: Vec<Accelerator>,
    factory: Arc<dyn RuntimeFactory>,
    executor: Option<Box<dyn Executor>>,
    bound: Option<Accelerator>,
    outputs: Vec<TensorDescriptor>,
    input_staging: BTreeMap<String, TensorBuffer>,
    output_staging: BTreeMap<String, TensorBuffer>,
    state: SessionState,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("network", &self.network.fingerprint())
            .field("bound", &self.bound)
            .field("state", &self.state)
            .finish()
    }
}

impl Session {
    /// Bind `network` to the first accelerator in the configured chain that
    /// initializes. Fails with `NoAcceleratorAvailable` when none does.
    pub fn open(network: NetworkHandle, config: SessionConfig, factory: Arc<dyn RuntimeFactory>) -> Result<Self> {
        let chain = config.effective_chain()?;
        let outputs = select_outputs(&network, config.output_tensor_names.as_deref())?;
        let id = SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed));

        let input_staging = network
            .inputs()
            .iter()
            .map(|d| (d.name.clone(), TensorBuffer::for_descriptor(d).owned_by(id)))
            .collect();
        let output_staging = outputs
            .iter()
            .map(|d| (d.name.clone(), TensorBuffer::for_descriptor(d).owned_by(id)))
            .collect();

        let mut session = Self {
            id,
            network,
            config,
            chain,
            factory,
            executor: None,
            bound: None,
            outputs,
            input_staging,
            output_staging,
            state: SessionState::Initializing,
        };
        if let Err(e) = session.bind() {
            session.release();
            return Err(e);
        }
        session.state = SessionState::Ready;
        Ok(session)
    }

    fn bind(&mut self) -> Result<()> {
        let options = BuildOptions {
            performance_profile: self.config.performance_profile,
            execution_priority: self.config.execution_priority,
            output_tensor_names: self.outputs.iter().map(|d| d.name.clone()).collect(),
            use_user_buffers: self.config.use_user_buffers,
            init_cache: self.config.init_cache,
        };
        let mut attempts = Vec::with_capacity(self.chain.len());
        for &accelerator in &self.chain {
            if !self.factory.is_runtime_available(accelerator) {
                tracing::warn!(session = %self.id, %accelerator, "runtime not available, trying next");
                attempts.push(format!("{}: not available", accelerator));
                telemetry::record_fallback(accelerator);
                continue;
            }
            match self.factory.build_executor(&self.network, accelerator, &options) {
                Ok(executor) => {
                    tracing::info!(session = %self.id, %accelerator, "session bound");
                    self.executor = Some(executor);
                    self.bound = Some(accelerator);
                    return Ok(());
                }
                Err(e) if e.kind == ErrorKind::InvalidArgument => return Err(e),
                Err(e) => {
                    tracing::warn!(session = %self.id, %accelerator, error = %e, "runtime init failed, trying next");
                    attempts.push(format!("{}: {}", accelerator, e.message));
                    telemetry::record_fallback(accelerator);
                }
            }
        }
        Err(RuntimeError::new(
            ErrorKind::NoAcceleratorAvailable,
            format!("no accelerator initialized [{}]", attempts.join("; ")),
        ))
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn network(&self) -> &NetworkHandle {
        &self.network
    }

    pub fn bound_accelerator(&self) -> Option<Accelerator> {
        self.bound
    }

    pub fn describe(&self) -> SessionDescription {
        SessionDescription {
            id: self.id,
            inputs: self.network.inputs().to_vec(),
            outputs: self.outputs.clone(),
            bound_accelerator: self.bound,
            chain: self.chain.clone(),
            state: self.state,
        }
    }

    /// Bytes held in staging buffers.
    pub fn memory_bytes(&self) -> usize {
        self.input_staging.values().chain(self.output_staging.values()).map(|b| b.len_bytes()).sum()
    }

    /// Execute one request. Missing output keys are allocated from the
    /// descriptor. The cancellation flag is checked once, immediately before
    /// the executor is invoked. Returns the executor time.
    pub fn execute(&mut self, inputs: &TensorMap, outputs: &mut TensorMap, cancel: &AtomicBool) -> Result<Duration> {
        match self.state {
            SessionState::Ready => {}
            SessionState::Closed | SessionState::TearingDown => {
                return Err(RuntimeError::cancelled(format!("{} is closed", self.id)));
            }
            other => {
                return Err(RuntimeError::invalid_argument(format!("{} is {:?}", self.id, other)));
            }
        }
        let plan = self.validate(inputs, outputs)?;
        for desc in &self.outputs {
            outputs.entry(desc.name.clone()).or_insert_with(|| TensorBuffer::for_descriptor(desc));
        }
        if self.executor.is_none() {
            self.bind()?;
        }

        self.state = SessionState::Executing;
        let result = self.invoke(inputs, outputs, &plan, cancel);
        self.state = SessionState::Ready;
        result
    }

    /// Execute with every selected output allocated fresh; never cancelled.
    pub fn run(&mut self, inputs: &TensorMap) -> Result<TensorMap> {
        let mut outputs = TensorMap::new();
        self.execute(inputs, &mut outputs, &AtomicBool::new(false))?;
        Ok(outputs)
    }

    fn validate(&self, inputs: &TensorMap, outputs: &TensorMap) -> Result<Vec<Staging>> {
        for name in inputs.keys() {
            if self.network.input(name).is_none() {
                return Err(RuntimeError::invalid_argument("unknown input tensor").with_tensor(name));
            }
        }
        for name in outputs.keys() {
            if !self.outputs.iter().any(|d| &d.name == name) {
                return Err(RuntimeError::invalid_argument("unknown output tensor").with_tensor(name));
            }
        }
        let mut plan = Vec::with_capacity(self.network.inputs().len());
        for desc in self.network.inputs() {
            let buf = inputs
                .get(&desc.name)
                .ok_or_else(|| RuntimeError::invalid_argument("missing input tensor").with_tensor(&desc.name))?;
            plan.push(self.input_staging_for(desc, buf)?);
        }
        for (name, buf) in outputs {
            if let Some(desc) = self.outputs.iter().find(|d| &d.name == name) {
                if buf.dims() != desc.dims.as_slice() {
                    return Err(shape_error(desc, buf));
                }
            }
        }
        Ok(plan)
    }

    /// The configured input layout decides: when it differs from the
    /// network's, a rank-4 input is always transposed, even if both orders
    /// give the same dims.
    fn input_staging_for(&self, desc: &TensorDescriptor, buf: &TensorBuffer) -> Result<Staging> {
        if let Some(host_dims) = self.transposed_dims(desc) {
            if buf.dims() == host_dims.as_slice() {
                return Ok(Staging::Transposed);
            }
            return Err(RuntimeError::shape_mismatch(format!(
                "expected {:?} in {}, got {:?}",
                host_dims,
                self.config.input_layout,
                buf.dims()
            ))
            .with_tensor(&desc.name));
        }
        if buf.dims() == desc.dims.as_slice() {
            return Ok(if buf.encoding() == desc.encoding { Staging::ZeroCopy } else { Staging::Converted });
        }
        Err(shape_error(desc, buf))
    }

    /// Host dims of a rank-4 input when the session's input layout differs
    /// from the network's. Undeclared layouts are NCHW.
    fn transposed_dims(&self, desc: &TensorDescriptor) -> Option<Vec<usize>> {
        if desc.rank() != 4 {
            return None;
        }
        let declared = desc.layout.unwrap_or_default();
        let host = self.config.input_layout;
        if declared == host {
            return None;
        }
        let dims = [desc.dims[0], desc.dims[1], desc.dims[2], desc.dims[3]];
        Some(host.from_nchw(declared.to_nchw(dims)).to_vec())
    }

    fn invoke(
        &mut self,
        inputs: &TensorMap,
        outputs: &mut TensorMap,
        plan: &[Staging],
        cancel: &AtomicBool,
    ) -> Result<Duration> {
        let network = Arc::clone(&self.network);
        let host_layout = self.config.input_layout;

        // Stage inputs that need conversion or transposition.
        for (desc, staging) in network.inputs().iter().zip(plan) {
            let transpose = match staging {
                Staging::ZeroCopy => continue,
                Staging::Converted => false,
                Staging::Transposed => true,
            };
            let (Some(src), Some(dst)) = (inputs.get(&desc.name), self.input_staging.get_mut(&desc.name)) else {
                continue;
            };
            stage_input(desc, src, dst, transpose.then_some(host_layout));
        }

        let input_views: Vec<TensorView<'_>> = network
            .inputs()
            .iter()
            .zip(plan)
            .filter_map(|(desc, staging)| {
                let data = match staging {
                    Staging::ZeroCopy => inputs.get(&desc.name)?.as_bytes(),
                    Staging::Converted | Staging::Transposed => self.input_staging.get(&desc.name)?.as_bytes(),
                };
                Some(TensorView { descriptor: desc, data })
            })
            .collect();

        let mut converted = Vec::new();
        let mut host_out: BTreeMap<&str, &mut TensorBuffer> =
            outputs.iter_mut().map(|(k, v)| (k.as_str(), v)).collect();
        let mut staging_out: BTreeMap<&str, &mut TensorBuffer> =
            self.output_staging.iter_mut().map(|(k, v)| (k.as_str(), v)).collect();
        let mut output_views = Vec::with_capacity(self.outputs.len());
        for desc in &self.outputs {
            let Some(host) = host_out.remove(desc.name.as_str()) else { continue };
            if host.encoding() == desc.encoding {
                output_views.push(TensorViewMut { descriptor: desc, data: host.as_bytes_mut() });
            } else if let Some(staged) = staging_out.remove(desc.name.as_str()) {
                converted.push(desc.name.clone());
                output_views.push(TensorViewMut { descriptor: desc, data: staged.as_bytes_mut() });
            }
        }

        if cancel.load(Ordering::Acquire) {
            return Err(RuntimeError::cancelled("cancelled before execution"));
        }
        let executor = self
            .executor
            .as_mut()
            .ok_or_else(|| RuntimeError::executor_failure("session has no bound runtime"))?;
        let started = Instant::now();
        executor.execute(&input_views, &mut output_views)?;
        let elapsed = started.elapsed();
        drop(output_views);
        drop(input_views);
        drop(staging_out);
        drop(host_out);

        for name in converted {
            if let (Some(staged), Some(host)) = (self.output_staging.get(&name), outputs.get_mut(&name)) {
                let src_encoding = staged.encoding();
                let dst_encoding = host.encoding();
                convert::convert(src_encoding, staged.as_bytes(), dst_encoding, host.as_bytes_mut());
            }
        }
        Ok(elapsed)
    }

    /// Release the runtime binding but keep staging buffers; the next
    /// execution rebinds along the accelerator chain.
    pub fn reset(&mut self) {
        if self.executor.take().is_some() {
            tracing::debug!(session = %self.id, "runtime binding released");
        }
        self.bound = None;
    }

    /// Return to `Ready` after an execution unwound, dropping the executor
    /// so the next request rebinds.
    pub(crate) fn recover_after_panic(&mut self) {
        if self.state == SessionState::Executing {
            self.state = SessionState::Ready;
        }
        self.reset();
    }

    /// Release buffers and the runtime binding. Idempotent.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::TearingDown;
        self.release();
        tracing::info!(session = %self.id, "session closed");
    }

    fn release(&mut self) {
        self.executor = None;
        self.bound = None;
        self.input_staging.clear();
        self.output_staging.clear();
        self.state = SessionState::Closed;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

fn select_outputs(network: &NetworkHandle, names: Option<&[String]>) -> Result<Vec<TensorDescriptor>> {
    let Some(names) = names else {
        return Ok(network.outputs().to_vec());
    };
    if names.is_empty() {
        return Err(RuntimeError::invalid_argument("output_tensor_names is empty"));
    }
    let mut selected = Vec::with_capacity(names.len());
    for name in names {
        let desc = network
            .output(name)
            .ok_or_else(|| RuntimeError::invalid_argument("unknown output tensor").with_tensor(name))?;
        if !selected.iter().any(|d: &TensorDescriptor| d.name == desc.name) {
            selected.push(desc.clone());
        }
    }
    Ok(selected)
}

fn shape_error(desc: &TensorDescriptor, buf: &TensorBuffer) -> RuntimeError {
    RuntimeError::shape_mismatch(format!("expected {:?}, got {:?}", desc.dims, buf.dims())).with_tensor(&desc.name)
}

/// `transpose_from` is the host layout when the input must be transposed.
fn stage_input(desc: &TensorDescriptor, src: &TensorBuffer, dst: &mut TensorBuffer, transpose_from: Option<TensorLayout>) {
    let Some(host_layout) = transpose_from else {
        convert::convert(src.encoding(), src.as_bytes(), desc.encoding, dst.as_bytes_mut());
        return;
    };
    let declared = desc.layout.unwrap_or_default();
    let d = src.dims();
    let dims = [d[0], d[1], d[2], d[3]];
    let elem = src.encoding().element_size();
    let mut transposed = vec![0u8; src.len_bytes()];
    convert::transpose_4d(src.as_bytes(), dims, host_layout, declared, elem, &mut transposed);
    convert::convert(src.encoding(), &transposed, desc.encoding, dst.as_bytes_mut());
}

/// Shared, lockable session. Cloning shares the same session.
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    inner: Arc<Mutex<Session>>,
}

impl SessionHandle {
    pub fn new(session: Session) -> Self {
        Self { id: session.id(), inner: Arc::new(Mutex::new(session)) }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Lock the session. Blocks while the worker is executing on it.
    pub fn lock(&self) -> MutexGuard<'_, Session> {
        self.inner.lock()
    }

    pub fn describe(&self) -> SessionDescription {
        self.inner.lock().describe()
    }

    /// Close the session; waits for an in-flight execution to finish.
    pub fn close(&self) {
        self.inner.lock().close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().state() == SessionState::Closed
    }

    pub fn downgrade(&self) -> WeakSession {
        WeakSession { id: self.id, inner: Arc::downgrade(&self.inner) }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SessionHandle").field(&self.id).finish()
    }
}

/// Non-owning session reference carried by requests.
#[derive(Clone)]
pub struct WeakSession {
    id: SessionId,
    inner: Weak<Mutex<Session>>,
}

impl WeakSession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn upgrade(&self) -> Option<SessionHandle> {
        self.inner.upgrade().map(|inner| SessionHandle { id: self.id, inner })
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
