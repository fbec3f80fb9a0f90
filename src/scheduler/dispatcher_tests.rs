//! Tests for queue accounting, sinks and shutdown.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::*;
use crate::error::ErrorKind;
use crate::network::{DlcBuilder, ElementEncoding, NetworkContainer, TensorDescriptor};
use crate::platform::{DeviceProfile, Platform, ReferencePlatform};
use crate::session::{Session, SessionConfig, SessionHandle, TensorBuffer, TensorMap};

fn session(profile: DeviceProfile) -> SessionHandle {
    let bytes = DlcBuilder::new()
        .input(TensorDescriptor::new("in", vec![2], ElementEncoding::Float32))
        .output(TensorDescriptor::new("out", vec![2], ElementEncoding::Float32))
        .build()
        .unwrap();
    let network = NetworkContainer::load(bytes).unwrap();
    let factory = ReferencePlatform::new(profile).create_factory();
    SessionHandle::new(Session::open(network, SessionConfig::default(), factory).unwrap())
}

fn request(session: &SessionHandle, value: f32) -> Request {
    let mut inputs = TensorMap::new();
    inputs.insert("in".into(), TensorBuffer::from_f32("in", vec![2], &[value, value]).unwrap());
    Request::new(session, inputs)
}

fn dispatcher(capacity: usize) -> Dispatcher {
    Dispatcher::new(DispatcherConfig { capacity }).unwrap()
}

fn wait_for(d: &Dispatcher, n: usize) -> Vec<CompletionRecord> {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut out = Vec::new();
    while out.len() < n && Instant::now() < deadline {
        out.extend(d.drain_completions(n - out.len()));
        std::thread::sleep(Duration::from_millis(1));
    }
    out
}

#[derive(Default)]
struct Collect(Mutex<Vec<u64>>);

impl CompletionSink for Collect {
    fn post_result(&self, record: CompletionRecord) {
        self.0.lock().push(record.sequence_id);
    }
}

#[test]
fn test_undrained_completions_count_against_capacity() {
    let s = session(DeviceProfile::cpu_only());
    let d = dispatcher(1);
    assert_eq!(d.submit(request(&s, 1.0)).unwrap(), 0);
    std::thread::sleep(Duration::from_millis(50));
    let err = d.submit(request(&s, 2.0)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::QueueFull);

    assert_eq!(wait_for(&d, 1).len(), 1);
    assert_eq!(d.outstanding(), 0);
    assert_eq!(d.submit(request(&s, 3.0)).unwrap(), 1);
}

#[test]
fn test_custom_sink_releases_capacity() {
    let s = session(DeviceProfile::cpu_only());
    let d = dispatcher(1);
    let sink = Arc::new(Collect::default());
    for _ in 0..3 {
        let deadline = Instant::now() + Duration::from_secs(5);
        d.submit_with_deadline(request(&s, 1.0).with_sink(sink.clone()), deadline).unwrap();
    }
    d.shutdown();
    assert_eq!(*sink.0.lock(), vec![0, 1, 2]);
    assert!(d.drain_completions(10).is_empty());
}

#[test]
fn test_deadline_expires_when_full() {
    let s = session(DeviceProfile::cpu_only().with_latency(Duration::from_millis(200)));
    let d = dispatcher(1);
    d.submit(request(&s, 1.0)).unwrap();
    let started = Instant::now();
    let err = d
        .submit_with_deadline(request(&s, 2.0), Instant::now() + Duration::from_millis(30))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::QueueFull);
    assert!(started.elapsed() >= Duration::from_millis(25));
    assert_eq!(d.stats().rejected, 1);
}

#[test]
fn test_dropped_session_rejected_at_submit() {
    let s = session(DeviceProfile::cpu_only());
    let req = request(&s, 1.0);
    drop(s);
    let d = dispatcher(4);
    let err = d.submit(req).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidArgument);
}

#[test]
fn test_session_dropped_while_queued_completes_cancelled() {
    let slow = session(DeviceProfile::cpu_only().with_latency(Duration::from_millis(100)));
    let other = session(DeviceProfile::cpu_only());
    let d = dispatcher(4);
    d.submit(request(&slow, 1.0)).unwrap();
    d.submit(request(&other, 1.0)).unwrap();
    drop(other);
    let records = wait_for(&d, 2);
    assert_eq!(records[0].status, CompletionStatus::Ok);
    assert_eq!(records[1].status, CompletionStatus::Cancelled);
}

#[test]
fn test_cancel_unknown_is_not_found() {
    let d = dispatcher(2);
    assert_eq!(d.cancel(42), CancelOutcome::NotFound);
}

#[test]
fn test_executor_failure_does_not_poison() {
    let failing = session(DeviceProfile::cpu_only().with_failing_exec([crate::Accelerator::Cpu]));
    let healthy = session(DeviceProfile::cpu_only());
    let d = dispatcher(4);
    d.submit(request(&failing, 1.0)).unwrap();
    d.submit(request(&healthy, 2.0)).unwrap();
    let records = wait_for(&d, 2);
    assert_eq!(records[0].status, CompletionStatus::Failed(ErrorKind::ExecutorFailure));
    assert_eq!(records[0].error.as_ref().and_then(|e| e.sequence_id), Some(0));
    assert!(records[1].is_ok());
    assert_eq!(records[1].outputs["out"].to_f32(), vec![2.0, 2.0]);
    assert_eq!(d.stats().failed, 1);
}

struct PanickingSink;

impl CompletionSink for PanickingSink {
    fn post_result(&self, _record: CompletionRecord) {
        panic!("sink rejected record");
    }
}

#[test]
fn test_panicking_sink_does_not_stop_worker() {
    let s = session(DeviceProfile::cpu_only());
    let d = dispatcher(2);
    assert_eq!(d.submit(request(&s, 1.0).with_sink(Arc::new(PanickingSink))).unwrap(), 0);
    assert_eq!(d.submit(request(&s, 2.0)).unwrap(), 1);

    let records = wait_for(&d, 1);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].sequence_id, 1);
    assert_eq!(records[0].outputs["out"].to_f32(), vec![2.0, 2.0]);
    assert_eq!(d.outstanding(), 0);
    assert_eq!(d.submit(request(&s, 3.0)).unwrap(), 2);
    assert_eq!(wait_for(&d, 1).len(), 1);
}

struct PanicFactory;

struct PanicExecutor;

impl crate::platform::RuntimeFactory for PanicFactory {
    fn is_runtime_available(&self, accelerator: crate::Accelerator) -> bool {
        accelerator == crate::Accelerator::Cpu
    }

    fn build_executor(
        &self,
        _network: &NetworkContainer,
        _accelerator: crate::Accelerator,
        _options: &crate::platform::BuildOptions,
    ) -> crate::Result<Box<dyn crate::platform::Executor>> {
        Ok(Box::new(PanicExecutor))
    }
}

impl crate::platform::Executor for PanicExecutor {
    fn accelerator(&self) -> crate::Accelerator {
        crate::Accelerator::Cpu
    }

    fn execute(
        &mut self,
        _inputs: &[crate::platform::TensorView<'_>],
        _outputs: &mut [crate::platform::TensorViewMut<'_>],
    ) -> crate::Result<()> {
        panic!("driver fault");
    }
}

#[test]
fn test_executor_panic_fails_request_only() {
    let bytes = DlcBuilder::new()
        .input(TensorDescriptor::new("in", vec![2], ElementEncoding::Float32))
        .output(TensorDescriptor::new("out", vec![2], ElementEncoding::Float32))
        .build()
        .unwrap();
    let network = NetworkContainer::load(bytes).unwrap();
    let faulty = SessionHandle::new(Session::open(network, SessionConfig::default(), Arc::new(PanicFactory)).unwrap());
    let healthy = session(DeviceProfile::cpu_only());
    let d = dispatcher(4);

    d.submit(request(&faulty, 1.0)).unwrap();
    d.submit(request(&healthy, 2.0)).unwrap();
    d.submit(request(&faulty, 3.0)).unwrap();
    let records = wait_for(&d, 3);
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].status, CompletionStatus::Failed(ErrorKind::ExecutorFailure));
    assert!(records[0].error.as_ref().unwrap().message.contains("driver fault"));
    assert!(records[1].is_ok());
    assert_eq!(records[2].status, CompletionStatus::Failed(ErrorKind::ExecutorFailure));
    assert_eq!(d.outstanding(), 0);
}

#[test]
fn test_state_transitions() {
    let d = dispatcher(2);
    assert_eq!(d.state(), DispatcherState::Running);
    d.shutdown();
    assert_eq!(d.state(), DispatcherState::Stopped);
    assert!(!d.is_accepting());
    d.shutdown();
    assert_eq!(d.state(), DispatcherState::Stopped);
}

#[tokio::test]
async fn test_next_completion_returns_none_after_stop() {
    let d = dispatcher(2);
    d.shutdown();
    assert!(d.next_completion(Duration::from_secs(5)).await.is_none());
}
