//! Process-wide runtime lifecycle, host tick and reports.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{drain_n, runtime, small_inputs, small_network};
use snpe_rt::platform::{self, DeviceProfile, PlatformSource};
use snpe_rt::{Accelerator, CompletionRecord, CompletionSink, ErrorKind, RuntimeConfig, TensorMap};

// Serializes tests touching the process-wide runtime.
static GLOBAL_LOCK: Mutex<()> = Mutex::new(());

fn reference_config() -> RuntimeConfig {
    RuntimeConfig { platform: PlatformSource::Reference(DeviceProfile::default()), ..RuntimeConfig::default() }
}

#[test]
fn test_init_runtime_is_idempotent() {
    let _lock = GLOBAL_LOCK.lock().unwrap();
    snpe_rt::shutdown_runtime();
    assert!(!snpe_rt::is_initialized());

    let first = snpe_rt::init_runtime_with(reference_config()).unwrap();
    let second = snpe_rt::init_runtime_with(reference_config()).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(snpe_rt::is_initialized());
    assert!(platform::is_platform_initialized());

    snpe_rt::shutdown_runtime();
    assert!(!snpe_rt::is_initialized());
    assert!(!platform::is_platform_initialized());
    assert!(snpe_rt::runtime().is_none());
    snpe_rt::shutdown_runtime();
}

#[test]
fn test_global_runtime_rejects_after_shutdown() {
    let _lock = GLOBAL_LOCK.lock().unwrap();
    let rt = snpe_rt::init_runtime_with(reference_config()).unwrap();
    let session = rt.open_session(small_network()).unwrap();
    snpe_rt::shutdown_runtime();

    let err = rt.submit(session.id(), small_inputs(1.0), TensorMap::new(), None).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidArgument, "sessions are closed and forgotten on shutdown");
    assert!(session.is_closed());
}

#[test]
fn test_tick_drains_in_order() {
    let (rt, _) = runtime(DeviceProfile::cpu_only(), 8);
    let session = rt.open_session(small_network()).unwrap();
    for i in 0..5 {
        rt.submit(session.id(), small_inputs(i as f32), TensorMap::new(), None).unwrap();
    }
    std::thread::sleep(Duration::from_millis(50));
    let mut records = rt.tick(2);
    assert!(records.len() <= 2);
    records.extend(drain_n(&rt, 5 - records.len()));
    let ids: Vec<u64> = records.iter().map(|r| r.sequence_id).collect();
    assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    assert_eq!(rt.stats().completed, 5);
}

#[derive(Default)]
struct Collect(parking_lot::Mutex<Vec<u64>>);

impl CompletionSink for Collect {
    fn post_result(&self, record: CompletionRecord) {
        self.0.lock().push(record.sequence_id);
    }
}

#[test]
fn test_custom_sink_receives_completions() {
    let (rt, _) = runtime(DeviceProfile::cpu_only(), 2);
    let session = rt.open_session(small_network()).unwrap();
    let sink = Arc::new(Collect::default());
    rt.submit(session.id(), small_inputs(1.0), TensorMap::new(), Some(sink.clone())).unwrap();
    rt.submit(session.id(), small_inputs(2.0), TensorMap::new(), Some(sink.clone())).unwrap();
    rt.dispatcher().shutdown();
    assert_eq!(*sink.0.lock(), vec![0, 1]);
    assert!(rt.drain_completions(4).is_empty());
}

#[test]
fn test_report_and_reprobe() {
    let profile = DeviceProfile::default().with_available([Accelerator::Cpu, Accelerator::Dsp]);
    let (rt, _) = runtime(profile, 4);
    assert_eq!(rt.availability().as_slice(), &[Accelerator::Dsp, Accelerator::Cpu]);
    assert_eq!(rt.reprobe().unwrap().best(), Some(Accelerator::Dsp));

    let session = rt.open_session(small_network()).unwrap();
    rt.submit(session.id(), small_inputs(1.0), TensorMap::new(), None).unwrap();
    drain_n(&rt, 1);

    let report = rt.report();
    assert_eq!(report.capacity, 4);
    assert_eq!(report.sessions.len(), 1);
    assert_eq!(report.stats.completed, 1);
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["availability"], serde_json::json!(["DSP", "CPU"]));
}

#[test]
fn test_probe_timeout_leaves_availability_empty() {
    let profile = DeviceProfile::cpu_only().with_probe_delay(Duration::from_millis(100));
    let config = RuntimeConfig { probe_timeout: Duration::from_millis(10), ..RuntimeConfig::default() };
    let platform: Arc<dyn platform::Platform> = Arc::new(platform::ReferencePlatform::new(profile));
    let rt = snpe_rt::Runtime::with_platform(platform, config).unwrap();
    assert!(rt.availability().is_empty());
    let session = rt.open_session(small_network()).unwrap();
    assert_eq!(session.describe().bound_accelerator, Some(Accelerator::Cpu));
}
