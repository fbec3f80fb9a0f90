use super::*;
use crate::network::{DlcBuilder, ElementEncoding, NetworkContainer};
use crate::platform::{DeviceProfile, Platform, ReferencePlatform};

fn identity_network() -> NetworkHandle {
    let bytes = DlcBuilder::new()
        .input(TensorDescriptor::new("x", vec![1, 4], ElementEncoding::Float32))
        .output(TensorDescriptor::new("y", vec![1, 4], ElementEncoding::Float32))
        .output(TensorDescriptor::new("z", vec![1, 2], ElementEncoding::Float32))
        .payload(b"graph".to_vec())
        .build()
        .unwrap();
    NetworkContainer::load(bytes).unwrap()
}

fn factory(profile: DeviceProfile) -> Arc<dyn RuntimeFactory> {
    ReferencePlatform::new(profile).create_factory()
}

fn inputs(values: &[f32]) -> TensorMap {
    let mut map = TensorMap::new();
    map.insert("x".into(), TensorBuffer::from_f32("x", vec![1, 4], values).unwrap());
    map
}

#[test]
fn test_open_binds_first_available() {
    let config = SessionConfig::default().with_accelerators([Accelerator::Htp, Accelerator::Gpu]);
    let session = Session::open(identity_network(), config, factory(DeviceProfile::default())).unwrap();
    assert_eq!(session.bound_accelerator(), Some(Accelerator::Gpu));
    assert_eq!(session.state(), SessionState::Ready);
}

#[test]
fn test_open_falls_back_past_failing_init() {
    let profile = DeviceProfile::all_accelerators().with_failing_init([Accelerator::Dsp]);
    let config = SessionConfig::default().with_accelerators([Accelerator::Dsp]);
    let session = Session::open(identity_network(), config, factory(profile)).unwrap();
    assert_eq!(session.bound_accelerator(), Some(Accelerator::Cpu));
}

#[test]
fn test_open_without_fallback_fails() {
    let config = SessionConfig::default().with_accelerators([Accelerator::Htp]).with_cpu_fallback(false);
    let err = Session::open(identity_network(), config, factory(DeviceProfile::cpu_only())).unwrap_err();
    assert_eq!(err.kind, ErrorKind::NoAcceleratorAvailable);
}

#[test]
fn test_unknown_output_name_rejected() {
    let config = SessionConfig::default().with_outputs(["nope"]);
    let err = Session::open(identity_network(), config, factory(DeviceProfile::default())).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidArgument);
    assert_eq!(err.tensor.as_deref(), Some("nope"));
}

#[test]
fn test_run_identity() {
    let mut session =
        Session::open(identity_network(), SessionConfig::default(), factory(DeviceProfile::cpu_only())).unwrap();
    let out = session.run(&inputs(&[1.0, 2.0, 3.0, 4.0])).unwrap();
    assert_eq!(out["y"].to_f32(), vec![1.0, 2.0, 3.0, 4.0]);
    assert_eq!(out["z"].to_f32(), vec![1.0, 2.0]);
}

#[test]
fn test_output_subset_only_allocates_selected() {
    let config = SessionConfig::default().with_outputs(["z"]);
    let mut session = Session::open(identity_network(), config, factory(DeviceProfile::cpu_only())).unwrap();
    let out = session.run(&inputs(&[5.0, 6.0, 7.0, 8.0])).unwrap();
    assert_eq!(out.keys().collect::<Vec<_>>(), vec!["z"]);
    assert_eq!(session.describe().outputs.len(), 1);
}

#[test]
fn test_missing_input_rejected() {
    let mut session =
        Session::open(identity_network(), SessionConfig::default(), factory(DeviceProfile::cpu_only())).unwrap();
    let err = session.run(&TensorMap::new()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidArgument);
    assert_eq!(err.tensor.as_deref(), Some("x"));
    assert_eq!(session.state(), SessionState::Ready);
}

#[test]
fn test_shape_mismatch_leaves_outputs_untouched() {
    let mut session =
        Session::open(identity_network(), SessionConfig::default(), factory(DeviceProfile::cpu_only())).unwrap();
    let mut bad = TensorMap::new();
    bad.insert("x".into(), TensorBuffer::from_f32("x", vec![1, 3], &[1.0, 2.0, 3.0]).unwrap());
    let mut outputs = TensorMap::new();
    outputs.insert("y".into(), TensorBuffer::from_f32("y", vec![1, 4], &[9.0; 4]).unwrap());

    let err = session.execute(&bad, &mut outputs, &AtomicBool::new(false)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ShapeMismatch);
    assert_eq!(outputs["y"].to_f32(), vec![9.0; 4]);
    assert_eq!(outputs.len(), 1);
}

#[test]
fn test_cancel_flag_skips_executor() {
    let platform = ReferencePlatform::new(DeviceProfile::cpu_only());
    let counters = platform.counters();
    let mut session =
        Session::open(identity_network(), SessionConfig::default(), platform.create_factory()).unwrap();
    let mut outputs = TensorMap::new();
    let err = session.execute(&inputs(&[1.0; 4]), &mut outputs, &AtomicBool::new(true)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Cancelled);
    assert_eq!(counters.executions(), 0);
}

#[test]
fn test_quantized_input_is_converted() {
    let bytes = DlcBuilder::new()
        .input(TensorDescriptor::new("x", vec![4], ElementEncoding::QuantizedU8 { scale: 0.5, zero_point: 0 }))
        .output(TensorDescriptor::new("y", vec![4], ElementEncoding::QuantizedU8 { scale: 0.5, zero_point: 0 }))
        .build()
        .unwrap();
    let network = NetworkContainer::load(bytes).unwrap();
    let mut session = Session::open(network, SessionConfig::default(), factory(DeviceProfile::cpu_only())).unwrap();

    let mut map = TensorMap::new();
    map.insert("x".into(), TensorBuffer::from_f32("x", vec![4], &[0.0, 0.5, 1.0, 2.0]).unwrap());
    let mut outputs = TensorMap::new();
    outputs.insert("y".into(), TensorBuffer::zeroed("y", vec![4], ElementEncoding::Float32));
    session.execute(&map, &mut outputs, &AtomicBool::new(false)).unwrap();
    assert_eq!(outputs["y"].to_f32(), vec![0.0, 0.5, 1.0, 2.0]);
    assert!(session.memory_bytes() > 0);
}

#[test]
fn test_nhwc_input_is_transposed() {
    let bytes = DlcBuilder::new()
        .input(
            TensorDescriptor::new("x", vec![1, 2, 1, 2], ElementEncoding::Float32).with_layout(TensorLayout::Nchw),
        )
        .output(TensorDescriptor::new("y", vec![1, 2, 1, 2], ElementEncoding::Float32))
        .build()
        .unwrap();
    let network = NetworkContainer::load(bytes).unwrap();
    let config = SessionConfig::default().with_input_layout(TensorLayout::Nhwc);
    let mut session = Session::open(network, config, factory(DeviceProfile::cpu_only())).unwrap();

    // NHWC [1,1,2,2]: pixel0 = (c0=1, c1=2), pixel1 = (c0=3, c1=4)
    let mut map = TensorMap::new();
    map.insert("x".into(), TensorBuffer::from_f32("x", vec![1, 1, 2, 2], &[1.0, 2.0, 3.0, 4.0]).unwrap());
    let out = session.run(&map).unwrap();
    assert_eq!(out["y"].to_f32(), vec![1.0, 3.0, 2.0, 4.0]);
}

fn image_network(dims: Vec<usize>, layout: Option<TensorLayout>) -> NetworkHandle {
    let mut input = TensorDescriptor::new("x", dims.clone(), ElementEncoding::Float32);
    input.layout = layout;
    let bytes = DlcBuilder::new()
        .input(input)
        .output(TensorDescriptor::new("y", dims, ElementEncoding::Float32))
        .build()
        .unwrap();
    NetworkContainer::load(bytes).unwrap()
}

fn nhwc_session(network: NetworkHandle) -> Session {
    let config = SessionConfig::default().with_input_layout(TensorLayout::Nhwc);
    Session::open(network, config, factory(DeviceProfile::cpu_only())).unwrap()
}

#[test]
fn test_undeclared_layout_is_nchw() {
    let mut session = nhwc_session(image_network(vec![1, 2, 1, 2], None));
    let mut map = TensorMap::new();
    map.insert("x".into(), TensorBuffer::from_f32("x", vec![1, 1, 2, 2], &[1.0, 2.0, 3.0, 4.0]).unwrap());
    let out = session.run(&map).unwrap();
    assert_eq!(out["y"].to_f32(), vec![1.0, 3.0, 2.0, 4.0]);
}

#[test]
fn test_symmetric_dims_follow_configured_layout() {
    let mut session = nhwc_session(image_network(vec![1, 2, 2, 2], Some(TensorLayout::Nchw)));
    let values: Vec<f32> = (0..8).map(|v| v as f32).collect();
    let mut map = TensorMap::new();
    map.insert("x".into(), TensorBuffer::from_f32("x", vec![1, 2, 2, 2], &values).unwrap());
    let out = session.run(&map).unwrap();
    assert_eq!(out["y"].to_f32(), vec![0.0, 2.0, 4.0, 6.0, 1.0, 3.0, 5.0, 7.0]);
}

#[test]
fn test_network_order_dims_rejected_when_layouts_differ() {
    let mut session = nhwc_session(image_network(vec![1, 2, 1, 2], Some(TensorLayout::Nchw)));
    let mut map = TensorMap::new();
    map.insert("x".into(), TensorBuffer::from_f32("x", vec![1, 2, 1, 2], &[1.0; 4]).unwrap());
    let err = session.run(&map).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ShapeMismatch);
    assert_eq!(err.tensor.as_deref(), Some("x"));
}

#[test]
fn test_executor_failure_returns_to_ready() {
    let profile = DeviceProfile::cpu_only().with_failing_exec([Accelerator::Cpu]);
    let mut session = Session::open(identity_network(), SessionConfig::default(), factory(profile)).unwrap();
    let err = session.run(&inputs(&[1.0; 4])).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ExecutorFailure);
    assert_eq!(session.state(), SessionState::Ready);
}

#[test]
fn test_reset_rebinds_on_next_execute() {
    let platform = ReferencePlatform::new(DeviceProfile::cpu_only());
    let counters = platform.counters();
    let mut session =
        Session::open(identity_network(), SessionConfig::default(), platform.create_factory()).unwrap();
    session.reset();
    assert_eq!(session.bound_accelerator(), None);
    session.run(&inputs(&[1.0; 4])).unwrap();
    assert_eq!(session.bound_accelerator(), Some(Accelerator::Cpu));
    assert_eq!(counters.builds(), 2);
}

#[test]
fn test_close_is_idempotent() {
    let mut session =
        Session::open(identity_network(), SessionConfig::default(), factory(DeviceProfile::cpu_only())).unwrap();
    session.close();
    session.close();
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(session.memory_bytes(), 0);
    let err = session.run(&inputs(&[1.0; 4])).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Cancelled);
}

#[test]
fn test_weak_session_does_not_keep_alive() {
    let session =
        Session::open(identity_network(), SessionConfig::default(), factory(DeviceProfile::cpu_only())).unwrap();
    let handle = SessionHandle::new(session);
    let weak = handle.downgrade();
    assert!(weak.upgrade().is_some());
    drop(handle);
    assert!(weak.upgrade().is_none());
}
