//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use snpe_rt::network::{DlcBuilder, ElementEncoding, NetworkHandle, TensorDescriptor};
use snpe_rt::platform::{DeviceProfile, Platform, ReferenceCounters, ReferencePlatform};
use snpe_rt::{CompletionRecord, DispatcherConfig, NetworkContainer, Runtime, RuntimeConfig, TensorBuffer, TensorMap};

/// 1×3×224×224 float32 image in, 1×1000 float32 scores out.
pub fn classifier_bytes() -> Vec<u8> {
    DlcBuilder::new()
        .input(TensorDescriptor::new("image", vec![1, 3, 224, 224], ElementEncoding::Float32))
        .output(TensorDescriptor::new("scores", vec![1, 1000], ElementEncoding::Float32))
        .payload(b"classifier".to_vec())
        .build()
        .expect("classifier image")
}

pub fn classifier() -> NetworkHandle {
    NetworkContainer::load(classifier_bytes()).expect("classifier loads")
}

/// `x` [1,4] in, `y` [1,4] and `z` [1,2] out.
pub fn small_network() -> NetworkHandle {
    let bytes = DlcBuilder::new()
        .input(TensorDescriptor::new("x", vec![1, 4], ElementEncoding::Float32))
        .output(TensorDescriptor::new("y", vec![1, 4], ElementEncoding::Float32))
        .output(TensorDescriptor::new("z", vec![1, 2], ElementEncoding::Float32))
        .build()
        .expect("small image");
    NetworkContainer::load(bytes).expect("small network loads")
}

pub fn small_inputs(value: f32) -> TensorMap {
    let mut inputs = TensorMap::new();
    inputs.insert("x".into(), TensorBuffer::from_f32("x", vec![1, 4], &[value; 4]).unwrap());
    inputs
}

pub fn zeroed_image(dims: Vec<usize>) -> TensorMap {
    let mut inputs = TensorMap::new();
    inputs.insert("image".into(), TensorBuffer::zeroed("image", dims, ElementEncoding::Float32));
    inputs
}

/// A runtime on the reference platform plus its executor counters.
pub fn runtime(profile: DeviceProfile, capacity: usize) -> (Runtime, Arc<ReferenceCounters>) {
    let platform = ReferencePlatform::new(profile);
    let counters = platform.counters();
    let config = RuntimeConfig { dispatcher: DispatcherConfig { capacity }, ..RuntimeConfig::default() };
    let runtime = Runtime::with_platform(Arc::new(platform) as Arc<dyn Platform>, config).expect("runtime starts");
    (runtime, counters)
}

/// Drain until `n` completions arrived or five seconds passed.
pub fn drain_n(runtime: &Runtime, n: usize) -> Vec<CompletionRecord> {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut out = Vec::new();
    while out.len() < n && Instant::now() < deadline {
        out.extend(runtime.drain_completions(n - out.len()));
        std::thread::sleep(Duration::from_millis(1));
    }
    out
}
