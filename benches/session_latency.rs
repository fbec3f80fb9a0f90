//! Session execution latency benchmarks.
//!
//! Measures staging overhead on the reference platform: zero-copy float32,
//! quantized conversion and NHWC transposition.

use std::sync::atomic::AtomicBool;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use snpe_rt::network::{DlcBuilder, ElementEncoding, NetworkContainer, TensorDescriptor, TensorLayout};
use snpe_rt::platform::{DeviceProfile, Platform, ReferencePlatform};
use snpe_rt::{Session, SessionConfig, TensorBuffer, TensorMap};

fn image_session(side: usize, encoding: ElementEncoding, layout: TensorLayout) -> Session {
    let bytes = DlcBuilder::new()
        .input(TensorDescriptor::new("image", vec![1, 3, side, side], encoding).with_layout(TensorLayout::Nchw))
        .output(TensorDescriptor::new("scores", vec![1, 1000], ElementEncoding::Float32))
        .build()
        .expect("bench network");
    let network = NetworkContainer::load(bytes).expect("bench network loads");
    let factory = ReferencePlatform::new(DeviceProfile::cpu_only()).create_factory();
    Session::open(network, SessionConfig::default().with_input_layout(layout), factory).expect("session opens")
}

fn image_inputs(side: usize, layout: TensorLayout) -> TensorMap {
    let dims = layout.from_nchw([1, 3, side, side]).to_vec();
    let mut inputs = TensorMap::new();
    inputs.insert("image".into(), TensorBuffer::zeroed("image", dims, ElementEncoding::Float32));
    inputs
}

fn bench_staging(c: &mut Criterion) {
    let mut group = c.benchmark_group("session_execute");
    let quantized = ElementEncoding::QuantizedU8 { scale: 1.0 / 255.0, zero_point: 0 };

    for side in [64usize, 224] {
        group.throughput(Throughput::Bytes((3 * side * side * 4) as u64));
        for (name, encoding, layout) in [
            ("zero_copy", ElementEncoding::Float32, TensorLayout::Nchw),
            ("quantize_u8", quantized, TensorLayout::Nchw),
            ("transpose_nhwc", ElementEncoding::Float32, TensorLayout::Nhwc),
        ] {
            let mut session = image_session(side, encoding, layout);
            let inputs = image_inputs(side, layout);
            let mut outputs = TensorMap::new();
            let cancel = AtomicBool::new(false);
            group.bench_with_input(BenchmarkId::new(name, side), &side, |b, _| {
                b.iter(|| session.execute(black_box(&inputs), &mut outputs, &cancel).expect("execute"))
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_staging);
criterion_main!(benches);
