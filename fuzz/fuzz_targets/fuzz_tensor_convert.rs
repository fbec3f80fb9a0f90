//! Fuzz target for element encoding conversion.
//!
//! Quantized and half-precision conversions must clamp, never panic.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use snpe_rt::network::ElementEncoding;
use snpe_rt::session::convert;

#[derive(Debug, Arbitrary)]
struct Input {
    values: Vec<f32>,
    scale: f32,
    zero_point: i8,
    signed: bool,
}

fuzz_target!(|input: Input| {
    if !input.scale.is_finite() || input.scale <= 0.0 {
        return;
    }
    let zero_point = i32::from(input.zero_point);
    let quantized = if input.signed {
        ElementEncoding::QuantizedI8 { scale: input.scale, zero_point }
    } else {
        ElementEncoding::QuantizedU8 { scale: input.scale, zero_point }
    };
    let src: Vec<u8> = input.values.iter().flat_map(|v| v.to_le_bytes()).collect();
    let mut q = vec![0u8; input.values.len()];
    convert::convert(ElementEncoding::Float32, &src, quantized, &mut q);
    let mut half = vec![0u8; input.values.len() * 2];
    convert::convert(ElementEncoding::Float32, &src, ElementEncoding::Float16, &mut half);
    let mut back = vec![0u8; input.values.len() * 4];
    convert::convert(quantized, &q, ElementEncoding::Float32, &mut back);
});
