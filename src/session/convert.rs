//! Element-encoding conversion and layout transposition.
//!
//! float -> quantized: `round(x / scale + zero_point)` clamped to the range.
//! quantized -> float: `(q - zero_point) * scale`.

use half::f16;

use crate::network::{ElementEncoding, TensorLayout};

pub fn quantize_u8(x: f32, scale: f32, zero_point: i32) -> u8 {
    let q = (x / scale + zero_point as f32).round();
    q.clamp(u8::MIN as f32, u8::MAX as f32) as u8
}

pub fn quantize_i8(x: f32, scale: f32, zero_point: i32) -> i8 {
    let q = (x / scale + zero_point as f32).round();
    q.clamp(i8::MIN as f32, i8::MAX as f32) as i8
}

pub fn dequantize_u8(q: u8, scale: f32, zero_point: i32) -> f32 {
    (q as i32 - zero_point) as f32 * scale
}

pub fn dequantize_i8(q: i8, scale: f32, zero_point: i32) -> f32 {
    (q as i32 - zero_point) as f32 * scale
}

/// Decode `bytes` in `encoding` into f32 values.
pub fn decode_to_f32(encoding: ElementEncoding, bytes: &[u8]) -> Vec<f32> {
    match encoding {
        ElementEncoding::Float32 => bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        ElementEncoding::Float16 => bytes
            .chunks_exact(2)
            .map(|c| f16::from_le_bytes([c[0], c[1]]).to_f32())
            .collect(),
        ElementEncoding::QuantizedU8 { scale, zero_point } => {
            bytes.iter().map(|&q| dequantize_u8(q, scale, zero_point)).collect()
        }
        ElementEncoding::QuantizedI8 { scale, zero_point } => {
            bytes.iter().map(|&q| dequantize_i8(q as i8, scale, zero_point)).collect()
        }
    }
}

/// Encode f32 `values` into `out` using `encoding`. Writes
/// `min(values.len(), out.len() / element_size)` elements.
pub fn encode_from_f32(encoding: ElementEncoding, values: &[f32], out: &mut [u8]) {
    match encoding {
        ElementEncoding::Float32 => {
            for (chunk, v) in out.chunks_exact_mut(4).zip(values) {
                chunk.copy_from_slice(&v.to_le_bytes());
            }
        }
        ElementEncoding::Float16 => {
            for (chunk, v) in out.chunks_exact_mut(2).zip(values) {
                chunk.copy_from_slice(&f16::from_f32(*v).to_le_bytes());
            }
        }
        ElementEncoding::QuantizedU8 { scale, zero_point } => {
            for (byte, v) in out.iter_mut().zip(values) {
                *byte = quantize_u8(*v, scale, zero_point);
            }
        }
        ElementEncoding::QuantizedI8 { scale, zero_point } => {
            for (byte, v) in out.iter_mut().zip(values) {
                *byte = quantize_i8(*v, scale, zero_point) as u8;
            }
        }
    }
}

/// Convert between encodings. Identical encodings are a plain copy.
pub fn convert(src_encoding: ElementEncoding, src: &[u8], dst_encoding: ElementEncoding, dst: &mut [u8]) {
    if src_encoding == dst_encoding {
        let n = src.len().min(dst.len());
        dst[..n].copy_from_slice(&src[..n]);
        return;
    }
    let values = decode_to_f32(src_encoding, src);
    encode_from_f32(dst_encoding, &values, dst);
}

/// Transpose a rank-4 tensor between layouts. `dims` are the source dims in
/// the source layout; `element_size` is bytes per element.
pub fn transpose_4d(
    src: &[u8],
    dims: [usize; 4],
    from: TensorLayout,
    to: TensorLayout,
    element_size: usize,
    dst: &mut [u8],
) {
    if from == to {
        let n = src.len().min(dst.len());
        dst[..n].copy_from_slice(&src[..n]);
        return;
    }
    let [n, c, h, w] = from.to_nchw(dims);
    for ni in 0..n {
        for ci in 0..c {
            for hi in 0..h {
                for wi in 0..w {
                    let nchw = ((ni * c + ci) * h + hi) * w + wi;
                    let nhwc = ((ni * h + hi) * w + wi) * c + ci;
                    let (s, d) = match from {
                        TensorLayout::Nchw => (nchw, nhwc),
                        TensorLayout::Nhwc => (nhwc, nchw),
                    };
                    let (s, d) = (s * element_size, d * element_size);
                    dst[d..d + element_size].copy_from_slice(&src[s..s + element_size]);
                }
            }
        }
    }
}
