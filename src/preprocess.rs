//! Camera frame to input tensor conversion.

use crate::error::{Result, RuntimeError};
use crate::network::{TensorDescriptor, TensorLayout};
use crate::session::TensorBuffer;

/// Interleaved 8-bit RGB frame, row-major, no padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rgb8Frame {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u8>,
}

impl Rgb8Frame {
    pub fn new(width: usize, height: usize, pixels: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(RuntimeError::invalid_argument("frame has no pixels"));
        }
        if pixels.len() != width * height * 3 {
            return Err(RuntimeError::invalid_argument(format!(
                "{}x{} RGB frame needs {} bytes, got {}",
                width,
                height,
                width * height * 3,
                pixels.len()
            )));
        }
        Ok(Self { width, height, pixels })
    }

    fn sample(&self, x: usize, y: usize, channel: usize) -> u8 {
        self.pixels[(y * self.width + x) * 3 + channel]
    }
}

/// Resize `frame` by nearest sampling to the spatial size of `desc`, scale to
/// [0, 1] and lay it out as float32 in `layout`.
///
/// `desc` must be a rank-4 input with batch 1 and 3 channels, its dims read
/// in its declared layout (NCHW when undeclared).
pub fn frame_to_tensor(frame: &Rgb8Frame, desc: &TensorDescriptor, layout: TensorLayout) -> Result<TensorBuffer> {
    let dims: [usize; 4] = desc.dims.as_slice().try_into().map_err(|_| {
        RuntimeError::shape_mismatch(format!("image input must be rank 4, got rank {}", desc.dims.len()))
            .with_tensor(&desc.name)
    })?;
    let [batch, channels, height, width] = desc.layout.unwrap_or_default().to_nchw(dims);
    if batch != 1 || channels != 3 {
        return Err(RuntimeError::shape_mismatch(format!(
            "image input needs batch 1 and 3 channels, got {:?}",
            dims
        ))
        .with_tensor(&desc.name));
    }

    let scale_x = frame.width as f32 / width as f32;
    let scale_y = frame.height as f32 / height as f32;
    let src_x: Vec<usize> =
        (0..width).map(|x| ((x as f32 * scale_x) as usize).min(frame.width - 1)).collect();
    let src_y: Vec<usize> =
        (0..height).map(|y| ((y as f32 * scale_y) as usize).min(frame.height - 1)).collect();

    let mut values = vec![0.0f32; channels * height * width];
    for (y, &sy) in src_y.iter().enumerate() {
        for (x, &sx) in src_x.iter().enumerate() {
            for c in 0..channels {
                let v = f32::from(frame.sample(sx, sy, c)) / 255.0;
                let index = match layout {
                    TensorLayout::Nchw => (c * height + y) * width + x,
                    TensorLayout::Nhwc => (y * width + x) * channels + c,
                };
                values[index] = v;
            }
        }
    }
    let out_dims = layout.from_nchw([batch, channels, height, width]).to_vec();
    TensorBuffer::from_f32(&desc.name, out_dims, &values)
}
