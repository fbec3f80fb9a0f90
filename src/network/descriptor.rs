//! Tensor descriptors: name, shape, element encoding and declared layout.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RuntimeError};

/// Largest tensor a network may declare, in bytes.
pub const MAX_TENSOR_BYTES: usize = 1 << 30;

/// Element encoding of a tensor's backing bytes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ElementEncoding {
    Float32,
    Float16,
    QuantizedU8 { scale: f32, zero_point: i32 },
    QuantizedI8 { scale: f32, zero_point: i32 },
}

impl ElementEncoding {
    /// Size of one element in bytes.
    pub fn element_size(&self) -> usize {
        match self {
            Self::Float32 => 4,
            Self::Float16 => 2,
            Self::QuantizedU8 { .. } | Self::QuantizedI8 { .. } => 1,
        }
    }

    pub fn is_quantized(&self) -> bool {
        matches!(self, Self::QuantizedU8 { .. } | Self::QuantizedI8 { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Float32 => "float32",
            Self::Float16 => "float16",
            Self::QuantizedU8 { .. } => "quantized_uint8_affine",
            Self::QuantizedI8 { .. } => "quantized_int8_affine",
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        match self {
            Self::QuantizedU8 { scale, .. } | Self::QuantizedI8 { scale, .. } => {
                if !scale.is_finite() || *scale <= 0.0 {
                    return Err(RuntimeError::invalid_format(format!(
                        "quantization scale must be positive and finite, got {}",
                        scale
                    )));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for ElementEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QuantizedU8 { scale, zero_point } | Self::QuantizedI8 { scale, zero_point } => {
                write!(f, "{}(scale={}, zero_point={})", self.name(), scale, zero_point)
            }
            _ => f.write_str(self.name()),
        }
    }
}

/// Memory layout of a rank-4 image tensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TensorLayout {
    #[default]
    Nchw,
    Nhwc,
}

impl TensorLayout {
    /// Convert NCHW dims into this layout.
    pub fn from_nchw(self, nchw: [usize; 4]) -> [usize; 4] {
        match self {
            Self::Nchw => nchw,
            Self::Nhwc => [nchw[0], nchw[2], nchw[3], nchw[1]],
        }
    }

    /// Convert dims expressed in this layout into NCHW order.
    pub fn to_nchw(self, dims: [usize; 4]) -> [usize; 4] {
        match self {
            Self::Nchw => dims,
            Self::Nhwc => [dims[0], dims[3], dims[1], dims[2]],
        }
    }
}

impl FromStr for TensorLayout {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NCHW" => Ok(Self::Nchw),
            "NHWC" => Ok(Self::Nhwc),
            other => Err(RuntimeError::invalid_argument(format!("unknown layout '{}'", other))),
        }
    }
}

impl fmt::Display for TensorLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nchw => f.write_str("NCHW"),
            Self::Nhwc => f.write_str("NHWC"),
        }
    }
}

/// Shape and element encoding of a network input or output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorDescriptor {
    pub name: String,
    pub dims: Vec<usize>,
    pub encoding: ElementEncoding,
    /// Layout declared by the network for rank-4 tensors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<TensorLayout>,
}

impl TensorDescriptor {
    pub fn new(name: impl Into<String>, dims: Vec<usize>, encoding: ElementEncoding) -> Self {
        Self { name: name.into(), dims, encoding, layout: None }
    }

    pub fn with_layout(mut self, layout: TensorLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Saturates instead of overflowing; [`validate`](Self::validate)
    /// rejects any descriptor where that matters.
    pub fn element_count(&self) -> usize {
        self.dims.iter().fold(1usize, |acc, &d| acc.saturating_mul(d))
    }

    /// `product(dims) × sizeof(element)`, at most [`MAX_TENSOR_BYTES`] for a
    /// validated descriptor.
    pub fn byte_len(&self) -> usize {
        self.element_count().saturating_mul(self.encoding.element_size())
    }

    fn checked_byte_len(&self) -> Option<usize> {
        self.dims
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))?
            .checked_mul(self.encoding.element_size())
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(RuntimeError::invalid_format("tensor name is empty"));
        }
        if self.dims.is_empty() {
            return Err(RuntimeError::invalid_format("tensor has rank 0").with_tensor(&self.name));
        }
        if self.dims.iter().any(|&d| d == 0) {
            return Err(RuntimeError::invalid_format(format!(
                "dimensions must be positive, got {:?}",
                self.dims
            ))
            .with_tensor(&self.name));
        }
        match self.checked_byte_len() {
            None => {
                return Err(RuntimeError::invalid_format(format!("byte size of dims {:?} overflows", self.dims))
                    .with_tensor(&self.name))
            }
            Some(len) if len > MAX_TENSOR_BYTES => {
                return Err(RuntimeError::invalid_format(format!(
                    "{} bytes exceeds the {}-byte tensor limit",
                    len, MAX_TENSOR_BYTES
                ))
                .with_tensor(&self.name))
            }
            Some(_) => {}
        }
        if self.layout.is_some() && self.rank() != 4 {
            return Err(RuntimeError::invalid_format("layout declared on a non rank-4 tensor")
                .with_tensor(&self.name));
        }
        self.encoding.validate().map_err(|e| e.with_tensor(&self.name))
    }
}

impl fmt::Display for TensorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.dims.iter().map(|d| d.to_string()).collect();
        write!(f, "{} [{}] {}", self.name, dims.join("x"), self.encoding)?;
        if let Some(layout) = self.layout {
            write!(f, " {}", layout)?;
        }
        Ok(())
    }
}

/// Validate every descriptor and enforce name uniqueness within the list.
pub fn validate_descriptors(list: &[TensorDescriptor]) -> Result<()> {
    let mut seen = HashSet::with_capacity(list.len());
    for desc in list {
        desc.validate()?;
        if !seen.insert(desc.name.as_str()) {
            return Err(RuntimeError::invalid_format("duplicate tensor name").with_tensor(&desc.name));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_byte_len_uses_element_size() {
        let desc = TensorDescriptor::new("x", vec![1, 3, 4, 4], ElementEncoding::Float16);
        assert_eq!(desc.element_count(), 48);
        assert_eq!(desc.byte_len(), 96);
    }

    #[test]
    fn test_zero_dimension_rejected() {
        let desc = TensorDescriptor::new("x", vec![1, 0], ElementEncoding::Float32);
        let err = desc.validate().unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidFormat);
        assert_eq!(err.tensor.as_deref(), Some("x"));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let list = vec![
            TensorDescriptor::new("a", vec![1], ElementEncoding::Float32),
            TensorDescriptor::new("a", vec![2], ElementEncoding::Float32),
        ];
        assert!(validate_descriptors(&list).is_err());
    }

    #[test]
    fn test_byte_size_overflow_rejected() {
        let desc = TensorDescriptor::new("x", vec![1 << 31, 1 << 31], ElementEncoding::Float32);
        let err = desc.validate().unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidFormat);
        assert_eq!(err.tensor.as_deref(), Some("x"));
        assert_eq!(desc.byte_len(), usize::MAX);
    }

    #[test]
    fn test_tensor_limit_enforced() {
        let at_limit = TensorDescriptor::new("x", vec![MAX_TENSOR_BYTES / 4], ElementEncoding::Float32);
        assert!(at_limit.validate().is_ok());
        let over = TensorDescriptor::new("x", vec![MAX_TENSOR_BYTES / 4 + 1], ElementEncoding::Float32);
        assert_eq!(over.validate().unwrap_err().kind, ErrorKind::InvalidFormat);
    }

    #[test]
    fn test_bad_scale_rejected() {
        let desc = TensorDescriptor::new(
            "q",
            vec![4],
            ElementEncoding::QuantizedU8 { scale: 0.0, zero_point: 0 },
        );
        assert!(desc.validate().is_err());
    }

    #[test]
    fn test_layout_dim_permutation() {
        let nchw = [1, 3, 224, 200];
        let nhwc = TensorLayout::Nhwc.from_nchw(nchw);
        assert_eq!(nhwc, [1, 224, 200, 3]);
        assert_eq!(TensorLayout::Nhwc.to_nchw(nhwc), nchw);
    }
}
