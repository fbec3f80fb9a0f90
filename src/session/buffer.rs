//! Tensor buffers sized to `product(dims) × sizeof(element)`.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use super::convert;
use crate::error::{Result, RuntimeError};
use crate::network::{ElementEncoding, TensorDescriptor};

/// Unique id of a session within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SessionId(pub(crate) u64);

impl SessionId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Tensor buffers keyed by tensor name.
pub type TensorMap = BTreeMap<String, TensorBuffer>;

fn byte_len_of(dims: &[usize], encoding: ElementEncoding) -> Option<usize> {
    dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))?.checked_mul(encoding.element_size())
}

/// Backing memory for one tensor.
///
/// Buffers allocated by a session carry its id as owner; host-allocated
/// buffers have no owner. Requests take buffers by move and hand them back
/// in the completion record.
#[derive(Clone, PartialEq)]
pub struct TensorBuffer {
    name: String,
    dims: Vec<usize>,
    encoding: ElementEncoding,
    data: Vec<u8>,
    owner: Option<SessionId>,
}

impl TensorBuffer {
    /// Zero-filled buffer. Dims are trusted by the caller.
    pub fn zeroed(name: impl Into<String>, dims: Vec<usize>, encoding: ElementEncoding) -> Self {
        let len = byte_len_of(&dims, encoding).unwrap_or(usize::MAX);
        Self { name: name.into(), dims, encoding, data: vec![0u8; len], owner: None }
    }

    /// Zero-filled buffer matching a descriptor. Descriptors of a loaded
    /// network are validated, so the size is bounded by `MAX_TENSOR_BYTES`.
    pub fn for_descriptor(desc: &TensorDescriptor) -> Self {
        let data = vec![0u8; desc.byte_len()];
        Self { name: desc.name.clone(), dims: desc.dims.clone(), encoding: desc.encoding, data, owner: None }
    }

    /// Float32 buffer holding `values`; length must equal `product(dims)`.
    pub fn from_f32(name: impl Into<String>, dims: Vec<usize>, values: &[f32]) -> Result<Self> {
        let name = name.into();
        let expected = dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d)).unwrap_or(usize::MAX);
        if values.len() != expected {
            return Err(RuntimeError::invalid_argument(format!(
                "{} values for dims {:?} ({} elements)",
                values.len(),
                dims,
                expected
            ))
            .with_tensor(name));
        }
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Ok(Self { name, dims, encoding: ElementEncoding::Float32, data, owner: None })
    }

    /// Wrap raw bytes already in `encoding`.
    pub fn from_bytes(
        name: impl Into<String>,
        dims: Vec<usize>,
        encoding: ElementEncoding,
        data: Vec<u8>,
    ) -> Result<Self> {
        let name = name.into();
        let expected = byte_len_of(&dims, encoding).unwrap_or(usize::MAX);
        if data.len() != expected {
            return Err(RuntimeError::invalid_argument(format!(
                "{} bytes for dims {:?} in {} ({} bytes)",
                data.len(),
                dims,
                encoding.name(),
                expected
            ))
            .with_tensor(name));
        }
        Ok(Self { name, dims, encoding, data, owner: None })
    }

    pub(crate) fn owned_by(mut self, owner: SessionId) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn encoding(&self) -> ElementEncoding {
        self.encoding
    }

    pub fn owner(&self) -> Option<SessionId> {
        self.owner
    }

    pub fn element_count(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn len_bytes(&self) -> usize {
        self.data.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Decode the contents to f32 regardless of encoding.
    pub fn to_f32(&self) -> Vec<f32> {
        convert::decode_to_f32(self.encoding, &self.data)
    }

    /// Encode `values` into this buffer's encoding.
    pub fn write_f32(&mut self, values: &[f32]) -> Result<()> {
        if values.len() != self.element_count() {
            return Err(RuntimeError::invalid_argument(format!(
                "{} values for {} elements",
                values.len(),
                self.element_count()
            ))
            .with_tensor(&self.name));
        }
        convert::encode_from_f32(self.encoding, values, &mut self.data);
        Ok(())
    }

    pub fn fill_zero(&mut self) {
        self.data.iter_mut().for_each(|b| *b = 0);
    }
}

impl fmt::Debug for TensorBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TensorBuffer")
            .field("name", &self.name)
            .field("dims", &self.dims)
            .field("encoding", &self.encoding)
            .field("bytes", &self.data.len())
            .field("owner", &self.owner)
            .finish()
    }
}
