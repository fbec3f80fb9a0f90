//! Immutable network containers backed by a memory-mapped or owned byte image.

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;
use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};

use super::descriptor::TensorDescriptor;
use super::dlc::{parse_header, DlcHeader, DlcVersion};
use crate::error::{ErrorKind, Result, RuntimeError};

/// Shared handle to a loaded network. Storage is released when the last
/// holder drops.
pub type NetworkHandle = Arc<NetworkContainer>;

/// Where a network's byte image comes from.
#[derive(Debug, Clone)]
pub enum NetworkSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl From<PathBuf> for NetworkSource {
    fn from(p: PathBuf) -> Self {
        Self::Path(p)
    }
}

impl From<&Path> for NetworkSource {
    fn from(p: &Path) -> Self {
        Self::Path(p.to_path_buf())
    }
}

impl From<Vec<u8>> for NetworkSource {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}

impl From<&[u8]> for NetworkSource {
    fn from(b: &[u8]) -> Self {
        Self::Bytes(b.to_vec())
    }
}

/// 128-bit content fingerprint: the first 16 bytes of SHA-256 over the image.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 16]);

impl Fingerprint {
    pub fn of(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut out = [0u8; 16];
        out.copy_from_slice(&digest[..16]);
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

enum Storage {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Storage {
    fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Mapped(m) => m,
            Self::Owned(v) => v,
        }
    }
}

/// A loaded network: byte image, parsed descriptors and fingerprint.
pub struct NetworkContainer {
    storage: Storage,
    header: DlcHeader,
    fingerprint: Fingerprint,
    origin: Option<PathBuf>,
}

impl NetworkContainer {
    /// Materialize a container from a file path or an in-memory byte span.
    pub fn load(source: impl Into<NetworkSource>) -> Result<NetworkHandle> {
        let container = match source.into() {
            NetworkSource::Path(path) => Self::open(&path)?,
            NetworkSource::Bytes(bytes) => Self::from_storage(Storage::Owned(bytes), None)?,
        };
        tracing::info!(
            fingerprint = %container.fingerprint,
            version = %container.header.version,
            inputs = container.header.inputs.len(),
            outputs = container.header.outputs.len(),
            bytes = container.len(),
            "network loaded"
        );
        Ok(Arc::new(container))
    }

    fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            RuntimeError::new(ErrorKind::IoError, format!("{}: {}", path.display(), e))
        })?;
        let len = file.metadata()?.len();
        if len == 0 {
            return Err(RuntimeError::invalid_format(format!("{} is empty", path.display())));
        }
        // SAFETY: file is opened read-only; network files are not modified while loaded.
        let mmap = unsafe { Mmap::map(&file)? };
        Self::from_storage(Storage::Mapped(mmap), Some(path.to_path_buf()))
    }

    fn from_storage(storage: Storage, origin: Option<PathBuf>) -> Result<Self> {
        let bytes = storage.as_bytes();
        let header = parse_header(bytes)?;
        let fingerprint = Fingerprint::of(bytes);
        Ok(Self { storage, header, fingerprint, origin })
    }

    pub fn inputs(&self) -> &[TensorDescriptor] {
        &self.header.inputs
    }

    pub fn outputs(&self) -> &[TensorDescriptor] {
        &self.header.outputs
    }

    pub fn input(&self, name: &str) -> Option<&TensorDescriptor> {
        self.header.inputs.iter().find(|d| d.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&TensorDescriptor> {
        self.header.outputs.iter().find(|d| d.name == name)
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn version(&self) -> DlcVersion {
        self.header.version
    }

    /// The exact byte image, header included.
    pub fn as_bytes(&self) -> &[u8] {
        self.storage.as_bytes()
    }

    /// The opaque archive following the descriptor header.
    pub fn payload(&self) -> &[u8] {
        &self.as_bytes()[self.header.payload_offset..]
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    pub fn is_memory_mapped(&self) -> bool {
        matches!(self.storage, Storage::Mapped(_))
    }

    pub fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }

    /// Serializable summary for reports and the `inspect` command.
    pub fn summary(&self) -> NetworkSummary {
        NetworkSummary {
            fingerprint: self.fingerprint,
            version: self.header.version,
            size_bytes: self.len(),
            inputs: self.header.inputs.clone(),
            outputs: self.header.outputs.clone(),
        }
    }
}

impl PartialEq for NetworkContainer {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint
    }
}

impl Eq for NetworkContainer {}

impl fmt::Debug for NetworkContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkContainer")
            .field("fingerprint", &self.fingerprint)
            .field("version", &self.header.version)
            .field("inputs", &self.header.inputs.len())
            .field("outputs", &self.header.outputs.len())
            .field("mapped", &self.is_memory_mapped())
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkSummary {
    pub fingerprint: Fingerprint,
    pub version: DlcVersion,
    pub size_bytes: usize,
    pub inputs: Vec<TensorDescriptor>,
    pub outputs: Vec<TensorDescriptor>,
}
