//! Named tensor arena shared by the nodes of a pipeline.
//!
//! Every tensor edge in a pipeline is a named block. Blocks are allocated
//! once with a fixed byte size; re-allocating a name with a different size is
//! an error. Aliases share the owner's block without copying. Releasing an
//! owner only drops its name; aliases keep the block alive.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Result, RuntimeError};

type Block = Arc<RwLock<Vec<u8>>>;

struct Entry {
    /// Name of the owning entry when this is an alias.
    alias_of: Option<String>,
    block: Block,
}

#[derive(Default)]
pub struct TensorWorkspace {
    entries: BTreeMap<String, Entry>,
}

impl TensorWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a zeroed block. Allocating an existing owner with the same
    /// size is a no-op; a different size or an existing alias is rejected.
    pub fn allocate(&mut self, name: &str, bytes: usize) -> Result<()> {
        if let Some(entry) = self.entries.get(name) {
            if let Some(owner) = &entry.alias_of {
                return Err(RuntimeError::invalid_argument(format!("already an alias of '{}'", owner))
                    .with_tensor(name));
            }
            let had = entry.block.read().len();
            if had != bytes {
                return Err(RuntimeError::invalid_argument(format!(
                    "size mismatch (had {} bytes, want {})",
                    had, bytes
                ))
                .with_tensor(name));
            }
            return Ok(());
        }
        self.entries
            .insert(name.to_string(), Entry { alias_of: None, block: Arc::new(RwLock::new(vec![0u8; bytes])) });
        Ok(())
    }

    /// Make `dst` share `src`'s block. An existing `dst` entry is replaced
    /// only when its size matches.
    pub fn alias(&mut self, dst: &str, src: &str) -> Result<()> {
        let entry = self
            .entries
            .get(src)
            .ok_or_else(|| RuntimeError::invalid_argument("alias source not found").with_tensor(src))?;
        if let Some(existing) = self.entries.get(dst) {
            let (have, want) = (existing.block.read().len(), entry.block.read().len());
            if have != want {
                return Err(RuntimeError::shape_mismatch(format!(
                    "cannot alias {} bytes of '{}' over {} bytes",
                    want, src, have
                ))
                .with_tensor(dst));
            }
        }
        let owner = entry.alias_of.clone().unwrap_or_else(|| src.to_string());
        let block = Arc::clone(&entry.block);
        self.entries.insert(dst.to_string(), Entry { alias_of: Some(owner), block });
        Ok(())
    }

    pub fn has(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Size in bytes; 0 when missing.
    pub fn size_of(&self, name: &str) -> usize {
        self.entries.get(name).map_or(0, |e| e.block.read().len())
    }

    /// Run `f` over the block's bytes.
    pub fn with_data<R>(&self, name: &str, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let entry = self.entries.get(name)?;
        let guard = entry.block.read();
        Some(f(&guard))
    }

    /// Run `f` over the block's bytes mutably.
    pub fn with_data_mut<R>(&self, name: &str, f: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
        let entry = self.entries.get(name)?;
        let mut guard = entry.block.write();
        Some(f(&mut guard))
    }

    /// Copy of the block interpreted as little-endian f32.
    pub fn read_f32(&self, name: &str) -> Option<Vec<f32>> {
        self.with_data(name, |bytes| {
            bytes.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
        })
    }

    /// Overwrite the block with `values`; the byte size must match exactly.
    pub fn write_f32(&self, name: &str, values: &[f32]) -> Result<()> {
        let result = self.with_data_mut(name, |bytes| {
            if bytes.len() != values.len() * 4 {
                return Err(RuntimeError::invalid_argument(format!(
                    "{} floats do not fill {} bytes",
                    values.len(),
                    bytes.len()
                ))
                .with_tensor(name));
            }
            for (dst, v) in bytes.chunks_exact_mut(4).zip(values) {
                dst.copy_from_slice(&v.to_le_bytes());
            }
            Ok(())
        });
        result.unwrap_or_else(|| Err(RuntimeError::invalid_argument("workspace tensor not found").with_tensor(name)))
    }

    /// Forget a name. The block stays alive while any alias refers to it.
    pub fn release(&mut self, name: &str) {
        self.entries.remove(name);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes held by owning entries.
    pub fn total_bytes(&self) -> usize {
        self.entries.values().filter(|e| e.alias_of.is_none()).map(|e| e.block.read().len()).sum()
    }

    /// Log every entry at info level.
    pub fn dump(&self) {
        tracing::info!(entries = self.entries.len(), bytes = self.total_bytes(), "workspace dump");
        for (name, entry) in &self.entries {
            tracing::info!(
                tensor = %name,
                owner = entry.alias_of.is_none(),
                alias_of = entry.alias_of.as_deref().unwrap_or(""),
                size = entry.block.read().len(),
                "workspace entry"
            );
        }
    }
}

impl std::fmt::Debug for TensorWorkspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.entries.iter().map(|(k, e)| (k, e.block.read().len()))).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reallocate_same_size_is_noop() {
        let mut ws = TensorWorkspace::new();
        ws.allocate("a", 16).unwrap();
        ws.write_f32("a", &[1.0, 2.0, 3.0, 4.0]).unwrap();
        ws.allocate("a", 16).unwrap();
        assert_eq!(ws.read_f32("a").unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_reallocate_different_size_rejected() {
        let mut ws = TensorWorkspace::new();
        ws.allocate("a", 16).unwrap();
        let err = ws.allocate("a", 8).unwrap_err();
        assert_eq!(err.tensor.as_deref(), Some("a"));
    }

    #[test]
    fn test_alias_shares_block() {
        let mut ws = TensorWorkspace::new();
        ws.allocate("a", 8).unwrap();
        ws.alias("b", "a").unwrap();
        ws.write_f32("b", &[5.0, 6.0]).unwrap();
        assert_eq!(ws.read_f32("a").unwrap(), vec![5.0, 6.0]);
        assert!(ws.allocate("b", 8).is_err(), "alias cannot be re-allocated");
        assert_eq!(ws.total_bytes(), 8);
    }

    #[test]
    fn test_alias_over_different_size_rejected() {
        let mut ws = TensorWorkspace::new();
        ws.allocate("a", 8).unwrap();
        ws.allocate("b", 16).unwrap();
        let err = ws.alias("b", "a").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::ShapeMismatch);
        assert_eq!(err.tensor.as_deref(), Some("b"));
        assert_eq!(ws.size_of("b"), 16);

        ws.allocate("c", 8).unwrap();
        ws.alias("c", "a").unwrap();
        ws.write_f32("a", &[1.0, 2.0]).unwrap();
        assert_eq!(ws.read_f32("c").unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_alias_survives_owner_release() {
        let mut ws = TensorWorkspace::new();
        ws.allocate("a", 4).unwrap();
        ws.write_f32("a", &[7.0]).unwrap();
        ws.alias("b", "a").unwrap();
        ws.release("a");
        assert!(!ws.has("a"));
        assert_eq!(ws.read_f32("b").unwrap(), vec![7.0]);
    }

    #[test]
    fn test_missing_tensor() {
        let mut ws = TensorWorkspace::new();
        assert_eq!(ws.size_of("nope"), 0);
        assert!(ws.read_f32("nope").is_none());
        assert!(ws.alias("x", "nope").is_err());
        assert!(ws.write_f32("nope", &[1.0]).is_err());
    }
}
