//! Pipeline configuration documents.
//!
//! ```json
//! {
//!   "baseDir": "/data/local/tmp/models",
//!   "models": [
//!     { "name": "backbone", "asset": "backbone.dlc", "runtime": "D",
//!       "inputs": { "images": "frame" }, "outputs": { "features": "feat" } },
//!     { "name": "head", "asset": "head.dlc",
//!       "inputs": { "features": "feat" }, "outputs": { "boxes": "boxes" } }
//!   ],
//!   "init": { "frame": { "kind": "random", "mean": 0.0, "std": 1.0, "seed": 7 } }
//! }
//! ```
//!
//! `inputs`/`outputs` map model tensor names to workspace tensor names.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::accelerator::Accelerator;
use crate::error::{ErrorKind, Result, RuntimeError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Directory relative assets resolve against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<PathBuf>,
    pub models: Vec<ModelNode>,
    #[serde(default)]
    pub init: BTreeMap<String, InitSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelNode {
    pub name: String,
    pub asset: String,
    /// Accelerator code (`C`, `G`, `D`, ...) or name; default is the
    /// runtime's configured preference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    pub inputs: BTreeMap<String, String>,
    pub outputs: BTreeMap<String, String>,
}

impl ModelNode {
    pub fn accelerator(&self) -> Result<Option<Accelerator>> {
        match self.runtime.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(code) => code.parse().map(Some).map_err(|_| {
                RuntimeError::invalid_format(format!("model '{}': unknown runtime '{}'", self.name, code))
            }),
        }
    }
}

/// How a root workspace tensor is seeded. Values are written as float32.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum InitSpec {
    Zero,
    Random {
        #[serde(default)]
        mean: f32,
        #[serde(default = "unit_std")]
        std: f32,
        /// 0 picks a time-based seed.
        #[serde(default)]
        seed: u64,
    },
    #[serde(alias = "asset")]
    File { path: PathBuf },
    Const { value: f32 },
}

fn unit_std() -> f32 {
    1.0
}

impl PipelineConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| RuntimeError::invalid_format(format!("pipeline config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON file. `baseDir` defaults to the file's directory.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| RuntimeError::new(ErrorKind::IoError, format!("{}: {}", path.display(), e)))?;
        let mut config = Self::from_json(&text)?;
        if config.base_dir.is_none() {
            config.base_dir = path.parent().map(Path::to_path_buf);
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.models.is_empty() {
            return Err(RuntimeError::invalid_format("pipeline config has no models"));
        }
        let mut names = HashSet::new();
        for model in &self.models {
            if model.name.trim().is_empty() || model.asset.trim().is_empty() {
                return Err(RuntimeError::invalid_format("model requires a name and an asset"));
            }
            if !names.insert(model.name.as_str()) {
                return Err(RuntimeError::invalid_format(format!("duplicate model name '{}'", model.name)));
            }
            model.accelerator()?;
        }
        for (tensor, spec) in &self.init {
            if let InitSpec::Random { std, mean, .. } = spec {
                if !(std.is_finite() && *std > 0.0 && mean.is_finite()) {
                    return Err(RuntimeError::invalid_format("random init needs finite mean and std > 0")
                        .with_tensor(tensor));
                }
            }
        }
        Ok(())
    }

    /// Asset path for `node`, resolved against `baseDir` when relative.
    pub fn resolve_asset(&self, node: &ModelNode) -> PathBuf {
        let asset = Path::new(&node.asset);
        match &self.base_dir {
            Some(base) if asset.is_relative() => base.join(asset),
            _ => asset.to_path_buf(),
        }
    }

    /// Resolve an init file path the same way as assets.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}
