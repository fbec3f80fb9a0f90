//! Seeding of graph roots before the first run.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::config::{InitSpec, PipelineConfig};
use super::workspace::TensorWorkspace;
use crate::error::{ErrorKind, Result, RuntimeError};

/// Workspace tensors consumed by some model but produced by none.
pub fn graph_roots(config: &PipelineConfig) -> BTreeSet<String> {
    let produced: BTreeSet<&str> =
        config.models.iter().flat_map(|m| m.outputs.values()).map(String::as_str).collect();
    config
        .models
        .iter()
        .flat_map(|m| m.inputs.values())
        .filter(|t| !produced.contains(t.as_str()))
        .cloned()
        .collect()
}

/// Fill every root per its init spec; roots without one are zeroed.
/// Specs naming non-root tensors are ignored with a warning.
pub fn seed_roots(config: &PipelineConfig, workspace: &TensorWorkspace) -> Result<()> {
    let roots = graph_roots(config);
    for name in config.init.keys().filter(|n| !roots.contains(n.as_str())) {
        tracing::warn!(tensor = %name, "init spec for a non-root tensor ignored");
    }
    for root in &roots {
        let spec = config.init.get(root).unwrap_or(&InitSpec::Zero);
        seed_tensor(config, workspace, root, spec)?;
    }
    Ok(())
}

fn seed_tensor(config: &PipelineConfig, workspace: &TensorWorkspace, name: &str, spec: &InitSpec) -> Result<()> {
    let bytes = workspace.size_of(name);
    if !workspace.has(name) {
        return Err(RuntimeError::invalid_argument("root tensor not allocated").with_tensor(name));
    }
    let count = bytes / 4;
    match spec {
        InitSpec::Zero => {
            workspace.with_data_mut(name, |data| data.fill(0));
        }
        InitSpec::Const { value } => workspace.write_f32(name, &vec![*value; count])?,
        InitSpec::Random { mean, std, seed } => {
            let seed = if *seed == 0 { time_seed() } else { *seed };
            let values = normal_samples(count, *mean, *std, seed);
            workspace.write_f32(name, &values)?;
        }
        InitSpec::File { path } => {
            let path = config.resolve_path(path);
            let data = std::fs::read(&path).map_err(|e| {
                RuntimeError::new(ErrorKind::IoError, format!("{}: {}", path.display(), e)).with_tensor(name)
            })?;
            if data.len() != bytes {
                return Err(RuntimeError::invalid_argument(format!(
                    "{} holds {} bytes, tensor needs {}",
                    path.display(),
                    data.len(),
                    bytes
                ))
                .with_tensor(name));
            }
            workspace.with_data_mut(name, |dst| dst.copy_from_slice(&data));
        }
    }
    tracing::debug!(tensor = %name, bytes, init = ?spec, "root seeded");
    Ok(())
}

fn time_seed() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(1, |d| d.as_nanos() as u64 | 1)
}

/// Box-Muller normal samples from a seeded generator.
pub(crate) fn normal_samples(count: usize, mean: f32, std: f32, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = Vec::with_capacity(count);
    while out.len() < count {
        let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = rng.gen();
        let r = (-2.0 * u1.ln()).sqrt();
        let theta = 2.0 * std::f64::consts::PI * u2;
        for z in [r * theta.cos(), r * theta.sin()] {
            if out.len() < count {
                out.push(mean + std * z as f32);
            }
        }
    }
    out
}

/// Per-root specs, zero filled in where absent.
pub fn effective_init(config: &PipelineConfig) -> BTreeMap<String, InitSpec> {
    graph_roots(config)
        .into_iter()
        .map(|root| {
            let spec = config.init.get(&root).cloned().unwrap_or(InitSpec::Zero);
            (root, spec)
        })
        .collect()
}
