//! Sequential execution of sessions over a shared workspace.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use super::workspace::TensorWorkspace;
use crate::accelerator::Accelerator;
use crate::error::{Result, RuntimeError};
use crate::session::{Session, TensorBuffer, TensorMap};

/// Values of each output logged after a node runs.
const PREVIEW_LEN: usize = 8;

/// One model in the graph with its tensor bindings
/// (model tensor name to workspace tensor name).
pub struct GraphNode {
    pub name: String,
    pub session: Session,
    pub input_binding: BTreeMap<String, String>,
    pub output_binding: BTreeMap<String, String>,
}

/// Outcome of one node in a [`GraphRunner::run_all`] pass.
#[derive(Debug, Clone, Serialize)]
pub struct ExecInfo {
    pub name: String,
    pub accelerator: Option<Accelerator>,
    #[serde(rename = "elapsed_ms")]
    #[serde(serialize_with = "as_millis")]
    pub elapsed: Duration,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64() * 1000.0)
}

pub struct GraphRunner {
    workspace: TensorWorkspace,
    nodes: Vec<GraphNode>,
}

impl GraphRunner {
    pub fn new(workspace: TensorWorkspace) -> Self {
        Self { workspace, nodes: Vec::new() }
    }

    pub fn workspace(&self) -> &TensorWorkspace {
        &self.workspace
    }

    pub fn workspace_mut(&mut self) -> &mut TensorWorkspace {
        &mut self.workspace
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    /// Append a node. Every network input and every bound output must map to
    /// an allocated workspace tensor of exactly the descriptor's byte size.
    pub fn add_node(&mut self, node: GraphNode) -> Result<()> {
        let network = node.session.network();
        for desc in network.inputs() {
            let ws_name = node.input_binding.get(&desc.name).ok_or_else(|| {
                RuntimeError::invalid_argument(format!("node '{}' leaves input unbound", node.name))
                    .with_tensor(&desc.name)
            })?;
            self.check_binding(&node.name, ws_name, desc.byte_len())?;
        }
        for (tensor, ws_name) in &node.output_binding {
            let desc = network.output(tensor).ok_or_else(|| {
                RuntimeError::invalid_argument(format!("node '{}' binds an unknown output", node.name))
                    .with_tensor(tensor)
            })?;
            self.check_binding(&node.name, ws_name, desc.byte_len())?;
        }
        for tensor in node.input_binding.keys() {
            if network.input(tensor).is_none() {
                return Err(RuntimeError::invalid_argument(format!("node '{}' binds an unknown input", node.name))
                    .with_tensor(tensor));
            }
        }
        tracing::debug!(node = %node.name, session = %node.session.id(), "graph node added");
        self.nodes.push(node);
        Ok(())
    }

    fn check_binding(&self, node: &str, ws_name: &str, bytes: usize) -> Result<()> {
        if !self.workspace.has(ws_name) {
            return Err(RuntimeError::invalid_argument(format!("node '{}' binds a missing workspace tensor", node))
                .with_tensor(ws_name));
        }
        let have = self.workspace.size_of(ws_name);
        if have != bytes {
            return Err(RuntimeError::invalid_argument(format!(
                "node '{}': workspace tensor holds {} bytes, model needs {}",
                node, have, bytes
            ))
            .with_tensor(ws_name));
        }
        Ok(())
    }

    /// Run every node in insertion order. Stops at the first failure; the
    /// failing node is the last entry. With `reset`, each session releases
    /// its runtime binding after running and rebinds on the next pass.
    pub fn run_all(&mut self, reset: bool) -> Vec<ExecInfo> {
        let mut infos = Vec::with_capacity(self.nodes.len());
        for node in &mut self.nodes {
            let result = run_node(&self.workspace, node);
            let accelerator = node.session.bound_accelerator();
            if reset {
                node.session.reset();
            }
            match result {
                Ok(elapsed) => {
                    tracing::info!(
                        node = %node.name,
                        accelerator = accelerator.map_or("none", Accelerator::as_str),
                        elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                        "node executed"
                    );
                    infos.push(ExecInfo { name: node.name.clone(), accelerator, elapsed, ok: true, error: None });
                }
                Err(e) => {
                    tracing::error!(node = %node.name, error = %e, "node failed");
                    infos.push(ExecInfo {
                        name: node.name.clone(),
                        accelerator,
                        elapsed: Duration::ZERO,
                        ok: false,
                        error: Some(e.to_string()),
                    });
                    break;
                }
            }
        }
        infos
    }
}

fn run_node(workspace: &TensorWorkspace, node: &mut GraphNode) -> Result<Duration> {
    let network = std::sync::Arc::clone(node.session.network());
    let mut inputs = TensorMap::new();
    for desc in network.inputs() {
        let ws_name = &node.input_binding[&desc.name];
        let bytes = workspace
            .with_data(ws_name, <[u8]>::to_vec)
            .ok_or_else(|| RuntimeError::invalid_argument("workspace tensor released").with_tensor(ws_name))?;
        let buffer = TensorBuffer::from_bytes(&desc.name, desc.dims.clone(), desc.encoding, bytes)?;
        inputs.insert(desc.name.clone(), buffer);
    }

    let mut outputs = TensorMap::new();
    let elapsed = node.session.execute(&inputs, &mut outputs, &std::sync::atomic::AtomicBool::new(false))?;

    for (tensor, ws_name) in &node.output_binding {
        let Some(buffer) = outputs.get(tensor) else { continue };
        let written = workspace.with_data_mut(ws_name, |dst| {
            let fits = dst.len() == buffer.len_bytes();
            if fits {
                dst.copy_from_slice(buffer.as_bytes());
            }
            fits
        });
        match written {
            Some(true) => {}
            Some(false) => {
                return Err(RuntimeError::shape_mismatch(format!(
                    "output '{}' is {} bytes, workspace block is {}",
                    tensor,
                    buffer.len_bytes(),
                    workspace.size_of(ws_name)
                ))
                .with_tensor(ws_name))
            }
            None => {
                return Err(RuntimeError::invalid_argument("workspace tensor released").with_tensor(ws_name))
            }
        }
        let preview: Vec<f32> = buffer.to_f32().into_iter().take(PREVIEW_LEN).collect();
        tracing::info!(node = %node.name, tensor = %tensor, workspace = %ws_name, ?preview, "output");
    }
    Ok(elapsed)
}

impl std::fmt::Debug for GraphRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphRunner")
            .field("nodes", &self.nodes.iter().map(|n| n.name.as_str()).collect::<Vec<_>>())
            .field("workspace", &self.workspace)
            .finish()
    }
}
