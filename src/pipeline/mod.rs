//! Multi-model pipelines wired through a named tensor workspace.
//!
//! A [`PipelineConfig`] lists models in execution order. Each model's tensors
//! bind to workspace tensors by name; a tensor produced by one model and
//! consumed by the next is a single shared block. Tensors consumed but never
//! produced are graph roots and are seeded from the `init` section.

mod config;
mod graph;
mod seed;
mod workspace;

use std::collections::BTreeMap;
use std::sync::Arc;

pub use config::{InitSpec, ModelNode, PipelineConfig};
pub use graph::{ExecInfo, GraphNode, GraphRunner};
pub use seed::{effective_init, graph_roots, seed_roots};
pub use workspace::TensorWorkspace;

use crate::error::{Result, RuntimeError};
use crate::network::{NetworkContainer, TensorDescriptor, TensorLayout};
use crate::platform::RuntimeFactory;
use crate::session::{Session, SessionConfig};

/// Load every model, open a session per model, allocate the workspace and
/// seed the graph roots.
pub fn build_graph(
    config: &PipelineConfig,
    factory: Arc<dyn RuntimeFactory>,
    defaults: &SessionConfig,
) -> Result<GraphRunner> {
    config.validate()?;
    let mut runner = GraphRunner::new(TensorWorkspace::new());

    for model in &config.models {
        let asset = config.resolve_asset(model);
        let network = NetworkContainer::load(asset.as_path())?;

        let mut session_config = defaults.clone();
        if let Some(accelerator) = model.accelerator()? {
            session_config = session_config.with_accelerators(vec![accelerator]);
        }
        if !model.outputs.is_empty() {
            session_config = session_config.with_outputs(model.outputs.keys());
        }
        if let Some(layout) = workspace_layout(&model.name, network.inputs())? {
            session_config = session_config.with_input_layout(layout);
        }

        allocate_bound(runner.workspace_mut(), &model.inputs, |t| network.input(t))?;
        allocate_bound(runner.workspace_mut(), &model.outputs, |t| network.output(t))?;

        let session = Session::open(network, session_config, Arc::clone(&factory))?;
        tracing::info!(
            model = %model.name,
            asset = %asset.display(),
            accelerator = session.bound_accelerator().map_or("none", |a| a.as_str()),
            "pipeline model loaded"
        );
        runner.add_node(GraphNode {
            name: model.name.clone(),
            session,
            input_binding: model.inputs.clone(),
            output_binding: model.outputs.clone(),
        })?;
    }

    seed_roots(config, runner.workspace())?;
    Ok(runner)
}

/// Workspace blocks hold bytes in the network's own layout, so a node's
/// session reads rank-4 inputs in that layout. Undeclared layouts are NCHW.
fn workspace_layout(node: &str, inputs: &[TensorDescriptor]) -> Result<Option<TensorLayout>> {
    let mut layouts = inputs.iter().filter(|d| d.rank() == 4).map(|d| d.layout.unwrap_or_default());
    let Some(first) = layouts.next() else { return Ok(None) };
    if layouts.any(|l| l != first) {
        return Err(RuntimeError::invalid_argument(format!(
            "node '{}' mixes NCHW and NHWC inputs",
            node
        )));
    }
    Ok(Some(first))
}

fn allocate_bound<'a>(
    workspace: &mut TensorWorkspace,
    binding: &BTreeMap<String, String>,
    lookup: impl Fn(&str) -> Option<&'a TensorDescriptor>,
) -> Result<()> {
    for (tensor, ws_name) in binding {
        let desc = lookup(tensor)
            .ok_or_else(|| RuntimeError::invalid_argument("model has no such tensor").with_tensor(tensor))?;
        workspace.allocate(ws_name, desc.byte_len())?;
    }
    Ok(())
}
