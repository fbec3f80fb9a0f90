//! Multi-model pipelines over the reference platform.

use std::path::Path;

use snpe_rt::network::{DlcBuilder, ElementEncoding, TensorDescriptor};
use snpe_rt::pipeline::{build_graph, graph_roots, PipelineConfig};
use snpe_rt::platform::{DeviceProfile, Platform, ReferencePlatform};
use snpe_rt::{Accelerator, ErrorKind, SessionConfig};

fn write_model(dir: &Path, name: &str, input: (&str, Vec<usize>), output: (&str, Vec<usize>)) {
    let bytes = DlcBuilder::new()
        .input(TensorDescriptor::new(input.0, input.1, ElementEncoding::Float32))
        .output(TensorDescriptor::new(output.0, output.1, ElementEncoding::Float32))
        .build()
        .unwrap();
    std::fs::write(dir.join(name), bytes).unwrap();
}

fn two_stage(dir: &Path, init: &str) -> PipelineConfig {
    write_model(dir, "backbone.dlc", ("image", vec![1, 4]), ("features", vec![1, 4]));
    write_model(dir, "head.dlc", ("features", vec![1, 4]), ("boxes", vec![1, 2]));
    let doc = format!(
        r#"{{
            "models": [
                {{ "name": "backbone", "asset": "backbone.dlc", "runtime": "G",
                   "inputs": {{ "image": "frame" }}, "outputs": {{ "features": "feat" }} }},
                {{ "name": "head", "asset": "head.dlc",
                   "inputs": {{ "features": "feat" }}, "outputs": {{ "boxes": "boxes" }} }}
            ],
            "init": {}
        }}"#,
        init
    );
    let path = dir.join("pipeline.json");
    std::fs::write(&path, doc).unwrap();
    PipelineConfig::from_path(&path).unwrap()
}

#[test]
fn test_values_flow_through_workspace() {
    let dir = tempfile::tempdir().unwrap();
    let config = two_stage(dir.path(), r#"{ "frame": { "kind": "const", "value": 0.5 } }"#);
    assert_eq!(graph_roots(&config).into_iter().collect::<Vec<_>>(), vec!["frame".to_string()]);

    let platform = ReferencePlatform::new(DeviceProfile::default());
    let mut graph = build_graph(&config, platform.create_factory(), &SessionConfig::default()).unwrap();
    let infos = graph.run_all(false);

    assert_eq!(infos.len(), 2);
    assert!(infos.iter().all(|i| i.ok));
    assert_eq!(infos[0].accelerator, Some(Accelerator::Gpu));
    assert_eq!(infos[1].accelerator, Some(Accelerator::Cpu));
    assert_eq!(graph.workspace().read_f32("feat").unwrap(), vec![0.5; 4]);
    assert_eq!(graph.workspace().read_f32("boxes").unwrap(), vec![0.5; 2]);
}

#[test]
fn test_file_seed_and_reset() {
    let dir = tempfile::tempdir().unwrap();
    let seed: Vec<u8> = [1.0f32, 2.0, 3.0, 4.0].iter().flat_map(|v| v.to_le_bytes()).collect();
    std::fs::write(dir.path().join("frame.bin"), seed).unwrap();
    let config = two_stage(dir.path(), r#"{ "frame": { "kind": "file", "path": "frame.bin" } }"#);

    let platform = ReferencePlatform::new(DeviceProfile::default());
    let counters = platform.counters();
    let mut graph = build_graph(&config, platform.create_factory(), &SessionConfig::default()).unwrap();
    assert_eq!(counters.builds(), 2);

    for _ in 0..2 {
        assert!(graph.run_all(true).iter().all(|i| i.ok));
    }
    assert_eq!(graph.workspace().read_f32("boxes").unwrap(), vec![1.0, 2.0]);
    // Reset releases bindings after each pass; the second pass rebinds both.
    assert_eq!(counters.builds(), 4);
}

#[test]
fn test_mismatched_edge_sizes_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_model(dir.path(), "a.dlc", ("x", vec![1, 4]), ("y", vec![1, 4]));
    write_model(dir.path(), "b.dlc", ("x", vec![1, 8]), ("y", vec![1, 2]));
    let doc = r#"{
        "models": [
            { "name": "a", "asset": "a.dlc", "inputs": { "x": "in" }, "outputs": { "y": "mid" } },
            { "name": "b", "asset": "b.dlc", "inputs": { "x": "mid" }, "outputs": { "y": "out" } }
        ]
    }"#;
    let mut config = PipelineConfig::from_json(doc).unwrap();
    config.base_dir = Some(dir.path().to_path_buf());

    let platform = ReferencePlatform::new(DeviceProfile::default());
    let err = build_graph(&config, platform.create_factory(), &SessionConfig::default()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidArgument);
    assert_eq!(err.tensor.as_deref(), Some("mid"));
}

#[test]
fn test_unbound_input_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_model(dir.path(), "a.dlc", ("x", vec![1, 4]), ("y", vec![1, 4]));
    let doc = r#"{ "models": [ { "name": "a", "asset": "a.dlc", "inputs": {}, "outputs": { "y": "out" } } ] }"#;
    let mut config = PipelineConfig::from_json(doc).unwrap();
    config.base_dir = Some(dir.path().to_path_buf());

    let platform = ReferencePlatform::new(DeviceProfile::default());
    let err = build_graph(&config, platform.create_factory(), &SessionConfig::default()).unwrap_err();
    assert_eq!(err.tensor.as_deref(), Some("x"));
}

#[test]
fn test_resized_output_block_fails_node() {
    let dir = tempfile::tempdir().unwrap();
    let config = two_stage(dir.path(), r#"{ "frame": { "kind": "const", "value": 1.0 } }"#);
    let platform = ReferencePlatform::new(DeviceProfile::default());
    let mut graph = build_graph(&config, platform.create_factory(), &SessionConfig::default()).unwrap();

    let ws = graph.workspace_mut();
    ws.allocate("wide", 32).unwrap();
    let err = ws.alias("feat", "wide").unwrap_err();
    assert_eq!(err.kind, ErrorKind::ShapeMismatch);
    ws.release("feat");
    ws.allocate("feat", 32).unwrap();

    let infos = graph.run_all(false);
    assert_eq!(infos.len(), 1);
    assert!(!infos[0].ok);
    assert!(infos[0].error.as_deref().unwrap().contains("feat"));
}

#[test]
fn test_failing_node_stops_the_pass() {
    let dir = tempfile::tempdir().unwrap();
    let config = two_stage(dir.path(), "{}");
    let profile = DeviceProfile::default().with_failing_exec([Accelerator::Gpu]);
    let platform = ReferencePlatform::new(profile);
    let mut graph = build_graph(&config, platform.create_factory(), &SessionConfig::default()).unwrap();

    let infos = graph.run_all(false);
    assert_eq!(infos.len(), 1);
    assert!(!infos[0].ok);
    assert!(infos[0].error.is_some());
    assert_eq!(graph.workspace().read_f32("boxes").unwrap(), vec![0.0; 2]);
}

#[test]
fn test_missing_asset_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let doc = r#"{ "models": [ { "name": "a", "asset": "absent.dlc", "inputs": {}, "outputs": {} } ] }"#;
    let mut config = PipelineConfig::from_json(doc).unwrap();
    config.base_dir = Some(dir.path().to_path_buf());
    let platform = ReferencePlatform::new(DeviceProfile::default());
    let err = build_graph(&config, platform.create_factory(), &SessionConfig::default()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::IoError);
}
