//! Fuzz target for pipeline config parsing and root discovery.

#![no_main]

use libfuzzer_sys::fuzz_target;
use snpe_rt::pipeline::{graph_roots, PipelineConfig};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else { return };
    if let Ok(config) = PipelineConfig::from_json(text) {
        let roots = graph_roots(&config);
        for model in &config.models {
            let _ = config.resolve_asset(model);
        }
        assert!(roots.len() <= config.models.iter().map(|m| m.inputs.len()).sum::<usize>());
    }
});
