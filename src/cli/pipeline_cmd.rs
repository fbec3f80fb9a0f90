// Copyright 2024-2026 snpe-rt Contributors
// SPDX-License-Identifier: Apache-2.0

//! `pipeline` subcommand: build and run a multi-model graph.

use super::{fail, print_json, runtime_config, ParsedArgs};
use crate::error::{ErrorKind, Result, RuntimeError};
use crate::pipeline::{build_graph, ExecInfo, PipelineConfig};
use crate::platform;

/// `pipeline --config FILE [--runs N] [--reset] [--dump] [--platform KIND] [--json]`
pub fn run_pipeline(args: &[String]) -> i32 {
    match execute(args) {
        Ok(code) => code,
        Err(e) => fail(&e),
    }
}

fn execute(args: &[String]) -> Result<i32> {
    let args = ParsedArgs::parse(args, &["json", "reset", "dump"])?;
    let path = args.require("config")?;
    let runs = args.parse_or("runs", 1usize)?.max(1);
    let pipeline = PipelineConfig::from_path(path)?;
    let config = runtime_config(&args)?;

    let platform = platform::open(&config.platform)?;
    let mut graph = build_graph(&pipeline, platform.create_factory(), &config.session_defaults)?;
    if args.has("dump") {
        graph.workspace().dump();
    }

    let mut passes: Vec<Vec<ExecInfo>> = Vec::with_capacity(runs);
    for pass in 0..runs {
        let infos = graph.run_all(args.has("reset"));
        let failed = infos.iter().any(|i| !i.ok);
        if !args.has("json") {
            for info in &infos {
                let accelerator = info.accelerator.map_or("none", |a| a.as_str());
                match &info.error {
                    None => println!(
                        "pass {} {} on {} {:.3} ms",
                        pass,
                        info.name,
                        accelerator,
                        info.elapsed.as_secs_f64() * 1000.0
                    ),
                    Some(error) => println!("pass {} {} failed: {}", pass, info.name, error),
                }
            }
        }
        passes.push(infos);
        if failed {
            break;
        }
    }
    if args.has("json") {
        let code = print_json(&passes);
        if code != 0 {
            return Ok(code);
        }
    }

    let failed = passes.iter().flatten().any(|i| !i.ok);
    if failed {
        return Err(RuntimeError::new(ErrorKind::ExecutorFailure, "pipeline node failed"));
    }
    Ok(0)
}
