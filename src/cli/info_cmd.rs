// Copyright 2024-2026 snpe-rt Contributors
// SPDX-License-Identifier: Apache-2.0

//! `inspect` and `probe` subcommands.

use std::time::Duration;

use super::{fail, print_json, runtime_config, ParsedArgs};
use crate::error::Result;
use crate::network::{NetworkContainer, NetworkSummary};
use crate::platform;
use crate::probe::{self, AvailabilityList};

/// Print a network's version, fingerprint and tensor descriptors.
pub fn run_inspect(args: &[String]) -> i32 {
    match inspect(args) {
        Ok(code) => code,
        Err(e) => fail(&e),
    }
}

fn inspect(args: &[String]) -> Result<i32> {
    let args = ParsedArgs::parse(args, &["json"])?;
    let path = args.require("model")?;
    let summary = NetworkContainer::load(std::path::Path::new(path))?.summary();
    if args.has("json") {
        return Ok(print_json(&summary));
    }
    print_summary(path, &summary);
    Ok(0)
}

fn print_summary(path: &str, summary: &NetworkSummary) {
    println!("{}", path);
    println!("  version:     {}", summary.version);
    println!("  fingerprint: {}", summary.fingerprint);
    println!("  size:        {} bytes", summary.size_bytes);
    println!("  inputs:");
    for desc in &summary.inputs {
        println!("    {}", desc);
    }
    println!("  outputs:");
    for desc in &summary.outputs {
        println!("    {}", desc);
    }
}

/// Print the accelerators the platform reports as usable.
pub fn run_probe(args: &[String]) -> i32 {
    match probe_available(args) {
        Ok(code) => code,
        Err(e) => fail(&e),
    }
}

fn probe_available(args: &[String]) -> Result<i32> {
    let args = ParsedArgs::parse(args, &["json"])?;
    let config = runtime_config(&args)?;
    let ceiling = args
        .parse_or("timeout-ms", config.probe_timeout.as_millis() as u64)
        .map(Duration::from_millis)?;
    let platform = platform::open(&config.platform)?;
    let list: AvailabilityList = probe::probe(platform.create_factory(), ceiling)?;
    if args.has("json") {
        return Ok(print_json(&serde_json::json!({
            "platform": platform.version_string(),
            "available": list,
        })));
    }
    println!("platform: {}", platform.version_string());
    for accelerator in list.iter() {
        println!("  {}", accelerator);
    }
    Ok(0)
}
