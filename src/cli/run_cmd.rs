// Copyright 2024-2026 snpe-rt Contributors
// SPDX-License-Identifier: Apache-2.0

//! `run` subcommand: execute a network through the dispatcher.

use std::path::Path;
use std::time::{Duration, Instant};

use serde::Serialize;

use super::{fail, print_json, runtime_config, ParsedArgs};
use crate::accelerator::parse_accelerator_list;
use crate::error::{ErrorKind, Result, RuntimeError};
use crate::network::{ElementEncoding, NetworkHandle, TensorLayout};
use crate::scheduler::CompletionRecord;
use crate::session::{SessionConfig, TensorBuffer, TensorMap};
use crate::Runtime;

/// Output values shown per tensor.
const PREVIEW_LEN: usize = 8;
const DEFAULT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Serialize)]
struct OutputSummary {
    dims: Vec<usize>,
    preview: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct RunResult {
    sequence_id: u64,
    status: String,
    elapsed_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    outputs: std::collections::BTreeMap<String, OutputSummary>,
}

impl From<&CompletionRecord> for RunResult {
    fn from(record: &CompletionRecord) -> Self {
        let outputs = record
            .outputs
            .iter()
            .map(|(name, buffer)| {
                let preview = buffer.to_f32().into_iter().take(PREVIEW_LEN).collect();
                (name.clone(), OutputSummary { dims: buffer.dims().to_vec(), preview })
            })
            .collect();
        Self {
            sequence_id: record.sequence_id,
            status: record.status.label().to_string(),
            elapsed_ms: record.elapsed.as_secs_f64() * 1000.0,
            error: record.error.as_ref().map(ToString::to_string),
            outputs,
        }
    }
}

/// `run --model FILE [--input NAME=FILE]... [--accelerators LIST]
/// [--no-fallback] [--layout NCHW|NHWC] [--outputs A,B] [--count N]
/// [--timeout-ms MS] [--platform KIND] [--json]`
pub async fn run(args: &[String]) -> i32 {
    match execute(args).await {
        Ok(code) => code,
        Err(e) => fail(&e),
    }
}

async fn execute(args: &[String]) -> Result<i32> {
    let args = ParsedArgs::parse(args, &["json", "no-fallback"])?;
    let model = args.require("model")?;
    let count = args.parse_or("count", 1usize)?.max(1);
    let timeout = Duration::from_millis(args.parse_or("timeout-ms", DEFAULT_TIMEOUT_MS)?);
    let config = runtime_config(&args)?;
    let session_config = session_config(&args, config.session_defaults.clone())?;
    let layout = session_config.input_layout;

    let runtime = Runtime::new(config)?;
    let network = runtime.load_network(Path::new(model))?;
    let inputs = build_inputs(&network, &args, layout)?;
    let session = runtime.open_session_with(network, session_config)?;
    tracing::info!(
        session = %session.id(),
        accelerator = ?session.describe().bound_accelerator,
        count,
        "running"
    );

    let deadline = Instant::now() + timeout;
    let mut records = Vec::with_capacity(count);
    let mut submitted = 0;
    while submitted < count {
        match runtime.submit(session.id(), inputs.clone(), TensorMap::new(), None) {
            Ok(_) => submitted += 1,
            Err(e) if e.kind == ErrorKind::QueueFull => {
                records.extend(wait_one(&runtime, deadline).await?);
            }
            Err(e) => return Err(e),
        }
    }
    while records.len() < count {
        records.extend(wait_one(&runtime, deadline).await?);
    }
    runtime.shutdown();

    let results: Vec<RunResult> = records.iter().map(RunResult::from).collect();
    if args.has("json") {
        let code = print_json(&results);
        if code != 0 {
            return Ok(code);
        }
    } else {
        for result in &results {
            print_result(result);
        }
    }
    Ok(records.iter().find_map(|r| r.error.as_ref()).map_or(0, RuntimeError::exit_code))
}

async fn wait_one(runtime: &Runtime, deadline: Instant) -> Result<Option<CompletionRecord>> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(RuntimeError::cancelled("timed out waiting for completions"));
    }
    Ok(runtime.next_completion(remaining).await)
}

fn session_config(args: &ParsedArgs, mut config: SessionConfig) -> Result<SessionConfig> {
    if let Some(list) = args.get("accelerators") {
        config = config.with_accelerators(parse_accelerator_list(list)?);
    }
    if args.has("no-fallback") {
        config = config.with_cpu_fallback(false);
    }
    if let Some(layout) = args.get("layout") {
        config = config.with_input_layout(layout.parse()?);
    }
    if let Some(profile) = args.get("profile") {
        config = config.with_profile(profile.parse()?);
    }
    if let Some(outputs) = args.get("outputs") {
        config = config.with_outputs(outputs.split(',').map(str::trim).filter(|s| !s.is_empty()));
    }
    Ok(config)
}

/// Float32 inputs from `--input NAME=FILE`; unnamed inputs are zero-filled.
/// Rank-4 inputs use the dims of the host layout.
fn build_inputs(network: &NetworkHandle, args: &ParsedArgs, layout: TensorLayout) -> Result<TensorMap> {
    let mut files = std::collections::BTreeMap::new();
    for spec in args.get_all("input") {
        let (name, path) = spec
            .split_once('=')
            .ok_or_else(|| RuntimeError::invalid_argument(format!("--input expects NAME=FILE, got '{}'", spec)))?;
        if network.input(name).is_none() {
            return Err(RuntimeError::invalid_argument("unknown input tensor").with_tensor(name));
        }
        files.insert(name.to_string(), path.to_string());
    }

    let mut inputs = TensorMap::new();
    for desc in network.inputs() {
        let dims = match <[usize; 4]>::try_from(desc.dims.as_slice()) {
            Ok(dims) => layout.from_nchw(desc.layout.unwrap_or_default().to_nchw(dims)).to_vec(),
            Err(_) => desc.dims.clone(),
        };
        let buffer = match files.get(&desc.name) {
            Some(path) => {
                let bytes = std::fs::read(path)
                    .map_err(|e| RuntimeError::new(ErrorKind::IoError, format!("{}: {}", path, e)))?;
                TensorBuffer::from_bytes(&desc.name, dims, ElementEncoding::Float32, bytes)?
            }
            None => TensorBuffer::zeroed(&desc.name, dims, ElementEncoding::Float32),
        };
        inputs.insert(desc.name.clone(), buffer);
    }
    Ok(inputs)
}

fn print_result(result: &RunResult) {
    println!("request {} {} {:.3} ms", result.sequence_id, result.status, result.elapsed_ms);
    if let Some(error) = &result.error {
        println!("  error: {}", error);
    }
    for (name, output) in &result.outputs {
        println!("  {} {:?} {:?}", name, output.dims, output.preview);
    }
}
