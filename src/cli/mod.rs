// Copyright 2024-2026 snpe-rt Contributors
// SPDX-License-Identifier: Apache-2.0

//! CLI subcommands for the `snpe-rt-cli` harness.
//!
//! Every subcommand returns a process exit code derived from
//! [`ErrorKind::exit_code`](crate::error::ErrorKind::exit_code).
//!
//! ## Usage
//!
//! ```bash
//! snpe-rt-cli inspect --model net.dlc          # Print tensor descriptors
//! snpe-rt-cli probe                            # List usable accelerators
//! snpe-rt-cli run --model net.dlc --count 4    # Execute through the dispatcher
//! snpe-rt-cli pipeline --config pipeline.json  # Run a multi-model pipeline
//! snpe-rt-cli config show                      # Print effective configuration
//! ```

pub mod config_cmd;
pub mod info_cmd;
pub mod pipeline_cmd;
pub mod run_cmd;

use std::collections::BTreeSet;

use serde::Serialize;

use crate::config::{self, PlatformKind};
use crate::error::{Result, RuntimeError};
use crate::RuntimeConfig;

/// `--name value`, `--name=value` and boolean `--flag` arguments after the
/// subcommand. Options may repeat.
#[derive(Debug, Default)]
pub struct ParsedArgs {
    options: Vec<(String, String)>,
    flags: BTreeSet<String>,
    positionals: Vec<String>,
}

impl ParsedArgs {
    /// Parse `args`. Names in `flags` take no value.
    pub fn parse(args: &[String], flags: &[&str]) -> Result<Self> {
        let mut parsed = Self::default();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            let Some(name) = arg.strip_prefix("--") else {
                parsed.positionals.push(arg.clone());
                continue;
            };
            if let Some((name, value)) = name.split_once('=') {
                parsed.options.push((name.to_string(), value.to_string()));
            } else if flags.contains(&name) {
                parsed.flags.insert(name.to_string());
            } else {
                let value = iter
                    .next()
                    .ok_or_else(|| RuntimeError::invalid_argument(format!("--{} needs a value", name)))?;
                parsed.options.push((name.to_string(), value.clone()));
            }
        }
        Ok(parsed)
    }

    /// Last value given for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.options.iter().rev().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.options.iter().filter(move |(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    pub fn require(&self, name: &str) -> Result<&str> {
        self.get(name).ok_or_else(|| RuntimeError::invalid_argument(format!("missing --{}", name)))
    }

    pub fn parse_or<T: std::str::FromStr>(&self, name: &str, default: T) -> Result<T> {
        match self.get(name) {
            None => Ok(default),
            Some(v) => v
                .parse()
                .map_err(|_| RuntimeError::invalid_argument(format!("invalid --{} value '{}'", name, v))),
        }
    }

    pub fn has(&self, name: &str) -> bool {
        self.flags.contains(name)
    }

    pub fn positionals(&self) -> &[String] {
        &self.positionals
    }
}

/// Runtime configuration from the environment, with `--platform` applied.
pub(crate) fn runtime_config(args: &ParsedArgs) -> Result<RuntimeConfig> {
    let mut env = config::load();
    if let Some(platform) = args.get("platform") {
        env.platform = platform.parse::<PlatformKind>().map_err(RuntimeError::invalid_argument)?;
    }
    if let Some(capacity) = args.get("capacity") {
        env.queue_capacity = capacity
            .parse::<usize>()
            .map_err(|_| RuntimeError::invalid_argument(format!("invalid --capacity value '{}'", capacity)))?
            .max(1);
    }
    Ok(RuntimeConfig::from(&env))
}

/// Report `err` on stderr and map it to an exit code.
pub fn fail(err: &RuntimeError) -> i32 {
    eprintln!("error: {}", err);
    err.exit_code()
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> i32 {
    match serde_json::to_string_pretty(value) {
        Ok(text) => {
            println!("{}", text);
            0
        }
        Err(e) => {
            eprintln!("error: serializing output: {}", e);
            9
        }
    }
}
