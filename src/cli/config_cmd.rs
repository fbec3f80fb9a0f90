// Copyright 2024-2026 snpe-rt Contributors
// SPDX-License-Identifier: Apache-2.0

//! Config CLI subcommands: show, defaults, validate.
//!
//! These commands read configuration directly from the environment and the
//! optional config file without starting a runtime.

use super::print_json;
use crate::config::{self, EffectiveConfig, EnvConfig};

/// Print effective config as key-value pairs, or JSON with `--json`.
pub fn run_show(json: bool) -> i32 {
    let cfg = config::load().effective_config();
    if json {
        return print_json(&cfg);
    }
    print_config(&cfg);
    0
}

/// Print the built-in defaults (no file or env overrides).
pub fn run_defaults(json: bool) -> i32 {
    let cfg = EnvConfig::default().effective_config();
    if json {
        return print_json(&cfg);
    }
    print_config(&cfg);
    0
}

/// Strictly re-read the configuration. Returns 0 when every value parses,
/// 2 on the first invalid value or unreadable file.
pub fn run_validate() -> i32 {
    match config::try_load() {
        Ok(env) => {
            if env.platform == config::PlatformKind::Native && env.library_dirs.is_empty() {
                eprintln!("WARNING: SNPE_RT_PLATFORM=native with no SNPE_RT_LIBRARY_DIRS; only the system path is searched");
            }
            println!("Configuration is valid.");
            0
        }
        Err(e) => {
            eprintln!("ERROR: {}", e);
            2
        }
    }
}

fn print_config(cfg: &EffectiveConfig) {
    let join = |items: Vec<String>| items.join(",");
    println!(
        "SNPE_RT_CONFIG={}",
        cfg.config_file.as_ref().map(|p| p.display().to_string()).unwrap_or_default()
    );
    println!("SNPE_RT_PLATFORM={}", cfg.platform);
    println!(
        "SNPE_RT_LIBRARY_DIRS={}",
        join(cfg.library_dirs.iter().map(|p| p.display().to_string()).collect())
    );
    println!(
        "SNPE_RT_NATIVE_LIB_DIR={}",
        cfg.native_lib_dir.as_ref().map(|p| p.display().to_string()).unwrap_or_default()
    );
    println!("SNPE_RT_QUEUE_CAPACITY={}", cfg.queue_capacity);
    println!("SNPE_RT_PROBE_TIMEOUT_MS={}", cfg.probe_timeout_ms);
    println!("SNPE_RT_ACCELERATORS={}", join(cfg.accelerators.iter().map(ToString::to_string).collect()));
    println!("SNPE_RT_CPU_FALLBACK={}", cfg.cpu_fallback);
    println!("SNPE_RT_PERFORMANCE_PROFILE={}", cfg.performance_profile.as_str());
    println!("SNPE_RT_STATS_INTERVAL={}", cfg.stats_interval);
    println!("SNPE_RT_LOG_LEVEL={}", cfg.log_level);
    println!("SNPE_RT_LOG_FORMAT={}", cfg.log_format.as_str());
}
