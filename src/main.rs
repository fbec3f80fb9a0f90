//! snpe-rt CLI harness.
//!
//! ## Subcommands
//!
//! - `snpe-rt-cli run` - Execute a network through the dispatcher
//! - `snpe-rt-cli inspect` - Print a network's tensor descriptors
//! - `snpe-rt-cli probe` - List usable accelerators
//! - `snpe-rt-cli pipeline` - Run a multi-model pipeline
//! - `snpe-rt-cli config` - Show, list defaults or validate configuration

use std::process::ExitCode;

use snpe_rt::cli::{config_cmd, info_cmd, pipeline_cmd, run_cmd};
use snpe_rt::config;
use snpe_rt::telemetry::init_logging;

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("help");
    let rest = args.get(2..).unwrap_or(&[]);

    if !matches!(command, "help" | "--help" | "-h" | "version" | "--version" | "-V" | "config") {
        let log = config::load().log;
        if let Err(e) = init_logging(&log) {
            eprintln!("warning: logging disabled: {}", e);
        }
    }

    let code = match command {
        "run" => run_cmd::run(rest).await,
        "inspect" => info_cmd::run_inspect(rest),
        "probe" => info_cmd::run_probe(rest),
        "pipeline" => pipeline_cmd::run_pipeline(rest),
        "config" => {
            let json = rest.iter().any(|a| a == "--json");
            match rest.first().map(|s| s.as_str()).unwrap_or("show") {
                "show" | "--json" => config_cmd::run_show(json),
                "defaults" => config_cmd::run_defaults(json),
                "validate" => config_cmd::run_validate(),
                other => {
                    eprintln!("Unknown config subcommand: {}", other);
                    print_command_help("config");
                    2
                }
            }
        }
        "help" | "--help" | "-h" => {
            match rest.first() {
                Some(subcommand) => print_command_help(subcommand),
                None => print_usage(),
            }
            0
        }
        "version" | "--version" | "-V" => {
            println!("snpe-rt {}", env!("CARGO_PKG_VERSION"));
            0
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            2
        }
    };
    ExitCode::from(u8::try_from(code).unwrap_or(9))
}

fn print_usage() {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        "snpe-rt - on-device SNPE inference runtime v{}

USAGE:
    snpe-rt-cli <COMMAND> [OPTIONS]

COMMANDS:
    run          Execute a network through the request dispatcher
    inspect      Print a network's version, fingerprint and tensors
    probe        List accelerators usable on this device
    pipeline     Run a multi-model pipeline from a JSON config
    config       Manage configuration (show, defaults, validate)
    version      Show version information
    help         Show this help message

ENVIRONMENT:
    SNPE_RT_CONFIG        TOML config file
    SNPE_RT_PLATFORM      reference | native (default: reference)
    SNPE_RT_LIBRARY_DIRS  Search path for the SNPE bundle
    SNPE_RT_ACCELERATORS  Default accelerator preference (default: CPU)
    SNPE_RT_LOG_LEVEL     Tracing filter (default: info)
    SNPE_RT_LOG_FORMAT    json | pretty (default: json)

EXIT CODES:
    0  Success
    2  Invalid argument or shape mismatch
    3  I/O error
    4  Platform unavailable or symbol missing
    5  No accelerator available
    7  Invalid format or unsupported version
    9  Other failure
",
        version
    );
}

/// Print detailed help for a specific command.
fn print_command_help(command: &str) {
    match command {
        "run" => eprintln!(
            "snpe-rt-cli run - Execute a network

USAGE:
    snpe-rt-cli run --model <FILE> [OPTIONS]

OPTIONS:
    --model FILE          DLC network to load
    --input NAME=FILE     Raw little-endian float32 data for an input (repeatable)
    --accelerators LIST   Preference list, e.g. DSP,GPU or D,G
    --no-fallback         Do not append CPU to the preference list
    --layout NCHW|NHWC    Layout of rank-4 host inputs
    --profile NAME        Performance profile
    --outputs A,B         Only materialize these outputs
    --count N             Number of requests (default: 1)
    --capacity N          Dispatcher capacity
    --timeout-ms MS       Overall wait for completions (default: 10000)
    --platform KIND       reference | native
    --json                JSON output

Inputs without --input are zero-filled.
"
        ),
        "inspect" => eprintln!(
            "snpe-rt-cli inspect - Print network descriptors

USAGE:
    snpe-rt-cli inspect --model <FILE> [--json]
"
        ),
        "probe" => eprintln!(
            "snpe-rt-cli probe - List usable accelerators

USAGE:
    snpe-rt-cli probe [--platform KIND] [--timeout-ms MS] [--json]
"
        ),
        "pipeline" => eprintln!(
            "snpe-rt-cli pipeline - Run a multi-model pipeline

USAGE:
    snpe-rt-cli pipeline --config <FILE> [OPTIONS]

OPTIONS:
    --config FILE     Pipeline JSON document
    --runs N          Passes over the graph (default: 1)
    --reset           Release runtime bindings after every node
    --dump            Log the workspace layout before running
    --platform KIND   reference | native
    --json            JSON output
"
        ),
        "config" => eprintln!(
            "snpe-rt-cli config - Manage configuration

USAGE:
    snpe-rt-cli config <SUBCOMMAND> [--json]

SUBCOMMANDS:
    show       Print the effective configuration (default)
    defaults   Print built-in defaults
    validate   Strictly parse every value (exit 2 on error)
"
        ),
        _ => {
            eprintln!("No detailed help for '{}'", command);
            print_usage();
        }
    }
}
