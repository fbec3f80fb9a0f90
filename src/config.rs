//! Runtime configuration from environment variables and an optional TOML file.
//!
//! Precedence: built-in defaults, then the file named by `SNPE_RT_CONFIG`,
//! then `SNPE_RT_*` variables. [`load`] never fails: invalid values fall back
//! to the next layer with a warning. [`try_load`] reports the first invalid
//! value instead (used by `config validate`).
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `SNPE_RT_CONFIG` | unset | Path to a TOML config file |
//! | `SNPE_RT_PLATFORM` | `reference` | `reference` or `native` |
//! | `SNPE_RT_LIBRARY_DIRS` | empty | Search path for the SNPE bundle |
//! | `SNPE_RT_NATIVE_LIB_DIR` | unset | App native library directory (DSP path) |
//! | `SNPE_RT_QUEUE_CAPACITY` | 8 | Max outstanding dispatcher requests |
//! | `SNPE_RT_PROBE_TIMEOUT_MS` | 250 | Runtime probe ceiling |
//! | `SNPE_RT_ACCELERATORS` | `CPU` | Default accelerator preference |
//! | `SNPE_RT_CPU_FALLBACK` | true | Append CPU to the preference list |
//! | `SNPE_RT_PERFORMANCE_PROFILE` | `HIGH_PERFORMANCE` | Default profile |
//! | `SNPE_RT_STATS_INTERVAL` | 100 | Completions between stats log lines |
//! | `SNPE_RT_LOG_LEVEL` | `info` | Tracing filter directives |
//! | `SNPE_RT_LOG_FORMAT` | `json` | `json` or `pretty` |

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::accelerator::{parse_accelerator_list, Accelerator, PerformanceProfile};
use crate::platform::{DeviceProfile, LibrarySearch, PlatformSource};
use crate::probe::DEFAULT_PROBE_CEILING;
use crate::scheduler::DEFAULT_CAPACITY;
use crate::session::SessionConfig;
use crate::telemetry::{LogConfig, LogFormat};

pub const ENV_CONFIG_FILE: &str = "SNPE_RT_CONFIG";

const DEFAULT_STATS_INTERVAL: u64 = 100;
/// Probe ceilings above this are clamped.
const MAX_PROBE_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

/// Which platform implementation to open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    #[default]
    Reference,
    Native,
}

impl PlatformKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reference => "reference",
            Self::Native => "native",
        }
    }
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reference" | "ref" => Ok(Self::Reference),
            "native" | "snpe" => Ok(Self::Native),
            other => Err(other.to_string()),
        }
    }
}

/// Shape of the TOML file. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    platform: Option<String>,
    library_dirs: Option<Vec<PathBuf>>,
    native_lib_dir: Option<PathBuf>,
    queue_capacity: Option<usize>,
    probe_timeout_ms: Option<u64>,
    accelerators: Option<String>,
    cpu_fallback: Option<bool>,
    performance_profile: Option<String>,
    stats_interval: Option<u64>,
    log_level: Option<String>,
    log_format: Option<String>,
    /// Simulated device for the reference platform.
    device: Option<DeviceProfile>,
}

/// All runtime configuration.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub config_file: Option<PathBuf>,
    pub platform: PlatformKind,
    pub device: DeviceProfile,
    pub library_dirs: Vec<PathBuf>,
    pub native_lib_dir: Option<PathBuf>,
    pub queue_capacity: usize,
    pub probe_timeout: Duration,
    pub accelerators: Vec<Accelerator>,
    pub cpu_fallback: bool,
    pub performance_profile: PerformanceProfile,
    pub stats_interval: u64,
    pub log: LogConfig,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            config_file: None,
            platform: PlatformKind::Reference,
            device: DeviceProfile::default(),
            library_dirs: Vec::new(),
            native_lib_dir: None,
            queue_capacity: DEFAULT_CAPACITY,
            probe_timeout: DEFAULT_PROBE_CEILING,
            accelerators: vec![Accelerator::Cpu],
            cpu_fallback: true,
            performance_profile: PerformanceProfile::HighPerformance,
            stats_interval: DEFAULT_STATS_INTERVAL,
            log: LogConfig::default(),
        }
    }
}

/// Effective runtime configuration summary (serializable).
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub config_file: Option<PathBuf>,
    pub platform: PlatformKind,
    pub library_dirs: Vec<PathBuf>,
    pub native_lib_dir: Option<PathBuf>,
    pub queue_capacity: usize,
    pub probe_timeout_ms: u64,
    pub accelerators: Vec<Accelerator>,
    pub cpu_fallback: bool,
    pub performance_profile: PerformanceProfile,
    pub stats_interval: u64,
    pub log_level: String,
    pub log_format: LogFormat,
    pub device: Option<DeviceProfile>,
}

/// Load configuration. Missing or invalid values fall back to defaults
/// without failing.
pub fn load() -> EnvConfig {
    match build(false) {
        Ok(config) => config,
        // Lenient mode does not produce errors.
        Err(e) => {
            tracing::warn!(error = %e, "configuration rejected, using defaults");
            EnvConfig::default()
        }
    }
}

/// Load configuration, failing on the first unreadable file or invalid value.
pub fn try_load() -> Result<EnvConfig, ConfigError> {
    build(true)
}

fn build(strict: bool) -> Result<EnvConfig, ConfigError> {
    let mut cfg = EnvConfig::default();

    if let Some(path) = std::env::var_os(ENV_CONFIG_FILE).filter(|v| !v.is_empty()).map(PathBuf::from) {
        match read_file(&path) {
            Ok(file) => apply_file(&mut cfg, file, strict)?,
            Err(e) if strict => return Err(e),
            Err(e) => tracing::warn!(error = %e, "ignoring config file"),
        }
        cfg.config_file = Some(path);
    }
    apply_env(&mut cfg, strict)?;

    cfg.queue_capacity = cfg.queue_capacity.max(1);
    cfg.probe_timeout = cfg.probe_timeout.clamp(Duration::from_millis(1), Duration::from_millis(MAX_PROBE_TIMEOUT_MS));
    cfg.stats_interval = cfg.stats_interval.max(1);
    Ok(cfg)
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
    toml::from_str(&text).map_err(|e| ConfigError::Parse { path: path.to_path_buf(), message: e.to_string() })
}

fn apply_file(cfg: &mut EnvConfig, file: FileConfig, strict: bool) -> Result<(), ConfigError> {
    if let Some(v) = file.platform {
        set_parsed(&mut cfg.platform, "platform", &v, strict)?;
    }
    if let Some(dirs) = file.library_dirs {
        cfg.library_dirs = dirs;
    }
    if file.native_lib_dir.is_some() {
        cfg.native_lib_dir = file.native_lib_dir;
    }
    if let Some(v) = file.queue_capacity {
        cfg.queue_capacity = v;
    }
    if let Some(v) = file.probe_timeout_ms {
        cfg.probe_timeout = Duration::from_millis(v);
    }
    if let Some(v) = file.accelerators {
        set_accelerators(cfg, "accelerators", &v, strict)?;
    }
    if let Some(v) = file.cpu_fallback {
        cfg.cpu_fallback = v;
    }
    if let Some(v) = file.performance_profile {
        set_parsed(&mut cfg.performance_profile, "performance_profile", &v, strict)?;
    }
    if let Some(v) = file.stats_interval {
        cfg.stats_interval = v;
    }
    if let Some(v) = file.log_level {
        cfg.log.level = v;
    }
    if let Some(v) = file.log_format {
        set_parsed(&mut cfg.log.format, "log_format", &v, strict)?;
    }
    if let Some(device) = file.device {
        cfg.device = device;
    }
    Ok(())
}

fn apply_env(cfg: &mut EnvConfig, strict: bool) -> Result<(), ConfigError> {
    if let Some(v) = env("SNPE_RT_PLATFORM") {
        set_parsed(&mut cfg.platform, "SNPE_RT_PLATFORM", &v, strict)?;
    }
    if let Some(v) = std::env::var_os("SNPE_RT_LIBRARY_DIRS").filter(|v| !v.is_empty()) {
        cfg.library_dirs = std::env::split_paths(&v).collect();
    }
    if let Some(v) = env("SNPE_RT_NATIVE_LIB_DIR") {
        cfg.native_lib_dir = Some(PathBuf::from(v));
    }
    if let Some(v) = env("SNPE_RT_QUEUE_CAPACITY") {
        set_parsed(&mut cfg.queue_capacity, "SNPE_RT_QUEUE_CAPACITY", &v, strict)?;
    }
    if let Some(v) = env("SNPE_RT_PROBE_TIMEOUT_MS") {
        let mut ms = cfg.probe_timeout.as_millis() as u64;
        set_parsed(&mut ms, "SNPE_RT_PROBE_TIMEOUT_MS", &v, strict)?;
        cfg.probe_timeout = Duration::from_millis(ms);
    }
    if let Some(v) = env("SNPE_RT_ACCELERATORS") {
        set_accelerators(cfg, "SNPE_RT_ACCELERATORS", &v, strict)?;
    }
    if let Some(v) = env("SNPE_RT_CPU_FALLBACK") {
        match parse_bool(&v) {
            Some(b) => cfg.cpu_fallback = b,
            None => invalid("SNPE_RT_CPU_FALLBACK", &v, strict)?,
        }
    }
    if let Some(v) = env("SNPE_RT_PERFORMANCE_PROFILE") {
        set_parsed(&mut cfg.performance_profile, "SNPE_RT_PERFORMANCE_PROFILE", &v, strict)?;
    }
    if let Some(v) = env("SNPE_RT_STATS_INTERVAL") {
        set_parsed(&mut cfg.stats_interval, "SNPE_RT_STATS_INTERVAL", &v, strict)?;
    }
    if let Some(v) = env("SNPE_RT_LOG_LEVEL") {
        cfg.log.level = v;
    }
    if let Some(v) = env("SNPE_RT_LOG_FORMAT") {
        set_parsed(&mut cfg.log.format, "SNPE_RT_LOG_FORMAT", &v, strict)?;
    }
    Ok(())
}

fn env(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn set_parsed<T: FromStr>(slot: &mut T, key: &str, value: &str, strict: bool) -> Result<(), ConfigError> {
    match value.trim().parse::<T>() {
        Ok(parsed) => {
            *slot = parsed;
            Ok(())
        }
        Err(_) => invalid(key, value, strict),
    }
}

fn set_accelerators(cfg: &mut EnvConfig, key: &str, value: &str, strict: bool) -> Result<(), ConfigError> {
    match parse_accelerator_list(value) {
        Ok(list) => {
            cfg.accelerators = list;
            Ok(())
        }
        Err(_) => invalid(key, value, strict),
    }
}

fn invalid(key: &str, value: &str, strict: bool) -> Result<(), ConfigError> {
    if strict {
        return Err(ConfigError::InvalidValue { key: key.to_string(), value: value.to_string() });
    }
    tracing::warn!(key, value, "invalid configuration value, keeping default");
    Ok(())
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl EnvConfig {
    /// Platform to open for this configuration.
    pub fn platform_source(&self) -> PlatformSource {
        match self.platform {
            PlatformKind::Reference => PlatformSource::Reference(self.device.clone()),
            PlatformKind::Native => {
                let mut search = LibrarySearch::new(self.library_dirs.clone());
                if let Some(dir) = &self.native_lib_dir {
                    search = search.with_native_lib_dir(dir);
                }
                PlatformSource::Native(search)
            }
        }
    }

    /// Session defaults derived from the configured preference and profile.
    pub fn session_defaults(&self) -> SessionConfig {
        SessionConfig::default()
            .with_accelerators(self.accelerators.clone())
            .with_cpu_fallback(self.cpu_fallback)
            .with_profile(self.performance_profile)
    }

    /// Return a serializable summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            config_file: self.config_file.clone(),
            platform: self.platform,
            library_dirs: self.library_dirs.clone(),
            native_lib_dir: self.native_lib_dir.clone(),
            queue_capacity: self.queue_capacity,
            probe_timeout_ms: self.probe_timeout.as_millis() as u64,
            accelerators: self.accelerators.clone(),
            cpu_fallback: self.cpu_fallback,
            performance_profile: self.performance_profile,
            stats_interval: self.stats_interval,
            log_level: self.log.level.clone(),
            log_format: self.log.format,
            device: (self.platform == PlatformKind::Reference).then(|| self.device.clone()),
        }
    }
}
