// Copyright 2024-2026 snpe-rt Contributors
// SPDX-License-Identifier: Apache-2.0

//! Platform loader: the capability set behind which the SNPE runtime lives.
//!
//! A [`Platform`] exposes `{create_factory, version_string, set_log_level,
//! set_log_sink}`. No raw library handle escapes this module; sessions only
//! see [`RuntimeFactory`] and [`Executor`] trait objects.
//!
//! Process-wide state is explicit: [`init_platform`] resolves a bundle once
//! and caches it, [`load_platform`] returns the cached value (initializing
//! from the environment on first use), and [`shutdown_platform`] tears it
//! down. The loader never retries; callers may retry after reconfiguring
//! search paths.

pub mod library;
mod log;
#[cfg(feature = "snpe")]
pub mod native;
pub mod reference;

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::accelerator::{Accelerator, ExecutionPriority, PerformanceProfile};
use crate::config;
use crate::error::{Result, RuntimeError};
use crate::network::{NetworkContainer, TensorDescriptor};

pub use library::{configure_dsp_search_path, CompanionLoad, LibraryBundle, LibrarySearch, TargetOs};
pub use log::{clear_log_sink, emit, LogLevel, LogSink};
pub use reference::{DeviceProfile, ReferenceCounters, ReferencePlatform};

/// Options forwarded to the runtime builder when binding a network.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildOptions {
    pub performance_profile: PerformanceProfile,
    pub execution_priority: ExecutionPriority,
    pub output_tensor_names: Vec<String>,
    pub use_user_buffers: bool,
    pub init_cache: bool,
}

/// Read-only view of a staged tensor handed to an executor.
pub struct TensorView<'a> {
    pub descriptor: &'a TensorDescriptor,
    pub data: &'a [u8],
}

/// Writable view of an output tensor handed to an executor.
pub struct TensorViewMut<'a> {
    pub descriptor: &'a TensorDescriptor,
    pub data: &'a mut [u8],
}

/// A network bound to one accelerator, ready to run.
///
/// Inputs and outputs are in descriptor order and already in the network's
/// element encoding.
pub trait Executor: Send {
    fn accelerator(&self) -> Accelerator;

    fn execute(&mut self, inputs: &[TensorView<'_>], outputs: &mut [TensorViewMut<'_>]) -> Result<()>;
}

/// Creates executors and answers availability queries.
pub trait RuntimeFactory: Send + Sync {
    fn is_runtime_available(&self, accelerator: Accelerator) -> bool;

    fn build_executor(
        &self,
        network: &NetworkContainer,
        accelerator: Accelerator,
        options: &BuildOptions,
    ) -> Result<Box<dyn Executor>>;
}

/// Capability set exposed by a loaded platform bundle.
pub trait Platform: Send + Sync {
    fn create_factory(&self) -> Arc<dyn RuntimeFactory>;

    fn version_string(&self) -> String;

    fn set_log_level(&self, level: LogLevel) -> Result<()>;

    /// Install the process-wide log sink. Platform messages are forwarded to
    /// `tracing` and to the sink.
    fn set_log_sink(&self, sink: Arc<dyn LogSink>) {
        log::install_log_sink(sink);
    }
}

/// Which bundle to resolve.
#[derive(Debug, Clone)]
pub enum PlatformSource {
    /// Pure-Rust host implementation driven by a device profile.
    Reference(DeviceProfile),
    /// The SNPE shared-library bundle.
    Native(LibrarySearch),
}

impl fmt::Display for PlatformSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reference(_) => f.write_str("reference"),
            Self::Native(_) => f.write_str("native"),
        }
    }
}

/// Resolve a platform without touching the process-wide cache.
pub fn open(source: &PlatformSource) -> Result<Arc<dyn Platform>> {
    match source {
        PlatformSource::Reference(profile) => {
            Ok(Arc::new(ReferencePlatform::new(profile.clone())) as Arc<dyn Platform>)
        }
        PlatformSource::Native(search) => open_native(search),
    }
}

#[cfg(feature = "snpe")]
fn open_native(search: &LibrarySearch) -> Result<Arc<dyn Platform>> {
    let bundle = search.resolve()?;
    if let Some(dir) = &search.native_lib_dir {
        configure_dsp_search_path(dir);
    }
    let platform = native::NativePlatform::load(&bundle)?;
    Ok(Arc::new(platform) as Arc<dyn Platform>)
}

#[cfg(not(feature = "snpe"))]
fn open_native(search: &LibrarySearch) -> Result<Arc<dyn Platform>> {
    // Resolve anyway so a missing bundle is reported as such.
    search.resolve()?;
    Err(RuntimeError::platform_unavailable(
        "native SNPE support not compiled in (enable the `snpe` feature)",
    ))
}

static PLATFORM: Mutex<Option<Arc<dyn Platform>>> = parking_lot::const_mutex(None);

/// Resolve `source` once and cache it process-wide. If a platform is
/// already cached it is returned unchanged.
pub fn init_platform(source: &PlatformSource) -> Result<Arc<dyn Platform>> {
    let mut slot = PLATFORM.lock();
    if let Some(platform) = slot.as_ref() {
        return Ok(Arc::clone(platform));
    }
    let platform = open(source)?;
    tracing::info!(source = %source, version = %platform.version_string(), "platform initialized");
    *slot = Some(Arc::clone(&platform));
    Ok(platform)
}

/// Return the cached platform, initializing from the environment
/// configuration on first call.
pub fn load_platform() -> Result<Arc<dyn Platform>> {
    if let Some(platform) = PLATFORM.lock().as_ref() {
        return Ok(Arc::clone(platform));
    }
    let env = config::load();
    init_platform(&env.platform_source())
}

/// Drop the cached platform and the global log sink. Idempotent.
pub fn shutdown_platform() {
    if PLATFORM.lock().take().is_some() {
        tracing::info!("platform shut down");
    }
    clear_log_sink();
}

pub fn is_platform_initialized() -> bool {
    PLATFORM.lock().is_some()
}
