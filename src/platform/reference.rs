// Copyright 2024-2026 snpe-rt Contributors
// SPDX-License-Identifier: Apache-2.0

//! Pure-Rust reference platform for hosts without the SNPE bundle.
//!
//! A [`DeviceProfile`] declares which accelerators exist and which of them
//! fail to initialize or execute, plus simulated latencies. The executor
//! copies the first input, decoded to f32, cyclically into every output and
//! re-encodes it in the output's element encoding. Matching shapes therefore
//! behave as identity.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{
    emit, BuildOptions, Executor, LogLevel, Platform, RuntimeFactory, TensorView, TensorViewMut,
};
use crate::accelerator::Accelerator;
use crate::error::{Result, RuntimeError};
use crate::network::NetworkContainer;
use crate::session::convert;

/// Simulated device capabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceProfile {
    pub available: Vec<Accelerator>,
    /// Present but fail during executor construction.
    pub failing_init: Vec<Accelerator>,
    /// Initialize fine but fail every execution.
    pub failing_exec: Vec<Accelerator>,
    /// Simulated executor latency per request.
    pub latency: Duration,
    /// Simulated driver latency per availability query.
    pub probe_delay: Duration,
    pub version: String,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            available: vec![Accelerator::Cpu, Accelerator::Gpu],
            failing_init: Vec::new(),
            failing_exec: Vec::new(),
            latency: Duration::ZERO,
            probe_delay: Duration::ZERO,
            version: format!("reference-{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl DeviceProfile {
    pub fn cpu_only() -> Self {
        Self { available: vec![Accelerator::Cpu], ..Self::default() }
    }

    /// Every accelerator present and healthy.
    pub fn all_accelerators() -> Self {
        Self { available: Accelerator::PREFERENCE_ORDER.to_vec(), ..Self::default() }
    }

    pub fn with_available(mut self, list: impl Into<Vec<Accelerator>>) -> Self {
        self.available = list.into();
        self
    }

    pub fn with_failing_init(mut self, list: impl Into<Vec<Accelerator>>) -> Self {
        self.failing_init = list.into();
        self
    }

    pub fn with_failing_exec(mut self, list: impl Into<Vec<Accelerator>>) -> Self {
        self.failing_exec = list.into();
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_probe_delay(mut self, delay: Duration) -> Self {
        self.probe_delay = delay;
        self
    }
}

/// Counters observable from tests and reports.
#[derive(Debug, Default)]
pub struct ReferenceCounters {
    builds: AtomicU64,
    executions: AtomicU64,
}

impl ReferenceCounters {
    pub fn builds(&self) -> u64 {
        self.builds.load(Ordering::Acquire)
    }

    /// Number of executor invocations across all sessions.
    pub fn executions(&self) -> u64 {
        self.executions.load(Ordering::Acquire)
    }
}

pub struct ReferencePlatform {
    profile: DeviceProfile,
    counters: Arc<ReferenceCounters>,
    log_level: Mutex<LogLevel>,
}

impl ReferencePlatform {
    pub fn new(profile: DeviceProfile) -> Self {
        Self { profile, counters: Arc::new(ReferenceCounters::default()), log_level: Mutex::new(LogLevel::Warn) }
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn counters(&self) -> Arc<ReferenceCounters> {
        Arc::clone(&self.counters)
    }

    pub fn log_level(&self) -> LogLevel {
        *self.log_level.lock()
    }
}

impl Platform for ReferencePlatform {
    fn create_factory(&self) -> Arc<dyn RuntimeFactory> {
        Arc::new(ReferenceFactory { profile: self.profile.clone(), counters: Arc::clone(&self.counters) })
    }

    fn version_string(&self) -> String {
        self.profile.version.clone()
    }

    fn set_log_level(&self, level: LogLevel) -> Result<()> {
        *self.log_level.lock() = level;
        emit(LogLevel::Info, &format!("reference platform log level set to {:?}", level));
        Ok(())
    }
}

struct ReferenceFactory {
    profile: DeviceProfile,
    counters: Arc<ReferenceCounters>,
}

impl RuntimeFactory for ReferenceFactory {
    fn is_runtime_available(&self, accelerator: Accelerator) -> bool {
        if !self.profile.probe_delay.is_zero() {
            std::thread::sleep(self.profile.probe_delay);
        }
        self.profile.available.contains(&accelerator)
    }

    fn build_executor(
        &self,
        network: &NetworkContainer,
        accelerator: Accelerator,
        options: &BuildOptions,
    ) -> Result<Box<dyn Executor>> {
        if !self.profile.available.contains(&accelerator) {
            return Err(RuntimeError::executor_failure(format!("{} runtime not present", accelerator)));
        }
        if self.profile.failing_init.contains(&accelerator) {
            return Err(RuntimeError::executor_failure(format!(
                "{} runtime failed to initialize",
                accelerator
            )));
        }
        for name in &options.output_tensor_names {
            if network.output(name).is_none() {
                return Err(RuntimeError::invalid_argument("unknown output tensor").with_tensor(name));
            }
        }
        self.counters.builds.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(ReferenceExecutor {
            accelerator,
            fail: self.profile.failing_exec.contains(&accelerator),
            latency: self.profile.latency,
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct ReferenceExecutor {
    accelerator: Accelerator,
    fail: bool,
    latency: Duration,
    counters: Arc<ReferenceCounters>,
}

impl Executor for ReferenceExecutor {
    fn accelerator(&self) -> Accelerator {
        self.accelerator
    }

    fn execute(&mut self, inputs: &[TensorView<'_>], outputs: &mut [TensorViewMut<'_>]) -> Result<()> {
        self.counters.executions.fetch_add(1, Ordering::AcqRel);
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        if self.fail {
            return Err(RuntimeError::executor_failure(format!(
                "{} execution failed",
                self.accelerator
            )));
        }
        let source = inputs
            .first()
            .map(|view| convert::decode_to_f32(view.descriptor.encoding, view.data))
            .unwrap_or_default();
        for out in outputs.iter_mut() {
            let count = out.descriptor.element_count();
            let values: Vec<f32> = if source.is_empty() {
                vec![0.0; count]
            } else {
                source.iter().copied().cycle().take(count).collect()
            };
            convert::encode_from_f32(out.descriptor.encoding, &values, out.data);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_reports_profile_availability() {
        let platform = ReferencePlatform::new(DeviceProfile::cpu_only());
        let factory = platform.create_factory();
        assert!(factory.is_runtime_available(Accelerator::Cpu));
        assert!(!factory.is_runtime_available(Accelerator::Htp));
    }

    #[test]
    fn test_set_log_level_is_recorded() {
        let platform = ReferencePlatform::new(DeviceProfile::default());
        platform.set_log_level(LogLevel::Verbose).unwrap();
        assert_eq!(platform.log_level(), LogLevel::Verbose);
    }

    #[test]
    fn test_profile_deserializes_with_defaults() {
        let profile: DeviceProfile = serde_json::from_str(r#"{"available":["HTP","CPU"]}"#).unwrap();
        assert_eq!(profile.available, vec![Accelerator::Htp, Accelerator::Cpu]);
        assert!(profile.failing_init.is_empty());
    }
}
