//! Runtime probe: which accelerators the device and bundle both support.
//!
//! Queries run on a short-lived thread so a hung driver cannot stall the
//! caller past the ceiling. The result is advisory; sessions re-check
//! availability when they bind.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::accelerator::Accelerator;
use crate::error::{ErrorKind, Result, RuntimeError};
use crate::platform::RuntimeFactory;

pub const DEFAULT_PROBE_CEILING: Duration = Duration::from_millis(250);

/// Accelerators sorted by performance preference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AvailabilityList(Vec<Accelerator>);

impl AvailabilityList {
    pub fn from_unsorted(mut list: Vec<Accelerator>) -> Self {
        list.dedup();
        Accelerator::sort_by_preference(&mut list);
        list.dedup();
        Self(list)
    }

    pub fn contains(&self, accelerator: Accelerator) -> bool {
        self.0.contains(&accelerator)
    }

    /// Fastest available accelerator.
    pub fn best(&self) -> Option<Accelerator> {
        self.0.first().copied()
    }

    pub fn as_slice(&self) -> &[Accelerator] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = Accelerator> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Query every accelerator, failing with `ProbeTimeout` past `ceiling`.
pub fn probe(factory: Arc<dyn RuntimeFactory>, ceiling: Duration) -> Result<AvailabilityList> {
    let (tx, rx) = mpsc::channel();
    let started = Instant::now();
    std::thread::Builder::new()
        .name("snpe-rt-probe".into())
        .spawn(move || {
            let found: Vec<Accelerator> = Accelerator::PREFERENCE_ORDER
                .iter()
                .copied()
                .filter(|&acc| factory.is_runtime_available(acc))
                .collect();
            // Receiver may be gone after a timeout.
            let _ = tx.send(found);
        })?;

    match rx.recv_timeout(ceiling) {
        Ok(found) => {
            let list = AvailabilityList::from_unsorted(found);
            tracing::info!(
                available = ?list.as_slice(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "runtime probe complete"
            );
            Ok(list)
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            tracing::warn!(ceiling_ms = ceiling.as_millis() as u64, "runtime probe timed out");
            Err(RuntimeError::new(
                ErrorKind::ProbeTimeout,
                format!("probe exceeded {} ms", ceiling.as_millis()),
            ))
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            Err(RuntimeError::executor_failure("probe thread exited without a result"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{DeviceProfile, Platform, ReferencePlatform};

    fn factory(profile: DeviceProfile) -> Arc<dyn RuntimeFactory> {
        ReferencePlatform::new(profile).create_factory()
    }

    #[test]
    fn test_probe_sorts_by_preference() {
        let profile = DeviceProfile::default()
            .with_available([Accelerator::Cpu, Accelerator::Gpu, Accelerator::Htp]);
        let list = probe(factory(profile), DEFAULT_PROBE_CEILING).unwrap();
        assert_eq!(list.as_slice(), &[Accelerator::Htp, Accelerator::Gpu, Accelerator::Cpu]);
        assert_eq!(list.best(), Some(Accelerator::Htp));
    }

    #[test]
    fn test_probe_times_out() {
        let profile = DeviceProfile::default().with_probe_delay(Duration::from_millis(100));
        let err = probe(factory(profile), Duration::from_millis(50)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProbeTimeout);
    }

    #[test]
    fn test_probe_is_reinvocable() {
        let f = factory(DeviceProfile::cpu_only());
        let a = probe(Arc::clone(&f), DEFAULT_PROBE_CEILING).unwrap();
        let b = probe(f, DEFAULT_PROBE_CEILING).unwrap();
        assert_eq!(a, b);
    }
}
