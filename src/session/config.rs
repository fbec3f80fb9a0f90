//! Session configuration options.

use serde::{Deserialize, Serialize};

use crate::accelerator::{Accelerator, ExecutionPriority, PerformanceProfile};
use crate::error::{Result, RuntimeError};
use crate::network::TensorLayout;

/// Recognized options for [`Session::open`](super::Session::open).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Ordered, non-empty list tried until one initializes.
    pub accelerator_preference: Vec<Accelerator>,
    pub performance_profile: PerformanceProfile,
    pub execution_priority: ExecutionPriority,
    /// How rank-4 host buffers are laid out.
    pub input_layout: TensorLayout,
    /// Append CPU to the chain when absent.
    pub cpu_fallback_enabled: bool,
    /// Subset of outputs to materialize; `None` means all.
    pub output_tensor_names: Option<Vec<String>>,
    /// Ask the native builder to bind user-supplied buffers.
    pub use_user_buffers: bool,
    /// Ask the native builder to populate its init cache.
    pub init_cache: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            accelerator_preference: vec![Accelerator::Cpu],
            performance_profile: PerformanceProfile::HighPerformance,
            execution_priority: ExecutionPriority::Normal,
            input_layout: TensorLayout::Nchw,
            cpu_fallback_enabled: true,
            output_tensor_names: None,
            use_user_buffers: false,
            init_cache: false,
        }
    }
}

impl SessionConfig {
    pub fn with_accelerators(mut self, list: impl Into<Vec<Accelerator>>) -> Self {
        self.accelerator_preference = list.into();
        self
    }

    pub fn with_profile(mut self, profile: PerformanceProfile) -> Self {
        self.performance_profile = profile;
        self
    }

    pub fn with_priority(mut self, priority: ExecutionPriority) -> Self {
        self.execution_priority = priority;
        self
    }

    pub fn with_input_layout(mut self, layout: TensorLayout) -> Self {
        self.input_layout = layout;
        self
    }

    pub fn with_cpu_fallback(mut self, enabled: bool) -> Self {
        self.cpu_fallback_enabled = enabled;
        self
    }

    pub fn with_outputs<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.output_tensor_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// The deduplicated accelerator chain, CPU appended when fallback is on.
    pub fn effective_chain(&self) -> Result<Vec<Accelerator>> {
        if self.accelerator_preference.is_empty() {
            return Err(RuntimeError::invalid_argument("accelerator_preference is empty"));
        }
        let mut chain: Vec<Accelerator> = Vec::with_capacity(self.accelerator_preference.len() + 1);
        for &acc in &self.accelerator_preference {
            if !chain.contains(&acc) {
                chain.push(acc);
            }
        }
        if self.cpu_fallback_enabled && !chain.contains(&Accelerator::Cpu) {
            chain.push(Accelerator::Cpu);
        }
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_appended_when_fallback_enabled() {
        let cfg = SessionConfig::default().with_accelerators([Accelerator::Htp, Accelerator::Gpu]);
        assert_eq!(
            cfg.effective_chain().unwrap(),
            vec![Accelerator::Htp, Accelerator::Gpu, Accelerator::Cpu]
        );
    }

    #[test]
    fn test_no_fallback_keeps_chain() {
        let cfg = SessionConfig::default()
            .with_accelerators([Accelerator::Dsp, Accelerator::Dsp])
            .with_cpu_fallback(false);
        assert_eq!(cfg.effective_chain().unwrap(), vec![Accelerator::Dsp]);
    }

    #[test]
    fn test_empty_preference_rejected() {
        let cfg = SessionConfig::default().with_accelerators(Vec::new()).with_cpu_fallback(true);
        assert!(cfg.effective_chain().is_err());
    }
}
