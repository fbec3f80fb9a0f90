//! Hardware execution targets and runtime-binding hints.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RuntimeError};

/// A hardware execution target on a Qualcomm SoC.
///
/// The discriminant is the stable ordinal used in preference lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Accelerator {
    Cpu = 0,
    Gpu = 1,
    GpuFloat16 = 2,
    Dsp = 3,
    Aip = 4,
    Htp = 5,
}

impl Accelerator {
    /// All accelerators in performance-preference order.
    pub const PREFERENCE_ORDER: [Accelerator; 6] = [
        Accelerator::Htp,
        Accelerator::Dsp,
        Accelerator::Aip,
        Accelerator::GpuFloat16,
        Accelerator::Gpu,
        Accelerator::Cpu,
    ];

    pub fn ordinal(self) -> u8 {
        self as u8
    }

    /// Position in [`Self::PREFERENCE_ORDER`]; lower is faster.
    pub fn preference_rank(self) -> usize {
        match self {
            Self::Htp => 0,
            Self::Dsp => 1,
            Self::Aip => 2,
            Self::GpuFloat16 => 3,
            Self::Gpu => 4,
            Self::Cpu => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "CPU",
            Self::Gpu => "GPU",
            Self::GpuFloat16 => "GPU_FLOAT16",
            Self::Dsp => "DSP",
            Self::Aip => "AIP",
            Self::Htp => "HTP",
        }
    }

    /// Single-character runtime code used in pipeline configs.
    pub fn from_code(code: char) -> Option<Self> {
        match code.to_ascii_uppercase() {
            'C' => Some(Self::Cpu),
            'G' => Some(Self::Gpu),
            'F' => Some(Self::GpuFloat16),
            'D' => Some(Self::Dsp),
            'A' => Some(Self::Aip),
            'H' => Some(Self::Htp),
            _ => None,
        }
    }

    /// Sort a list in place by performance preference.
    pub fn sort_by_preference(list: &mut [Accelerator]) {
        list.sort_by_key(|a| a.preference_rank());
    }
}

impl fmt::Display for Accelerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Accelerator {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let mut chars = trimmed.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            return Self::from_code(c)
                .ok_or_else(|| RuntimeError::invalid_argument(format!("unknown runtime code '{}'", c)));
        }
        match trimmed.to_ascii_uppercase().replace('-', "_").as_str() {
            "CPU" | "CPU_FLOAT32" => Ok(Self::Cpu),
            "GPU" | "GPU_FLOAT32_16_HYBRID" => Ok(Self::Gpu),
            "GPU_FLOAT16" | "GPU_FP16" => Ok(Self::GpuFloat16),
            "DSP" | "DSP_FIXED8_TF" => Ok(Self::Dsp),
            "AIP" | "AIP_FIXED8_TF" => Ok(Self::Aip),
            "HTP" => Ok(Self::Htp),
            other => Err(RuntimeError::invalid_argument(format!("unknown accelerator '{}'", other))),
        }
    }
}

/// Parse a comma-separated accelerator list, e.g. `"HTP,GPU,CPU"`.
pub fn parse_accelerator_list(s: &str) -> Result<Vec<Accelerator>> {
    let list = s
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(Accelerator::from_str)
        .collect::<Result<Vec<_>>>()?;
    if list.is_empty() {
        return Err(RuntimeError::invalid_argument("accelerator list is empty"));
    }
    Ok(list)
}

/// Performance profile forwarded to the runtime builder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PerformanceProfile {
    Default,
    PowerSaver,
    Balanced,
    #[default]
    HighPerformance,
    Burst,
    SustainedHighPerformance,
}

impl PerformanceProfile {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "DEFAULT",
            Self::PowerSaver => "POWER_SAVER",
            Self::Balanced => "BALANCED",
            Self::HighPerformance => "HIGH_PERFORMANCE",
            Self::Burst => "BURST",
            Self::SustainedHighPerformance => "SUSTAINED_HIGH_PERFORMANCE",
        }
    }
}

impl FromStr for PerformanceProfile {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "DEFAULT" => Ok(Self::Default),
            "POWER_SAVER" => Ok(Self::PowerSaver),
            "BALANCED" => Ok(Self::Balanced),
            "HIGH_PERFORMANCE" => Ok(Self::HighPerformance),
            "BURST" => Ok(Self::Burst),
            "SUSTAINED_HIGH_PERFORMANCE" => Ok(Self::SustainedHighPerformance),
            other => Err(RuntimeError::invalid_argument(format!(
                "unknown performance profile '{}'",
                other
            ))),
        }
    }
}

/// Execution priority hint forwarded to the runtime builder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionPriority {
    Low,
    #[default]
    Normal,
    High,
}

impl FromStr for ExecutionPriority {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(Self::Low),
            "NORMAL" => Ok(Self::Normal),
            "HIGH" => Ok(Self::High),
            other => Err(RuntimeError::invalid_argument(format!(
                "unknown execution priority '{}'",
                other
            ))),
        }
    }
}
