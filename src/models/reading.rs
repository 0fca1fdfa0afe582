// Per-source readings and the clamping that keeps them inside their domains.

use serde::{Deserialize, Serialize};

/// Upper bound of `cpuPercent`.
pub const CPU_PERCENT_MAX: f64 = 100.0;

/// Clamp `value` to `[min, max]`; NaN and infinities collapse to `min`.
pub fn clamp_metric(value: f64, min: f64, max: f64) -> f64 {
    if !value.is_finite() {
        return min;
    }
    value.clamp(min, max)
}

/// Navigation deltas in ms, each relative to navigation start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageTimings {
    pub load_ms: f64,
    pub dom_ready_ms: f64,
    pub interactive_ms: f64,
}

impl PageTimings {
    fn sanitized(self) -> Self {
        Self {
            load_ms: clamp_metric(self.load_ms, 0.0, f64::MAX),
            dom_ready_ms: clamp_metric(self.dom_ready_ms, 0.0, f64::MAX),
            interactive_ms: clamp_metric(self.interactive_ms, 0.0, f64::MAX),
        }
    }
}

/// Which signals reported their zero default for this reading instead of a real observation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SignalFlags {
    pub cpu: bool,
    pub memory: bool,
    pub network: bool,
    pub timings: bool,
}

impl SignalFlags {
    pub fn any(&self) -> bool {
        self.cpu || self.memory || self.network || self.timings
    }
}

/// One instantaneous per-source metric snapshot.
///
/// Missing JSON fields deserialize to zero so that a partial reading is clamped, not refused.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Reading {
    pub source_id: String,
    /// Unix ms.
    pub timestamp: u64,
    /// 0..=100. Frame-rate proxy, not a measured CPU share.
    pub cpu_percent: f64,
    #[serde(rename = "memoryMB")]
    pub memory_mb: f64,
    /// Resource/navigation/paint events seen in the last 60 s.
    pub network_count: f64,
    pub url: String,
    pub domain: String,
    pub timings: PageTimings,
    pub defaulted: SignalFlags,
}

impl Reading {
    /// Clamp every numeric field into its domain.
    pub fn sanitized(self) -> Self {
        Self {
            cpu_percent: clamp_metric(self.cpu_percent, 0.0, CPU_PERCENT_MAX),
            memory_mb: clamp_metric(self.memory_mb, 0.0, f64::MAX),
            network_count: clamp_metric(self.network_count, 0.0, f64::MAX).floor(),
            timings: self.timings.sanitized(),
            ..self
        }
    }

    pub fn is_within_domain(&self) -> bool {
        let in_range = |v: f64, max: f64| v.is_finite() && (0.0..=max).contains(&v);
        in_range(self.cpu_percent, CPU_PERCENT_MAX)
            && in_range(self.memory_mb, f64::MAX)
            && in_range(self.network_count, f64::MAX)
    }
}
