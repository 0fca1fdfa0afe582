// Merged samples, the per-tick aggregate they were built from, and summaries.

use serde::{Deserialize, Serialize};

use super::Reading;

/// Sum that stops at `f64::MAX` instead of overflowing to infinity.
fn saturating_add(total: f64, value: f64) -> f64 {
    (total + value).min(f64::MAX)
}

/// Sum over the live source table at one tick. Derived, never stored on its own.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedSnapshot {
    pub cpu_total: f64,
    pub memory_total: f64,
    pub network_total: f64,
    pub source_count: usize,
    pub sources: Vec<Reading>,
}

impl AggregatedSnapshot {
    pub fn from_readings<I>(readings: I) -> Self
    where
        I: IntoIterator<Item = Reading>,
    {
        let mut snapshot = Self::default();
        for reading in readings {
            snapshot.cpu_total = saturating_add(snapshot.cpu_total, reading.cpu_percent);
            snapshot.memory_total = saturating_add(snapshot.memory_total, reading.memory_mb);
            snapshot.network_total = saturating_add(snapshot.network_total, reading.network_count);
            snapshot.sources.push(reading);
        }
        snapshot.source_count = snapshot.sources.len();
        snapshot
    }

    /// Every total finite and non-negative.
    pub fn is_well_formed(&self) -> bool {
        [self.cpu_total, self.memory_total, self.network_total]
            .iter()
            .all(|v| v.is_finite() && *v >= 0.0)
    }
}

/// One merged, time-ordered global estimate. Immutable once appended to history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    /// Unix ms.
    pub timestamp: u64,
    pub power_w: f64,
    /// Energy accrued over the interval that ended at `timestamp`.
    pub energy_wh: f64,
    #[serde(rename = "co2eG")]
    pub co2e_g: f64,
    pub source_metrics: AggregatedSnapshot,
    /// Set when the tick substituted the fallback power figure.
    #[serde(default)]
    pub fallback: bool,
}

impl Sample {
    /// The defined sample returned when nothing has been recorded yet.
    pub fn zero(timestamp: u64) -> Self {
        Self {
            timestamp,
            ..Self::default()
        }
    }

    /// Post-hoc check applied before a sample contributes to a summary.
    pub fn is_valid(&self) -> bool {
        let ok = |v: f64| v.is_finite() && v >= 0.0;
        self.timestamp > 0
            && ok(self.power_w)
            && ok(self.energy_wh)
            && ok(self.co2e_g)
            && self.source_metrics.is_well_formed()
    }
}

/// Aggregate over every retained sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total_energy_wh: f64,
    #[serde(rename = "totalCO2eG")]
    pub total_co2e_g: f64,
    pub avg_power_w: f64,
    pub duration_seconds: f64,
    pub sample_count: usize,
}

/// Aggregate restricted to `[start_time, end_time]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeSummary {
    pub total_energy_wh: f64,
    #[serde(rename = "totalCO2eG")]
    pub total_co2e_g: f64,
    pub avg_power_w: f64,
    pub duration_seconds: f64,
    pub sample_count: usize,
    pub start_time: u64,
    pub end_time: u64,
    /// `(end - start) / 1000`, reported even when no sample falls in the range.
    pub range_duration: f64,
}

impl RangeSummary {
    pub fn new(summary: Summary, start_time: u64, end_time: u64) -> Self {
        Self {
            total_energy_wh: summary.total_energy_wh,
            total_co2e_g: summary.total_co2e_g,
            avg_power_w: summary.avg_power_w,
            duration_seconds: summary.duration_seconds,
            sample_count: summary.sample_count,
            start_time,
            end_time,
            range_duration: end_time.saturating_sub(start_time) as f64 / 1000.0,
        }
    }
}
