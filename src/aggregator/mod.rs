// Central merge point: live source table, bounded sample history, session counters.
// The owner serializes ingest and tick (see service), so nothing here locks.

pub mod history;
mod service;
pub mod sources;

pub use history::{DEFAULT_HISTORY_CAPACITY, History};
pub use service::{AggregatorHandle, Envelope, ServiceConfig, ServiceDeps, dispatch, spawn};
pub use sources::{DEFAULT_STALENESS_MS, SourceEntry, SourceTable};

use crate::error::PipelineError;
use crate::estimation::{self, DEFAULT_CO2_INTENSITY};
use crate::models::{AggregatedSnapshot, RangeSummary, Reading, Sample, Summary};
use tracing::{debug, warn};

/// Power substituted when a tick cannot produce a valid sample, W.
pub const FALLBACK_POWER_W: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub history_capacity: usize,
    pub staleness_ms: u64,
    pub co2_intensity: f64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            staleness_ms: DEFAULT_STALENESS_MS,
            co2_intensity: DEFAULT_CO2_INTENSITY,
        }
    }
}

/// Accrued over the whole profiling session; unaffected by history eviction.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SessionTotals {
    pub energy_wh: f64,
    pub co2e_g: f64,
    pub ticks: u64,
    pub fallback_ticks: u64,
}

/// Energy/CO2e/avg-power over the samples that pass validation.
/// `avg_power_w` assumes one sample per second.
pub fn summarize<'a, I>(samples: I) -> Summary
where
    I: IntoIterator<Item = &'a Sample>,
{
    let valid: Vec<&Sample> = samples.into_iter().filter(|s| s.is_valid()).collect();
    let (Some(first), Some(last)) = (valid.first(), valid.last()) else {
        return Summary::default();
    };
    let sample_count = valid.len();
    let total_energy_wh: f64 = valid.iter().map(|s| s.energy_wh).sum();
    let total_co2e_g: f64 = valid.iter().map(|s| s.co2e_g).sum();
    let hours = sample_count as f64 / 3600.0;
    let avg_power_w = if hours > 0.0 {
        total_energy_wh / hours
    } else {
        0.0
    };
    Summary {
        total_energy_wh,
        total_co2e_g,
        avg_power_w,
        duration_seconds: last.timestamp.saturating_sub(first.timestamp) as f64 / 1000.0,
        sample_count,
    }
}

#[derive(Debug, Clone)]
pub struct Aggregator {
    sources: SourceTable,
    history: History,
    staleness_ms: u64,
    intensity: f64,
    profiling: bool,
    last_tick_ms: Option<u64>,
    totals: SessionTotals,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(AggregatorConfig::default())
    }
}

impl Aggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        let intensity = if estimation::is_valid_intensity(config.co2_intensity) {
            config.co2_intensity
        } else {
            warn!(
                intensity = config.co2_intensity,
                "configured CO2 intensity out of range; using default"
            );
            DEFAULT_CO2_INTENSITY
        };
        Self {
            sources: SourceTable::new(),
            history: History::new(config.history_capacity),
            staleness_ms: config.staleness_ms,
            intensity,
            profiling: false,
            last_tick_ms: None,
            totals: SessionTotals::default(),
        }
    }

    /// Store a clamped copy of `reading` as the latest for `source_id`.
    /// Out-of-range values are clamped, never refused. Returns the stored reading.
    pub fn ingest(&mut self, source_id: &str, reading: Reading, now_ms: u64) -> Reading {
        let reading = Reading {
            source_id: source_id.to_string(),
            ..reading
        };
        if !reading.is_within_domain() {
            debug!(source_id, "reading clamped on ingest");
        }
        let reading = reading.sanitized();
        if self.sources.upsert(source_id, reading.clone(), now_ms) {
            debug!(source_id, sources = self.sources.len(), "source attached");
        }
        reading
    }

    /// Explicit removal (source closed). Idempotent.
    pub fn remove_source(&mut self, source_id: &str) -> bool {
        let removed = self.sources.remove(source_id);
        if removed {
            debug!(source_id, "source removed");
        }
        removed
    }

    pub fn purge_stale(&mut self, now_ms: u64) -> Vec<String> {
        let purged = self.sources.purge_stale(now_ms, self.staleness_ms);
        for id in &purged {
            debug!(source_id = %id, "stale source purged");
        }
        purged
    }

    pub fn snapshot(&self) -> AggregatedSnapshot {
        AggregatedSnapshot::from_readings(self.sources.readings())
    }

    /// Begin a new session: history, counters and the elapsed-time baseline reset.
    pub fn start_profiling(&mut self, now_ms: u64) {
        self.history.clear();
        self.totals = SessionTotals::default();
        self.last_tick_ms = Some(now_ms);
        self.profiling = true;
    }

    /// End the session; history stays queryable until the next start.
    pub fn stop_profiling(&mut self) -> Summary {
        self.profiling = false;
        self.last_tick_ms = None;
        self.summary()
    }

    pub fn is_profiling(&self) -> bool {
        self.profiling
    }

    /// One 1 Hz step: purge stale sources, then (while profiling) append a sample
    /// for the time elapsed since the previous tick. A sample that fails
    /// validation is replaced by the fallback so history has no gaps.
    pub fn tick(&mut self, now_ms: u64) -> Option<Sample> {
        self.purge_stale(now_ms);
        if !self.profiling {
            return None;
        }
        let elapsed_secs = self
            .last_tick_ms
            .map(|prev| now_ms.saturating_sub(prev) as f64 / 1000.0)
            .unwrap_or(0.0);
        self.last_tick_ms = Some(now_ms);

        let snapshot = self.snapshot();
        let sample = match self.compute_sample(now_ms, elapsed_secs, snapshot.clone()) {
            Ok(sample) => sample,
            Err(e) => {
                warn!(error = %e, operation = "tick", "substituting fallback sample");
                self.totals.fallback_ticks += 1;
                self.fallback_sample(now_ms, elapsed_secs, snapshot)
            }
        };
        self.totals.ticks += 1;
        self.totals.energy_wh += sample.energy_wh;
        self.totals.co2e_g += sample.co2e_g;
        self.history.push(sample.clone());
        Some(sample)
    }

    fn compute_sample(
        &self,
        now_ms: u64,
        elapsed_secs: f64,
        snapshot: AggregatedSnapshot,
    ) -> Result<Sample, PipelineError> {
        let power_w = estimation::estimate_aggregate_power(&snapshot);
        let energy_wh = estimation::energy_from_power(power_w, elapsed_secs);
        let co2e_g = estimation::co2e_from_energy(energy_wh, self.intensity);
        let sample = Sample {
            timestamp: now_ms,
            power_w,
            energy_wh,
            co2e_g,
            source_metrics: snapshot,
            fallback: false,
        };
        if sample.is_valid() {
            Ok(sample)
        } else {
            Err(PipelineError::InvalidInput(format!(
                "sample at {} failed validation",
                now_ms
            )))
        }
    }

    fn fallback_sample(
        &self,
        now_ms: u64,
        elapsed_secs: f64,
        snapshot: AggregatedSnapshot,
    ) -> Sample {
        let energy_wh = estimation::energy_from_power(FALLBACK_POWER_W, elapsed_secs);
        Sample {
            timestamp: now_ms,
            power_w: FALLBACK_POWER_W,
            energy_wh,
            co2e_g: estimation::co2e_from_energy(energy_wh, self.intensity),
            source_metrics: snapshot,
            fallback: true,
        }
    }

    /// Most recent sample, or a zero sample stamped `now_ms` when history is empty.
    pub fn current(&self, now_ms: u64) -> Sample {
        self.history
            .latest()
            .cloned()
            .unwrap_or_else(|| Sample::zero(now_ms))
    }

    pub fn summary(&self) -> Summary {
        summarize(self.history.iter())
    }

    pub fn range_summary(&self, start: u64, end: u64) -> RangeSummary {
        RangeSummary::new(summarize(self.history.range(start, end)), start, end)
    }

    /// Applies to subsequent ticks only.
    pub fn set_intensity(&mut self, intensity: f64) -> Result<(), PipelineError> {
        if !estimation::is_valid_intensity(intensity) {
            return Err(PipelineError::InvalidInput(format!(
                "co2 intensity must be a finite value in [0, 1000], got {}",
                intensity
            )));
        }
        self.intensity = intensity;
        Ok(())
    }

    pub fn intensity(&self) -> f64 {
        self.intensity
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn sources(&self) -> &SourceTable {
        &self.sources
    }

    pub fn totals(&self) -> SessionTotals {
        self.totals
    }
}
