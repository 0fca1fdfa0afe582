// Heuristic power/energy/CO2e model. Pure functions; every result is finite.
//
// Two models coexist on purpose: the page-local one prices a single source in
// isolation, the aggregate one prices the sum over all live sources and uses
// a smaller per-event network factor because those counts are summed.

use crate::models::{AggregatedSnapshot, Reading};

/// Default grid intensity, g CO2e per kWh.
pub const DEFAULT_CO2_INTENSITY: f64 = 475.0;
/// Accepted intensity range, inclusive.
pub const CO2_INTENSITY_RANGE: std::ops::RangeInclusive<f64> = 0.0..=1000.0;

/// Power floor shared by both models, W.
pub const MIN_POWER_W: f64 = 0.1;
/// W per cpu percent.
pub const CPU_FACTOR: f64 = 0.02;
/// W per MB.
pub const MEM_FACTOR: f64 = 0.001;

/// Constants of the single-source model.
pub mod local {
    pub const BASE_W: f64 = 0.5;
    pub const NET_FACTOR: f64 = 0.005;
    pub const MAX_POWER_W: f64 = 10.0;
}

/// Constants of the multi-source model.
pub mod aggregate {
    /// Per active source.
    pub const BASE_PER_SOURCE_W: f64 = 0.3;
    pub const NET_FACTOR: f64 = 0.001;
    /// Added whenever at least one source is present.
    pub const INTERACTION_BOOST_W: f64 = 0.1;
    pub const MAX_POWER_W: f64 = 100.0;
}

/// Clamp as the last step; NaN maps to the floor.
fn bound_power(power: f64, max: f64) -> f64 {
    if power.is_nan() {
        return MIN_POWER_W;
    }
    power.clamp(MIN_POWER_W, max)
}

/// Power of one source estimated in isolation, W in `[0.1, 10]`.
pub fn estimate_page_power(reading: &Reading) -> f64 {
    let power = local::BASE_W
        + reading.cpu_percent * CPU_FACTOR
        + reading.memory_mb * MEM_FACTOR
        + reading.network_count * local::NET_FACTOR;
    bound_power(power, local::MAX_POWER_W)
}

/// Power of every live source together, W in `[0.1, 100]`.
/// With no sources this is the floor, 0.1 W.
pub fn estimate_aggregate_power(snapshot: &AggregatedSnapshot) -> f64 {
    let sources = snapshot.source_count as f64;
    let boost = if snapshot.source_count > 0 {
        aggregate::INTERACTION_BOOST_W
    } else {
        0.0
    };
    let power = aggregate::BASE_PER_SOURCE_W * sources
        + snapshot.cpu_total * CPU_FACTOR
        + snapshot.memory_total * MEM_FACTOR
        + snapshot.network_total * aggregate::NET_FACTOR
        + boost;
    bound_power(power, aggregate::MAX_POWER_W)
}

/// `power * elapsed / 3600`, Wh. Non-finite or negative inputs give 0.
pub fn energy_from_power(power_w: f64, elapsed_secs: f64) -> f64 {
    let wh = power_w * elapsed_secs / 3600.0;
    if wh.is_finite() { wh.max(0.0) } else { 0.0 }
}

/// `(energy / 1000) * intensity`, grams. Never negative, never NaN.
pub fn co2e_from_energy(energy_wh: f64, intensity: f64) -> f64 {
    if !energy_wh.is_finite() || !intensity.is_finite() {
        return 0.0;
    }
    let grams = (energy_wh / 1000.0) * intensity;
    if grams.is_finite() { grams.max(0.0) } else { 0.0 }
}

/// Whether `intensity` may be used as a configuration value.
pub fn is_valid_intensity(intensity: f64) -> bool {
    intensity.is_finite() && CO2_INTENSITY_RANGE.contains(&intensity)
}
