// Human-scaled display units for power, energy and emissions.

use serde::Serialize;

/// A magnitude rescaled into a display unit with a fixed precision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Scaled {
    pub value: f64,
    pub unit: &'static str,
    #[serde(skip)]
    pub precision: usize,
}

impl std::fmt::Display for Scaled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.*} {}", self.precision, self.value, self.unit)
    }
}

fn scaled(value: f64, unit: &'static str, precision: usize) -> Scaled {
    Scaled {
        value,
        unit,
        precision,
    }
}

/// NaN/inf and negatives collapse to 0 before a unit is chosen.
fn non_negative(value: f64) -> f64 {
    if value.is_finite() { value.max(0.0) } else { 0.0 }
}

pub fn format_power(watts: f64) -> Scaled {
    let w = non_negative(watts);
    if w >= 1000.0 {
        scaled(w / 1000.0, "kW", 3)
    } else if w >= 1.0 {
        scaled(w, "W", 3)
    } else if w >= 0.001 {
        scaled(w * 1000.0, "mW", 3)
    } else {
        scaled(w * 1_000_000.0, "µW", 3)
    }
}

pub fn format_energy(wh: f64) -> Scaled {
    let e = non_negative(wh);
    if e >= 1000.0 {
        scaled(e / 1000.0, "kWh", 3)
    } else if e >= 1.0 {
        scaled(e, "Wh", 3)
    } else if e >= 0.001 {
        scaled(e * 1000.0, "mWh", 3)
    } else {
        scaled(e * 1_000_000.0, "µWh", 3)
    }
}

pub fn format_emissions(grams: f64) -> Scaled {
    let g = non_negative(grams);
    if g >= 1000.0 {
        scaled(g / 1000.0, "kgCO₂e", 2)
    } else if g >= 1.0 {
        scaled(g, "gCO₂e", 1)
    } else {
        scaled(g * 1000.0, "mgCO₂e", 0)
    }
}
