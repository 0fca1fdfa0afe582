// Display scaling for power, energy and emissions

use carbonscope::units::{format_emissions, format_energy, format_power};

#[test]
fn test_power_units() {
    assert_eq!(format_power(1500.0).to_string(), "1.500 kW");
    assert_eq!(format_power(2.5).to_string(), "2.500 W");
    assert_eq!(format_power(0.25).to_string(), "250.000 mW");
    assert_eq!(format_power(0.0005).unit, "µW");
}

#[test]
fn test_energy_units() {
    assert_eq!(format_energy(2000.0).unit, "kWh");
    assert_eq!(format_energy(1.0).to_string(), "1.000 Wh");
    assert_eq!(format_energy(0.01).unit, "mWh");
    assert_eq!(format_energy(1.0 / 3600.0).unit, "µWh");
}

#[test]
fn test_emissions_precision_per_unit() {
    assert_eq!(format_emissions(1500.0).to_string(), "1.50 kgCO₂e");
    assert_eq!(format_emissions(12.34).to_string(), "12.3 gCO₂e");
    assert_eq!(format_emissions(0.5).to_string(), "500 mgCO₂e");
}

#[test]
fn test_bad_input_formats_as_zero() {
    assert_eq!(format_power(f64::NAN).value, 0.0);
    assert_eq!(format_energy(-3.0).value, 0.0);
    assert_eq!(format_emissions(f64::INFINITY).to_string(), "0 mgCO₂e");
}
