//! Measurement units for registry quantities.
//!
//! Every quantity carries a fixed unit from this closed set. Conversions are
//! table-driven: linear scale factors for same-dimension pairs, an affine rule
//! for temperature. Anything outside the table is a configuration error.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::UnitError;

/// Units recognized by the quantity registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    /// Pure number (probabilities, indices, counts)
    Unitless,
    /// Dimensionless fraction in [0, 1]
    Fraction,
    /// Dimensionless percentage
    Percent,
    /// Parts per million
    PartsPerMillion,
    /// Length: meter
    Meter,
    /// Length: centimeter
    Centimeter,
    /// Length: millimeter (also water depth equivalent)
    Millimeter,
    /// Volumetric water content, m3 water per m3 soil
    CubicMeterPerCubicMeter,
    /// Temperature: degrees Celsius
    Celsius,
    /// Temperature: Kelvin
    Kelvin,
    /// Daily radiation sum, MJ per m2
    MegajoulePerSquareMeter,
    /// Instantaneous radiation, W per m2 (daily mean)
    WattPerSquareMeter,
    /// Mass per area: kg per hectare
    KilogramPerHectare,
    /// Mass per area: tonnes per hectare
    TonnePerHectare,
    /// Mass per area: grams per m2
    GramPerSquareMeter,
    /// Time: days
    Day,
    /// Thermal time: degree-days
    DegreeDay,
}

/// W/m2 held for a day integrates to this many MJ/m2.
const WM2_TO_MJM2_DAY: f64 = 0.0864;

const KELVIN_OFFSET: f64 = 273.15;

impl Unit {
    /// Convert `value` from `self` into `target`.
    ///
    /// Identity conversions always succeed. Defined pairs follow the table;
    /// any other pair is a `UnitMismatch`.
    pub fn convert(self, value: f64, target: Unit) -> Result<f64, UnitError> {
        if self == target {
            return Ok(value);
        }

        let converted = match (self, target) {
            (Unit::Fraction, Unit::Percent) => value * 100.0,
            (Unit::Percent, Unit::Fraction) => value / 100.0,
            (Unit::Fraction, Unit::PartsPerMillion) => value * 1.0e6,
            (Unit::PartsPerMillion, Unit::Fraction) => value / 1.0e6,
            (Unit::Percent, Unit::PartsPerMillion) => value * 1.0e4,
            (Unit::PartsPerMillion, Unit::Percent) => value / 1.0e4,

            (Unit::Meter, Unit::Centimeter) => value * 100.0,
            (Unit::Centimeter, Unit::Meter) => value / 100.0,
            (Unit::Meter, Unit::Millimeter) => value * 1000.0,
            (Unit::Millimeter, Unit::Meter) => value / 1000.0,
            (Unit::Centimeter, Unit::Millimeter) => value * 10.0,
            (Unit::Millimeter, Unit::Centimeter) => value / 10.0,

            (Unit::Celsius, Unit::Kelvin) => value + KELVIN_OFFSET,
            (Unit::Kelvin, Unit::Celsius) => value - KELVIN_OFFSET,

            (Unit::WattPerSquareMeter, Unit::MegajoulePerSquareMeter) => value * WM2_TO_MJM2_DAY,
            (Unit::MegajoulePerSquareMeter, Unit::WattPerSquareMeter) => value / WM2_TO_MJM2_DAY,

            (Unit::TonnePerHectare, Unit::KilogramPerHectare) => value * 1000.0,
            (Unit::KilogramPerHectare, Unit::TonnePerHectare) => value / 1000.0,
            (Unit::GramPerSquareMeter, Unit::KilogramPerHectare) => value * 10.0,
            (Unit::KilogramPerHectare, Unit::GramPerSquareMeter) => value / 10.0,
            (Unit::GramPerSquareMeter, Unit::TonnePerHectare) => value / 100.0,
            (Unit::TonnePerHectare, Unit::GramPerSquareMeter) => value * 100.0,

            (from, to) => return Err(UnitError::UnitMismatch { from, to }),
        };

        Ok(converted)
    }

    /// Short symbol used in log output and error messages.
    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::Unitless => "-",
            Unit::Fraction => "frac",
            Unit::Percent => "%",
            Unit::PartsPerMillion => "ppm",
            Unit::Meter => "m",
            Unit::Centimeter => "cm",
            Unit::Millimeter => "mm",
            Unit::CubicMeterPerCubicMeter => "m3/m3",
            Unit::Celsius => "degC",
            Unit::Kelvin => "K",
            Unit::MegajoulePerSquareMeter => "MJ/m2",
            Unit::WattPerSquareMeter => "W/m2",
            Unit::KilogramPerHectare => "kg/ha",
            Unit::TonnePerHectare => "t/ha",
            Unit::GramPerSquareMeter => "g/m2",
            Unit::Day => "d",
            Unit::DegreeDay => "degC d",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_conversion() {
        assert_eq!(Unit::Millimeter.convert(12.5, Unit::Millimeter), Ok(12.5));
    }

    #[test]
    fn test_length_conversions() {
        assert_eq!(Unit::Meter.convert(1.2, Unit::Millimeter), Ok(1200.0));
        assert_eq!(Unit::Millimeter.convert(250.0, Unit::Centimeter), Ok(25.0));
    }

    #[test]
    fn test_temperature_is_affine() {
        assert_eq!(Unit::Celsius.convert(0.0, Unit::Kelvin), Ok(273.15));
        let c = Unit::Kelvin.convert(300.0, Unit::Celsius).unwrap();
        assert!((c - 26.85).abs() < 1e-12);
    }

    #[test]
    fn test_radiation_daily_integration() {
        let mj = Unit::WattPerSquareMeter.convert(250.0, Unit::MegajoulePerSquareMeter);
        assert!((mj.unwrap() - 21.6).abs() < 1e-12);
    }

    #[test]
    fn test_mass_per_area_chain() {
        assert_eq!(
            Unit::GramPerSquareMeter.convert(150.0, Unit::KilogramPerHectare),
            Ok(1500.0)
        );
        assert_eq!(
            Unit::TonnePerHectare.convert(2.0, Unit::GramPerSquareMeter),
            Ok(200.0)
        );
    }

    #[test]
    fn test_incompatible_dimensions_rejected() {
        let err = Unit::Celsius.convert(10.0, Unit::Millimeter).unwrap_err();
        assert_eq!(
            err,
            UnitError::UnitMismatch {
                from: Unit::Celsius,
                to: Unit::Millimeter
            }
        );
    }

    #[test]
    fn test_percent_round_trip() {
        let v = Unit::Fraction.convert(0.37, Unit::Percent).unwrap();
        let back = Unit::Percent.convert(v, Unit::Fraction).unwrap();
        assert!((back - 0.37).abs() < 1e-12);
    }
}
