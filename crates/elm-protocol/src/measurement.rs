//! Decoded measurement values and their physical units.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Physical unit attached to a numeric measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Rpm,
    KilometersPerHour,
    Celsius,
    Percent,
    Kilopascal,
    Pascal,
    GramsPerSecond,
    LitersPerHour,
    Volts,
    Seconds,
    Kilometers,
    Degrees,
    Ratio,
    Count,
    /// Enumerated or dimensionless value.
    None,
}

impl Unit {
    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::Rpm => "rpm",
            Unit::KilometersPerHour => "km/h",
            Unit::Celsius => "°C",
            Unit::Percent => "%",
            Unit::Kilopascal => "kPa",
            Unit::Pascal => "Pa",
            Unit::GramsPerSecond => "g/s",
            Unit::LitersPerHour => "L/h",
            Unit::Volts => "V",
            Unit::Seconds => "s",
            Unit::Kilometers => "km",
            Unit::Degrees => "°",
            Unit::Ratio => "λ",
            Unit::Count => "",
            Unit::None => "",
        }
    }
}

/// Result of decoding one command's payload.
///
/// Measurements are values: a newer decode replaces an older one, nothing
/// ever mutates a measurement in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Measurement {
    /// Numeric value with a unit.
    Value { value: f64, unit: Unit },
    /// Non-numeric reply, e.g. a VIN.
    Text { text: String },
    /// Data absent or undecodable.
    NoResult,
}

impl Measurement {
    pub fn value(value: f64, unit: Unit) -> Self {
        Measurement::Value { value, unit }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Measurement::Text { text: text.into() }
    }

    /// Numeric value, if this is one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Measurement::Value { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Measurement::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn unit(&self) -> Option<Unit> {
        match self {
            Measurement::Value { unit, .. } => Some(*unit),
            _ => None,
        }
    }

    pub fn is_no_result(&self) -> bool {
        matches!(self, Measurement::NoResult)
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Measurement::Value { value, unit } if unit.symbol().is_empty() => write!(f, "{value}"),
            Measurement::Value { value, unit } => write!(f, "{value} {}", unit.symbol()),
            Measurement::Text { text } => f.write_str(text),
            Measurement::NoResult => f.write_str("No Result"),
        }
    }
}
