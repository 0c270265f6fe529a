//! SAE J1979 scaling helpers shared by the catalog decoders.
//!
//! All helpers take the data bytes that follow the mode/PID echo. Length
//! checks happen once in `Command::decode`, so indexing here is in bounds.

use crate::measurement::{Measurement, Unit};

/// Big-endian 16-bit value `(A*256)+B`.
pub fn word(a: u8, b: u8) -> f64 {
    f64::from(u16::from_be_bytes([a, b]))
}

/// Two's-complement 16-bit value, sign-extended.
pub fn signed_word(a: u8, b: u8) -> f64 {
    f64::from(i16::from_be_bytes([a, b]))
}

/// `A*100/255`
pub fn percent(a: u8) -> f64 {
    f64::from(a) * 100.0 / 255.0
}

/// `A-40`
pub fn temperature(a: u8) -> f64 {
    f64::from(a) - 40.0
}

/// `(A-128)*100/128`
pub fn fuel_trim(a: u8) -> f64 {
    (f64::from(a) - 128.0) * 100.0 / 128.0
}

/// Expand a 4-byte "PIDs supported" bitmap into PID numbers.
///
/// Bit 7 of the first byte is `base + 1`, bit 0 of the last byte is
/// `base + 0x20`.
pub fn supported_pids(base: u8, bitmap: &[u8]) -> Vec<u8> {
    bitmap
        .iter()
        .take(4)
        .enumerate()
        .flat_map(|(byte_idx, byte)| {
            (0..8u8).filter_map(move |bit| {
                let set = byte & (0x80 >> bit) != 0;
                let offset = (byte_idx as u8) * 8 + bit + 1;
                set.then(|| base.wrapping_add(offset))
            })
        })
        .collect()
}

/// Printable ASCII with NUL padding and framing bytes removed.
pub fn ascii(data: &[u8]) -> String {
    data.iter()
        .filter(|b| b.is_ascii_graphic() || **b == b' ')
        .map(|b| char::from(*b))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Vehicle identification number: exactly 17 alphanumeric characters after
/// the leading data-item count.
pub fn vin(data: &[u8]) -> Measurement {
    let vin: String = data
        .iter()
        .filter(|b| b.is_ascii_alphanumeric())
        .map(|b| char::from(*b))
        .collect();
    if vin.len() == 17 {
        Measurement::text(vin)
    } else {
        Measurement::NoResult
    }
}

pub fn fuel_system_status(a: u8) -> &'static str {
    match a {
        0x01 => "Open loop (insufficient temperature)",
        0x02 => "Closed loop",
        0x04 => "Open loop (engine load or deceleration)",
        0x08 => "Open loop (system failure)",
        0x10 => "Closed loop (feedback fault)",
        0x00 => "Not available",
        _ => "Invalid",
    }
}

pub fn fuel_type(a: u8) -> &'static str {
    match a {
        0x00 => "Not available",
        0x01 => "Gasoline",
        0x02 => "Methanol",
        0x03 => "Ethanol",
        0x04 => "Diesel",
        0x05 => "LPG",
        0x06 => "CNG",
        0x07 => "Propane",
        0x08 => "Electric",
        0x09 => "Bifuel running Gasoline",
        0x0A => "Bifuel running Methanol",
        0x0B => "Bifuel running Ethanol",
        0x0C => "Bifuel running LPG",
        0x0D => "Bifuel running CNG",
        0x0E => "Bifuel running Propane",
        0x0F => "Bifuel running Electricity",
        0x10 => "Bifuel running electric and combustion engine",
        0x11 => "Hybrid gasoline",
        0x12 => "Hybrid Ethanol",
        0x13 => "Hybrid Diesel",
        0x14 => "Hybrid Electric",
        0x15 => "Hybrid running electric and combustion engine",
        0x16 => "Hybrid Regenerative",
        0x17 => "Bifuel running diesel",
        _ => "Unknown",
    }
}

/// Shorthand for a numeric measurement.
pub fn value(value: f64, unit: Unit) -> Measurement {
    Measurement::value(value, unit)
}
