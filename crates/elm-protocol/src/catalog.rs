//! OBD-II command catalog.
//!
//! The table below is the single source of truth for every supported
//! request: its reply length, unit and SAE J1979 decode formula. The
//! framer and decoder only ever consult it through [`lookup`], so adding a
//! PID means adding a row here and nothing else.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::formula::{self, fuel_trim, percent, temperature, value, word};
use crate::measurement::{Measurement, Unit};
use crate::types::{MAX_BATCH_PIDS, MODE_CURRENT_DATA, MODE_VEHICLE_INFO};

/// Decode function applied to the data bytes after the mode/PID echo.
pub type DecodeFn = fn(&[u8]) -> Measurement;

/// Stable identity of a command: service mode plus PID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommandKey {
    pub mode: u8,
    pub pid: u8,
}

impl CommandKey {
    pub const fn new(mode: u8, pid: u8) -> Self {
        Self { mode, pid }
    }
}

impl fmt::Display for CommandKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}{:02X}", self.mode, self.pid)
    }
}

/// Number of data bytes a reply carries after the mode/PID echo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyLen {
    /// Exactly this many bytes; batched segments are split on it.
    Fixed(usize),
    /// Variable length, consumes the rest of the message.
    AtLeast(usize),
}

impl ReplyLen {
    pub fn min(&self) -> usize {
        match self {
            ReplyLen::Fixed(n) | ReplyLen::AtLeast(n) => *n,
        }
    }

    pub fn is_fixed(&self) -> bool {
        matches!(self, ReplyLen::Fixed(_))
    }
}

/// One OBD request definition.
#[derive(Debug, Clone, Copy)]
pub struct Command {
    pub mode: u8,
    pub pid: u8,
    pub name: &'static str,
    pub reply_len: ReplyLen,
    pub unit: Unit,
    decoder: DecodeFn,
}

impl Command {
    pub fn key(&self) -> CommandKey {
        CommandKey::new(self.mode, self.pid)
    }

    /// Request string as sent to the adapter, e.g. `"010C"`.
    pub fn request(&self) -> String {
        self.key().to_string()
    }

    /// Apply the decode formula. Payloads shorter than the declared reply
    /// length yield `NoResult` instead of garbage.
    pub fn decode(&self, data: &[u8]) -> Measurement {
        if data.len() < self.reply_len.min() {
            return Measurement::NoResult;
        }
        (self.decoder)(data)
    }
}

impl PartialEq for Command {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Command {}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.key())
    }
}

const fn pid01(pid: u8, name: &'static str, len: usize, unit: Unit, decoder: DecodeFn) -> Command {
    Command {
        mode: MODE_CURRENT_DATA,
        pid,
        name,
        reply_len: ReplyLen::Fixed(len),
        unit,
        decoder,
    }
}

static CATALOG: &[Command] = &[
    pid01(0x00, "PIDs supported [01-20]", 4, Unit::None, |d| {
        supported_list(0x00, d)
    }),
    pid01(0x01, "Monitor status since DTCs cleared", 4, Unit::Count, |d| {
        // Bit 7 of A is the MIL, bits 0-6 the stored DTC count.
        value(f64::from(d[0] & 0x7F), Unit::Count)
    }),
    pid01(0x03, "Fuel system status", 2, Unit::None, |d| {
        Measurement::text(formula::fuel_system_status(d[0]))
    }),
    pid01(0x04, "Calculated engine load", 1, Unit::Percent, |d| {
        value(percent(d[0]), Unit::Percent)
    }),
    pid01(0x05, "Engine coolant temperature", 1, Unit::Celsius, |d| {
        value(temperature(d[0]), Unit::Celsius)
    }),
    pid01(0x06, "Short term fuel trim - Bank 1", 1, Unit::Percent, |d| {
        value(fuel_trim(d[0]), Unit::Percent)
    }),
    pid01(0x07, "Long term fuel trim - Bank 1", 1, Unit::Percent, |d| {
        value(fuel_trim(d[0]), Unit::Percent)
    }),
    pid01(0x08, "Short term fuel trim - Bank 2", 1, Unit::Percent, |d| {
        value(fuel_trim(d[0]), Unit::Percent)
    }),
    pid01(0x09, "Long term fuel trim - Bank 2", 1, Unit::Percent, |d| {
        value(fuel_trim(d[0]), Unit::Percent)
    }),
    pid01(0x0A, "Fuel pressure", 1, Unit::Kilopascal, |d| {
        value(f64::from(d[0]) * 3.0, Unit::Kilopascal)
    }),
    pid01(0x0B, "Intake manifold absolute pressure", 1, Unit::Kilopascal, |d| {
        value(f64::from(d[0]), Unit::Kilopascal)
    }),
    pid01(0x0C, "Engine RPM", 2, Unit::Rpm, |d| {
        value(word(d[0], d[1]) / 4.0, Unit::Rpm)
    }),
    pid01(0x0D, "Vehicle speed", 1, Unit::KilometersPerHour, |d| {
        value(f64::from(d[0]), Unit::KilometersPerHour)
    }),
    pid01(0x0E, "Timing advance", 1, Unit::Degrees, |d| {
        value(f64::from(d[0]) / 2.0 - 64.0, Unit::Degrees)
    }),
    pid01(0x0F, "Intake air temperature", 1, Unit::Celsius, |d| {
        value(temperature(d[0]), Unit::Celsius)
    }),
    pid01(0x10, "Mass air flow rate", 2, Unit::GramsPerSecond, |d| {
        value(word(d[0], d[1]) / 100.0, Unit::GramsPerSecond)
    }),
    pid01(0x11, "Throttle position", 1, Unit::Percent, |d| {
        value(percent(d[0]), Unit::Percent)
    }),
    pid01(0x14, "Oxygen sensor 1 - Bank 1 voltage", 2, Unit::Volts, |d| {
        value(f64::from(d[0]) / 200.0, Unit::Volts)
    }),
    pid01(0x1C, "OBD standards this vehicle conforms to", 1, Unit::None, |d| {
        value(f64::from(d[0]), Unit::None)
    }),
    pid01(0x1F, "Run time since engine start", 2, Unit::Seconds, |d| {
        value(word(d[0], d[1]), Unit::Seconds)
    }),
    pid01(0x20, "PIDs supported [21-40]", 4, Unit::None, |d| {
        supported_list(0x20, d)
    }),
    pid01(0x21, "Distance traveled with MIL on", 2, Unit::Kilometers, |d| {
        value(word(d[0], d[1]), Unit::Kilometers)
    }),
    pid01(0x23, "Fuel rail gauge pressure", 2, Unit::Kilopascal, |d| {
        value(word(d[0], d[1]) * 10.0, Unit::Kilopascal)
    }),
    pid01(0x2F, "Fuel tank level input", 1, Unit::Percent, |d| {
        value(percent(d[0]), Unit::Percent)
    }),
    pid01(0x31, "Distance traveled since codes cleared", 2, Unit::Kilometers, |d| {
        value(word(d[0], d[1]), Unit::Kilometers)
    }),
    pid01(0x32, "Evap. system vapor pressure", 2, Unit::Pascal, |d| {
        value(formula::signed_word(d[0], d[1]) / 4.0, Unit::Pascal)
    }),
    pid01(0x33, "Absolute barometric pressure", 1, Unit::Kilopascal, |d| {
        value(f64::from(d[0]), Unit::Kilopascal)
    }),
    pid01(0x3C, "Catalyst temperature - Bank 1, Sensor 1", 2, Unit::Celsius, |d| {
        value(word(d[0], d[1]) / 10.0 - 40.0, Unit::Celsius)
    }),
    pid01(0x40, "PIDs supported [41-60]", 4, Unit::None, |d| {
        supported_list(0x40, d)
    }),
    pid01(0x42, "Control module voltage", 2, Unit::Volts, |d| {
        value(word(d[0], d[1]) / 1000.0, Unit::Volts)
    }),
    pid01(0x43, "Absolute load value", 2, Unit::Percent, |d| {
        value(word(d[0], d[1]) * 100.0 / 255.0, Unit::Percent)
    }),
    pid01(0x44, "Commanded air-fuel equivalence ratio", 2, Unit::Ratio, |d| {
        value(word(d[0], d[1]) * 2.0 / 65536.0, Unit::Ratio)
    }),
    pid01(0x45, "Relative throttle position", 1, Unit::Percent, |d| {
        value(percent(d[0]), Unit::Percent)
    }),
    pid01(0x46, "Ambient air temperature", 1, Unit::Celsius, |d| {
        value(temperature(d[0]), Unit::Celsius)
    }),
    pid01(0x49, "Accelerator pedal position D", 1, Unit::Percent, |d| {
        value(percent(d[0]), Unit::Percent)
    }),
    pid01(0x4C, "Commanded throttle actuator", 1, Unit::Percent, |d| {
        value(percent(d[0]), Unit::Percent)
    }),
    pid01(0x51, "Fuel type", 1, Unit::None, |d| {
        Measurement::text(formula::fuel_type(d[0]))
    }),
    pid01(0x5C, "Engine oil temperature", 1, Unit::Celsius, |d| {
        value(temperature(d[0]), Unit::Celsius)
    }),
    pid01(0x5E, "Engine fuel rate", 2, Unit::LitersPerHour, |d| {
        value(word(d[0], d[1]) / 20.0, Unit::LitersPerHour)
    }),
    Command {
        mode: MODE_VEHICLE_INFO,
        pid: 0x02,
        name: "Vehicle identification number",
        reply_len: ReplyLen::AtLeast(17),
        unit: Unit::None,
        decoder: formula::vin,
    },
    Command {
        mode: MODE_VEHICLE_INFO,
        pid: 0x0A,
        name: "ECU name",
        reply_len: ReplyLen::AtLeast(1),
        unit: Unit::None,
        decoder: |d| match formula::ascii(d) {
            name if name.is_empty() => Measurement::NoResult,
            name => Measurement::text(name),
        },
    },
];

fn supported_list(base: u8, data: &[u8]) -> Measurement {
    let pids: Vec<String> = formula::supported_pids(base, data)
        .into_iter()
        .map(|pid| format!("{pid:02X}"))
        .collect();
    Measurement::text(pids.join(" "))
}

/// Find a command by mode and PID.
pub fn lookup(mode: u8, pid: u8) -> Option<&'static Command> {
    CATALOG.iter().find(|c| c.mode == mode && c.pid == pid)
}

/// Find a command by its request string (`"010C"`, case-insensitive).
pub fn parse(request: &str) -> Option<&'static Command> {
    let request = request.trim();
    if request.len() != 4 || !request.is_ascii() {
        return None;
    }
    let mode = u8::from_str_radix(&request[..2], 16).ok()?;
    let pid = u8::from_str_radix(&request[2..], 16).ok()?;
    lookup(mode, pid)
}

/// Every catalog entry.
pub fn all() -> &'static [Command] {
    CATALOG
}

/// Build one concatenated request (`"010C0D05"`) for several commands.
///
/// Only fixed-length commands of the same mode can share a request, and an
/// ELM327 accepts at most six PIDs at once. Returns `None` when the set
/// cannot be batched; the caller then sends the commands one by one.
pub fn batch_request(commands: &[&Command]) -> Option<String> {
    let first = commands.first()?;
    if commands.len() > MAX_BATCH_PIDS || first.mode != MODE_CURRENT_DATA {
        return None;
    }

    let mut request = format!("{:02X}", first.mode);
    for (idx, cmd) in commands.iter().enumerate() {
        let duplicate = commands[..idx].iter().any(|c| c.pid == cmd.pid);
        if cmd.mode != first.mode || !cmd.reply_len.is_fixed() || duplicate {
            return None;
        }
        request.push_str(&format!("{:02X}", cmd.pid));
    }
    Some(request)
}
