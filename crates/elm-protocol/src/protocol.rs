//! OBD-II protocol registry.
//!
//! Mirrors the ELM327 `AT SP h` table. The ordering used for fallback
//! negotiation walks from the most exotic CAN variant down to the legacy
//! buses and ends at `Auto`; `None` is never retried.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Link-layer protocols an ELM327 can be told to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Protocol {
    /// Let the adapter search (`ATSP0`).
    #[default]
    Auto,
    /// SAE J1850 PWM (41.6 kbaud)
    J1850Pwm,
    /// SAE J1850 VPW (10.4 kbaud)
    J1850Vpw,
    /// ISO 9141-2 (5 baud init, 10.4 kbaud)
    Iso9141_2,
    /// ISO 14230-4 KWP (5 baud init, 10.4 kbaud)
    Iso14230_4Kwp5Baud,
    /// ISO 14230-4 KWP (fast init, 10.4 kbaud)
    Iso14230_4KwpFast,
    /// ISO 15765-4 CAN (11 bit ID, 500 kbaud)
    Iso15765_4Can11bit500,
    /// ISO 15765-4 CAN (29 bit ID, 500 kbaud)
    Iso15765_4Can29bit500,
    /// ISO 15765-4 CAN (11 bit ID, 250 kbaud)
    Iso15765_4Can11bit250,
    /// ISO 15765-4 CAN (29 bit ID, 250 kbaud)
    Iso15765_4Can29bit250,
    /// SAE J1939 CAN (29 bit ID, 250 kbaud)
    SaeJ1939,
    /// USER1 CAN (11 bit ID, 125 kbaud)
    User1Can,
    /// USER2 CAN (11 bit ID, 50 kbaud)
    User2Can,
    /// No protocol could be established.
    None,
}

impl Protocol {
    /// Every protocol in registry order.
    pub const ALL: [Protocol; 14] = [
        Protocol::Auto,
        Protocol::J1850Pwm,
        Protocol::J1850Vpw,
        Protocol::Iso9141_2,
        Protocol::Iso14230_4Kwp5Baud,
        Protocol::Iso14230_4KwpFast,
        Protocol::Iso15765_4Can11bit500,
        Protocol::Iso15765_4Can29bit500,
        Protocol::Iso15765_4Can11bit250,
        Protocol::Iso15765_4Can29bit250,
        Protocol::SaeJ1939,
        Protocol::User1Can,
        Protocol::User2Can,
        Protocol::None,
    ];

    /// First protocol tried when the adapter cannot settle on one itself.
    pub const FALLBACK_START: Protocol = Protocol::User2Can;

    /// Single-character ELM327 protocol number. `None` has no id.
    pub fn id(&self) -> Option<char> {
        let id = match self {
            Protocol::Auto => '0',
            Protocol::J1850Pwm => '1',
            Protocol::J1850Vpw => '2',
            Protocol::Iso9141_2 => '3',
            Protocol::Iso14230_4Kwp5Baud => '4',
            Protocol::Iso14230_4KwpFast => '5',
            Protocol::Iso15765_4Can11bit500 => '6',
            Protocol::Iso15765_4Can29bit500 => '7',
            Protocol::Iso15765_4Can11bit250 => '8',
            Protocol::Iso15765_4Can29bit250 => '9',
            Protocol::SaeJ1939 => 'A',
            Protocol::User1Can => 'B',
            Protocol::User2Can => 'C',
            Protocol::None => return None,
        };
        Some(id)
    }

    /// Look a protocol up by its ELM327 number (case-insensitive).
    pub fn from_id(id: char) -> Option<Self> {
        let id = id.to_ascii_uppercase();
        Self::ALL.into_iter().find(|p| p.id() == Some(id))
    }

    /// Parse an `ATDPN` reply. A leading `A` marks a protocol found by
    /// automatic search (`"A6"`); a bare `"A"` is SAE J1939.
    pub fn from_dpn(reply: &str) -> Option<Self> {
        let reply = reply.trim();
        let number = match reply.len() {
            1 => reply,
            2 if reply.starts_with(['A', 'a']) => &reply[1..],
            _ => return None,
        };
        number.chars().next().and_then(Self::from_id)
    }

    /// Adapter directive that forces this protocol.
    pub fn select_command(&self) -> String {
        self.id().map(|id| format!("ATSP{id}")).unwrap_or_default()
    }

    /// Human-readable description, as printed by `ATDP`.
    pub fn description(&self) -> &'static str {
        match self {
            Protocol::Auto => "Automatic",
            Protocol::J1850Pwm => "SAE J1850 PWM (41.6 kbaud)",
            Protocol::J1850Vpw => "SAE J1850 VPW (10.4 kbaud)",
            Protocol::Iso9141_2 => "ISO 9141-2 (5 baud init, 10.4 kbaud)",
            Protocol::Iso14230_4Kwp5Baud => "ISO 14230-4 KWP (5 baud init, 10.4 kbaud)",
            Protocol::Iso14230_4KwpFast => "ISO 14230-4 KWP (fast init, 10.4 kbaud)",
            Protocol::Iso15765_4Can11bit500 => "ISO 15765-4 CAN (11 bit ID, 500 kbaud)",
            Protocol::Iso15765_4Can29bit500 => "ISO 15765-4 CAN (29 bit ID, 500 kbaud)",
            Protocol::Iso15765_4Can11bit250 => "ISO 15765-4 CAN (11 bit ID, 250 kbaud)",
            Protocol::Iso15765_4Can29bit250 => "ISO 15765-4 CAN (29 bit ID, 250 kbaud)",
            Protocol::SaeJ1939 => "SAE J1939 CAN (29 bit ID, 250 kbaud)",
            Protocol::User1Can => "USER1 CAN (11 bit ID, 125 kbaud)",
            Protocol::User2Can => "USER2 CAN (11 bit ID, 50 kbaud)",
            Protocol::None => "None",
        }
    }

    /// Identifier width in bits: 11 for the standard-ID CAN variants, 29
    /// for everything else.
    pub fn id_bits(&self) -> u8 {
        match self {
            Protocol::Iso15765_4Can11bit500
            | Protocol::Iso15765_4Can11bit250
            | Protocol::User1Can
            | Protocol::User2Can => 11,
            _ => 29,
        }
    }

    /// Whether replies arrive as CAN frames (ISO-TP framing, PCI bytes).
    pub fn is_can(&self) -> bool {
        matches!(
            self,
            Protocol::Iso15765_4Can11bit500
                | Protocol::Iso15765_4Can29bit500
                | Protocol::Iso15765_4Can11bit250
                | Protocol::Iso15765_4Can29bit250
                | Protocol::SaeJ1939
                | Protocol::User1Can
                | Protocol::User2Can
        )
    }

    /// CAN ECUs accept up to six mode 01 PIDs in a single request.
    pub fn supports_batching(&self) -> bool {
        self.is_can()
    }

    /// Next protocol to try during fallback. The chain is
    /// `C → B → A → 9 → … → 1 → Auto`; `Auto` and `None` lead to `None`.
    pub fn next(&self) -> Protocol {
        match self {
            Protocol::User2Can => Protocol::User1Can,
            Protocol::User1Can => Protocol::SaeJ1939,
            Protocol::SaeJ1939 => Protocol::Iso15765_4Can29bit250,
            Protocol::Iso15765_4Can29bit250 => Protocol::Iso15765_4Can11bit250,
            Protocol::Iso15765_4Can11bit250 => Protocol::Iso15765_4Can29bit500,
            Protocol::Iso15765_4Can29bit500 => Protocol::Iso15765_4Can11bit500,
            Protocol::Iso15765_4Can11bit500 => Protocol::Iso14230_4KwpFast,
            Protocol::Iso14230_4KwpFast => Protocol::Iso14230_4Kwp5Baud,
            Protocol::Iso14230_4Kwp5Baud => Protocol::Iso9141_2,
            Protocol::Iso9141_2 => Protocol::J1850Vpw,
            Protocol::J1850Vpw => Protocol::J1850Pwm,
            Protocol::J1850Pwm => Protocol::Auto,
            Protocol::Auto | Protocol::None => Protocol::None,
        }
    }

    /// Concrete protocols in fallback order starting at `from`, stopping
    /// before `Auto`.
    pub fn fallback_from(from: Protocol) -> impl Iterator<Item = Protocol> {
        std::iter::successors(Some(from), |p| Some(p.next()))
            .take_while(|p| !matches!(p, Protocol::Auto | Protocol::None))
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id() {
            Some(id) => write!(f, "{id}: {}", self.description()),
            None => f.write_str(self.description()),
        }
    }
}

impl TryFrom<String> for Protocol {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case("auto") {
            return Ok(Protocol::Auto);
        }
        if trimmed.eq_ignore_ascii_case("none") {
            return Ok(Protocol::None);
        }
        let mut chars = trimmed.chars();
        match (chars.next(), chars.next()) {
            (Some(id), None) => {
                Protocol::from_id(id).ok_or_else(|| format!("unknown protocol id '{id}'"))
            }
            _ => Err(format!("unknown protocol '{trimmed}'")),
        }
    }
}

impl From<Protocol> for String {
    fn from(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Auto => "auto".to_string(),
            Protocol::None => "none".to_string(),
            other => other.id().map(String::from).unwrap_or_default(),
        }
    }
}
