//! Adapter reply vocabulary: error tokens and status chatter.
//!
//! ELM327 adapters answer some requests with plain text instead of hex.
//! Error tokens mean "no data for anything on this line"; status lines
//! (`SEARCHING...`, `BUS INIT: ...OK`) carry no payload and are skipped.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Fixed vocabulary of ELM327 error replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorToken {
    QuestionMark,
    ActAlert,
    BufferFull,
    BusBusy,
    BusError,
    CanError,
    DataError,
    /// `ERRnn` internal adapter error with its two-digit code.
    Err(u8),
    FbError,
    LpAlert,
    LvReset,
    NoData,
    RxError,
    Stopped,
    UnableToConnect,
}

/// Token text with whitespace removed, paired with its variant.
const VOCABULARY: &[(&str, ErrorToken)] = &[
    ("?", ErrorToken::QuestionMark),
    ("ACTALERT", ErrorToken::ActAlert),
    ("BUFFERFULL", ErrorToken::BufferFull),
    ("BUSBUSY", ErrorToken::BusBusy),
    ("BUSERROR", ErrorToken::BusError),
    ("CANERROR", ErrorToken::CanError),
    ("DATAERROR", ErrorToken::DataError),
    ("FBERROR", ErrorToken::FbError),
    ("LPALERT", ErrorToken::LpAlert),
    ("LVRESET", ErrorToken::LvReset),
    ("NODATA", ErrorToken::NoData),
    ("RXERROR", ErrorToken::RxError),
    ("STOPPED", ErrorToken::Stopped),
    ("UNABLETOCONNECT", ErrorToken::UnableToConnect),
];

impl ErrorToken {
    /// Match a whole reply line against the vocabulary.
    ///
    /// Case-insensitive and whitespace-insensitive (`ATS0` squeezes spaces
    /// out of some firmware's error text), but otherwise exact: a line that
    /// merely contains a token is not an error line.
    pub fn classify(line: &str) -> Option<Self> {
        let squeezed: String = line
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| c.to_ascii_uppercase())
            .collect();

        if let Some((_, token)) = VOCABULARY.iter().find(|(text, _)| *text == squeezed) {
            return Some(*token);
        }

        let code = squeezed.strip_prefix("ERR")?;
        if code.len() == 2 && code.bytes().all(|b| b.is_ascii_digit()) {
            return code.parse().ok().map(ErrorToken::Err);
        }
        None
    }

    /// Canonical adapter spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorToken::QuestionMark => "?",
            ErrorToken::ActAlert => "ACT ALERT",
            ErrorToken::BufferFull => "BUFFER FULL",
            ErrorToken::BusBusy => "BUS BUSY",
            ErrorToken::BusError => "BUS ERROR",
            ErrorToken::CanError => "CAN ERROR",
            ErrorToken::DataError => "DATA ERROR",
            ErrorToken::Err(_) => "ERR",
            ErrorToken::FbError => "FB ERROR",
            ErrorToken::LpAlert => "LP ALERT",
            ErrorToken::LvReset => "LV RESET",
            ErrorToken::NoData => "NO DATA",
            ErrorToken::RxError => "RX ERROR",
            ErrorToken::Stopped => "STOPPED",
            ErrorToken::UnableToConnect => "UNABLE TO CONNECT",
        }
    }
}

impl fmt::Display for ErrorToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorToken::Err(code) => write!(f, "ERR{code:02}"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Informational lines that carry no payload.
pub fn is_status_line(line: &str) -> bool {
    let upper = line.trim().to_ascii_uppercase();
    upper == "OK"
        || upper.starts_with("SEARCHING")
        || upper.starts_with("BUS INIT")
        || upper.starts_with("BUSINIT")
}
