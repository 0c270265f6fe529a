//! Response framer: turns reply lines into complete OBD messages.
//!
//! Handles the three shapes an ELM327 reply can take:
//!
//! - single-frame hex lines, with or without a header (`41 0C 1A F8`,
//!   `7E8 04 41 0C 1A F8`),
//! - ISO-TP multi-frame messages with headers on (`7E8 10 14 …`,
//!   `7E8 21 …`), grouped by header and ordered by the PCI sequence nibble,
//! - ISO-TP multi-frame listings with headers off (`014`, `0: …`, `1: …`),
//! - legacy mode 09 answers split over numbered lines
//!   (`48 6B 10 49 02 01 …`, `48 6B 10 49 02 02 …`), joined per source.
//!
//! Every complete message starts with the mode echo byte. Reassembly
//! problems are reported per message and never abort the other messages.

use crate::error::DecodeError;
use crate::protocol::Protocol;
use crate::response::squeeze;
use crate::tokens::{self, ErrorToken};
use crate::types::{ISOTP_CF, ISOTP_FF, ISOTP_SF, MODE_VEHICLE_INFO, RESPONSE_SID_OFFSET};

/// How header bytes precede the payload on each line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HeaderMode {
    /// `ATH0`: lines are payload only.
    #[default]
    Off,
    /// 11-bit CAN: three hex digits (`7E8`) then the PCI byte.
    Can11,
    /// 29-bit CAN: four header bytes (`18 DA F1 10`) then the PCI byte.
    Can29,
    /// J1850 / ISO 9141 / KWP: three header bytes and a trailing checksum.
    Legacy,
}

/// Line layout the framer expects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFormat {
    pub headers: HeaderMode,
}

impl FrameFormat {
    /// Layout produced by `protocol` with headers on or off.
    pub fn new(protocol: Protocol, headers_on: bool) -> Self {
        let headers = match (headers_on, protocol.is_can(), protocol.id_bits()) {
            (false, _, _) => HeaderMode::Off,
            (true, true, 11) => HeaderMode::Can11,
            (true, true, _) => HeaderMode::Can29,
            (true, false, _) => HeaderMode::Legacy,
        };
        Self { headers }
    }
}

/// One complete OBD message, mode echo first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Header of the responding ECU, when headers are on.
    pub source: Option<String>,
    pub data: Vec<u8>,
}

/// A message that could not be put together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameFailure {
    /// Mode and PID echo of the broken message, when its first fragment
    /// arrived.
    pub lead: Option<(u8, u8)>,
    pub error: DecodeError,
}

/// Everything the framer found in one reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Framed {
    pub messages: Vec<Message>,
    pub adapter_errors: Vec<ErrorToken>,
    pub failures: Vec<FrameFailure>,
}

/// Multi-frame message under construction.
#[derive(Debug)]
struct Pending {
    header: String,
    total: usize,
    /// `(sequence nibble, data)` in arrival order. With headers on the
    /// First Frame is stored as sequence 0.
    fragments: Vec<(u8, Vec<u8>)>,
}

impl Pending {
    fn new(header: String, total: usize) -> Self {
        Self {
            header,
            total,
            fragments: Vec::new(),
        }
    }

    fn lead(&self) -> Option<(u8, u8)> {
        self.fragments
            .iter()
            .find(|(seq, _)| *seq == 0)
            .and_then(|(_, data)| Some((*data.first()?, *data.get(1)?)))
    }

    /// Concatenate fragments in sequence order. The nibble wraps after
    /// 0xF, so fragment `i` is the first unused one carrying `i & 0xF`.
    fn assemble(mut self) -> Result<Message, FrameFailure> {
        let lead = self.lead();
        let mut payload = Vec::with_capacity(self.total);
        let mut index = 0usize;

        while payload.len() < self.total {
            let expected = (index & 0x0F) as u8;
            let Some(pos) = self.fragments.iter().position(|(seq, _)| *seq == expected) else {
                return Err(FrameFailure {
                    lead,
                    error: DecodeError::MissingFragment {
                        header: self.header,
                        index,
                    },
                });
            };
            let (_, data) = self.fragments.remove(pos);
            payload.extend_from_slice(&data);
            index += 1;
        }

        payload.truncate(self.total);
        Ok(Message {
            source: (!self.header.is_empty()).then_some(self.header),
            data: payload,
        })
    }
}

/// Frame the lines of one reply. `echo` is the command that was sent; a
/// line starting with it has the echo stripped.
pub fn frame(lines: &[String], echo: Option<&str>, format: FrameFormat) -> Framed {
    let mut framed = Framed::default();
    let mut pending: Vec<Pending> = Vec::new();
    let echo = echo.map(squeeze).filter(|e| !e.is_empty());

    for line in lines {
        if let Some(token) = ErrorToken::classify(line) {
            framed.adapter_errors.push(token);
            continue;
        }
        if tokens::is_status_line(line) {
            continue;
        }

        let mut text = squeeze(line);
        if let Some(echo) = &echo {
            if let Some(rest) = text.strip_prefix(echo.as_str()) {
                text = rest.to_string();
            }
        }
        if text.is_empty() {
            continue;
        }

        let result = match format.headers {
            HeaderMode::Off => headerless_line(&text, &mut pending, &mut framed),
            HeaderMode::Can11 => can_line(&text, 3, &mut pending, &mut framed),
            HeaderMode::Can29 => can_line(&text, 8, &mut pending, &mut framed),
            HeaderMode::Legacy => legacy_line(&text, &mut framed),
        };
        if let Err(error) = result {
            tracing::debug!(line = %line, error = %error, "skipping reply line");
            framed.failures.push(FrameFailure { lead: None, error });
        }
    }

    for message in pending {
        match message.assemble() {
            Ok(message) => framed.messages.push(message),
            Err(failure) => framed.failures.push(failure),
        }
    }

    if format.headers == HeaderMode::Legacy {
        join_legacy_info(&mut framed);
    }
    framed
}

/// Chunks of one legacy mode 09 answer: same source, same PID.
struct InfoChunks {
    source: Option<String>,
    pid: u8,
    /// `(sequence byte, data)` in arrival order.
    chunks: Vec<(u8, Vec<u8>)>,
}

/// Join legacy mode 09 lines numbered by their third byte into one
/// message `49 <pid> <data…>`. A lone line is left as it came.
fn join_legacy_info(framed: &mut Framed) {
    let info_echo = MODE_VEHICLE_INFO + RESPONSE_SID_OFFSET;
    let mut groups: Vec<InfoChunks> = Vec::new();
    let mut messages = Vec::with_capacity(framed.messages.len());

    for message in framed.messages.drain(..) {
        let (pid, seq) = match message.data.as_slice() {
            [echo, pid, seq, ..] if *echo == info_echo => (*pid, *seq),
            _ => {
                messages.push(message);
                continue;
            }
        };
        let chunk = (seq, message.data[3..].to_vec());
        match groups
            .iter_mut()
            .find(|g| g.source == message.source && g.pid == pid)
        {
            Some(group) => group.chunks.push(chunk),
            None => groups.push(InfoChunks {
                source: message.source,
                pid,
                chunks: vec![chunk],
            }),
        }
    }

    for mut group in groups {
        if let [(seq, chunk)] = group.chunks.as_slice() {
            let mut data = vec![info_echo, group.pid, *seq];
            data.extend_from_slice(chunk);
            messages.push(Message {
                source: group.source,
                data,
            });
            continue;
        }

        group.chunks.sort_by_key(|(seq, _)| *seq);
        let gap = group
            .chunks
            .iter()
            .enumerate()
            .find(|(index, (seq, _))| usize::from(*seq) != index + 1)
            .map(|(index, _)| index + 1);
        if let Some(index) = gap {
            framed.failures.push(FrameFailure {
                lead: Some((info_echo, group.pid)),
                error: DecodeError::MissingFragment {
                    header: group.source.unwrap_or_default(),
                    index,
                },
            });
            continue;
        }

        let mut data = vec![info_echo, group.pid];
        for (_, chunk) in group.chunks {
            data.extend(chunk);
        }
        messages.push(Message {
            source: group.source,
            data,
        });
    }

    framed.messages = messages;
}

fn headerless_line(
    text: &str,
    pending: &mut Vec<Pending>,
    framed: &mut Framed,
) -> Result<(), DecodeError> {
    // `014`: total byte count announcing a multi-frame listing.
    if text.len() == 3 && text.bytes().all(|b| b.is_ascii_hexdigit()) {
        let total = usize::from_str_radix(text, 16).map_err(|_| malformed(text))?;
        pending.push(Pending::new(String::new(), total));
        return Ok(());
    }

    // `0:49020131…`: indexed fragment of the current listing.
    if let Some((index, rest)) = text.split_once(':') {
        let seq = u8::from_str_radix(index, 16)
            .ok()
            .filter(|_| index.len() == 1)
            .ok_or_else(|| malformed(text))?;
        let data = parse_hex(rest).ok_or_else(|| malformed(text))?;
        let current = pending
            .iter_mut()
            .rev()
            .find(|p| p.header.is_empty())
            .ok_or_else(|| malformed(text))?;
        current.fragments.push((seq, data));
        return Ok(());
    }

    let data = parse_hex(text).ok_or_else(|| malformed(text))?;
    framed.messages.push(Message { source: None, data });
    Ok(())
}

fn can_line(
    text: &str,
    header_len: usize,
    pending: &mut Vec<Pending>,
    framed: &mut Framed,
) -> Result<(), DecodeError> {
    if text.len() < header_len + 2 || !text.is_char_boundary(header_len) {
        return Err(malformed(text));
    }
    let (header, rest) = text.split_at(header_len);
    if !header.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(malformed(text));
    }
    let bytes = parse_hex(rest).ok_or_else(|| malformed(text))?;
    let (&pci, body) = bytes.split_first().ok_or_else(|| malformed(text))?;

    match pci >> 4 {
        ISOTP_SF => {
            let len = usize::from(pci & 0x0F);
            // Keep what arrived; a short frame surfaces as a truncated payload.
            let data = body[..len.min(body.len())].to_vec();
            framed.messages.push(Message {
                source: Some(header.to_string()),
                data,
            });
        }
        ISOTP_FF => {
            let (&len_low, data) = body.split_first().ok_or_else(|| malformed(text))?;
            let total = (usize::from(pci & 0x0F) << 8) | usize::from(len_low);
            let mut message = Pending::new(header.to_string(), total);
            message.fragments.push((0, data.to_vec()));
            pending.push(message);
        }
        ISOTP_CF => {
            let current = pending
                .iter_mut()
                .rev()
                .find(|p| p.header == header)
                .ok_or_else(|| {
                    DecodeError::Malformed(format!("consecutive frame without first frame: {text}"))
                })?;
            current.fragments.push((pci & 0x0F, body.to_vec()));
        }
        _ => return Err(malformed(text)),
    }
    Ok(())
}

fn legacy_line(text: &str, framed: &mut Framed) -> Result<(), DecodeError> {
    let bytes = parse_hex(text).ok_or_else(|| malformed(text))?;
    // priority, target, source ... checksum
    if bytes.len() < 5 {
        return Err(malformed(text));
    }
    let header = bytes[..3]
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<String>();
    framed.messages.push(Message {
        source: Some(header),
        data: bytes[3..bytes.len() - 1].to_vec(),
    });
    Ok(())
}

/// Parse a whitespace-free run of hex digit pairs.
pub fn parse_hex(text: &str) -> Option<Vec<u8>> {
    if text.is_empty() || text.len() % 2 != 0 || !text.is_ascii() {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&text[i..i + 2], 16).ok())
        .collect()
}

fn malformed(text: &str) -> DecodeError {
    DecodeError::Malformed(text.to_string())
}
