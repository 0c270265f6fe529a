//! Attribute framed messages to the commands that asked for them.

use std::collections::HashMap;

use crate::catalog::{Command, CommandKey, ReplyLen};
use crate::error::{DecodeError, DecodeResult};
use crate::frame::{self, FrameFormat, Message};
use crate::measurement::Measurement;
use crate::response::RawResponse;
use crate::types::RESPONSE_SID_OFFSET;

/// Stateless response decoder for one line layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Decoder {
    format: FrameFormat,
}

impl Decoder {
    pub fn new(format: FrameFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    /// Decode `raw` for every command in `requested`, keeping the reason
    /// behind each missing result.
    ///
    /// Every requested command gets an entry. Results do not depend on the
    /// order of lines or of batched segments, and when several ECUs answer
    /// the same PID the first complete answer is kept.
    pub fn decode_detailed(
        &self,
        raw: &RawResponse,
        requested: &[&Command],
    ) -> HashMap<CommandKey, DecodeResult<Measurement>> {
        let mut results: HashMap<CommandKey, DecodeResult<Measurement>> = requested
            .iter()
            .map(|c| (c.key(), Err(DecodeError::NoResponse)))
            .collect();
        if requested.is_empty() {
            return results;
        }

        let framed = frame::frame(&raw.lines, Some(&raw.command), self.format);
        // Errors that belong to no particular command; they only explain
        // commands nothing else answered.
        let mut stray = Vec::new();

        for message in &framed.messages {
            if let Err(error) = attribute(message, requested, &mut results) {
                tracing::debug!(
                    command = %raw.command,
                    source = ?message.source,
                    error = %error,
                    "unattributed message"
                );
                stray.push(error);
            }
        }

        for failure in framed.failures {
            let key = failure
                .lead
                .and_then(|(echo, pid)| Some(CommandKey::new(echo.checked_sub(RESPONSE_SID_OFFSET)?, pid)));
            match key.and_then(|key| results.get_mut(&key)) {
                Some(slot) => record(slot, Err(failure.error)),
                None => stray.push(failure.error),
            }
        }

        let fallback = framed
            .adapter_errors
            .first()
            .map(|token| DecodeError::AdapterError(*token))
            .or_else(|| stray.into_iter().next());
        if let Some(error) = fallback {
            for slot in results.values_mut() {
                if matches!(slot, Err(DecodeError::NoResponse)) {
                    *slot = Err(error.clone());
                }
            }
        }

        results
    }

    /// Decode `raw`, mapping every failure to [`Measurement::NoResult`].
    pub fn decode(
        &self,
        raw: &RawResponse,
        requested: &[&Command],
    ) -> HashMap<CommandKey, Measurement> {
        self.decode_detailed(raw, requested)
            .into_iter()
            .map(|(key, result)| {
                let measurement = result.unwrap_or_else(|error| {
                    tracing::debug!(command = %key, error = %error, "no result");
                    Measurement::NoResult
                });
                (key, measurement)
            })
            .collect()
    }
}

/// Decode a headerless reply. Use a [`Decoder`] built from the negotiated
/// protocol when headers are on.
pub fn decode(raw: &RawResponse, requested: &[&Command]) -> HashMap<CommandKey, Measurement> {
    Decoder::default().decode(raw, requested)
}

/// Walk one message: `<mode+0x40> <pid> <data…> [<mode+0x40>] <pid> <data…>`.
fn attribute(
    message: &Message,
    requested: &[&Command],
    results: &mut HashMap<CommandKey, DecodeResult<Measurement>>,
) -> Result<(), DecodeError> {
    let data = &message.data;
    let (&echo, _) = data
        .split_first()
        .ok_or_else(|| DecodeError::Malformed("empty message".into()))?;
    let Some(mode) = echo.checked_sub(RESPONSE_SID_OFFSET) else {
        return Err(DecodeError::EchoMismatch {
            mode: echo,
            pid: data.get(1).copied().unwrap_or_default(),
        });
    };
    let find = |pid: u8| requested.iter().find(|c| c.mode == mode && c.pid == pid);

    let mut cursor = 1;
    let mut matched = false;
    while cursor < data.len() {
        let pid = data[cursor];
        let command = match find(pid) {
            Some(command) => command,
            // A repeated mode echo between segments, only when a requested
            // PID follows it.
            None if pid == echo && data.get(cursor + 1).is_some_and(|p| find(*p).is_some()) => {
                cursor += 1;
                continue;
            }
            None if matched => {
                tracing::debug!(mode = echo, pid, "trailing bytes after batched reply");
                return Ok(());
            }
            None => return Err(DecodeError::EchoMismatch { mode: echo, pid }),
        };
        matched = true;
        cursor += 1;

        let available = &data[cursor..];
        let (need, take) = match command.reply_len {
            ReplyLen::Fixed(n) => (n, n),
            ReplyLen::AtLeast(n) => (n, available.len()),
        };
        let Some(segment) = available.get(..take).filter(|s| s.len() >= need) else {
            if let Some(slot) = results.get_mut(&command.key()) {
                record(
                    slot,
                    Err(DecodeError::Truncated {
                        mode: command.mode,
                        pid: command.pid,
                        need,
                        got: available.len(),
                    }),
                );
            }
            return Ok(());
        };

        if let Some(slot) = results.get_mut(&command.key()) {
            record(slot, Ok(command.decode(segment)));
        }
        cursor += take;
    }

    if matched {
        Ok(())
    } else {
        Err(DecodeError::EchoMismatch {
            mode: echo,
            pid: data.get(1).copied().unwrap_or_default(),
        })
    }
}

/// Store `result` unless a usable measurement is already there.
fn record(slot: &mut DecodeResult<Measurement>, result: DecodeResult<Measurement>) {
    let replace = match (&*slot, &result) {
        (Ok(existing), _) if !existing.is_no_result() => false,
        (Ok(_), Err(_)) => false,
        _ => true,
    };
    if replace {
        *slot = result;
    }
}
