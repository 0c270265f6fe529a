//! Scripted ELM327 adapter for tests and the simulated agent mode.
//!
//! Tracks the adapter settings that change how replies look (echo,
//! spaces, headers, selected protocol) so the link and setup code see the
//! same byte stream a real dongle would produce. Replies come from, in
//! order: a per-command script, the built-in AT command handler, and an
//! optional [`SimulatedVehicle`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use elm_protocol::catalog::CommandKey;
use elm_protocol::frame::{self, HeaderMode};
use elm_protocol::response::squeeze;
use elm_protocol::types::{
    ISOTP_CF_DATA, ISOTP_FF_DATA, LEGACY_INFO_CHUNK, MODE_VEHICLE_INFO, RESPONSE_SID_OFFSET,
};
use elm_protocol::{FrameFormat, Protocol};

use crate::error::{LinkError, LinkResult};
use crate::transport::{Notification, Transport, notification_channel};

const IDENTITY: &str = "ELM327 v1.5";

/// A scripted answer to one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Reply lines separated by `\r`. The blank line and prompt are added.
    Text(String),
    /// Same as `Text`, sent after `delay`.
    Delayed { delay: Duration, text: String },
    /// Never answer; the transaction times out.
    Silent,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Reply::Text(text.into())
    }

    pub fn delayed(delay: Duration, text: impl Into<String>) -> Self {
        Reply::Delayed {
            delay,
            text: text.into(),
        }
    }
}

/// A vehicle answering OBD requests over one bus protocol.
#[derive(Debug, Clone)]
pub struct SimulatedVehicle {
    protocol: Protocol,
    /// Data bytes after the mode/PID echo.
    pids: HashMap<CommandKey, Vec<u8>>,
    voltage: String,
    requests: u32,
}

impl SimulatedVehicle {
    /// An empty vehicle on `protocol`; add PIDs with [`with_pid`](Self::with_pid).
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            pids: HashMap::new(),
            voltage: "12.6V".to_string(),
            requests: 0,
        }
    }

    pub fn with_pid(mut self, mode: u8, pid: u8, data: &[u8]) -> Self {
        self.pids.insert(CommandKey::new(mode, pid), data.to_vec());
        self
    }

    /// A petrol car on CAN 11-bit 500 kbaud with a VIN, an ECU name and
    /// the common live-data PIDs. RPM and speed change on every request.
    pub fn petrol_car() -> Self {
        let mut vin = vec![0x01];
        vin.extend_from_slice(b"1G1JC5444R7252367");
        let mut ecu_name = vec![0x01];
        ecu_name.extend_from_slice(b"ECM-EngineControl\0\0\0");

        Self::new(Protocol::Iso15765_4Can11bit500)
            .with_pid(0x01, 0x00, &[0xBE, 0x1F, 0xA8, 0x13])
            .with_pid(0x01, 0x01, &[0x00, 0x07, 0x65, 0x00])
            .with_pid(0x01, 0x03, &[0x02, 0x00])
            .with_pid(0x01, 0x04, &[0x5A])
            .with_pid(0x01, 0x05, &[0x7B])
            .with_pid(0x01, 0x06, &[0x80])
            .with_pid(0x01, 0x07, &[0x82])
            .with_pid(0x01, 0x0B, &[0x21])
            .with_pid(0x01, 0x0E, &[0x90])
            .with_pid(0x01, 0x0F, &[0x46])
            .with_pid(0x01, 0x10, &[0x01, 0xF4])
            .with_pid(0x01, 0x11, &[0x33])
            .with_pid(0x01, 0x1C, &[0x06])
            .with_pid(0x01, 0x1F, &[0x01, 0x2C])
            .with_pid(0x01, 0x20, &[0x80, 0x00, 0x00, 0x01])
            .with_pid(0x01, 0x21, &[0x00, 0x00])
            .with_pid(0x01, 0x33, &[0x65])
            .with_pid(0x01, 0x40, &[0x40, 0x00, 0x00, 0x00])
            .with_pid(0x01, 0x42, &[0x36, 0xB0])
            .with_pid(0x01, 0x46, &[0x3C])
            .with_pid(0x01, 0x51, &[0x01])
            .with_pid(0x01, 0x5C, &[0x82])
            .with_pid(0x09, 0x02, &vin)
            .with_pid(0x09, 0x0A, &ecu_name)
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Payload (mode echo first) answering `request`, or `None` for
    /// `NO DATA`.
    fn answer(&mut self, request: &[u8]) -> Option<Vec<u8>> {
        let (&mode, pids) = request.split_first()?;
        if pids.is_empty() || pids.len() > 6 || (mode != 0x01 && pids.len() > 1) {
            return None;
        }
        self.requests = self.requests.wrapping_add(1);

        let mut payload = vec![mode.checked_add(RESPONSE_SID_OFFSET)?];
        for &pid in pids {
            let data = match (mode, pid) {
                (0x01, 0x0C) => {
                    let rpm = 750 + self.requests.wrapping_mul(53) % 2500;
                    (rpm * 4).to_be_bytes()[2..].to_vec()
                }
                (0x01, 0x0D) => vec![(self.requests.wrapping_mul(7) % 130) as u8],
                _ => match self.pids.get(&CommandKey::new(mode, pid)) {
                    Some(data) => data.clone(),
                    None => continue,
                },
            };
            payload.push(pid);
            payload.extend(data);
        }
        (payload.len() > 1).then_some(payload)
    }
}

impl Default for SimulatedVehicle {
    fn default() -> Self {
        Self::petrol_car()
    }
}

/// Adapter settings the mock keeps between commands.
#[derive(Debug)]
struct State {
    script: HashMap<String, VecDeque<Reply>>,
    sent: Vec<String>,
    echo: bool,
    spaces: bool,
    headers: bool,
    selected: Protocol,
    negotiated: Option<Protocol>,
    vehicle: Option<SimulatedVehicle>,
    write_failure: Option<String>,
    closed: bool,
    /// Delayed reply still on its way.
    pending: Option<JoinHandle<()>>,
    /// Bare `\r` writes received.
    interrupts: usize,
}

impl State {
    fn reset(&mut self) {
        self.echo = true;
        self.spaces = true;
        self.headers = false;
        self.selected = Protocol::Auto;
        self.negotiated = None;
    }

    fn scripted(&mut self, command: &str) -> Option<Reply> {
        let queue = self.script.get_mut(command)?;
        // The last scripted reply stays for every later call.
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }

    /// Built-in behaviour for AT commands. Settings change even when a
    /// script overrides the reply text.
    fn at_command(&mut self, command: &str) -> String {
        let body = &command[2..];
        let ok = "OK".to_string();
        match body {
            "Z" | "WS" => {
                self.reset();
                IDENTITY.to_string()
            }
            "D" => {
                self.reset();
                ok
            }
            "I" => IDENTITY.to_string(),
            "E0" | "E1" => {
                self.echo = body == "E1";
                ok
            }
            "S0" | "S1" => {
                self.spaces = body == "S1";
                ok
            }
            "H0" | "H1" => {
                self.headers = body == "H1";
                ok
            }
            "L0" | "L1" | "AT0" | "AT1" | "AT2" | "CAF0" | "CAF1" => ok,
            "RV" => self
                .vehicle
                .as_ref()
                .map_or_else(|| "12.0V".to_string(), |v| v.voltage.clone()),
            "DPN" => match (self.selected, self.negotiated) {
                (Protocol::Auto, Some(p)) => format!("A{}", p.id().unwrap_or('0')),
                (Protocol::Auto, None) => "A0".to_string(),
                (p, _) => p.id().map(String::from).unwrap_or_else(|| "0".to_string()),
            },
            _ if body.starts_with("ST") && body.len() == 4 => ok,
            _ if body.starts_with("SP") && body.len() == 3 => {
                match body.chars().nth(2).and_then(Protocol::from_id) {
                    Some(protocol) => {
                        self.selected = protocol;
                        self.negotiated = None;
                        ok
                    }
                    None => "?".to_string(),
                }
            }
            _ => "?".to_string(),
        }
    }

    /// OBD request handled by the vehicle, if there is one.
    fn obd_request(&mut self, command: &str) -> String {
        let Some(request) = frame::parse_hex(command) else {
            return "?".to_string();
        };
        let Some(vehicle) = self.vehicle.as_mut() else {
            return "NO DATA".to_string();
        };

        let mut prefix = String::new();
        let bus = match self.selected {
            Protocol::Auto => {
                if self.negotiated.is_none() {
                    prefix.push_str("SEARCHING...\r");
                    self.negotiated = Some(vehicle.protocol);
                }
                vehicle.protocol
            }
            p if p == vehicle.protocol => p,
            _ => return "UNABLE TO CONNECT".to_string(),
        };

        match vehicle.answer(&request) {
            Some(payload) => {
                let format = FrameFormat::new(bus, self.headers);
                prefix + &render(&payload, format, self.spaces).join("\r")
            }
            None => prefix + "NO DATA",
        }
    }
}

/// Scripted ELM327 adapter implementing [`Transport`].
#[derive(Debug)]
pub struct MockAdapter {
    state: Mutex<State>,
    tx: mpsc::Sender<Notification>,
}

impl MockAdapter {
    /// A bare adapter with no vehicle attached: AT commands work, OBD
    /// requests answer `NO DATA` unless scripted.
    pub fn new() -> (Arc<Self>, mpsc::Receiver<Notification>) {
        Self::build(None)
    }

    /// An adapter plugged into [`SimulatedVehicle::petrol_car`].
    pub fn simulated_vehicle() -> (Arc<Self>, mpsc::Receiver<Notification>) {
        Self::build(Some(SimulatedVehicle::petrol_car()))
    }

    pub fn with_vehicle(vehicle: SimulatedVehicle) -> (Arc<Self>, mpsc::Receiver<Notification>) {
        Self::build(Some(vehicle))
    }

    fn build(vehicle: Option<SimulatedVehicle>) -> (Arc<Self>, mpsc::Receiver<Notification>) {
        let (tx, rx) = notification_channel();
        let mut state = State {
            script: HashMap::new(),
            sent: Vec::new(),
            echo: true,
            spaces: true,
            headers: false,
            selected: Protocol::Auto,
            negotiated: None,
            vehicle,
            write_failure: None,
            closed: false,
            pending: None,
            interrupts: 0,
        };
        state.reset();
        (
            Arc::new(Self {
                state: Mutex::new(state),
                tx,
            }),
            rx,
        )
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `reply` for `command`. Replies for one command are used in
    /// order and the last one repeats.
    pub fn script(&self, command: &str, reply: Reply) {
        self.state()
            .script
            .entry(squeeze(command))
            .or_default()
            .push_back(reply);
    }

    /// Shorthand for scripting a text reply.
    pub fn reply(&self, command: &str, text: &str) {
        self.script(command, Reply::text(text));
    }

    /// Make `command` go unanswered.
    pub fn silent(&self, command: &str) {
        self.script(command, Reply::Silent);
    }

    /// Fail the next write with a transport error.
    pub fn fail_next_write(&self, message: &str) {
        self.state().write_failure = Some(message.to_string());
    }

    /// Commands written so far, terminator stripped.
    pub fn sent(&self) -> Vec<String> {
        self.state().sent.clone()
    }

    /// How many times `command` was written.
    pub fn sent_count(&self, command: &str) -> usize {
        let command = squeeze(command);
        self.state().sent.iter().filter(|c| **c == command).count()
    }

    /// How many bare `\r` interrupts were written.
    pub fn interrupts(&self) -> usize {
        self.state().interrupts
    }

    /// Push raw bytes as if the adapter sent them unprompted.
    pub async fn inject(&self, notification: Notification) {
        let _ = self.tx.send(notification).await;
    }

    fn respond(&self, command: &str) -> LinkResult<Option<(Duration, String)>> {
        let mut state = self.state();
        if state.closed {
            return Err(LinkError::Closed);
        }
        if let Some(message) = state.write_failure.take() {
            return Err(LinkError::Transport(message));
        }

        // Any byte aborts a reply in progress; the command itself is lost.
        let interrupted = state.pending.take().is_some_and(|task| {
            let running = !task.is_finished();
            task.abort();
            running
        });
        if command.is_empty() {
            state.interrupts += 1;
            // A real idle adapter would repeat its last command here.
            let text = if interrupted { "STOPPED\r\r>" } else { "\r>" };
            return Ok(Some((Duration::ZERO, text.to_string())));
        }
        state.sent.push(command.to_string());
        if interrupted {
            return Ok(Some((Duration::ZERO, "STOPPED\r\r>".to_string())));
        }

        let echo = state.echo.then(|| format!("{command}\r"));
        let builtin = if command.starts_with("AT") {
            state.at_command(command)
        } else {
            String::new()
        };

        let (delay, text) = match state.scripted(command) {
            Some(Reply::Silent) => return Ok(None),
            Some(Reply::Text(text)) => (Duration::ZERO, text),
            Some(Reply::Delayed { delay, text }) => (delay, text),
            None if command.starts_with("AT") => (Duration::ZERO, builtin),
            None => (Duration::ZERO, state.obd_request(command)),
        };

        let mut out = echo.unwrap_or_default();
        out.push_str(&text);
        out.push_str("\r\r>");
        Ok(Some((delay, out)))
    }
}

#[async_trait]
impl Transport for MockAdapter {
    async fn write(&self, bytes: &[u8]) -> LinkResult<()> {
        let command = squeeze(&String::from_utf8_lossy(bytes));
        let Some((delay, reply)) = self.respond(&command)? else {
            tracing::debug!(command = %command, "mock adapter stays silent");
            return Ok(());
        };

        if delay.is_zero() {
            let _ = self.tx.send(Ok(reply.into_bytes())).await;
        } else {
            let tx = self.tx.clone();
            let task = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(Ok(reply.into_bytes())).await;
            });
            self.state().pending = Some(task);
        }
        Ok(())
    }

    async fn close(&self) -> LinkResult<()> {
        self.state().closed = true;
        Ok(())
    }
}

/// Lay out `payload` the way an ELM327 prints it for `format`.
pub fn render(payload: &[u8], format: FrameFormat, spaces: bool) -> Vec<String> {
    let sep = if spaces { " " } else { "" };
    let hex = |bytes: &[u8]| {
        bytes
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(sep)
    };
    let line = |header: &str, body: String| {
        if header.is_empty() {
            body
        } else {
            format!("{header}{sep}{body}")
        }
    };

    let header = match format.headers {
        HeaderMode::Off => String::new(),
        HeaderMode::Can11 => "7E8".to_string(),
        HeaderMode::Can29 => hex(&[0x18, 0xDA, 0xF1, 0x10]),
        HeaderMode::Legacy => {
            return legacy_messages(payload)
                .into_iter()
                .map(|message| {
                    let mut bytes = vec![0x48, 0x6B, 0x10];
                    bytes.extend(message);
                    let checksum = bytes.iter().fold(0u8, |sum, b| sum.wrapping_add(*b));
                    bytes.push(checksum);
                    hex(&bytes)
                })
                .collect();
        }
    };

    if payload.len() <= ISOTP_CF_DATA {
        return match format.headers {
            HeaderMode::Off => vec![hex(payload)],
            _ => {
                let mut frame = vec![payload.len() as u8];
                frame.extend_from_slice(payload);
                vec![line(&header, hex(&frame))]
            }
        };
    }

    let (first, rest) = payload.split_at(ISOTP_FF_DATA);
    let mut lines = Vec::new();
    match format.headers {
        HeaderMode::Off => {
            lines.push(format!("{:03X}", payload.len()));
            lines.push(format!("0:{sep}{}", hex(first)));
        }
        _ => {
            let mut frame = vec![0x10 | ((payload.len() >> 8) as u8 & 0x0F), payload.len() as u8];
            frame.extend_from_slice(first);
            lines.push(line(&header, hex(&frame)));
        }
    }
    for (idx, chunk) in rest.chunks(ISOTP_CF_DATA).enumerate() {
        let seq = ((idx + 1) & 0x0F) as u8;
        match format.headers {
            HeaderMode::Off => lines.push(format!("{seq:X}:{sep}{}", hex(chunk))),
            _ => {
                let mut frame = vec![0x20 | seq];
                frame.extend_from_slice(chunk);
                lines.push(line(&header, hex(&frame)));
            }
        }
    }
    lines
}

/// Legacy buses carry long mode 09 answers as numbered four-byte lines
/// without the item count, zero padded at the front.
fn legacy_messages(payload: &[u8]) -> Vec<Vec<u8>> {
    let info_echo = MODE_VEHICLE_INFO + RESPONSE_SID_OFFSET;
    match payload {
        [echo, pid, _count, data @ ..] if *echo == info_echo && data.len() > LEGACY_INFO_CHUNK => {
            let pad = (LEGACY_INFO_CHUNK - data.len() % LEGACY_INFO_CHUNK) % LEGACY_INFO_CHUNK;
            let mut padded = vec![0u8; pad];
            padded.extend_from_slice(data);
            padded
                .chunks(LEGACY_INFO_CHUNK)
                .zip(1u8..)
                .map(|(chunk, seq)| {
                    let mut message = vec![*echo, *pid, seq];
                    message.extend_from_slice(chunk);
                    message
                })
                .collect()
        }
        _ => vec![payload.to_vec()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use elm_protocol::RawResponse;

    async fn roundtrip(
        mock: &MockAdapter,
        rx: &mut mpsc::Receiver<Notification>,
        command: &str,
    ) -> RawResponse {
        mock.write(format!("{command}\r").as_bytes()).await.unwrap();
        let bytes = rx.recv().await.unwrap().unwrap();
        RawResponse::from_reply(command, &String::from_utf8(bytes).unwrap())
    }

    #[tokio::test]
    async fn records_sent_commands() {
        let (mock, mut rx) = MockAdapter::new();
        roundtrip(&mock, &mut rx, "ATZ").await;
        roundtrip(&mock, &mut rx, "ate0").await;
        assert_eq!(mock.sent(), vec!["ATZ", "ATE0"]);
        assert_eq!(mock.sent_count("ATE0"), 1);
    }

    #[tokio::test]
    async fn echo_follows_ate_setting() {
        let (mock, mut rx) = MockAdapter::new();
        mock.write(b"ATI\r").await.unwrap();
        let echoed = rx.recv().await.unwrap().unwrap();
        assert!(echoed.starts_with(b"ATI\r"));

        roundtrip(&mock, &mut rx, "ATE0").await;
        mock.write(b"ATI\r").await.unwrap();
        let plain = rx.recv().await.unwrap().unwrap();
        assert_eq!(plain, b"ELM327 v1.5\r\r>");
    }

    #[tokio::test]
    async fn scripted_replies_are_fifo_then_sticky() {
        let (mock, mut rx) = MockAdapter::new();
        mock.reply("0100", "NO DATA");
        mock.reply("0100", "41 00 BE 1F A8 13");
        assert_eq!(roundtrip(&mock, &mut rx, "0100").await.lines, vec!["NO DATA"]);
        for _ in 0..2 {
            assert_eq!(
                roundtrip(&mock, &mut rx, "0100").await.lines,
                vec!["41 00 BE 1F A8 13"]
            );
        }
    }

    #[tokio::test]
    async fn unknown_at_command_is_question_mark() {
        let (mock, mut rx) = MockAdapter::new();
        assert_eq!(roundtrip(&mock, &mut rx, "ATXYZ").await.lines, vec!["?"]);
    }

    #[tokio::test]
    async fn vehicle_auto_search_and_dpn() {
        let (mock, mut rx) = MockAdapter::simulated_vehicle();
        roundtrip(&mock, &mut rx, "ATE0").await;
        roundtrip(&mock, &mut rx, "ATSP0").await;
        assert_eq!(roundtrip(&mock, &mut rx, "ATDPN").await.lines, vec!["A0"]);

        let search = roundtrip(&mock, &mut rx, "0100").await;
        assert_eq!(search.lines, vec!["SEARCHING...", "41 00 BE 1F A8 13"]);
        assert_eq!(roundtrip(&mock, &mut rx, "ATDPN").await.lines, vec!["A6"]);
    }

    #[tokio::test]
    async fn vehicle_rejects_wrong_protocol() {
        let (mock, mut rx) = MockAdapter::simulated_vehicle();
        roundtrip(&mock, &mut rx, "ATSP3").await;
        assert_eq!(
            roundtrip(&mock, &mut rx, "0100").await.lines,
            vec!["UNABLE TO CONNECT"]
        );
        roundtrip(&mock, &mut rx, "ATSP6").await;
        assert_eq!(roundtrip(&mock, &mut rx, "ATDPN").await.lines, vec!["6"]);
        assert_eq!(roundtrip(&mock, &mut rx, "0105").await.lines, vec!["41 05 7B"]);
    }

    #[tokio::test]
    async fn vehicle_headers_and_batches() {
        let (mock, mut rx) = MockAdapter::simulated_vehicle();
        roundtrip(&mock, &mut rx, "ATSP6").await;
        roundtrip(&mock, &mut rx, "ATH1").await;
        assert_eq!(
            roundtrip(&mock, &mut rx, "01050F").await.lines,
            vec!["7E8 05 41 05 7B 0F 46"]
        );
        assert_eq!(roundtrip(&mock, &mut rx, "01FF").await.lines, vec!["NO DATA"]);
    }

    #[test]
    fn render_multi_frame_both_ways() {
        let mut payload = vec![0x49, 0x02, 0x01];
        payload.extend_from_slice(b"1G1JC5444R7252367");

        let headered = render(
            &payload,
            FrameFormat {
                headers: HeaderMode::Can11,
            },
            true,
        );
        assert_eq!(
            headered,
            vec![
                "7E8 10 14 49 02 01 31 47 31",
                "7E8 21 4A 43 35 34 34 34 52",
                "7E8 22 37 32 35 32 33 36 37",
            ]
        );

        let listing = render(&payload, FrameFormat::default(), false);
        assert_eq!(
            listing,
            vec!["014", "0:490201314731", "1:4A433534343452", "2:37323532333637"]
        );
    }

    #[test]
    fn render_legacy_adds_checksum() {
        let lines = render(
            &[0x41, 0x0D, 0x3C],
            FrameFormat {
                headers: HeaderMode::Legacy,
            },
            true,
        );
        // 0x48 + 0x6B + 0x10 + 0x41 + 0x0D + 0x3C = 0x14D
        assert_eq!(lines, vec!["48 6B 10 41 0D 3C 4D"]);
    }

    #[test]
    fn render_legacy_vin_as_numbered_lines() {
        let mut payload = vec![0x49, 0x02, 0x01];
        payload.extend_from_slice(b"1G1JC5444R7252367");
        let lines = render(
            &payload,
            FrameFormat {
                headers: HeaderMode::Legacy,
            },
            false,
        );

        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("486B1049020100000031"));
        assert!(lines[4].starts_with("486B104902053233363"));
    }

    #[tokio::test(start_paused = true)]
    async fn bare_return_interrupts_a_delayed_reply() {
        let (mock, mut rx) = MockAdapter::new();
        mock.script("0100", Reply::delayed(Duration::from_secs(5), "41 00 BE 1F A8 13"));

        mock.write(b"0100\r").await.unwrap();
        mock.write(b"\r").await.unwrap();
        assert_eq!(rx.recv().await.unwrap().unwrap(), b"STOPPED\r\r>");

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());

        mock.write(b"\r").await.unwrap();
        assert_eq!(rx.recv().await.unwrap().unwrap(), b"\r>");
        assert_eq!(mock.interrupts(), 2);
        assert_eq!(mock.sent(), vec!["0100"]);
    }

    #[tokio::test]
    async fn write_failures_and_close() {
        let (mock, _rx) = MockAdapter::new();
        mock.fail_next_write("link down");
        assert!(matches!(
            mock.write(b"ATZ\r").await,
            Err(LinkError::Transport(m)) if m == "link down"
        ));
        mock.write(b"ATZ\r").await.unwrap();
        mock.close().await.unwrap();
        assert!(matches!(mock.write(b"ATZ\r").await, Err(LinkError::Closed)));
    }
}
