//! Adapter setup state machine.
//!
//! Runs once per connection: the fixed AT configuration sequence, then
//! protocol detection. Each step is an ordinary transaction on the shared
//! [`AdapterLink`]. The machine is the only writer of the connection state
//! it publishes.

use std::fmt;

use serde::Serialize;
use tokio::sync::watch;

use elm_protocol::catalog;
use elm_protocol::response::squeeze;
use elm_protocol::tokens::{self, ErrorToken};
use elm_protocol::{Decoder, FrameFormat, Protocol, RawResponse};

use crate::config::LinkConfig;
use crate::error::{LinkError, SetupFailure};
use crate::link::AdapterLink;

/// Adapter readiness as seen by callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    ConfiguringAdapter,
    DetectingProtocol,
    Ready(Protocol),
    Failed(SetupFailure),
}

impl ConnectionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionState::Ready(_))
    }

    pub fn protocol(&self) -> Option<Protocol> {
        match self {
            ConnectionState::Ready(protocol) => Some(*protocol),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::ConfiguringAdapter => f.write_str("configuring adapter"),
            ConnectionState::DetectingProtocol => f.write_str("detecting protocol"),
            ConnectionState::Ready(protocol) => write!(f, "ready ({protocol})"),
            ConnectionState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// One AT configuration command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStep {
    /// `ATD`: restore factory defaults before the reset.
    Defaults,
    /// `ATZ`: full reset, answers with the adapter identity.
    Reset,
    EchoOff,
    LinefeedsOff,
    SpacesOn,
    Headers(bool),
    AdaptiveTiming(bool),
    /// `ATSTFF`: longest adapter-side response wait.
    MaxTimeout,
    /// `ATRV`: battery voltage, informational.
    BatteryVoltage,
}

impl SetupStep {
    pub fn command(&self) -> &'static str {
        match self {
            SetupStep::Defaults => "ATD",
            SetupStep::Reset => "ATZ",
            SetupStep::EchoOff => "ATE0",
            SetupStep::LinefeedsOff => "ATL0",
            SetupStep::SpacesOn => "ATS1",
            SetupStep::Headers(true) => "ATH1",
            SetupStep::Headers(false) => "ATH0",
            SetupStep::AdaptiveTiming(true) => "ATAT1",
            SetupStep::AdaptiveTiming(false) => "ATAT0",
            SetupStep::MaxTimeout => "ATSTFF",
            SetupStep::BatteryVoltage => "ATRV",
        }
    }

    /// Whether `reply` acknowledges the step.
    fn accepts(&self, reply: &RawResponse) -> bool {
        let rejected = reply.is_empty()
            || reply
                .lines
                .iter()
                .any(|l| ErrorToken::classify(l).is_some());
        match self {
            SetupStep::Reset | SetupStep::BatteryVoltage => !rejected,
            _ => !rejected && reply.lines.iter().any(|l| squeeze(l) == "OK"),
        }
    }
}

impl fmt::Display for SetupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command())
    }
}

/// The configuration sequence for `config`, in execution order.
pub fn configuration_steps(config: &LinkConfig) -> Vec<SetupStep> {
    vec![
        SetupStep::Defaults,
        SetupStep::Reset,
        SetupStep::EchoOff,
        SetupStep::LinefeedsOff,
        SetupStep::SpacesOn,
        SetupStep::Headers(config.headers),
        SetupStep::AdaptiveTiming(config.adaptive_timing),
        SetupStep::MaxTimeout,
        SetupStep::BatteryVoltage,
    ]
}

/// Where the machine is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupState {
    Idle,
    /// `step` indexes the configuration sequence; during detection it is
    /// one past the end and `candidate` is the protocol being tried.
    Running { step: usize, candidate: Protocol },
    Ready(Protocol),
    Failed(SetupFailure),
}

/// What a successful setup learned about the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdapterInfo {
    pub protocol: Protocol,
    /// `ATZ` banner, e.g. `ELM327 v1.5`.
    pub identity: Option<String>,
    /// `ATRV` reading, e.g. `12.6V`.
    pub voltage: Option<String>,
}

/// Drives one setup attempt over a link.
pub struct SetupMachine<'a> {
    link: &'a AdapterLink,
    config: &'a LinkConfig,
    status: &'a watch::Sender<ConnectionState>,
    state: SetupState,
}

impl<'a> SetupMachine<'a> {
    pub fn new(
        link: &'a AdapterLink,
        config: &'a LinkConfig,
        status: &'a watch::Sender<ConnectionState>,
    ) -> Self {
        Self {
            link,
            config,
            status,
            state: SetupState::Idle,
        }
    }

    pub fn state(&self) -> &SetupState {
        &self.state
    }

    /// Run configuration and detection to `Ready` or `Failed`. The machine
    /// can be run again after a failure.
    pub async fn run(&mut self) -> Result<AdapterInfo, SetupFailure> {
        match self.drive().await {
            Ok(info) => {
                tracing::info!(
                    protocol = %info.protocol,
                    identity = info.identity.as_deref().unwrap_or("unknown"),
                    voltage = info.voltage.as_deref().unwrap_or("unknown"),
                    "adapter ready"
                );
                self.state = SetupState::Ready(info.protocol);
                self.publish(ConnectionState::Ready(info.protocol));
                Ok(info)
            }
            Err(reason) => {
                tracing::warn!(reason = %reason, "adapter setup failed");
                self.state = SetupState::Failed(reason.clone());
                self.publish(ConnectionState::Failed(reason.clone()));
                Err(reason)
            }
        }
    }

    /// Return to `Idle` once the transport is gone and publish
    /// `Disconnected`.
    pub fn disconnect(&mut self) {
        self.state = SetupState::Idle;
        self.publish(ConnectionState::Disconnected);
    }

    async fn drive(&mut self) -> Result<AdapterInfo, SetupFailure> {
        self.publish(ConnectionState::ConfiguringAdapter);
        let steps = configuration_steps(self.config);
        let mut identity = None;
        let mut voltage = None;

        for (index, step) in steps.iter().enumerate() {
            self.state = SetupState::Running {
                step: index,
                candidate: self.config.protocol,
            };
            let reply = self.run_step(*step).await?;
            match step {
                SetupStep::Reset => identity = reply.first_line().map(str::to_string),
                SetupStep::BatteryVoltage => voltage = reply.first_line().map(str::to_string),
                _ => {}
            }
        }

        self.publish(ConnectionState::DetectingProtocol);
        let protocol = self.detect(steps.len()).await?;
        Ok(AdapterInfo {
            protocol,
            identity,
            voltage,
        })
    }

    /// Send `step` until acknowledged, at most `attempts` times.
    async fn run_step(&self, step: SetupStep) -> Result<RawResponse, SetupFailure> {
        let attempts = self.config.attempts();
        let mut failure = SetupFailure::StepTimeout {
            step: step.to_string(),
        };

        for attempt in 1..=attempts {
            match self
                .link
                .send_command(step.command(), self.config.setup_timeout())
                .await
            {
                Ok(reply) if step.accepts(&reply) => {
                    tracing::debug!(step = %step, attempt, reply = %reply.text(), "setup step done");
                    return Ok(reply);
                }
                Ok(reply) => {
                    tracing::warn!(step = %step, attempt, reply = %reply.text(), "setup step rejected");
                    failure = SetupFailure::StepRejected {
                        step: step.to_string(),
                        reply: reply.text(),
                    };
                }
                Err(LinkError::Timeout { timeout_ms }) => {
                    tracing::warn!(step = %step, attempt, timeout_ms, "setup step timed out");
                    failure = SetupFailure::StepTimeout {
                        step: step.to_string(),
                    };
                }
                Err(e) => return Err(transport_failure(e)),
            }
        }
        Err(failure)
    }

    async fn detect(&mut self, step: usize) -> Result<Protocol, SetupFailure> {
        let fallback_start = match self.config.protocol {
            Protocol::Auto => {
                if let Some(protocol) = self.auto_detect(step).await? {
                    return Ok(protocol);
                }
                Protocol::FALLBACK_START
            }
            Protocol::None => Protocol::FALLBACK_START,
            configured => {
                self.state = SetupState::Running {
                    step,
                    candidate: configured,
                };
                if self.try_protocol(configured).await? {
                    return Ok(configured);
                }
                configured.next()
            }
        };

        for candidate in Protocol::fallback_from(fallback_start) {
            self.state = SetupState::Running { step, candidate };
            if self.try_protocol(candidate).await? {
                return Ok(candidate);
            }
        }
        Err(SetupFailure::NoProtocol)
    }

    /// `ATSP0`, probe, then ask the adapter what it settled on. The probe
    /// reply is judged in the negotiated protocol's line format.
    async fn auto_detect(&mut self, step: usize) -> Result<Option<Protocol>, SetupFailure> {
        self.state = SetupState::Running {
            step,
            candidate: Protocol::Auto,
        };
        if !self.select(Protocol::Auto).await? {
            return Ok(None);
        }
        let Some(reply) = self.probe_reply().await? else {
            return Ok(None);
        };

        let protocol = match self
            .link
            .send_command("ATDPN", self.config.setup_timeout())
            .await
        {
            Ok(dpn) => dpn.first_line().and_then(Protocol::from_dpn),
            Err(LinkError::Timeout { .. }) => None,
            Err(e) => return Err(transport_failure(e)),
        };

        match protocol {
            Some(p) if !matches!(p, Protocol::Auto | Protocol::None) => {
                let answered = probe_answered(&reply, FrameFormat::new(p, self.config.headers));
                tracing::info!(protocol = %p, answered, "adapter negotiated protocol");
                Ok(answered.then_some(p))
            }
            other => {
                tracing::warn!(dpn = ?other, reply = %reply.text(), "automatic search found no protocol");
                Ok(None)
            }
        }
    }

    /// Select `protocol` and check a vehicle answers on it.
    async fn try_protocol(&mut self, protocol: Protocol) -> Result<bool, SetupFailure> {
        tracing::info!(protocol = %protocol, "trying protocol");
        if !self.select(protocol).await? {
            return Ok(false);
        }
        let Some(reply) = self.probe_reply().await? else {
            return Ok(false);
        };
        let answered = probe_answered(&reply, FrameFormat::new(protocol, self.config.headers));
        tracing::debug!(protocol = %protocol, answered, reply = %reply.text(), "probe");
        Ok(answered)
    }

    async fn select(&self, protocol: Protocol) -> Result<bool, SetupFailure> {
        let command = protocol.select_command();
        match self
            .link
            .send_command(&command, self.config.setup_timeout())
            .await
        {
            Ok(reply) if reply.lines.iter().any(|l| squeeze(l) == "OK") => Ok(true),
            Ok(reply) => {
                tracing::warn!(command = %command, reply = %reply.text(), "protocol select rejected");
                Ok(false)
            }
            Err(LinkError::Timeout { .. }) => Ok(false),
            Err(e) => Err(transport_failure(e)),
        }
    }

    /// Send the probe command. A timeout is an unanswered probe.
    async fn probe_reply(&self) -> Result<Option<RawResponse>, SetupFailure> {
        match self
            .link
            .send_command(&self.config.probe_command, self.config.setup_timeout())
            .await
        {
            Ok(reply) => Ok(Some(reply)),
            Err(LinkError::Timeout { timeout_ms }) => {
                tracing::debug!(timeout_ms, "probe timed out");
                Ok(None)
            }
            Err(e) => Err(transport_failure(e)),
        }
    }

    fn publish(&self, state: ConnectionState) {
        tracing::info!(state = %state, "connection state");
        self.status.send_replace(state);
    }
}

/// A probe counts when the vehicle sent data: a catalog command must decode,
/// anything else must produce at least one hex line.
fn probe_answered(reply: &RawResponse, format: FrameFormat) -> bool {
    if let Some(command) = catalog::parse(&reply.command) {
        return Decoder::new(format)
            .decode_detailed(reply, &[command])
            .get(&command.key())
            .is_some_and(|result| result.is_ok());
    }
    reply.lines.iter().any(|line| {
        ErrorToken::classify(line).is_none()
            && !tokens::is_status_line(line)
            && elm_protocol::frame::parse_hex(&squeeze(line)).is_some()
    })
}

fn transport_failure(e: LinkError) -> SetupFailure {
    SetupFailure::Transport {
        message: e.to_string(),
    }
}
