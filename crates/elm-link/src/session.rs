//! Per-connection context.
//!
//! An [`ObdSession`] is created when a transport is up and owns everything
//! that lives as long as the connection: the link, its settings, the
//! published connection state and what setup learned about the adapter.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use elm_protocol::catalog::{self, Command, CommandKey};
use elm_protocol::types::{MAX_BATCH_PIDS, MODE_CURRENT_DATA, MODE_VEHICLE_INFO};
use elm_protocol::{
    DecodeError, DecodeResult, Decoder, FrameFormat, Measurement, Protocol, RawResponse,
};

use crate::config::LinkConfig;
use crate::error::{LinkError, LinkResult};
use crate::link::AdapterLink;
use crate::setup::{AdapterInfo, ConnectionState, SetupMachine};
use crate::transport::{Notification, Transport};

/// One connection to one adapter.
pub struct ObdSession {
    id: Uuid,
    started_at: DateTime<Utc>,
    link: AdapterLink,
    config: LinkConfig,
    status: watch::Sender<ConnectionState>,
    adapter: Option<AdapterInfo>,
}

impl ObdSession {
    /// Wrap a connected transport. The session starts in `Connecting`
    /// until [`setup`](Self::setup) runs.
    pub fn new(
        transport: Arc<dyn Transport>,
        notifications: mpsc::Receiver<Notification>,
        config: LinkConfig,
    ) -> Self {
        let id = Uuid::now_v7();
        let (status, _) = watch::channel(ConnectionState::Connecting);
        tracing::info!(session_id = %id, protocol = %config.protocol, "session opened");
        Self {
            id,
            started_at: Utc::now(),
            link: AdapterLink::new(transport, notifications),
            config,
            status,
            adapter: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.status.borrow().clone()
    }

    /// Watch connection state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.status.subscribe()
    }

    /// Adapter details from the last successful setup.
    pub fn adapter(&self) -> Option<&AdapterInfo> {
        self.adapter.as_ref()
    }

    /// The underlying transaction layer.
    pub fn link(&self) -> &AdapterLink {
        &self.link
    }

    /// Configure the adapter and detect the protocol. Takes `&mut self` so
    /// nothing else can use the link while setup runs. May be called again
    /// after a failure.
    pub async fn setup(&mut self) -> LinkResult<&AdapterInfo> {
        self.adapter = None;
        let mut machine = SetupMachine::new(&self.link, &self.config, &self.status);
        let info = machine.run().await?;
        tracing::info!(session_id = %self.id, protocol = %info.protocol, "session ready");
        Ok(self.adapter.insert(info))
    }

    fn protocol(&self) -> LinkResult<Protocol> {
        self.status.borrow().protocol().ok_or(LinkError::NotReady)
    }

    /// Decoder for the negotiated protocol.
    pub fn decoder(&self) -> LinkResult<Decoder> {
        Ok(Decoder::new(FrameFormat::new(self.protocol()?, self.config.headers)))
    }

    /// Send a raw command with the command timeout. Only allowed once
    /// ready.
    pub async fn send_raw(&self, command: &str) -> LinkResult<RawResponse> {
        self.protocol()?;
        self.link
            .send_command(command, self.config.command_timeout())
            .await
    }

    /// Transactions needed for `commands`, in the order they are sent.
    ///
    /// Mode 01 commands are batched up to six per transaction when the
    /// protocol allows it; everything else goes one command per
    /// transaction. Duplicates are dropped.
    pub fn plan<'c>(&self, commands: &[&'c Command]) -> LinkResult<Vec<Vec<&'c Command>>> {
        Ok(split_batches(commands, self.protocol()?))
    }

    /// Run one transaction for `batch` and decode it.
    ///
    /// A timeout only costs this batch: every command in it gets
    /// [`DecodeError::Timeout`]. Transport errors, a closed link and an
    /// unbatchable command list are returned as errors.
    pub async fn request_batch(
        &self,
        batch: &[&Command],
    ) -> LinkResult<HashMap<CommandKey, DecodeResult<Measurement>>> {
        let decoder = self.decoder()?;
        let request = match batch {
            [single] => single.request(),
            _ => catalog::batch_request(batch).ok_or_else(|| {
                LinkError::InvalidCommand(format!("cannot batch {} commands", batch.len()))
            })?,
        };

        match self
            .link
            .send_command(&request, self.config.command_timeout())
            .await
        {
            Ok(raw) => Ok(decoder.decode_detailed(&raw, batch)),
            Err(LinkError::Timeout { timeout_ms }) => {
                tracing::warn!(session_id = %self.id, request = %request, timeout_ms, "request timed out");
                Ok(batch
                    .iter()
                    .map(|c| (c.key(), Err(DecodeError::Timeout { timeout_ms })))
                    .collect())
            }
            Err(e) => Err(e),
        }
    }

    /// Request `commands` and decode the replies, keeping the reason for
    /// every missing result. See [`plan`](Self::plan) for how they are
    /// split into transactions. A timed-out transaction leaves the others'
    /// results intact; any other link error aborts the request.
    pub async fn request_detailed(
        &self,
        commands: &[&Command],
    ) -> LinkResult<HashMap<CommandKey, DecodeResult<Measurement>>> {
        let mut results = HashMap::with_capacity(commands.len());
        for batch in self.plan(commands)? {
            results.extend(self.request_batch(&batch).await?);
        }
        Ok(results)
    }

    /// Request `commands`; failures to decode become
    /// [`Measurement::NoResult`].
    pub async fn request(
        &self,
        commands: &[&Command],
    ) -> LinkResult<HashMap<CommandKey, Measurement>> {
        let detailed = self.request_detailed(commands).await?;
        Ok(detailed
            .into_iter()
            .map(|(key, result)| {
                let measurement = result.unwrap_or_else(|error| {
                    tracing::warn!(session_id = %self.id, command = %key, error = %error, "no result");
                    Measurement::NoResult
                });
                (key, measurement)
            })
            .collect())
    }

    /// Read the vehicle identification number (`0902`).
    pub async fn read_vin(&self) -> LinkResult<Option<String>> {
        let command = catalog::lookup(MODE_VEHICLE_INFO, 0x02).ok_or_else(|| {
            LinkError::InvalidCommand("VIN request missing from catalog".into())
        })?;
        let mut results = self.request(&[command]).await?;
        Ok(results
            .remove(&command.key())
            .and_then(|m| m.as_text().map(str::to_string)))
    }

    /// Close the transport. The session ends `Disconnected`.
    pub async fn close(&mut self) -> LinkResult<()> {
        let result = self.link.close().await;
        self.adapter = None;
        SetupMachine::new(&self.link, &self.config, &self.status).disconnect();
        tracing::info!(session_id = %self.id, "session closed");
        result
    }
}

/// Split `commands` into transactions, dropping duplicates.
fn split_batches<'c>(commands: &[&'c Command], protocol: Protocol) -> Vec<Vec<&'c Command>> {
    let mut seen = HashSet::new();
    let unique: Vec<&Command> = commands
        .iter()
        .copied()
        .filter(|c| seen.insert(c.key()))
        .collect();

    let batchable = |c: &&Command| {
        protocol.supports_batching() && c.mode == MODE_CURRENT_DATA && c.reply_len.is_fixed()
    };
    let (batched, single): (Vec<&Command>, Vec<&Command>) =
        unique.into_iter().partition(batchable);

    batched
        .chunks(MAX_BATCH_PIDS)
        .map(|chunk| chunk.to_vec())
        .chain(single.into_iter().map(|c| vec![c]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockAdapter, Reply, SimulatedVehicle};
    use elm_protocol::Unit;

    fn cmd(request: &str) -> &'static Command {
        catalog::parse(request).unwrap()
    }

    async fn ready_session() -> (ObdSession, Arc<MockAdapter>) {
        let (mock, rx) = MockAdapter::simulated_vehicle();
        let mut session = ObdSession::new(mock.clone(), rx, LinkConfig::default());
        session.setup().await.unwrap();
        (session, mock)
    }

    #[tokio::test]
    async fn requests_are_rejected_until_ready() {
        let (mock, rx) = MockAdapter::simulated_vehicle();
        let session = ObdSession::new(mock.clone(), rx, LinkConfig::default());

        assert_eq!(session.state(), ConnectionState::Connecting);
        assert!(matches!(
            session.request(&[cmd("010C")]).await,
            Err(LinkError::NotReady)
        ));
        assert!(matches!(session.send_raw("ATRV").await, Err(LinkError::NotReady)));
        assert!(mock.sent().is_empty());
    }

    #[tokio::test]
    async fn setup_then_batched_request() {
        let (session, mock) = ready_session().await;
        assert!(session.state().is_ready());
        assert_eq!(session.adapter().map(|a| a.protocol), Some(Protocol::Iso15765_4Can11bit500));

        let results = session
            .request(&[cmd("0105"), cmd("010F"), cmd("0142")])
            .await
            .unwrap();
        assert_eq!(results[&cmd("0105").key()], Measurement::value(83.0, Unit::Celsius));
        assert_eq!(results[&cmd("010F").key()], Measurement::value(30.0, Unit::Celsius));
        assert_eq!(results[&cmd("0142").key()].as_f64(), Some(14.0));
        assert_eq!(mock.sent().last().map(String::as_str), Some("01050F42"));
    }

    #[tokio::test]
    async fn missing_pid_is_no_result_not_error() {
        let (session, _mock) = ready_session().await;
        let detailed = session
            .request_detailed(&[cmd("0105"), cmd("0123")])
            .await
            .unwrap();
        assert!(detailed[&cmd("0105").key()].is_ok());
        assert!(detailed[&cmd("0123").key()].is_err());
    }

    #[tokio::test]
    async fn read_vin_over_multi_frame() {
        let (session, _mock) = ready_session().await;
        assert_eq!(
            session.read_vin().await.unwrap().as_deref(),
            Some("1G1JC5444R7252367")
        );
    }

    #[tokio::test]
    async fn read_vin_with_headers_off() {
        let (mock, rx) = MockAdapter::simulated_vehicle();
        let config = LinkConfig {
            headers: false,
            ..LinkConfig::default()
        };
        let mut session = ObdSession::new(mock.clone(), rx, config);
        session.setup().await.unwrap();
        assert_eq!(
            session.read_vin().await.unwrap().as_deref(),
            Some("1G1JC5444R7252367")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_batch_is_a_per_command_result() {
        let (session, mock) = ready_session().await;
        mock.script("010C", Reply::Silent);
        let detailed = session.request_detailed(&[cmd("010C")]).await.unwrap();
        assert_eq!(
            detailed[&cmd("010C").key()],
            Err(DecodeError::Timeout { timeout_ms: 2000 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_keeps_other_transactions_results() {
        let vehicle = SimulatedVehicle::new(Protocol::J1850Pwm)
            .with_pid(0x01, 0x00, &[0xBE, 0x1F, 0xA8, 0x13])
            .with_pid(0x01, 0x05, &[0x7B])
            .with_pid(0x01, 0x0F, &[0x46])
            .with_pid(0x01, 0x11, &[0x33]);
        let (mock, rx) = MockAdapter::with_vehicle(vehicle);
        let mut session = ObdSession::new(mock.clone(), rx, LinkConfig::default());
        session.setup().await.unwrap();
        mock.silent("0111");

        let results = session
            .request(&[cmd("0105"), cmd("010F"), cmd("0111")])
            .await
            .unwrap();

        assert_eq!(results[&cmd("0105").key()], Measurement::value(83.0, Unit::Celsius));
        assert_eq!(results[&cmd("010F").key()], Measurement::value(30.0, Unit::Celsius));
        assert!(results[&cmd("0111").key()].is_no_result());
        assert_eq!(mock.sent_count("0111"), 1);
    }

    #[tokio::test]
    async fn transport_error_aborts_request() {
        let (session, mock) = ready_session().await;
        mock.fail_next_write("gone");
        assert!(matches!(
            session.request(&[cmd("010C")]).await,
            Err(LinkError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn close_disconnects() {
        let (mut session, _mock) = ready_session().await;
        let mut watcher = session.subscribe();
        session.close().await.unwrap();

        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(watcher.has_changed().unwrap());
        assert_eq!(*watcher.borrow_and_update(), ConnectionState::Disconnected);
        assert!(session.adapter().is_none());
        assert!(matches!(session.request(&[cmd("010C")]).await, Err(LinkError::NotReady)));
    }

    #[tokio::test]
    async fn session_ids_are_unique() {
        let (a_mock, a_rx) = MockAdapter::new();
        let (b_mock, b_rx) = MockAdapter::new();
        let a = ObdSession::new(a_mock, a_rx, LinkConfig::default());
        let b = ObdSession::new(b_mock, b_rx, LinkConfig::default());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn plan_batches_mode_01_in_sixes() {
        let requests = [
            "0104", "0105", "010B", "010C", "010D", "010F", "0111", "0902", "0105",
        ];
        let commands: Vec<_> = requests.iter().map(|r| cmd(r)).collect();

        let batches = split_batches(&commands, Protocol::Iso15765_4Can11bit500);
        let sizes: Vec<_> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![6, 1, 1]);
        assert_eq!(batches[2][0].request(), "0902");

        let legacy = split_batches(&commands, Protocol::J1850Pwm);
        assert_eq!(legacy.len(), 8);
    }
}
