//! Connect, set up, poll, print.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::{mpsc, watch};

use elm_link::{MockAdapter, Notification, ObdSession, Poller, TcpTransport, Transport};

use crate::config::{AdapterConfig, AgentConfig};

/// Open the configured transport.
pub async fn connect(
    adapter: &AdapterConfig,
) -> anyhow::Result<(Arc<dyn Transport>, mpsc::Receiver<Notification>)> {
    match adapter {
        AdapterConfig::Tcp { address } => {
            let (tcp, rx) = TcpTransport::connect(address)
                .await
                .with_context(|| format!("connecting to adapter at {address}"))?;
            let transport: Arc<dyn Transport> = Arc::new(tcp);
            Ok((transport, rx))
        }
        AdapterConfig::Simulated => {
            tracing::info!("using simulated vehicle");
            let (mock, rx) = MockAdapter::simulated_vehicle();
            let transport: Arc<dyn Transport> = mock;
            Ok((transport, rx))
        }
    }
}

/// Run one full agent session, writing each poll cycle to `out` as a JSON
/// line. Returns the number of cycles written.
pub async fn run<W: Write + Send>(
    config: &AgentConfig,
    shutdown: watch::Receiver<bool>,
    mut out: W,
) -> anyhow::Result<u64> {
    let poller = Poller::from_requests(
        &config.poll.commands,
        Duration::from_millis(config.poll.interval_ms),
    )?
    .with_max_cycles(config.poll.max_cycles);

    let (transport, notifications) = connect(&config.adapter).await?;
    let mut session = ObdSession::new(transport, notifications, config.link.clone());

    let adapter = session.setup().await.context("adapter setup")?.clone();
    tracing::info!(
        session_id = %session.id(),
        protocol = %adapter.protocol,
        voltage = adapter.voltage.as_deref().unwrap_or("unknown"),
        "adapter ready"
    );

    if config.poll.read_vin {
        match session.read_vin().await {
            Ok(Some(vin)) => tracing::info!(vin = %vin, "vehicle identified"),
            Ok(None) => tracing::info!("vehicle did not report a VIN"),
            Err(e) => tracing::warn!(error = %e, "VIN read failed"),
        }
    }

    let (tx, mut rx) = mpsc::channel(16);
    let polling = poller.run(&session, tx, shutdown);
    let printing = async {
        let mut written = 0u64;
        while let Some(cycle) = rx.recv().await {
            serde_json::to_writer(&mut out, &cycle)?;
            writeln!(out)?;
            out.flush()?;
            written += 1;
        }
        anyhow::Ok(written)
    };
    let (polled, written) = tokio::join!(polling, printing);

    if let Err(e) = session.close().await {
        tracing::warn!(error = %e, "closing adapter failed");
    }
    polled?;
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PollConfig;

    fn simulated(max_cycles: u64) -> AgentConfig {
        AgentConfig {
            adapter: AdapterConfig::Simulated,
            link: Default::default(),
            poll: PollConfig {
                interval_ms: 100,
                max_cycles: Some(max_cycles),
                ..PollConfig::default()
            },
        }
    }

    #[tokio::test(start_paused = true)]
    async fn simulated_run_prints_json_lines() {
        let (_stop, shutdown) = watch::channel(false);
        let mut out = Vec::new();

        let written = run(&simulated(3), shutdown, &mut out).await.unwrap();
        assert_eq!(written, 3);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["cycle"], 1);
        assert_eq!(first["readings"].as_array().map(Vec::len), Some(6));
        assert_eq!(first["readings"][2]["command"], "0105");
        assert_eq!(first["readings"][2]["measurement"]["value"], 83.0);
    }

    #[tokio::test]
    async fn shutdown_stops_before_polling() {
        let (_stop, shutdown) = watch::channel(true);
        let written = run(&simulated(100), shutdown, Vec::new()).await.unwrap();
        assert_eq!(written, 0);
    }

    #[tokio::test]
    async fn unknown_command_fails_before_connecting() {
        let mut config = simulated(1);
        config.poll.commands = vec!["01ZZ".into()];
        let (_stop, shutdown) = watch::channel(false);
        assert!(run(&config, shutdown, Vec::new()).await.is_err());
    }
}
