//! ELM327 edge agent: brings an OBD-II adapter up and streams live data as
//! JSON lines on stdout.

use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use elm_agent::config::AgentConfig;
use elm_agent::runner;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "elm-agent starting");

    // ── Load config ─────────────────────────────────────────────
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/elm-agent/agent.toml".to_string());

    let config = AgentConfig::from_file(&config_path)?;
    tracing::info!(
        path = %config_path,
        adapter = ?config.adapter,
        protocol = %config.link.protocol,
        commands = config.poll.commands.len(),
        "config loaded"
    );

    // ── Run until Ctrl-C ────────────────────────────────────────
    let (stop, shutdown) = watch::channel(false);
    let agent = runner::run(&config, shutdown, std::io::stdout());
    tokio::pin!(agent);

    let cycles = tokio::select! {
        result = &mut agent => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            stop.send_replace(true);
            // Let the transaction in flight finish, then close the adapter.
            agent.await?
        }
    };

    tracing::info!(cycles, "elm-agent stopped");
    Ok(())
}
