use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use starclash_platformer::config::PlatformerConfig;
use starclash_sim::config::SimConfig;
use starclash_sim::session::{self, Session, SessionCommand};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = SimConfig::load();
    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {e}");
        std::process::exit(1);
    }
    let platformer = PlatformerConfig::load();

    tracing::info!(peers = config.peers, realtime = config.realtime, "StarClash sim starting");
    let session = match Session::new(config, platformer) {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(error = %e, "Failed to create session");
            std::process::exit(1);
        },
    };

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cmd_tx.send(SessionCommand::Stop);
        }
    });

    match session::run(session, cmd_rx).await {
        Ok(summary) => match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{json}"),
            Err(e) => tracing::error!(error = %e, "Failed to encode summary"),
        },
        Err(e) => {
            tracing::error!(error = %e, "Session failed");
            std::process::exit(1);
        },
    }
}
