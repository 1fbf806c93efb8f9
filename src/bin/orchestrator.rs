use log::{error, info};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use ble_proximity_relay::orchestrator::{load_nodes, run_session};

const DEFAULT_NODES_FILE: &str = "nodes.json";
const DEFAULT_RUN_SECS: u64 = 180;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_secs()
        .init();

    dotenv::dotenv().ok();

    let nodes_file = env::var("ORCHESTRATOR_NODES")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_NODES_FILE));
    let run_secs = match env::var("ORCHESTRATOR_RUN_SECS") {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|e| format!("invalid ORCHESTRATOR_RUN_SECS '{}': {}", raw, e))?,
        Err(_) => DEFAULT_RUN_SECS,
    };

    let nodes = match load_nodes(&nodes_file) {
        Ok(nodes) => nodes,
        Err(e) => {
            error!("Failed to load {}: {}", nodes_file.display(), e);
            return Err(e.into());
        }
    };
    info!("Loaded {} nodes from {}", nodes.len(), nodes_file.display());

    run_session(&nodes, Duration::from_secs(run_secs), async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await
        }
    })
    .await;

    Ok(())
}
