use log::{error, info};
use std::sync::Arc;

use ble_proximity_relay::align::wait_until_next_minute;
use ble_proximity_relay::{
    run_poll_mode, run_queue_mode, BluerScanner, CaptureMode, ConfigError, NodeConfig,
    SftpTransport,
};

/// Resolves once Ctrl+C is received, or never if the signal cannot be watched
async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Program terminated by user. Shutting down gracefully."),
        Err(e) => {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_secs()
        .init();

    // Load configuration
    let config = match NodeConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    tokio::fs::create_dir_all(&config.save_dir).await?;

    let scanner = BluerScanner::new(&config.service_uuids)?;

    if config.align_to_minute {
        wait_until_next_minute(&config.clock).await;
    }

    info!(
        "Starting capture for sensor {} in {:?} mode",
        config.sensor_id, config.mode
    );

    let result = match config.mode {
        CaptureMode::QueueDrain => {
            let collector = config
                .collector
                .clone()
                .ok_or(ConfigError::Missing("COLLECTOR_URL"))?;
            let transport = Arc::new(SftpTransport::new(collector, config.relay_timeout));
            run_queue_mode(&config, &scanner, transport, ctrl_c()).await
        }
        CaptureMode::PollAppend => run_poll_mode(&config, &scanner, ctrl_c()).await,
    };

    match result {
        Ok(()) => {
            info!("Program completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Fatal error: {}", e);
            Err(e.into())
        }
    }
}
