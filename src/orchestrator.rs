//! Remote lifecycle control of capture nodes over SSH.
//!
//! Starts the capture process on every node, lets it run, then stops it by
//! matching its command line. Nothing beyond the remote command's immediate
//! exit status is checked.

use std::io::Read;
use std::path::Path;
use std::time::Duration;

use log::{error, info, warn};
use serde::Deserialize;
use thiserror::Error;

use crate::relay::{open_session, RelayError};

const DEFAULT_SSH_PORT: u16 = 22;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Failed to read node list: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid node list: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Session(#[from] RelayError),
    #[error("Remote command failed: {0}")]
    Exec(String),
    #[error("Worker failed: {0}")]
    Worker(String),
}

/// One capture node as listed in the node file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Shell command starting the capture process
    pub command: String,
    /// Pattern `pkill -f` uses to find the process again
    pub process_pattern: String,
}

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

impl NodeSpec {
    pub fn stop_command(&self) -> String {
        format!("pkill -f {}", shell_quote(&self.process_pattern))
    }
}

/// Quote for a POSIX shell
fn shell_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', "'\\''"))
}

pub fn parse_nodes(json: &str) -> Result<Vec<NodeSpec>, OrchestratorError> {
    Ok(serde_json::from_str(json)?)
}

pub fn load_nodes(path: &Path) -> Result<Vec<NodeSpec>, OrchestratorError> {
    parse_nodes(&std::fs::read_to_string(path)?)
}

/// Run `command` on `node`, optionally waiting for its exit status
fn exec(node: &NodeSpec, command: &str, wait: bool) -> Result<Option<i32>, OrchestratorError> {
    let session = open_session(
        &node.host,
        node.port,
        &node.username,
        &node.password,
        CONNECT_TIMEOUT,
    )?;
    let mut channel = session
        .channel_session()
        .map_err(|e| OrchestratorError::Exec(e.to_string()))?;
    channel
        .exec(command)
        .map_err(|e| OrchestratorError::Exec(e.to_string()))?;

    if !wait {
        return Ok(None);
    }

    let mut output = String::new();
    channel.read_to_string(&mut output)?;
    channel
        .wait_close()
        .map_err(|e| OrchestratorError::Exec(e.to_string()))?;
    let status = channel
        .exit_status()
        .map_err(|e| OrchestratorError::Exec(e.to_string()))?;
    Ok(Some(status))
}

/// Launch the capture process on `node` without waiting for it to finish
pub fn start(node: &NodeSpec) -> Result<(), OrchestratorError> {
    exec(node, &node.command, false)?;
    Ok(())
}

/// Terminate the capture process on `node`, returning the remote exit status
pub fn stop(node: &NodeSpec) -> Result<i32, OrchestratorError> {
    Ok(exec(node, &node.stop_command(), true)?.unwrap_or_default())
}

async fn start_node(node: NodeSpec) {
    let name = node.name.clone();
    match tokio::task::spawn_blocking(move || start(&node)).await {
        Ok(Ok(())) => info!("Started capture on {}", name),
        Ok(Err(e)) => error!("Failed to start capture on {}: {}", name, e),
        Err(e) => error!("Failed to start capture on {}: {}", name, e),
    }
}

async fn stop_node(node: NodeSpec) {
    let name = node.name.clone();
    match tokio::task::spawn_blocking(move || stop(&node)).await {
        Ok(Ok(0)) => info!("Stopped capture on {}", name),
        Ok(Ok(status)) => warn!("Stop command on {} exited with status {}", name, status),
        Ok(Err(e)) => error!("Failed to stop capture on {}: {}", name, e),
        Err(e) => error!("Failed to stop capture on {}: {}", name, e),
    }
}

/// Start every node, wait for `run_for` or `interrupt`, then stop every node
///
/// A failing node is logged and does not affect the others.
pub async fn run_session<F>(nodes: &[NodeSpec], run_for: Duration, interrupt: F)
where
    F: std::future::Future<Output = ()>,
{
    for node in nodes {
        start_node(node.clone()).await;
    }

    info!("Capture running for {} seconds...", run_for.as_secs());
    tokio::select! {
        _ = tokio::time::sleep(run_for) => {}
        _ = interrupt => info!("Interrupted, stopping nodes early"),
    }

    for node in nodes {
        stop_node(node.clone()).await;
    }
}
