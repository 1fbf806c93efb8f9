//! Relay operations: transfer a batch file, then delete the local copy

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::sync::mpsc;

use super::{RelayError, Transport};

/// What happened to one batch file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Copied and removed locally
    Delivered { remote_path: String, bytes: u64 },
    /// Not copied; the local file is kept
    TransferFailed,
    /// Copied, but the local file could not be removed
    DeleteFailed { remote_path: String },
}

/// Destination path for `local` inside `remote_dir`
pub fn remote_path_for(remote_dir: &str, local: &Path) -> Result<String, RelayError> {
    let file_name = local
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| RelayError::InvalidPath(local.display().to_string()))?;

    if remote_dir.is_empty() {
        Ok(file_name.to_string())
    } else if remote_dir.ends_with('/') || remote_dir.ends_with('\\') {
        Ok(format!("{}{}", remote_dir, file_name))
    } else {
        Ok(format!("{}/{}", remote_dir, file_name))
    }
}

fn transfer(transport: &dyn Transport, local: &Path, remote: &str) -> Result<u64, RelayError> {
    let mut session = transport.connect()?;
    let copied = session.copy(local, remote);
    if let Err(e) = session.close() {
        warn!("Failed to close session cleanly: {}", e);
    }
    copied
}

async fn transfer_with_timeout(
    transport: Arc<dyn Transport>,
    local: PathBuf,
    remote: String,
    timeout: Duration,
) -> Result<u64, RelayError> {
    let handle =
        tokio::task::spawn_blocking(move || transfer(transport.as_ref(), &local, &remote));

    tokio::time::timeout(timeout, handle)
        .await
        .map_err(|_| RelayError::Timeout(timeout))?
        .map_err(|e| RelayError::Worker(e.to_string()))?
}

/// Copy one batch file to the collector and delete it once the copy succeeded
///
/// Opens and tears down its own session. Failures are logged and reported
/// through the outcome; the local file stays whenever the copy did not succeed.
pub async fn relay_file(
    transport: Arc<dyn Transport>,
    path: &Path,
    timeout: Duration,
) -> RelayOutcome {
    let remote_path = match remote_path_for(transport.remote_dir(), path) {
        Ok(remote_path) => remote_path,
        Err(e) => {
            error!("Failed to transfer {}: {}", path.display(), e);
            return RelayOutcome::TransferFailed;
        }
    };

    let bytes = match transfer_with_timeout(
        transport,
        path.to_path_buf(),
        remote_path.clone(),
        timeout,
    )
    .await
    {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Failed to transfer {}: {}", path.display(), e);
            return RelayOutcome::TransferFailed;
        }
    };
    info!("Transferred {} to {}", path.display(), remote_path);

    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            info!("Deleted {} after transfer.", path.display());
            RelayOutcome::Delivered { remote_path, bytes }
        }
        Err(e) => {
            error!("Failed to delete {} after transfer: {}", path.display(), e);
            RelayOutcome::DeleteFailed { remote_path }
        }
    }
}

/// Counts of relay outcomes over a worker's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub delivered: usize,
    pub transfer_failed: usize,
    pub delete_failed: usize,
}

/// Relays batch files handed over by the flusher, one at a time
pub struct RelayWorker {
    transport: Arc<dyn Transport>,
    timeout: Duration,
    stats: RelayStats,
}

impl RelayWorker {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        RelayWorker {
            transport,
            timeout,
            stats: RelayStats::default(),
        }
    }

    /// Relay every received path until all senders are dropped
    pub async fn run(mut self, mut files: mpsc::UnboundedReceiver<PathBuf>) -> RelayStats {
        while let Some(path) = files.recv().await {
            match relay_file(Arc::clone(&self.transport), &path, self.timeout).await {
                RelayOutcome::Delivered { .. } => self.stats.delivered += 1,
                RelayOutcome::TransferFailed => self.stats.transfer_failed += 1,
                RelayOutcome::DeleteFailed { .. } => self.stats.delete_failed += 1,
            }
        }
        self.stats
    }
}
