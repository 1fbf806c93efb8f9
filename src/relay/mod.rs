pub mod connection;
pub mod operations;
pub mod transport;

use std::io;
use std::time::Duration;

use thiserror::Error;

pub use connection::open_session;
pub use operations::{relay_file, remote_path_for, RelayOutcome, RelayStats, RelayWorker};
pub use transport::{SftpTransport, Transport, TransportSession};

/// Errors raised while moving a batch file to the collector
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Connection error: {0}")]
    Connect(String),
    #[error("SSH handshake failed: {0}")]
    Handshake(String),
    #[error("Authentication failed: {0}")]
    Authentication(String),
    #[error("SFTP error: {0}")]
    Sftp(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid batch path: {0}")]
    InvalidPath(String),
    #[error("Transfer timed out after {0:?}")]
    Timeout(Duration),
    #[error("Transfer worker failed: {0}")]
    Worker(String),
}
