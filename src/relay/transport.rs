//! Remote-copy channel to the collector

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use log::debug;
use ssh2::{Session, Sftp};

use super::connection::open_session;
use super::RelayError;
use crate::config::CollectorConfig;

/// Opens one session per relay invocation
///
/// Implementations block; the relay runs them on the blocking pool.
pub trait Transport: Send + Sync {
    /// Directory on the collector receiving batch files
    fn remote_dir(&self) -> &str;

    /// Connect and authenticate
    fn connect(&self) -> Result<Box<dyn TransportSession>, RelayError>;
}

/// One live session
pub trait TransportSession: Send {
    /// Copy `local` to `remote`, returning the number of bytes written
    fn copy(&mut self, local: &Path, remote: &str) -> Result<u64, RelayError>;

    fn close(self: Box<Self>) -> Result<(), RelayError>;
}

/// SFTP upload with password authentication
#[derive(Debug, Clone)]
pub struct SftpTransport {
    collector: CollectorConfig,
    timeout: Duration,
}

impl SftpTransport {
    pub fn new(collector: CollectorConfig, timeout: Duration) -> Self {
        SftpTransport { collector, timeout }
    }
}

impl Transport for SftpTransport {
    fn remote_dir(&self) -> &str {
        &self.collector.remote_dir
    }

    fn connect(&self) -> Result<Box<dyn TransportSession>, RelayError> {
        let session = open_session(
            &self.collector.host,
            self.collector.port,
            &self.collector.username,
            &self.collector.password,
            self.timeout,
        )?;
        let sftp = session
            .sftp()
            .map_err(|e| RelayError::Sftp(e.to_string()))?;
        debug!(
            "Opened SFTP session to {}@{}:{}",
            self.collector.username, self.collector.host, self.collector.port
        );
        Ok(Box::new(SftpSession { session, sftp }))
    }
}

struct SftpSession {
    session: Session,
    sftp: Sftp,
}

impl TransportSession for SftpSession {
    fn copy(&mut self, local: &Path, remote: &str) -> Result<u64, RelayError> {
        let mut source = File::open(local)?;
        let mut target = self
            .sftp
            .create(Path::new(remote))
            .map_err(|e| RelayError::Sftp(format!("{}: {}", remote, e)))?;

        let bytes = io::copy(&mut source, &mut target)?;
        target.flush()?;
        target
            .close()
            .map_err(|e| RelayError::Sftp(format!("{}: {}", remote, e)))?;
        Ok(bytes)
    }

    fn close(self: Box<Self>) -> Result<(), RelayError> {
        let SftpSession { session, sftp } = *self;
        drop(sftp);
        session
            .disconnect(None, "batch relayed", None)
            .map_err(|e| RelayError::Sftp(e.to_string()))
    }
}
