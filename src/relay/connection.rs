use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use log::{debug, error};
use ssh2::{HashType, Session};

use super::RelayError;

/// Open an authenticated SSH session using password authentication
///
/// Blocking; call from the blocking pool. `timeout` bounds the TCP connect
/// and every later blocking SSH call on the session.
pub fn open_session(
    host: &str,
    port: u16,
    username: &str,
    password: &str,
    timeout: Duration,
) -> Result<Session, RelayError> {
    let address = (host, port)
        .to_socket_addrs()
        .map_err(|e| RelayError::Connect(format!("{}:{}: {}", host, port, e)))?
        .next()
        .ok_or_else(|| RelayError::Connect(format!("{}:{}: no address", host, port)))?;

    let tcp = TcpStream::connect_timeout(&address, timeout).map_err(|e| {
        error!("Connection error: {}", e);
        RelayError::Connect(format!("{}: {}", address, e))
    })?;
    tcp.set_read_timeout(Some(timeout))?;
    tcp.set_write_timeout(Some(timeout))?;

    let mut session = Session::new().map_err(|e| RelayError::Handshake(e.to_string()))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
    session
        .handshake()
        .map_err(|e| RelayError::Handshake(e.to_string()))?;

    // Host keys are accepted as presented; log the fingerprint for auditing
    if let Some(hash) = session.host_key_hash(HashType::Sha256) {
        let fingerprint: String = hash.iter().map(|b| format!("{:02x}", b)).collect();
        debug!("Host key SHA256 for {}: {}", host, fingerprint);
    }

    session
        .userauth_password(username, password)
        .map_err(|e| RelayError::Authentication(e.to_string()))?;
    if !session.authenticated() {
        return Err(RelayError::Authentication(format!(
            "{} was not accepted by {}",
            username, host
        )));
    }

    Ok(session)
}
