// src/transport.rs
//! File transport adapter for the remote station file store.
//!
//! Each fetch opens a fresh authenticated FTPS session, retrieves one file
//! in passive mode, and closes the session on every exit path. Sessions are
//! never pooled or shared: a failed fetch must not leave a stale session
//! behind for the next station.

use std::io::Cursor;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use suppaftp::rustls::{ClientConfig, RootCertStore};
use suppaftp::{FtpError, Mode, RustlsConnector, RustlsFtpStream, Status};
use thiserror::Error;

use crate::config::FtpConfig;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("could not connect to remote file store: {0}")]
    Connect(String),
    #[error("remote file store rejected credentials: {0}")]
    Auth(String),
    #[error("remote file not found: {0}")]
    NotFound(String),
    #[error("file transfer failed: {0}")]
    Protocol(String),
}

/// Access to the remote file store, one session per fetch.
#[async_trait]
pub trait FileTransport: Send + Sync {
    /// Retrieve the raw content of `remote_path`, relative to the configured
    /// base path.
    async fn fetch_raw(&self, remote_path: &str) -> Result<String, TransportError>;

    fn name(&self) -> &'static str;
}

/// FTPS-backed transport. The blocking FTP client runs on the runtime's
/// blocking pool so station fetches can proceed concurrently.
pub struct FtpTransport {
    cfg: FtpConfig,
}

impl FtpTransport {
    pub fn new(cfg: FtpConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait]
impl FileTransport for FtpTransport {
    async fn fetch_raw(&self, remote_path: &str) -> Result<String, TransportError> {
        let cfg = self.cfg.clone();
        let path = remote_path.to_string();
        tokio::task::spawn_blocking(move || fetch_blocking(&cfg, &path))
            .await
            .map_err(|e| TransportError::Protocol(format!("transfer task failed: {e}")))?
    }

    fn name(&self) -> &'static str {
        "ftps"
    }
}

fn fetch_blocking(cfg: &FtpConfig, remote_path: &str) -> Result<String, TransportError> {
    let addr = resolve_addr(cfg)?;
    let timeout = Duration::from_secs(cfg.connect_timeout_secs);

    let plain = RustlsFtpStream::connect_timeout(addr, timeout)
        .map_err(|e| TransportError::Connect(e.to_string()))?;
    let mut ftp = plain
        .into_secure(RustlsConnector::from(Arc::new(tls_config())), &cfg.host)
        .map_err(|e| TransportError::Connect(e.to_string()))?;

    // The session must be closed whether the fetch succeeds or not.
    let result = fetch_in_session(&mut ftp, cfg, remote_path);
    let _ = ftp.quit();
    result
}

fn fetch_in_session(
    ftp: &mut RustlsFtpStream,
    cfg: &FtpConfig,
    remote_path: &str,
) -> Result<String, TransportError> {
    ftp.login(&cfg.user, &cfg.password)
        .map_err(|e| TransportError::Auth(e.to_string()))?;
    ftp.set_mode(Mode::Passive);

    if !cfg.base_path.is_empty() {
        ftp.cwd(&cfg.base_path)
            .map_err(|e| classify_missing(&cfg.base_path, e))?;
    }

    let buffer: Cursor<Vec<u8>> = ftp
        .retr_as_buffer(remote_path)
        .map_err(|e| classify_missing(remote_path, e))?;

    Ok(String::from_utf8_lossy(&buffer.into_inner()).into_owned())
}

fn classify_missing(path: &str, err: FtpError) -> TransportError {
    match err {
        FtpError::UnexpectedResponse(ref resp) if resp.status == Status::FileUnavailable => {
            TransportError::NotFound(path.to_string())
        }
        other => TransportError::Protocol(other.to_string()),
    }
}

fn resolve_addr(cfg: &FtpConfig) -> Result<SocketAddr, TransportError> {
    (cfg.host.as_str(), cfg.port)
        .to_socket_addrs()
        .map_err(|e| TransportError::Connect(e.to_string()))?
        .next()
        .ok_or_else(|| {
            TransportError::Connect(format!("no address for {}:{}", cfg.host, cfg.port))
        })
}

fn tls_config() -> ClientConfig {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth()
}
