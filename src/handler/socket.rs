//! Socket sink: length-prefixed frames over TCP or Unix-domain
//! transports, optionally TLS on TCP, with reconnect backoff.
//!
//! Each record is encoded as a compact deterministic binary payload and
//! written behind a 4-byte big-endian length prefix. The connection is
//! established lazily on the first record; a write failure closes it and
//! the sink reconnects under the configured backoff schedule. While the
//! outage is shorter than the backoff deadline the consumer waits between
//! attempts (records queue behind it in the handler's bounded channel);
//! once the deadline is exceeded records are dropped and counted until a
//! retry succeeds.

use std::io::{self, Write};
use std::net::{TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rustls::pki_types::ServerName;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, HandlerConfigError, HandlerConfigErrorKind};
use crate::formatter::Formatter;
use crate::record::Record;

use super::backoff::{Backoff, BackoffConfig};
use super::worker::Sink;
use super::{Handler, HandlerOptions};

/// Where the socket sink connects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transport {
    Tcp { host: String, port: u16 },
    Unix { path: PathBuf },
}

/// TLS options; valid only over TCP. `domain` defaults to the TCP host;
/// `insecure` disables certificate verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsOptions {
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub insecure: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketConfig {
    pub transport: Transport,
    #[serde(default)]
    pub tls: Option<TlsOptions>,
    pub connect_timeout_ms: u64,
    pub write_timeout_ms: u64,
    #[serde(default)]
    pub max_frame_size: Option<usize>,
    pub backoff: BackoffConfig,
}

impl SocketConfig {
    pub fn tcp(host: impl Into<String>, port: u16) -> SocketConfig {
        SocketConfig {
            transport: Transport::Tcp {
                host: host.into(),
                port,
            },
            tls: None,
            connect_timeout_ms: 5_000,
            write_timeout_ms: 5_000,
            max_frame_size: None,
            backoff: BackoffConfig::default(),
        }
    }

    pub fn unix(path: impl Into<PathBuf>) -> SocketConfig {
        SocketConfig {
            transport: Transport::Unix { path: path.into() },
            tls: None,
            connect_timeout_ms: 5_000,
            write_timeout_ms: 5_000,
            max_frame_size: None,
            backoff: BackoffConfig::default(),
        }
    }

    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    pub fn with_write_timeout_ms(mut self, ms: u64) -> Self {
        self.write_timeout_ms = ms;
        self
    }

    pub fn with_max_frame_size(mut self, bytes: usize) -> Self {
        self.max_frame_size = Some(bytes);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), HandlerConfigError> {
        if self.tls.is_some() && matches!(self.transport, Transport::Unix { .. }) {
            return Err(HandlerConfigError::new(
                HandlerConfigErrorKind::TlsRequiresTcp,
                "TLS cannot be combined with a unix-domain transport",
            ));
        }
        if self.connect_timeout_ms == 0 || self.write_timeout_ms == 0 {
            return Err(HandlerConfigError::new(
                HandlerConfigErrorKind::ZeroTimeout,
                "socket connect and write timeouts must be positive",
            ));
        }
        Ok(())
    }
}

/// The deterministic frame payload: the record's semantic fields in a
/// fixed order, bincode-encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct WirePayload {
    pub name: String,
    pub level: String,
    pub message: String,
    pub timestamp_ms: i64,
    pub thread_id: String,
    pub thread_name: Option<String>,
    pub filename: Option<String>,
    pub lineno: Option<u32>,
    pub key_values: Vec<(String, String)>,
}

impl WirePayload {
    pub(crate) fn from_record(record: &Record) -> WirePayload {
        WirePayload {
            name: record.name().to_string(),
            level: record.level().as_str().to_string(),
            message: record.message().to_string(),
            timestamp_ms: record.timestamp().timestamp_millis(),
            thread_id: record.thread_id().to_string(),
            thread_name: record.thread_name().map(str::to_string),
            filename: record.filename().map(str::to_string),
            lineno: record.lineno(),
            key_values: record.key_values().to_vec(),
        }
    }

    pub(crate) fn encode(&self) -> io::Result<Vec<u8>> {
        bincode::serialize(self).map_err(io::Error::other)
    }
}

enum Conn {
    Tcp(TcpStream),
    Tls(Box<rustls::StreamOwned<rustls::ClientConnection, TcpStream>>),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Write for Conn {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Conn::Tcp(s) => s.write(buf),
            Conn::Tls(s) => s.write(buf),
            #[cfg(unix)]
            Conn::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Conn::Tcp(s) => s.flush(),
            Conn::Tls(s) => s.flush(),
            #[cfg(unix)]
            Conn::Unix(s) => s.flush(),
        }
    }
}

pub(crate) struct SocketSink {
    config: SocketConfig,
    tls_client: Option<Arc<rustls::ClientConfig>>,
    conn: Option<Conn>,
    backoff: Backoff,
}

impl SocketSink {
    pub(crate) fn new(config: SocketConfig) -> Result<SocketSink, HandlerConfigError> {
        config.validate()?;
        let tls_client = match &config.tls {
            Some(tls) => Some(build_tls_client(tls.insecure).map_err(|err| {
                HandlerConfigError::new(
                    HandlerConfigErrorKind::IoOpen,
                    format!("cannot build TLS client config: {err}"),
                )
            })?),
            None => None,
        };
        let backoff = Backoff::new(config.backoff);
        Ok(SocketSink {
            config,
            tls_client,
            conn: None,
            backoff,
        })
    }

    fn connect_once(&self) -> io::Result<Conn> {
        match &self.config.transport {
            Transport::Tcp { host, port } => {
                let timeout = Duration::from_millis(self.config.connect_timeout_ms);
                let mut last_err =
                    io::Error::new(io::ErrorKind::AddrNotAvailable, "no addresses resolved");
                let mut stream = None;
                for addr in (host.as_str(), *port).to_socket_addrs()? {
                    match TcpStream::connect_timeout(&addr, timeout) {
                        Ok(s) => {
                            stream = Some(s);
                            break;
                        }
                        Err(err) => last_err = err,
                    }
                }
                let stream = stream.ok_or(last_err)?;
                stream.set_write_timeout(Some(Duration::from_millis(
                    self.config.write_timeout_ms,
                )))?;
                stream.set_nodelay(true)?;
                match (&self.config.tls, &self.tls_client) {
                    (Some(tls), Some(client)) => {
                        let domain = tls.domain.clone().unwrap_or_else(|| host.clone());
                        let server_name = ServerName::try_from(domain)
                            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
                        let conn =
                            rustls::ClientConnection::new(Arc::clone(client), server_name)
                                .map_err(io::Error::other)?;
                        Ok(Conn::Tls(Box::new(rustls::StreamOwned::new(conn, stream))))
                    }
                    _ => Ok(Conn::Tcp(stream)),
                }
            }
            Transport::Unix { path } => {
                #[cfg(unix)]
                {
                    let stream = UnixStream::connect(path)?;
                    stream.set_write_timeout(Some(Duration::from_millis(
                        self.config.write_timeout_ms,
                    )))?;
                    Ok(Conn::Unix(stream))
                }
                #[cfg(not(unix))]
                {
                    let _ = path;
                    Err(io::Error::new(
                        io::ErrorKind::Unsupported,
                        "unix-domain sockets are not available on this platform",
                    ))
                }
            }
        }
    }

    fn ensure_connected(&mut self) -> io::Result<()> {
        if self.conn.is_some() {
            return Ok(());
        }
        loop {
            let now = Instant::now();
            let wait = self.backoff.until_next_attempt(now);
            if self.backoff.deadline_exceeded(now) {
                // Past the deadline the consumer stops waiting; records
                // drop until an attempt slot comes up and succeeds.
                if !wait.is_zero() {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "reconnect deadline exceeded",
                    ));
                }
            } else if !wait.is_zero() {
                thread::sleep(wait);
            }
            match self.connect_once() {
                Ok(conn) => {
                    self.conn = Some(conn);
                    self.backoff.note_success(Instant::now());
                    return Ok(());
                }
                Err(err) => {
                    let now = Instant::now();
                    self.backoff.note_failure(now);
                    if self.backoff.deadline_exceeded(now) {
                        return Err(err);
                    }
                }
            }
        }
    }
}

impl Sink for SocketSink {
    fn emit(&mut self, record: &Record, _formatter: &Formatter) -> io::Result<()> {
        let payload = WirePayload::from_record(record).encode()?;
        if let Some(max) = self.config.max_frame_size {
            if payload.len() > max {
                return Err(io::Error::other(format!(
                    "frame of {} bytes exceeds max_frame_size {max}",
                    payload.len()
                )));
            }
        }
        self.ensure_connected()?;
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| io::Error::other("socket sink has no connection"))?;
        let prefix = (payload.len() as u32).to_be_bytes();
        let result = conn
            .write_all(&prefix)
            .and_then(|()| conn.write_all(&payload));
        match result {
            Ok(()) => {
                self.backoff.note_success(Instant::now());
                Ok(())
            }
            Err(err) => {
                self.conn = None;
                self.backoff.note_failure(Instant::now());
                Err(err)
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.conn.as_mut() {
            Some(conn) => conn.flush(),
            None => Ok(()),
        }
    }

    fn close(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            let _ = conn.flush();
        }
    }
}

fn build_tls_client(insecure: bool) -> Result<Arc<rustls::ClientConfig>, rustls::Error> {
    if insecure {
        let provider = rustls::crypto::CryptoProvider::get_default()
            .cloned()
            .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()));
        let config = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerification { provider }))
            .with_no_client_auth();
        return Ok(Arc::new(config));
    }
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_native_certs::load_native_certs().certs {
        // Individual unparsable platform certs are skipped.
        let _ = roots.add(cert);
    }
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Verifier for `insecure` mode: accepts any chain.
#[derive(Debug)]
struct NoVerification {
    provider: Arc<rustls::crypto::CryptoProvider>,
}

impl rustls::client::danger::ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

impl Handler {
    /// Socket handler over `config`. The connection itself is lazy; only
    /// configuration and TLS setup can fail here.
    pub fn socket(
        config: SocketConfig,
        formatter: Formatter,
        opts: HandlerOptions,
    ) -> Result<Handler, ConfigError> {
        let sink = SocketSink::new(config)?;
        Ok(Handler::spawn("socket", Box::new(sink), formatter, opts)?)
    }
}
