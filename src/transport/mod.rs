//! Line-oriented TCP transport with optional TLS.
//!
//! Supports implicit TLS from the first byte and an in-place STARTTLS
//! upgrade. All failures are reported as [`RawProbeError`] so the
//! classifier can see certificate problems distinctly from network ones.

use std::fmt;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::{ProbeConfig, TlsOptions};
use crate::errors::RawProbeError;
use crate::types::ConnectionInfo;

/// Stream type that can be plain TCP or TLS.
enum TransportStream {
    Plain(BufReader<TcpStream>),
    #[cfg(feature = "rustls-tls")]
    Tls(Box<BufReader<tokio_rustls::client::TlsStream<TcpStream>>>),
}

/// TCP connection with optional TLS, exchanging CRLF-terminated lines.
pub struct LineTransport {
    /// Read/write stream. `None` only while a TLS upgrade is in flight.
    stream: Option<TransportStream>,
    /// Per-operation timeout.
    io_timeout: Duration,
    /// Name presented for certificate verification.
    server_name: String,
    /// Trust settings.
    tls: TlsOptions,
    /// TLS enabled flag.
    tls_enabled: bool,
}

impl fmt::Debug for LineTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineTransport")
            .field("server_name", &self.server_name)
            .field("tls_enabled", &self.tls_enabled)
            .finish()
    }
}

impl LineTransport {
    /// Opens a connection, negotiating TLS up front when `use_crypto` is set.
    pub async fn connect(info: &ConnectionInfo, config: &ProbeConfig) -> Result<Self, RawProbeError> {
        let address = info.address();

        let stream = timeout(
            config.connect_timeout,
            TcpStream::connect((info.hostname.as_str(), info.port)),
        )
            .await
            .map_err(|_| RawProbeError::timed_out(format!("connect to {}", address)))?
            .map_err(|e| RawProbeError::from_io(&e))?;

        stream.set_nodelay(true).ok();

        tracing::debug!(server = %address, use_crypto = info.use_crypto, "TCP connected");

        let mut transport = Self {
            stream: Some(TransportStream::Plain(BufReader::new(stream))),
            io_timeout: config.connect_timeout,
            server_name: config
                .tls
                .sni_override
                .clone()
                .unwrap_or_else(|| info.hostname.clone()),
            tls: config.tls.clone(),
            tls_enabled: false,
        };

        if info.use_crypto {
            transport.upgrade_tls().await?;
        }

        Ok(transport)
    }

    /// Returns true if TLS is enabled.
    pub fn is_tls(&self) -> bool {
        self.tls_enabled
    }

    /// Reads one line without its terminator. `None` means the peer closed.
    pub async fn read_line(&mut self) -> Result<Option<String>, RawProbeError> {
        let io_timeout = self.io_timeout;
        let mut line = String::new();

        let read = match self.stream_mut()? {
            TransportStream::Plain(reader) => timeout(io_timeout, reader.read_line(&mut line)).await,
            #[cfg(feature = "rustls-tls")]
            TransportStream::Tls(reader) => timeout(io_timeout, reader.read_line(&mut line)).await,
        };

        let n = read
            .map_err(|_| RawProbeError::timed_out("read"))?
            .map_err(|e| RawProbeError::from_io(&e))?;

        if n == 0 {
            return Ok(None);
        }

        let line = line.trim_end_matches(['\r', '\n']).to_string();
        tracing::trace!(line = %line, "S:");
        Ok(Some(line))
    }

    /// Writes one line, appending CRLF.
    pub async fn write_line(&mut self, line: &str) -> Result<(), RawProbeError> {
        let io_timeout = self.io_timeout;
        let data = format!("{}\r\n", line);

        match self.stream_mut()? {
            TransportStream::Plain(reader) => Self::write_all(reader.get_mut(), data.as_bytes(), io_timeout).await,
            #[cfg(feature = "rustls-tls")]
            TransportStream::Tls(reader) => Self::write_all(reader.get_mut(), data.as_bytes(), io_timeout).await,
        }
    }

    /// Upgrades the connection to TLS in place.
    pub async fn upgrade_tls(&mut self) -> Result<(), RawProbeError> {
        if self.tls_enabled {
            return Ok(());
        }

        #[cfg(feature = "rustls-tls")]
        {
            use rustls::pki_types::ServerName;

            let connector = tls_connector(&self.tls)?;
            let server_name = ServerName::try_from(self.server_name.clone()).map_err(|_| {
                RawProbeError::Tls {
                    message: format!("invalid server name: {}", self.server_name),
                }
            })?;

            let tcp_stream = match self.stream.take() {
                Some(TransportStream::Plain(reader)) => reader.into_inner(),
                Some(other) => {
                    self.stream = Some(other);
                    return Ok(());
                }
                None => return Err(closed()),
            };

            let tls_stream = timeout(self.io_timeout, connector.connect(server_name, tcp_stream))
                .await
                .map_err(|_| RawProbeError::timed_out("TLS handshake"))?
                .map_err(|e| RawProbeError::from_io(&e))?;

            self.stream = Some(TransportStream::Tls(Box::new(BufReader::new(tls_stream))));
            self.tls_enabled = true;

            tracing::debug!(server = %self.server_name, "TLS established");
            Ok(())
        }

        #[cfg(not(feature = "rustls-tls"))]
        {
            Err(RawProbeError::Tls {
                message: "no TLS implementation available".to_string(),
            })
        }
    }

    /// Shuts the stream down. Safe to call more than once.
    pub async fn shutdown(&mut self) {
        match self.stream.take() {
            Some(TransportStream::Plain(mut reader)) => {
                let _ = reader.get_mut().shutdown().await;
            }
            #[cfg(feature = "rustls-tls")]
            Some(TransportStream::Tls(mut reader)) => {
                let _ = reader.get_mut().shutdown().await;
            }
            None => {}
        }
    }

    fn stream_mut(&mut self) -> Result<&mut TransportStream, RawProbeError> {
        self.stream.as_mut().ok_or_else(closed)
    }

    async fn write_all<W: AsyncWrite + Unpin>(
        writer: &mut W,
        data: &[u8],
        io_timeout: Duration,
    ) -> Result<(), RawProbeError> {
        timeout(io_timeout, writer.write_all(data))
            .await
            .map_err(|_| RawProbeError::timed_out("write"))?
            .map_err(|e| RawProbeError::from_io(&e))?;

        timeout(io_timeout, writer.flush())
            .await
            .map_err(|_| RawProbeError::timed_out("flush"))?
            .map_err(|e| RawProbeError::from_io(&e))?;

        Ok(())
    }
}

fn closed() -> RawProbeError {
    RawProbeError::Network {
        kind: io::ErrorKind::NotConnected,
        message: "connection already closed".to_string(),
    }
}

/// Builds a rustls connector trusting the webpki roots plus any configured CA file.
#[cfg(feature = "rustls-tls")]
pub fn tls_connector(options: &TlsOptions) -> Result<tokio_rustls::TlsConnector, RawProbeError> {
    use std::sync::Arc;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if let Some(path) = &options.ca_cert_path {
        let file = std::fs::File::open(path).map_err(|e| RawProbeError::Tls {
            message: format!("cannot open CA file {}: {}", path.display(), e),
        })?;
        let mut reader = io::BufReader::new(file);
        for cert in rustls_pemfile::certs(&mut reader) {
            let cert = cert.map_err(|e| RawProbeError::Tls {
                message: format!("invalid PEM in {}: {}", path.display(), e),
            })?;
            root_store.add(cert).map_err(|e| RawProbeError::from_tls(&e))?;
        }
    }

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Ok(tokio_rustls::TlsConnector::from(Arc::new(config)))
}
