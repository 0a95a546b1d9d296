//! ActiveSync probe: an authenticated HTTP `OPTIONS` to the sync endpoint.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::error::Error as StdError;
use std::io;

use super::session::{Interrupted, LoginSession, SessionConnection};
use super::{Connector, ProbeConnection};
use crate::auth::Credentials;
use crate::config::ProbeConfig;
use crate::errors::RawProbeError;
use crate::types::{ConnectionInfo, Protocol};

/// Opens ActiveSync probes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActiveSyncConnector;

impl Connector for ActiveSyncConnector {
    fn protocol(&self) -> Protocol {
        Protocol::ActiveSync
    }

    fn open(
        &self,
        credentials: &Credentials,
        info: &ConnectionInfo,
        config: &ProbeConfig,
    ) -> Box<dyn ProbeConnection> {
        Box::new(SessionConnection::spawn(ActiveSyncSession {
            credentials: credentials.clone(),
            info: info.clone(),
            config: config.clone(),
        }))
    }
}

struct ActiveSyncSession {
    credentials: Credentials,
    info: ConnectionInfo,
    config: ProbeConfig,
}

/// Returns the endpoint URL. `useCrypto` selects https.
pub(crate) fn endpoint_url(info: &ConnectionInfo, config: &ProbeConfig) -> String {
    let scheme = if info.use_crypto { "https" } else { "http" };
    format!("{}://{}:{}{}", scheme, info.hostname, info.port, config.activesync_path)
}

fn build_client(config: &ProbeConfig) -> Result<reqwest::Client, RawProbeError> {
    let mut builder = reqwest::Client::builder()
        .use_rustls_tls()
        .timeout(config.connect_timeout)
        .redirect(reqwest::redirect::Policy::none());

    if let Some(path) = &config.tls.ca_cert_path {
        let pem = std::fs::read(path).map_err(|e| RawProbeError::Tls {
            message: format!("cannot read CA file {}: {}", path.display(), e),
        })?;
        let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| RawProbeError::Tls {
            message: format!("invalid CA file {}: {}", path.display(), e),
        })?;
        builder = builder.add_root_certificate(cert);
    }

    builder.build().map_err(|e| RawProbeError::Tls {
        message: format!("cannot build HTTP client: {}", e),
    })
}

/// Maps a transport-level HTTP failure.
fn map_request_error(error: &reqwest::Error) -> RawProbeError {
    if error.is_timeout() {
        return RawProbeError::timed_out(error.to_string());
    }

    let mut source: Option<&(dyn StdError + 'static)> = error.source();
    while let Some(cause) = source {
        // The HTTP stack may link a different rustls than ours; go by the text.
        if cause.to_string().to_ascii_lowercase().contains("certificate") {
            return RawProbeError::Certificate {
                reason: cause.to_string(),
            };
        }
        if let Some(io_error) = cause.downcast_ref::<io::Error>() {
            return RawProbeError::from_io(io_error);
        }
        source = cause.source();
    }

    RawProbeError::Network {
        kind: io::ErrorKind::Other,
        message: error.to_string(),
    }
}

#[async_trait]
impl LoginSession for ActiveSyncSession {
    async fn login(&mut self) -> Result<(), Interrupted> {
        let client = build_client(&self.config)?;
        let url = endpoint_url(&self.info, &self.config);
        tracing::debug!(url = %url, "ActiveSync OPTIONS");

        let response = client
            .request(reqwest::Method::OPTIONS, &url)
            .basic_auth(&self.credentials.username, Some(self.credentials.password.expose_secret()))
            .send()
            .await
            .map_err(|e| map_request_error(&e))?;

        let status = response.status();
        tracing::debug!(status = status.as_u16(), "ActiveSync response");
        if status.is_success() {
            Ok(())
        } else {
            Err(RawProbeError::HttpStatus {
                status: status.as_u16(),
            }
            .into())
        }
    }

    async fn logout(&mut self) {}
}
