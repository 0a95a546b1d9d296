//! Configuration for probing and routing.
//!
//! Provides builder-style configuration for:
//! - Probe timeout and EHLO identity
//! - TLS trust anchors and SNI
//! - The ActiveSync endpoint path
//! - Router endpoint names
//!
//! Configuration is passed explicitly into constructors.

use std::path::PathBuf;
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::errors::{ConfigError, ConfigResult};
use crate::router::names;

/// Default probe timeout, shared by every protocol.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Longest accepted probe timeout.
pub const MAX_CONNECT_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Default EHLO identity.
pub const DEFAULT_CLIENT_ID: &str = "localhost";

/// Default ActiveSync endpoint path.
pub const DEFAULT_ACTIVESYNC_PATH: &str = "/Microsoft-Server-ActiveSync";

/// Environment variable holding the probe timeout (e.g. `30s`).
pub const ENV_PROBE_TIMEOUT: &str = "MAILBRIDGE_PROBE_TIMEOUT";

/// Environment variable holding the EHLO identity.
pub const ENV_CLIENT_ID: &str = "MAILBRIDGE_CLIENT_ID";

/// Environment variable holding an extra CA certificate path.
pub const ENV_CA_CERT: &str = "MAILBRIDGE_CA_CERT";

/// TLS trust settings used by every probe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsOptions {
    /// PEM file with additional trust anchors.
    #[serde(default)]
    pub ca_cert_path: Option<PathBuf>,
    /// Server Name Indication override.
    #[serde(default)]
    pub sni_override: Option<String>,
}

impl TlsOptions {
    /// Validates the TLS options.
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(path) = &self.ca_cert_path {
            if !path.is_file() {
                return Err(ConfigError::Io {
                    path: path.display().to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "not a readable file"),
                });
            }
        }
        if matches!(&self.sni_override, Some(sni) if sni.trim().is_empty()) {
            return Err(ConfigError::invalid("sni_override must not be empty"));
        }
        Ok(())
    }
}

/// Probe configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Time allowed from start to a terminal event.
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Identity sent in EHLO.
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// TLS settings.
    #[serde(default)]
    pub tls: TlsOptions,
    /// ActiveSync endpoint path.
    #[serde(default = "default_activesync_path")]
    pub activesync_path: String,
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

fn default_client_id() -> String {
    DEFAULT_CLIENT_ID.to_string()
}

fn default_activesync_path() -> String {
    DEFAULT_ACTIVESYNC_PATH.to_string()
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            client_id: default_client_id(),
            tls: TlsOptions::default(),
            activesync_path: default_activesync_path(),
        }
    }
}

impl ProbeConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> ProbeConfigBuilder {
        ProbeConfigBuilder::default()
    }

    /// Loads configuration from `MAILBRIDGE_*` environment variables.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> ConfigResult<Self> {
        let mut builder = ProbeConfigBuilder::default();

        if let Ok(value) = std::env::var(ENV_PROBE_TIMEOUT) {
            let timeout = humantime::parse_duration(value.trim()).map_err(|e| ConfigError::Env {
                var: ENV_PROBE_TIMEOUT,
                message: e.to_string(),
            })?;
            builder = builder.connect_timeout(timeout);
        }

        if let Ok(id) = std::env::var(ENV_CLIENT_ID) {
            builder = builder.client_id(id);
        }

        if let Ok(path) = std::env::var(ENV_CA_CERT) {
            builder = builder.ca_cert_path(path);
        }

        builder.build()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::invalid("connect_timeout must be greater than zero"));
        }
        if self.connect_timeout > MAX_CONNECT_TIMEOUT {
            return Err(ConfigError::invalid(format!(
                "connect_timeout must not exceed {}",
                humantime::format_duration(MAX_CONNECT_TIMEOUT)
            )));
        }
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::invalid("client_id must not be empty"));
        }
        if !self.activesync_path.starts_with('/') {
            return Err(ConfigError::invalid("activesync_path must start with '/'"));
        }
        self.tls.validate()
    }
}

/// Builder for [`ProbeConfig`].
#[derive(Debug, Default)]
pub struct ProbeConfigBuilder {
    connect_timeout: Option<Duration>,
    client_id: Option<String>,
    tls: TlsOptions,
    activesync_path: Option<String>,
}

impl ProbeConfigBuilder {
    /// Sets the probe timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the EHLO identity.
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Sets a PEM file of additional trust anchors.
    pub fn ca_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.tls.ca_cert_path = Some(path.into());
        self
    }

    /// Sets the SNI override.
    pub fn sni_override(mut self, sni: impl Into<String>) -> Self {
        self.tls.sni_override = Some(sni.into());
        self
    }

    /// Sets the ActiveSync endpoint path.
    pub fn activesync_path(mut self, path: impl Into<String>) -> Self {
        self.activesync_path = Some(path.into());
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> ConfigResult<ProbeConfig> {
        let config = ProbeConfig {
            connect_timeout: self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            client_id: self.client_id.unwrap_or_else(default_client_id),
            tls: self.tls,
            activesync_path: self.activesync_path.unwrap_or_else(default_activesync_path),
        };

        config.validate()?;
        Ok(config)
    }
}

/// Router configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Name of the primary channel endpoint.
    #[serde(default = "default_bridge_endpoint")]
    pub bridge_endpoint: String,
    /// Name of the connectivity endpoint.
    #[serde(default = "default_control_endpoint")]
    pub control_endpoint: String,
}

fn default_bridge_endpoint() -> String {
    names::BRIDGE.to_string()
}

fn default_control_endpoint() -> String {
    names::CONTROL.to_string()
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            bridge_endpoint: default_bridge_endpoint(),
            control_endpoint: default_control_endpoint(),
        }
    }
}

impl RouterConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> RouterConfigBuilder {
        RouterConfigBuilder::default()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.bridge_endpoint.is_empty() || self.control_endpoint.is_empty() {
            return Err(ConfigError::invalid("endpoint names must not be empty"));
        }
        if self.bridge_endpoint == self.control_endpoint {
            return Err(ConfigError::invalid(
                "bridge and control endpoints must have different names",
            ));
        }
        Ok(())
    }
}

/// Builder for [`RouterConfig`].
#[derive(Debug, Default)]
pub struct RouterConfigBuilder {
    config: RouterConfig,
}

impl RouterConfigBuilder {
    /// Sets the primary channel endpoint name.
    pub fn bridge_endpoint(mut self, name: impl Into<String>) -> Self {
        self.config.bridge_endpoint = name.into();
        self
    }

    /// Sets the connectivity endpoint name.
    pub fn control_endpoint(mut self, name: impl Into<String>) -> Self {
        self.config.control_endpoint = name.into();
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> ConfigResult<RouterConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// Humantime serde support
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_probe_config_defaults() {
        let config = ProbeConfig::builder().build().unwrap();
        assert_eq!(config.connect_timeout, Duration::from_millis(30_000));
        assert_eq!(config.client_id, "localhost");
        assert_eq!(config.activesync_path, "/Microsoft-Server-ActiveSync");
        assert_eq!(config, ProbeConfig::default());
    }

    #[test]
    fn test_probe_config_validation() {
        let result = ProbeConfig::builder().connect_timeout(Duration::ZERO).build();
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let result = ProbeConfig::builder()
            .connect_timeout(Duration::from_secs(u64::MAX))
            .build();
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
        assert!(ProbeConfig::builder().connect_timeout(MAX_CONNECT_TIMEOUT).build().is_ok());

        let result = ProbeConfig::builder().client_id("  ").build();
        assert!(result.is_err());

        let result = ProbeConfig::builder().activesync_path("no-slash").build();
        assert!(result.is_err());

        let result = ProbeConfig::builder().ca_cert_path("/definitely/not/here.pem").build();
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_probe_config_accepts_existing_ca_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "-----BEGIN CERTIFICATE-----").unwrap();
        let config = ProbeConfig::builder().ca_cert_path(file.path()).build().unwrap();
        assert_eq!(config.tls.ca_cert_path.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_probe_config_serde_humantime() {
        let config: ProbeConfig =
            serde_json::from_str(r#"{"connect_timeout": "5s", "client_id": "probe.local"}"#).unwrap();
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.client_id, "probe.local");
        assert_eq!(config.activesync_path, DEFAULT_ACTIVESYNC_PATH);

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["connect_timeout"], "5s");
    }

    #[test]
    fn test_router_config() {
        let config = RouterConfig::default();
        assert_eq!(config.bridge_endpoint, "bridge");
        assert_eq!(config.control_endpoint, "control");

        let result = RouterConfig::builder()
            .bridge_endpoint("same")
            .control_endpoint("same")
            .build();
        assert!(result.is_err());
    }
}
