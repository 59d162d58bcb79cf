use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::protocol::error::LoomError;
use crate::utils::limits::{
    DEFAULT_CHUNK_SIZE, DEFAULT_MAX_CHUNK_BYTES, DEFAULT_MAX_KEY_BYTES, DEFAULT_RECONNECT_DELAY_MS,
};

pub const DEFAULT_CONFIG_FILE: &str = "loom.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Quic,
    Http3,
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "quic" => Ok(TransportKind::Quic),
            "http3" | "h3" => Ok(TransportKind::Http3),
            other => Err(format!("unknown transport '{}', expected quic or http3", other)),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsOptions {
    /// Accept any server certificate. Development only: this disables
    /// all protection against impersonation of the server.
    pub insecure_skip_verify: bool,
    /// TLS server name; defaults to the host part of the address.
    pub server_name: Option<String>,
    /// PEM bundle of trusted roots; defaults to the webpki roots.
    pub ca_file: Option<String>,
    pub client_cert_file: Option<String>,
    pub client_key_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectOptions {
    pub auto_reconnect: bool,
    /// 0 means unlimited.
    pub max_reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
}

impl ReconnectOptions {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            max_reconnect_attempts: 0,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_key_bytes: usize,
    pub max_chunk_bytes: usize,
    pub chunk_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_key_bytes: DEFAULT_MAX_KEY_BYTES,
            max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Everything a producer or consumer needs to reach a Loom server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// `host:port`
    pub address: String,
    pub transport: TransportKind,
    pub name: String,
    pub room: String,
    pub token: String,
    pub tls: TlsOptions,
    pub reconnect: ReconnectOptions,
    pub limits: Limits,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            address: "localhost:4433".to_string(),
            transport: TransportKind::default(),
            name: "client".to_string(),
            room: "default".to_string(),
            token: String::new(),
            tls: TlsOptions::default(),
            reconnect: ReconnectOptions::default(),
            limits: Limits::default(),
        }
    }
}

impl ClientOptions {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> std::result::Result<(), LoomError> {
        if self.address.trim().is_empty() {
            return Err(LoomError::InvalidConfig("address is empty".into()));
        }
        if self.limits.chunk_size == 0 {
            return Err(LoomError::InvalidConfig("chunk_size must be positive".into()));
        }
        if self.limits.max_key_bytes == 0 || self.limits.max_chunk_bytes == 0 {
            return Err(LoomError::InvalidConfig("frame limits must be positive".into()));
        }
        if self.tls.client_cert_file.is_some() != self.tls.client_key_file.is_some() {
            return Err(LoomError::InvalidConfig(
                "client_cert_file and client_key_file must be set together".into(),
            ));
        }
        Ok(())
    }

    /// Host part of `address`, used as the default TLS server name.
    pub fn host(&self) -> &str {
        let addr = self.address.as_str();
        if let Some(rest) = addr.strip_prefix('[') {
            return rest.split(']').next().unwrap_or(rest);
        }
        addr.rsplit_once(':').map(|(host, _)| host).unwrap_or(addr)
    }

    pub fn server_name(&self) -> String {
        self.tls
            .server_name
            .clone()
            .unwrap_or_else(|| self.host().to_string())
    }
}

/// On-disk configuration file for the `loom` binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub client: ClientOptions,
}

impl ClientConfig {
    pub fn load_or_create(config_path: Option<&str>) -> Result<Self> {
        let config_file = config_path.unwrap_or(DEFAULT_CONFIG_FILE);

        if std::path::Path::new(config_file).exists() {
            let content = std::fs::read_to_string(config_file)?;
            let config: ClientConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save(config_file)?;
            tracing::info!("Created default config: {}", config_file);
            Ok(config)
        }
    }

    pub fn save(&self, config_path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }
}
