//! Configuration for the OPC UA bridge.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::event::Format;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpcUaBridgeConfig {
    /// Zenoh connection settings
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// OPC UA-specific settings
    pub opcua: OpcUaConfig,

    /// Serialization format for outbound events
    #[serde(default)]
    pub serialization: Format,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// OPC UA server connection and monitoring configuration.
///
/// These values are read once at startup; there is no hot-reload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpcUaConfig {
    /// Server host (IP or hostname)
    pub host: String,

    /// Server port (default: 4840)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Namespace index used to qualify numeric node ids (`ns=<namespace>;i=<id>`)
    #[serde(default)]
    pub namespace: u16,

    /// Whether to select a secured endpoint (sign-and-encrypt)
    #[serde(default)]
    pub security_enabled: bool,

    /// Server certificate trust policy
    #[serde(default)]
    pub certificate_policy: CertificatePolicy,

    /// Application identity announced to the server
    #[serde(default = "default_application_name")]
    pub application_name: String,

    /// Key expression prefix (default: "opcua")
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Subscription publishing interval in milliseconds
    #[serde(default = "default_publishing_interval_ms")]
    pub publishing_interval_ms: u64,

    /// Session keep-alive / timeout budget in milliseconds
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,

    /// Budget for a single server round-trip (add-item commit) in milliseconds
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,

    /// Session renewal and liveness detection
    #[serde(default)]
    pub renewal: RenewalConfig,
}

/// Server certificate trust policy.
///
/// The default accepts only the specific "untrusted self-signed" rejection
/// reason, a deliberate narrow trust-on-first-use exception. `AcceptAll`
/// disables validation entirely and must be an explicit, visible choice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificatePolicy {
    /// Reject every certificate that fails validation.
    RejectUntrusted,
    /// Accept untrusted self-signed certificates; reject all other failures.
    #[default]
    AcceptSelfSigned,
    /// Accept any certificate. Not recommended outside isolated test benches.
    AcceptAll,
}

impl CertificatePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificatePolicy::RejectUntrusted => "reject_untrusted",
            CertificatePolicy::AcceptSelfSigned => "accept_self_signed",
            CertificatePolicy::AcceptAll => "accept_all",
        }
    }
}

/// Renewal watchdog settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenewalConfig {
    /// Whether scheduled session renewal is enabled.
    /// Liveness detection runs regardless.
    #[serde(default = "default_true")]
    pub session_renewal_required: bool,

    /// Scheduled renewal period in seconds (default: 1 hour)
    #[serde(default = "default_renewal_period_secs")]
    pub period_secs: u64,

    /// Heartbeat staleness threshold in seconds
    #[serde(default = "default_staleness_secs")]
    pub staleness_secs: u64,

    /// Watchdog poll interval in seconds
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            session_renewal_required: true,
            period_secs: default_renewal_period_secs(),
            staleness_secs: default_staleness_secs(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

fn default_port() -> u16 {
    4840
}

fn default_application_name() -> String {
    "zenoh-bridge-opcua".to_string()
}

fn default_key_prefix() -> String {
    "opcua".to_string()
}

fn default_publishing_interval_ms() -> u64 {
    1000
}

fn default_session_timeout_ms() -> u64 {
    60_000
}

fn default_operation_timeout_ms() -> u64 {
    15_000
}

fn default_true() -> bool {
    true
}

fn default_renewal_period_secs() -> u64 {
    3600
}

fn default_staleness_secs() -> u64 {
    60
}

fn default_poll_interval_secs() -> u64 {
    2
}

impl OpcUaConfig {
    /// The `opc.tcp` endpoint URL for the configured server.
    pub fn endpoint_url(&self) -> String {
        format!("opc.tcp://{}:{}", self.host, self.port)
    }

    /// Fully qualify a numeric node id with the configured namespace index.
    ///
    /// Namespace 0 is written without the `ns=` prefix, matching the
    /// canonical string form the protocol stack produces for node ids in
    /// notifications. Registry keys and delivered node ids must agree
    /// byte-for-byte.
    pub fn qualified_node_id(&self, node_id: u32) -> String {
        if self.namespace == 0 {
            format!("i={}", node_id)
        } else {
            format!("ns={};i={}", self.namespace, node_id)
        }
    }
}

/// Common Zenoh connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZenohConfig {
    /// Zenoh mode: "client", "peer", or "router".
    #[serde(default = "default_mode")]
    pub mode: String,

    /// Endpoints to connect to (for client mode).
    #[serde(default)]
    pub connect: Vec<String>,

    /// Endpoints to listen on (for peer/router mode).
    #[serde(default)]
    pub listen: Vec<String>,
}

fn default_mode() -> String {
    "peer".to_string()
}

impl Default for ZenohConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            connect: Vec::new(),
            listen: Vec::new(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json"
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl OpcUaBridgeConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: OpcUaBridgeConfig = json5::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.opcua.host.is_empty() {
            return Err(ConfigError::Validation(
                "OPC UA host cannot be empty".to_string(),
            ));
        }

        if self.opcua.publishing_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "publishing_interval_ms must be greater than zero".to_string(),
            ));
        }

        if self.opcua.key_prefix.is_empty() {
            return Err(ConfigError::Validation(
                "key_prefix cannot be empty".to_string(),
            ));
        }

        let renewal = &self.opcua.renewal;
        if renewal.poll_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "renewal.poll_interval_secs must be greater than zero".to_string(),
            ));
        }
        if renewal.staleness_secs == 0 {
            return Err(ConfigError::Validation(
                "renewal.staleness_secs must be greater than zero".to_string(),
            ));
        }
        if renewal.session_renewal_required && renewal.period_secs == 0 {
            return Err(ConfigError::Validation(
                "renewal.period_secs must be greater than zero when renewal is enabled"
                    .to_string(),
            ));
        }

        Ok(())
    }
}
