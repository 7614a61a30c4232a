// Configuration types module
// One struct per `hello.toml` section; defaults live in the loader

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub http: HttpConfig,
}

/// `[server]`: socket, runtime and connection lifecycle
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Tokio worker threads (CPU cores when unset)
    #[serde(default)]
    pub workers: Option<usize>,
    /// Time in-flight requests get to finish after a termination signal
    pub shutdown_grace_secs: u64,
    pub keep_alive: bool,
    /// Upper bound on a single connection's lifetime (0 disables)
    pub connection_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub access_log: bool,
    /// Log the request header count with each access line
    pub show_headers: bool,
    pub access_log_format: AccessLogFormat,
    /// Stdout when unset
    #[serde(default)]
    pub access_log_file: Option<String>,
    /// Stderr when unset
    #[serde(default)]
    pub error_log_file: Option<String>,
}

/// Access line layout; any value other than the named ones is a `$variable` pattern
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum AccessLogFormat {
    Combined,
    Common,
    Json,
    Pattern(String),
}

impl From<String> for AccessLogFormat {
    fn from(value: String) -> Self {
        match value.as_str() {
            "combined" => Self::Combined,
            "common" => Self::Common,
            "json" => Self::Json,
            _ => Self::Pattern(value),
        }
    }
}

impl From<AccessLogFormat> for String {
    fn from(format: AccessLogFormat) -> Self {
        match format {
            AccessLogFormat::Combined => "combined".to_string(),
            AccessLogFormat::Common => "common".to_string(),
            AccessLogFormat::Json => "json".to_string(),
            AccessLogFormat::Pattern(pattern) => pattern,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HttpConfig {
    /// Value of the `Server` response header
    pub server_name: String,
    pub max_body_size: u64,
    /// Answer every registered route with this status instead of its body.
    /// Used to check that a broken artifact is caught before it ships.
    #[serde(default)]
    pub force_status: Option<u16>,
}
