// Configuration module entry point
// Loads the service configuration from file, environment and defaults

mod state;
mod types;

use std::net::SocketAddr;
use std::time::Duration;

// Re-export public types
pub use state::AppState;
pub use types::{AccessLogFormat, Config, HttpConfig, LoggingConfig, ServerConfig};

/// Default config file name (extension resolved by the `config` crate)
pub const DEFAULT_CONFIG_PATH: &str = "hello";

/// Short variable names honoured on top of `HELLO__*`, as container platforms set them
const PORT_ENV: &str = "PORT";
const GRACE_ENV: &str = "SHUTDOWN_GRACE_SECS";

impl Config {
    /// Load configuration from the default file (`hello.toml`, optional)
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from specified file path (extension optional)
    ///
    /// Precedence, lowest first: defaults, file, `HELLO__SECTION__KEY`
    /// variables, then `PORT` / `SHUTDOWN_GRACE_SECS`.
    pub fn load_from(config_path: &str) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.shutdown_grace_secs", 10)?
            .set_default("logging.access_log", true)?
            .set_default("logging.show_headers", false)?
            .set_default("logging.access_log_format", "combined")?
            .set_default("server.keep_alive", true)?
            .set_default("server.connection_timeout_secs", 75)?
            .set_default("http.server_name", "hello-native")?
            .set_default("http.max_body_size", 1_048_576)? // 1MB
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(
                config::Environment::with_prefix("HELLO")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("server.port", std::env::var(PORT_ENV).ok())?
            .set_override_option(
                "server.shutdown_grace_secs",
                std::env::var(GRACE_ENV).ok(),
            )?
            .build()?;

        settings.try_deserialize()
    }

    pub fn get_socket_addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| format!("Invalid address: {e}"))
    }

    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_grace_secs)
    }

    /// Per-connection timeout, `None` when disabled
    pub const fn connection_timeout(&self) -> Option<Duration> {
        match self.server.connection_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}
