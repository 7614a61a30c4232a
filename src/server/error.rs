// Startup error module
// Everything that can stop the service before it is ready to serve

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

use crate::handler::DuplicateRoute;

/// Fatal startup failures; the process exits non-zero with this message
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid listen address: {0}")]
    InvalidAddress(String),

    #[error("port conflict: {addr} is already in use")]
    PortInUse {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("permission denied binding {addr}")]
    PermissionDenied {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to open log files: {0}")]
    Logger(#[source] io::Error),

    #[error("failed to register signal handlers: {0}")]
    Signal(#[source] io::Error),

    #[error("failed to build async runtime: {0}")]
    Runtime(#[source] io::Error),

    #[error("invalid route table: {0}")]
    Routes(#[from] DuplicateRoute),

    #[error("invalid forced status code {0}")]
    InvalidStatus(u16),
}

impl StartupError {
    /// Classify a listener setup failure by its OS error kind
    pub fn bind(addr: SocketAddr, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::AddrInUse => Self::PortInUse { addr, source },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied { addr, source },
            _ => Self::Bind { addr, source },
        }
    }
}
