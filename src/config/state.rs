// Application state module
// Configuration and route table shared by every connection task

use hyper::StatusCode;

use super::types::Config;
use crate::handler::RouteTable;
use crate::server::StartupError;

/// Application state, immutable once the listener is up
pub struct AppState {
    pub config: Config,
    pub routes: RouteTable,
}

impl AppState {
    /// Wire the application's routes to the loaded configuration
    pub fn new(config: Config) -> Result<Self, StartupError> {
        Self::with_routes(config, RouteTable::application()?)
    }

    /// Same as [`AppState::new`] with a caller-supplied route table
    pub fn with_routes(config: Config, routes: RouteTable) -> Result<Self, StartupError> {
        let force_status = config
            .http
            .force_status
            .map(|code| StatusCode::from_u16(code).map_err(|_| StartupError::InvalidStatus(code)))
            .transpose()?;

        Ok(Self {
            routes: routes.with_forced_status(force_status),
            config,
        })
    }
}
