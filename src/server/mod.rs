// Server module entry point
// Listener setup, connection serving and graceful shutdown

pub mod connection;
pub mod error;
pub mod listener;
pub mod shutdown;
pub mod signal;

// `loop` is a keyword, so the file is mounted under another name
#[path = "loop.rs"]
pub mod server_loop;

pub use error::StartupError;
pub use listener::create_listener;
pub use server_loop::Server;
pub use shutdown::{InFlight, ShutdownReport};
pub use signal::ShutdownSignal;
