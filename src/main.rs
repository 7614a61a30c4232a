use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use hello_native::config::{self, AppState};
use hello_native::logger;
use hello_native::server::{Server, ShutdownSignal, StartupError};

fn main() -> ExitCode {
    let boot_started = Instant::now();

    match run(boot_started) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            logger::log_error(&format!("Startup failed: {e}"));
            ExitCode::FAILURE
        }
    }
}

fn run(boot_started: Instant) -> Result<(), StartupError> {
    let cfg = config::Config::load()?;
    logger::init(&cfg.logging).map_err(StartupError::Logger)?;
    logger::log_config_loaded(&cfg);

    // Create Tokio runtime, sizing the worker pool from configuration
    let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
    runtime_builder.enable_all();
    if let Some(workers) = cfg.server.workers {
        runtime_builder.worker_threads(workers);
    }
    let runtime = runtime_builder.build().map_err(StartupError::Runtime)?;

    runtime.block_on(async_main(cfg, boot_started))
}

async fn async_main(cfg: config::Config, boot_started: Instant) -> Result<(), StartupError> {
    let addr = cfg.get_socket_addr().map_err(StartupError::InvalidAddress)?;
    let state = Arc::new(AppState::new(cfg)?);

    let signals = ShutdownSignal::register().map_err(StartupError::Signal)?;
    let server = Server::bind(addr, state, boot_started)?;

    // ShutdownTimeout is reported by the server itself and is not fatal
    server
        .run(async move {
            let signal = signals.recv().await;
            logger::log_shutdown_requested(signal);
        })
        .await;

    Ok(())
}
