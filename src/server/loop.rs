// Server loop module
// Accepts connections until shutdown, then drains in-flight requests

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;

use super::connection::serve_connection;
use super::error::StartupError;
use super::listener::create_listener;
use super::shutdown::{InFlight, ShutdownReport};
use crate::config::AppState;
use crate::logger;

/// A bound, not yet serving, HTTP server
pub struct Server {
    listener: TcpListener,
    state: Arc<AppState>,
    boot_started: Instant,
}

impl Server {
    /// Bind the listening socket; must be called inside a Tokio runtime
    ///
    /// `boot_started` is the instant the process began booting, used for the
    /// startup-complete signal.
    pub fn bind(
        addr: SocketAddr,
        state: Arc<AppState>,
        boot_started: Instant,
    ) -> Result<Self, StartupError> {
        let listener = create_listener(addr)?;
        Ok(Self {
            listener,
            state,
            boot_started,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until `shutdown` resolves, then stop accepting and give
    /// in-flight requests the configured grace period to finish.
    pub async fn run<F>(self, shutdown: F) -> ShutdownReport
    where
        F: Future<Output = ()>,
    {
        let Self {
            listener,
            state,
            boot_started,
        } = self;
        let grace = state.config.shutdown_grace();

        match listener.local_addr() {
            Ok(addr) => logger::log_startup_complete(&addr, boot_started.elapsed()),
            Err(e) => logger::log_error(&format!("Listener has no local address: {e}")),
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let in_flight = InFlight::new();
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,

                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            connections.spawn(serve_connection(
                                stream,
                                peer_addr,
                                Arc::clone(&state),
                                in_flight.clone(),
                                stop_rx.clone(),
                            ));
                        }
                        Err(e) => {
                            logger::log_error(&format!("Failed to accept connection: {e}"));
                            let pause = accept_backoff(&e);
                            if !pause.is_zero() {
                                tokio::time::sleep(pause).await;
                            }
                        }
                    }
                }

                // Reap finished connection tasks
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        // Close the listening socket first so no new connection sneaks in
        drop(listener);
        let _ = stop_tx.send(true);

        drain(connections, &in_flight, grace).await
    }
}

/// Pause before accepting again after `err`.
///
/// A connection that died in the backlog is the peer's problem; anything
/// else (descriptor exhaustion, memory) repeats until resources free up.
fn accept_backoff(err: &io::Error) -> Duration {
    match err.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionRefused => Duration::ZERO,
        _ => ACCEPT_BACKOFF,
    }
}

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Wait for every connection task, at most `grace`; abort the rest
async fn drain(
    mut connections: JoinSet<()>,
    in_flight: &InFlight,
    grace: Duration,
) -> ShutdownReport {
    logger::log_shutdown_draining(in_flight.count(), grace);

    let drained = tokio::time::timeout(grace, async {
        while connections.join_next().await.is_some() {}
    })
    .await
    .is_ok();

    if drained {
        logger::log_shutdown_complete();
        return ShutdownReport {
            drained: true,
            aborted_requests: 0,
            aborted_connections: 0,
        };
    }

    let aborted_requests = in_flight.count();
    let aborted_connections = connections.len();
    logger::log_shutdown_timeout(aborted_requests, grace);
    connections.abort_all();

    ShutdownReport {
        drained: false,
        aborted_requests,
        aborted_connections,
    }
}
