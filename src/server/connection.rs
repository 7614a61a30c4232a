// Connection handling module
// Serves a single TCP connection and reacts to the shutdown broadcast

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::watch;

use super::shutdown::InFlight;
use crate::config::AppState;
use crate::handler;
use crate::logger;

/// Serve one connection until the client closes it, the connection timeout
/// fires, or shutdown is broadcast and the current request has completed.
///
/// # Arguments
///
/// * `stream` - The accepted TCP stream
/// * `peer_addr` - The peer's socket address, recorded in the access log
/// * `state` - Shared application state
/// * `in_flight` - Request tracker consulted during shutdown
/// * `shutdown` - Flips to `true` when the server stops accepting
pub async fn serve_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: Arc<AppState>,
    in_flight: InFlight,
    mut shutdown: watch::Receiver<bool>,
) {
    if state.config.logging.access_log {
        logger::log_connection_accepted(&peer_addr);
    }

    let io = TokioIo::new(stream);
    let timeout = state.config.connection_timeout();

    let mut builder = http1::Builder::new();
    builder.keep_alive(state.config.server.keep_alive);

    let service = service_fn(move |req| {
        let state = Arc::clone(&state);
        let guard = in_flight.enter();
        async move {
            let response = handler::handle_request(req, state, Some(peer_addr)).await;
            drop(guard);
            response
        }
    });

    let conn = builder.serve_connection(io, service);
    tokio::pin!(conn);

    let serve = async {
        let mut shutting_down = false;
        loop {
            tokio::select! {
                res = conn.as_mut() => break res,
                () = stopped(&mut shutdown), if !shutting_down => {
                    // Finish the request in progress, then close instead of keeping alive
                    conn.as_mut().graceful_shutdown();
                    shutting_down = true;
                }
            }
        }
    };

    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, serve).await {
            Ok(res) => res,
            Err(_) => {
                logger::log_warning(&format!(
                    "Connection from {peer_addr} timed out after {} seconds",
                    limit.as_secs()
                ));
                return;
            }
        },
        None => serve.await,
    };

    if let Err(err) = result {
        logger::log_connection_error(&err);
    }
}

/// Resolve once shutdown has been broadcast (or the broadcaster is gone)
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
