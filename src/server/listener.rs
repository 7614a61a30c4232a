// Listener module
// Creates the service's TCP listener through socket2

use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use tokio::net::TcpListener;

use super::error::StartupError;

/// Backlog queue size passed to `listen(2)`
const BACKLOG: i32 = 128;

/// Create a `TcpListener` with `SO_REUSEADDR` enabled.
///
/// `SO_REUSEADDR` lets a restarted service bind a port still in `TIME_WAIT`.
/// `SO_REUSEPORT` is deliberately left off: a second process on the same
/// port must fail with [`StartupError::PortInUse`].
///
/// Must be called from within a Tokio runtime. On failure the socket is
/// closed before returning.
pub fn create_listener(addr: SocketAddr) -> Result<TcpListener, StartupError> {
    bind_socket(addr).map_err(|e| StartupError::bind(addr, e))
}

fn bind_socket(addr: SocketAddr) -> std::io::Result<TcpListener> {
    // Create socket with appropriate domain (IPv4 or IPv6)
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    // Set non-blocking mode for async compatibility
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    // Convert socket2::Socket to std::net::TcpListener, then to tokio::net::TcpListener
    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let listener = create_listener("127.0.0.1:0".parse().unwrap()).expect("bind");
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_second_bind_is_port_conflict() {
        let first = create_listener("127.0.0.1:0".parse().unwrap()).expect("bind");
        let addr = first.local_addr().unwrap();

        let err = create_listener(addr).unwrap_err();
        assert!(
            matches!(err, StartupError::PortInUse { addr: a, .. } if a == addr),
            "unexpected error: {err}"
        );

        // The first listener is untouched and the failed socket is gone:
        // once the first one closes the port can be bound again
        drop(first);
        let again = create_listener(addr).expect("rebind after close");
        assert_eq!(again.local_addr().unwrap(), addr);
    }
}
