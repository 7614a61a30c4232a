// Graceful shutdown module
// Tracks in-flight requests so the server knows when it may exit

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Counter of requests currently inside a handler
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    count: AtomicUsize,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a request as started; it is finished when the guard drops
    pub fn enter(&self) -> RequestGuard {
        self.inner.count.fetch_add(1, Ordering::SeqCst);
        RequestGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn count(&self) -> usize {
        self.inner.count.load(Ordering::SeqCst)
    }
}

/// Held for the lifetime of one request
#[derive(Debug)]
pub struct RequestGuard {
    inner: Arc<Inner>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.inner.count.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Outcome of a server run once its accept loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Every connection finished inside the grace period
    pub drained: bool,
    /// Requests still running when the grace period elapsed
    pub aborted_requests: usize,
    /// Connections force-closed when the grace period elapsed
    pub aborted_connections: usize,
}
