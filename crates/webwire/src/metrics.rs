//! Process-wide transfer counters.

use std::sync::atomic::{AtomicU64, Ordering};

static REQUESTS_SENT: AtomicU64 = AtomicU64::new(0);
static BYTES_SENT: AtomicU64 = AtomicU64::new(0);
static BYTES_RECV: AtomicU64 = AtomicU64::new(0);

/// Total requests emitted since process start, across all connections.
pub fn requests_sent() -> u64 {
    REQUESTS_SENT.load(Ordering::Relaxed)
}

/// Total bytes written to sockets.
pub fn bytes_sent() -> u64 {
    BYTES_SENT.load(Ordering::Relaxed)
}

/// Total bytes read from sockets.
pub fn bytes_recv() -> u64 {
    BYTES_RECV.load(Ordering::Relaxed)
}

pub(crate) fn record_request() {
    REQUESTS_SENT.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_sent(bytes: usize) {
    BYTES_SENT.fetch_add(bytes as u64, Ordering::Relaxed);
}

pub(crate) fn record_recv(bytes: usize) {
    BYTES_RECV.fetch_add(bytes as u64, Ordering::Relaxed);
}
