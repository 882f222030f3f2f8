use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Lock-free counters describing a running server. Cheap to clone; clones share
/// the same counters.
#[derive(Debug, Clone, Default)]
pub struct ServerMetrics {
    accepted: Arc<AtomicU64>,          // Sessions accepted since start
    active: Arc<AtomicU64>,            // Sessions currently being served
    received: Arc<AtomicU64>,          // Envelopes decoded from clients
    relayed: Arc<AtomicU64>,           // Successful broadcast deliveries
    delivery_failures: Arc<AtomicU64>, // Broadcast deliveries skipped after a send failure
    handler_errors: Arc<AtomicU64>,    // Sessions that ended with an error
}

/// Point-in-time copy of [`ServerMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub accepted: u64,
    pub active: u64,
    pub received: u64,
    pub relayed: u64,
    pub delivery_failures: u64,
    pub handler_errors: u64,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_opened(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_relayed(&self, delivered: u64, failed: u64) {
        self.relayed.fetch_add(delivered, Ordering::Relaxed);
        self.delivery_failures.fetch_add(failed, Ordering::Relaxed);
    }

    pub fn record_handler_error(&self) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn active_sessions(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            relayed: self.relayed.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_counters() {
        let metrics = ServerMetrics::new();
        let handle = metrics.clone();

        handle.session_opened();
        handle.session_opened();
        handle.session_closed();
        handle.record_received();
        handle.record_relayed(3, 1);
        handle.record_handler_error();

        assert_eq!(
            metrics.snapshot(),
            MetricsSnapshot {
                accepted: 2,
                active: 1,
                received: 1,
                relayed: 3,
                delivery_failures: 1,
                handler_errors: 1,
            }
        );
        assert_eq!(metrics.active_sessions(), 1);
    }
}
