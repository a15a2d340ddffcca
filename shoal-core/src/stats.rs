//! Download counters and bandwidth measurement.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::network::{BandwidthTracker, Direction};

/// Counters shared by the engine and every downloader.
#[derive(Debug)]
pub struct SwarmStats {
    sources_added: AtomicU64,
    requests_issued: AtomicU64,
    responses_processed: AtomicU64,
    bytes_requested: AtomicU64,
    bytes_received: AtomicU64,
    bandwidth: Arc<BandwidthTracker>,
}

/// Point-in-time copy of [`SwarmStats`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub sources_added: u64,
    pub requests_issued: u64,
    pub responses_processed: u64,
    pub bytes_requested: u64,
    pub bytes_received: u64,
    pub downstream_bps: f64,
    pub upstream_bps: f64,
}

impl SwarmStats {
    /// Creates zeroed counters with bandwidth averaged over `window`.
    pub fn new(window: Duration) -> Self {
        Self {
            sources_added: AtomicU64::new(0),
            requests_issued: AtomicU64::new(0),
            responses_processed: AtomicU64::new(0),
            bytes_requested: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bandwidth: Arc::new(BandwidthTracker::new(window)),
        }
    }

    /// Tracker that connectors record raw traffic into.
    pub fn bandwidth(&self) -> Arc<BandwidthTracker> {
        Arc::clone(&self.bandwidth)
    }

    pub fn source_added(&self) {
        self.sources_added.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_issued(&self, bytes: u64) {
        self.requests_issued.fetch_add(1, Ordering::Relaxed);
        self.bytes_requested.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn response_processed(&self) {
        self.responses_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn content_received(&self, bytes: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Current transfer rate in bytes per second.
    pub fn measured_bandwidth(&self, direction: Direction) -> f64 {
        self.bandwidth.measured_bandwidth(direction)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sources_added: self.sources_added.load(Ordering::Relaxed),
            requests_issued: self.requests_issued.load(Ordering::Relaxed),
            responses_processed: self.responses_processed.load(Ordering::Relaxed),
            bytes_requested: self.bytes_requested.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            downstream_bps: self.measured_bandwidth(Direction::Downstream),
            upstream_bps: self.measured_bandwidth(Direction::Upstream),
        }
    }
}

impl Default for SwarmStats {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}
