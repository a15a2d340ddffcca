//! Network condition simulation

use std::ops::Range;
use std::time::Duration;

use rand::Rng;

/// Simulated network conditions for source connections.
///
/// Latency is drawn from the caller's RNG so that runs with the same seed
/// see the same delays. Bodies are cut into chunks of random size up to
/// `max_chunk` bytes to exercise partial reads.
#[derive(Debug, Clone)]
pub struct NetworkSimulator {
    latency: Range<u64>,
    bandwidth_limit: u64, // bytes per second
    max_chunk: usize,
}

impl Default for NetworkSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkSimulator {
    /// Creates a simulator with no latency, no bandwidth limit, and 4 KiB chunks.
    pub fn new() -> Self {
        Self {
            latency: 0..0,
            bandwidth_limit: u64::MAX,
            max_chunk: 4096,
        }
    }

    /// Returns builder for customizing network conditions.
    pub fn builder() -> NetworkSimulatorBuilder {
        NetworkSimulatorBuilder::new()
    }

    /// Draws a latency for one round trip.
    pub fn latency<R: Rng>(&self, rng: &mut R) -> Duration {
        if self.latency.is_empty() {
            return Duration::ZERO;
        }
        Duration::from_millis(rng.random_range(self.latency.clone()))
    }

    /// Time needed to move `bytes` under the bandwidth limit.
    pub fn bandwidth_delay(&self, bytes: usize) -> Duration {
        if self.bandwidth_limit == u64::MAX {
            Duration::ZERO
        } else {
            let seconds = bytes as f64 / self.bandwidth_limit as f64;
            Duration::from_secs_f64(seconds)
        }
    }

    /// Draws the size of the next body chunk, at least one byte.
    pub fn chunk_size<R: Rng>(&self, rng: &mut R) -> usize {
        rng.random_range(1..=self.max_chunk)
    }
}

/// Builder for configuring network simulation parameters.
pub struct NetworkSimulatorBuilder {
    latency: Range<u64>,
    bandwidth_limit: u64,
    max_chunk: usize,
}

impl NetworkSimulatorBuilder {
    fn new() -> Self {
        Self {
            latency: 0..0,
            bandwidth_limit: u64::MAX,
            max_chunk: 4096,
        }
    }

    /// Sets latency range in milliseconds.
    pub fn latency(mut self, range: Range<u64>) -> Self {
        self.latency = range;
        self
    }

    /// Sets bandwidth limit in bytes per second.
    pub fn bandwidth_limit(mut self, bytes_per_second: u64) -> Self {
        self.bandwidth_limit = bytes_per_second.max(1);
        self
    }

    /// Sets the largest body chunk handed out at once.
    pub fn max_chunk(mut self, bytes: usize) -> Self {
        self.max_chunk = bytes.max(1);
        self
    }

    /// Creates network simulator with configured settings.
    pub fn build(self) -> NetworkSimulator {
        NetworkSimulator {
            latency: self.latency,
            bandwidth_limit: self.bandwidth_limit,
            max_chunk: self.max_chunk,
        }
    }
}
