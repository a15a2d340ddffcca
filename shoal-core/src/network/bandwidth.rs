//! Sliding-window bandwidth measurement.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Transfer direction as seen from this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upstream,
    Downstream,
}

#[derive(Debug, Default)]
struct Samples {
    entries: VecDeque<(Instant, u64)>,
    in_window: u64,
    total: u64,
}

impl Samples {
    fn expire(&mut self, now: Instant, window: Duration) {
        while let Some(&(at, bytes)) = self.entries.front() {
            if now.duration_since(at) <= window {
                break;
            }
            self.in_window -= bytes;
            self.entries.pop_front();
        }
    }
}

/// Measures recent transfer rates in both directions.
///
/// Rates are averaged over a fixed window; totals cover the tracker's
/// whole lifetime.
#[derive(Debug)]
pub struct BandwidthTracker {
    window: Duration,
    upstream: Mutex<Samples>,
    downstream: Mutex<Samples>,
}

impl BandwidthTracker {
    /// Creates a tracker averaging over `window`.
    ///
    /// # Panics
    ///
    /// Panics if `window` is zero.
    pub fn new(window: Duration) -> Self {
        assert!(!window.is_zero(), "Bandwidth window must be non-zero");
        Self {
            window,
            upstream: Mutex::new(Samples::default()),
            downstream: Mutex::new(Samples::default()),
        }
    }

    /// Records `bytes` moved in `direction` now.
    pub fn record(&self, direction: Direction, bytes: u64) {
        self.record_at(direction, bytes, Instant::now());
    }

    fn record_at(&self, direction: Direction, bytes: u64, at: Instant) {
        if bytes == 0 {
            return;
        }
        let mut samples = self.samples(direction).lock();
        samples.expire(at, self.window);
        samples.entries.push_back((at, bytes));
        samples.in_window += bytes;
        samples.total += bytes;
    }

    /// Average bytes per second over the window.
    pub fn measured_bandwidth(&self, direction: Direction) -> f64 {
        self.measured_at(direction, Instant::now())
    }

    fn measured_at(&self, direction: Direction, now: Instant) -> f64 {
        let mut samples = self.samples(direction).lock();
        samples.expire(now, self.window);
        samples.in_window as f64 / self.window.as_secs_f64()
    }

    /// Bytes moved in `direction` since creation.
    pub fn total(&self, direction: Direction) -> u64 {
        self.samples(direction).lock().total
    }

    fn samples(&self, direction: Direction) -> &Mutex<Samples> {
        match direction {
            Direction::Upstream => &self.upstream,
            Direction::Downstream => &self.downstream,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_over_window() {
        let tracker = BandwidthTracker::new(Duration::from_secs(2));
        let start = Instant::now();

        tracker.record_at(Direction::Downstream, 1000, start);
        tracker.record_at(Direction::Downstream, 3000, start + Duration::from_millis(500));

        assert_eq!(
            tracker.measured_at(Direction::Downstream, start + Duration::from_secs(1)),
            2000.0
        );
        assert_eq!(tracker.measured_at(Direction::Upstream, start), 0.0);
    }

    #[test]
    fn test_old_samples_expire_but_totals_remain() {
        let tracker = BandwidthTracker::new(Duration::from_secs(1));
        let start = Instant::now();

        tracker.record_at(Direction::Upstream, 500, start);
        let later = start + Duration::from_secs(5);

        assert_eq!(tracker.measured_at(Direction::Upstream, later), 0.0);
        assert_eq!(tracker.total(Direction::Upstream), 500);
    }

    #[test]
    #[should_panic(expected = "Bandwidth window must be non-zero")]
    fn test_zero_window_panics() {
        BandwidthTracker::new(Duration::ZERO);
    }
}
