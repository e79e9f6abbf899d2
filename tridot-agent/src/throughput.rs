use chrono::{DateTime, Utc};

/// Difference between two readings of a monotonically increasing counter.
/// A reading below the previous one means the counter was reset (interface
/// recreated), so the current value is the delta.
pub fn counter_delta(current: u64, previous: u64) -> u64 {
    if current >= previous {
        current - previous
    } else {
        current
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Throughput {
    pub rx_bps: f64,
    pub tx_bps: f64,
}

impl Throughput {
    pub fn total_mbps(&self) -> f64 {
        (self.rx_bps + self.tx_bps) / 1_000_000.0
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    rx_bytes: u64,
    tx_bytes: u64,
    at: DateTime<Utc>,
}

/// Turns successive byte counter readings into bits per second.
#[derive(Debug, Default)]
pub struct ThroughputTracker {
    previous: Option<Sample>,
}

impl ThroughputTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a reading and returns the rate since the previous one.
    ///
    /// The first reading, a non-advancing clock, and a direction whose counter
    /// went backwards all yield 0 for that interval; the reading always
    /// becomes the new baseline.
    pub fn observe(&mut self, now: DateTime<Utc>, rx_bytes: u64, tx_bytes: u64) -> Throughput {
        let current = Sample {
            rx_bytes,
            tx_bytes,
            at: now,
        };
        let Some(previous) = self.previous.replace(current) else {
            return Throughput::default();
        };

        let elapsed = (now - previous.at).num_milliseconds() as f64 / 1000.0;
        if elapsed <= 0.0 {
            return Throughput::default();
        }

        Throughput {
            rx_bps: rate(rx_bytes, previous.rx_bytes, elapsed),
            tx_bps: rate(tx_bytes, previous.tx_bytes, elapsed),
        }
    }
}

fn rate(current: u64, previous: u64, elapsed_secs: f64) -> f64 {
    if current < previous {
        return 0.0;
    }
    (current - previous) as f64 * 8.0 / elapsed_secs
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn counter_delta_handles_reset() {
        assert_eq!(counter_delta(150, 100), 50);
        assert_eq!(counter_delta(100, 100), 0);
        assert_eq!(counter_delta(20, 150), 20);
    }

    #[test]
    fn first_sample_has_no_rate() {
        let mut tracker = ThroughputTracker::new();
        assert_eq!(tracker.observe(at(0), 100, 100), Throughput::default());
    }

    #[test]
    fn rate_is_bits_per_second() {
        let mut tracker = ThroughputTracker::new();
        tracker.observe(at(0), 100, 1_000);
        let rate = tracker.observe(at(10), 150, 2_000);

        assert_eq!(rate.rx_bps, 40.0);
        assert_eq!(rate.tx_bps, 800.0);
    }

    #[test]
    fn reset_zeroes_rate_and_rebaselines() {
        let mut tracker = ThroughputTracker::new();
        tracker.observe(at(0), 150, 150);

        let reset = tracker.observe(at(10), 20, 250);
        assert_eq!(reset.rx_bps, 0.0);
        assert_eq!(reset.tx_bps, 80.0);

        let next = tracker.observe(at(20), 70, 250);
        assert_eq!(next.rx_bps, 40.0);
        assert_eq!(next.tx_bps, 0.0);
    }

    #[test]
    fn clock_going_backwards_yields_zero() {
        let mut tracker = ThroughputTracker::new();
        tracker.observe(at(10), 0, 0);
        assert_eq!(tracker.observe(at(10), 500, 500), Throughput::default());
        assert_eq!(tracker.observe(at(5), 900, 900), Throughput::default());
    }

    #[test]
    fn total_mbps_sums_directions() {
        let rate = Throughput {
            rx_bps: 1_500_000.0,
            tx_bps: 500_000.0,
        };
        assert_eq!(rate.total_mbps(), 2.0);
    }
}
