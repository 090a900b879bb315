use std::collections::VecDeque;
use std::time::Instant;

const SAMPLE_COUNT: usize = 60;

/// Rolling view of how often fresh snapshots arrive and how old they are.
pub struct SnapshotStats {
    arrivals: VecDeque<Instant>,
    latencies: VecDeque<f64>,
    rate: f64,
    total: u64,
}

impl Default for SnapshotStats {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStats {
    pub fn new() -> Self {
        Self {
            arrivals: VecDeque::with_capacity(SAMPLE_COUNT),
            latencies: VecDeque::with_capacity(SAMPLE_COUNT),
            rate: 0.0,
            total: 0,
        }
    }

    pub fn record_snapshot(&mut self, at: Instant, latency_secs: Option<f64>) {
        self.total += 1;

        if self.arrivals.len() >= SAMPLE_COUNT {
            self.arrivals.pop_front();
        }
        self.arrivals.push_back(at);

        if let Some(latency) = latency_secs.filter(|l| *l >= 0.0) {
            if self.latencies.len() >= SAMPLE_COUNT {
                self.latencies.pop_front();
            }
            self.latencies.push_back(latency);
        }

        if let Some(oldest) = self.arrivals.front() {
            let elapsed = at.duration_since(*oldest).as_secs_f64();
            if elapsed > 0.0 {
                self.rate = (self.arrivals.len() - 1) as f64 / elapsed;
            }
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Mean one-way age of recent snapshots in milliseconds.
    pub fn mean_latency_ms(&self) -> Option<f64> {
        if self.latencies.is_empty() {
            return None;
        }
        Some(self.latencies.iter().sum::<f64>() / self.latencies.len() as f64 * 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_rate_follows_arrivals() {
        let mut stats = SnapshotStats::new();
        let start = Instant::now();
        for i in 0..11 {
            stats.record_snapshot(start + Duration::from_millis(100 * i), None);
        }
        assert!((stats.rate() - 10.0).abs() < 0.01);
        assert_eq!(stats.total(), 11);
        assert_eq!(stats.mean_latency_ms(), None);
    }

    #[test]
    fn test_latency_ignores_clock_skew() {
        let mut stats = SnapshotStats::new();
        let now = Instant::now();
        stats.record_snapshot(now, Some(0.010));
        stats.record_snapshot(now, Some(-5.0));
        stats.record_snapshot(now, Some(0.030));
        let mean = stats.mean_latency_ms().unwrap();
        assert!((mean - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_window_is_bounded() {
        let mut stats = SnapshotStats::new();
        let start = Instant::now();
        for i in 0..(SAMPLE_COUNT as u64 * 2) {
            stats.record_snapshot(start + Duration::from_millis(i), Some(0.001));
        }
        assert_eq!(stats.arrivals.len(), SAMPLE_COUNT);
        assert_eq!(stats.latencies.len(), SAMPLE_COUNT);
    }
}
