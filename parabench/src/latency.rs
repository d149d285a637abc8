use std::time::Duration;

use crossbeam::queue::SegQueue;

/// Lock-free collector of per-task latencies, in nanoseconds.
///
/// Any number of tasks may call [`record`](Self::record) concurrently.
#[derive(Debug, Default)]
pub struct LatencyRecorder {
    samples: SegQueue<u64>,
}

impl LatencyRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, latency: Duration) {
        self.samples.push(latency.as_nanos() as u64);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Removes every queued sample and returns them sorted ascending.
    pub fn drain_sorted(&self) -> Vec<u64> {
        let mut out = Vec::with_capacity(self.samples.len());
        while let Some(sample) = self.samples.pop() {
            out.push(sample);
        }
        out.sort_unstable();
        out
    }

    /// 99th percentile of everything recorded so far, `ZERO` when empty.
    ///
    /// Consumes the queued samples.
    pub fn percentile99(&self) -> Duration {
        Duration::from_nanos(percentile(&self.drain_sorted(), 0.99))
    }

    /// Smallest and 99th percentile latency, consuming the queue.
    pub fn min_and_p99(&self) -> (Duration, Duration) {
        let sorted = self.drain_sorted();
        let min = sorted.first().copied().unwrap_or(0);
        (Duration::from_nanos(min), Duration::from_nanos(percentile(&sorted, 0.99)))
    }
}

/// Value at index `floor(q * len)` of an ascending slice; 0 when empty.
pub fn percentile(sorted: &[u64], q: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let index = ((sorted.len() as f64) * q) as usize;
    sorted[index.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn p99_of_one_to_hundred_is_hundred() {
        let recorder = LatencyRecorder::new();
        // Shuffled insertion order must not matter.
        for v in (1..=100u64).rev() {
            recorder.record(Duration::from_micros(v));
        }
        assert_eq!(recorder.percentile99(), Duration::from_micros(100));
    }

    #[test]
    fn empty_recorder_reports_zero() {
        let recorder = LatencyRecorder::new();
        assert_eq!(recorder.percentile99(), Duration::ZERO);
        assert_eq!(recorder.min_and_p99(), (Duration::ZERO, Duration::ZERO));
    }

    #[test]
    fn single_sample() {
        let recorder = LatencyRecorder::new();
        recorder.record(Duration::from_nanos(42));
        assert_eq!(recorder.percentile99(), Duration::from_nanos(42));
        assert!(recorder.is_empty());
    }

    #[test]
    fn percentile_index_rule() {
        let sorted: Vec<u64> = (0..1000).collect();
        assert_eq!(percentile(&sorted, 0.99), 990);
        assert_eq!(percentile(&sorted, 0.0), 0);
        assert_eq!(percentile(&sorted, 1.0), 999);
    }

    #[test]
    fn concurrent_records_are_all_kept() {
        let recorder = Arc::new(LatencyRecorder::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let recorder = Arc::clone(&recorder);
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        recorder.record(Duration::from_nanos(t * 1000 + i));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(recorder.len(), 8000);
        let (min, p99) = recorder.min_and_p99();
        assert_eq!(min, Duration::ZERO);
        assert_eq!(p99, Duration::from_nanos(7920));
    }
}
