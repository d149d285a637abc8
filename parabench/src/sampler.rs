use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread::JoinHandle,
    time::Duration,
};

use crossbeam::channel::{self, RecvTimeoutError, Sender};

use crate::{error::HarnessError, host::Host};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Background heap sampler tracking the peak usage over its lifetime.
///
/// Runs on its own OS thread so a saturated async runtime cannot starve it.
/// The thread sleeps on a stop channel between polls, so stopping never waits
/// for a whole interval.
pub struct MemorySampler {
    peak: Arc<AtomicU64>,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MemorySampler {
    pub fn start(host: Arc<dyn Host>, interval: Duration) -> Result<Self, HarnessError> {
        let peak = Arc::new(AtomicU64::new(host.heap_used_bytes()));
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);

        let thread_peak = Arc::clone(&peak);
        let handle = std::thread::Builder::new()
            .name("memory-sampler".into())
            .spawn(move || {
                loop {
                    thread_peak.fetch_max(host.heap_used_bytes(), Ordering::Relaxed);
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        // Explicit stop or the sampler was dropped
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                thread_peak.fetch_max(host.heap_used_bytes(), Ordering::Relaxed);
            })
            .map_err(HarnessError::WorkerSpawn)?;

        Ok(Self {
            peak,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stops sampling and waits for the sampler thread to exit.
    ///
    /// Once this returns the peak is final. Calling it again is a no-op.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("Memory sampler thread panicked; peak may be incomplete");
            }
        }
    }

    pub fn peak_bytes(&self) -> u64 {
        self.peak.load(Ordering::Relaxed)
    }

    pub fn peak_mb(&self) -> f64 {
        self.peak_bytes() as f64 / BYTES_PER_MB
    }
}

impl Drop for MemorySampler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::Instant;

    use super::*;

    /// Host whose heap reading is set by the test.
    #[derive(Default)]
    pub(crate) struct ScriptedHost {
        pub heap: AtomicU64,
        pub reads: AtomicU64,
    }

    impl Host for ScriptedHost {
        fn heap_used_bytes(&self) -> u64 {
            self.reads.fetch_add(1, Ordering::Relaxed);
            self.heap.load(Ordering::Relaxed)
        }
        fn gc_time(&self) -> Duration {
            Duration::ZERO
        }
        fn request_gc(&self) {}
        fn vector_width(&self) -> usize {
            4
        }
        fn allocator_name(&self) -> String {
            "scripted".into()
        }
    }

    #[test]
    fn peak_covers_every_observed_value() {
        let host = Arc::new(ScriptedHost::default());
        host.heap.store(100, Ordering::Relaxed);
        let mut sampler =
            MemorySampler::start(host.clone(), Duration::from_millis(1)).unwrap();

        let mut observed = Vec::new();
        for value in [300, 5_000, 200, 50] {
            host.heap.store(value, Ordering::Relaxed);
            observed.push(value);
            std::thread::sleep(Duration::from_millis(30));
        }
        sampler.stop();

        assert_eq!(sampler.peak_bytes(), 5_000);
        assert!(observed.iter().all(|v| sampler.peak_bytes() >= *v));
    }

    #[test]
    fn stop_is_idempotent_and_prompt() {
        let host = Arc::new(ScriptedHost::default());
        let mut sampler = MemorySampler::start(host, Duration::from_secs(60)).unwrap();
        let start = Instant::now();
        sampler.stop();
        sampler.stop();
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn sampler_does_not_spin() {
        let host = Arc::new(ScriptedHost::default());
        let mut sampler =
            MemorySampler::start(host.clone(), Duration::from_millis(10)).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        sampler.stop();
        // ~10 polls plus the start/stop reads; a spinning loop would do millions.
        assert!(host.reads.load(Ordering::Relaxed) < 100);
    }

    #[test]
    fn peak_mb_converts_bytes() {
        let host = Arc::new(ScriptedHost::default());
        host.heap.store(3 * 1024 * 1024, Ordering::Relaxed);
        let mut sampler = MemorySampler::start(host, Duration::from_millis(5)).unwrap();
        sampler.stop();
        assert_eq!(sampler.peak_mb(), 3.0);
    }
}
