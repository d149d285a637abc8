use std::sync::Arc;

use crate::{
    config::HarnessSettings,
    host::{Host, NativeHost},
    kernel::{Blackhole, Dataset},
};

/// Everything a burst trial shares: the read-only dataset, the result sink,
/// the host readings and the settings.
///
/// Passed explicitly instead of living in statics, so several harnesses can
/// coexist in one process.
#[derive(Clone)]
pub struct HarnessContext {
    pub dataset: Arc<Dataset>,
    pub sink: Arc<Blackhole>,
    pub host: Arc<dyn Host>,
    pub settings: HarnessSettings,
}

impl HarnessContext {
    pub fn new(settings: HarnessSettings) -> Self {
        Self::with_host(settings, Arc::new(NativeHost::new()))
    }

    pub fn with_host(settings: HarnessSettings, host: Arc<dyn Host>) -> Self {
        let dataset = Dataset::random(settings.max_data_size, settings.seed);
        Self {
            dataset: Arc::new(dataset),
            sink: Arc::new(Blackhole::new()),
            host,
            settings,
        }
    }

    /// Asks the host to collect and waits for memory to return to baseline.
    pub async fn settle(&self) {
        self.host.request_gc();
        tokio::time::sleep(self.settings.settle_pause).await;
    }
}

impl std::fmt::Debug for HarnessContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarnessContext")
            .field("dataset_len", &self.dataset.len())
            .field("allocator", &self.host.allocator_name())
            .field("settings", &self.settings)
            .finish()
    }
}
