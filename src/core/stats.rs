use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the driver and the workers.
#[derive(Debug, Default)]
pub struct PipelineStats {
    blocks: AtomicU64,
    enqueued: AtomicU64,
    classified: AtomicU64,
    whales: AtomicU64,
    rejected: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub blocks: u64,
    pub enqueued: u64,
    pub classified: u64,
    pub whales: u64,
    pub rejected: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_block(&self) {
        self.blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_classified(&self, whale: bool) {
        self.classified.fetch_add(1, Ordering::Relaxed);
        if whale {
            self.whales.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            blocks: self.blocks.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            classified: self.classified.load(Ordering::Relaxed),
            whales: self.whales.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}
