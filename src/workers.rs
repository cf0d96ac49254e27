use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::WorkItem;
use crate::core::queue::WorkQueue;
use crate::core::stats::PipelineStats;
use crate::core::valuation::PriceStore;
use crate::notifications::Reporter;
use crate::signals::WhaleClassifier;

/// Everything a worker needs besides the queue. Shared read-only.
#[derive(Clone)]
pub struct WorkerContext {
    pub classifier: WhaleClassifier,
    pub prices: Arc<PriceStore>,
    pub reporter: Arc<dyn Reporter>,
    pub stats: Arc<PipelineStats>,
}

/// Fixed set of tasks draining the work queue.
pub struct WorkerPool {
    queue: WorkQueue<WorkItem>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers on the current runtime.
    pub fn start(size: usize, queue: WorkQueue<WorkItem>, ctx: WorkerContext) -> Self {
        let handles = (0..size)
            .map(|id| tokio::spawn(run_worker(id, queue.clone(), ctx.clone())))
            .collect();
        info!(workers = size, capacity = queue.capacity(), "Worker pool started");
        Self { queue, handles }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Close the queue and wait for every worker to drain it and exit.
    pub async fn stop(self) {
        if !self.queue.is_empty() {
            info!(
                pending = self.queue.len(),
                workers = self.size(),
                "Draining queued transactions"
            );
        }
        if let Err(e) = self.queue.close() {
            warn!("Stopping worker pool: {e}");
        }
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!("Worker task failed: {e}");
            }
        }
        info!("Worker pool stopped");
    }
}

async fn run_worker(id: usize, queue: WorkQueue<WorkItem>, ctx: WorkerContext) {
    debug!(worker = id, "Worker started");
    while let Some(item) = queue.dequeue().await {
        process(&ctx, &item);
    }
    debug!(worker = id, "Worker exiting, queue closed");
}

fn process(ctx: &WorkerContext, item: &WorkItem) {
    match ctx.classifier.classify(item, ctx.prices.get()) {
        Ok(Some(event)) => {
            ctx.stats.record_classified(true);
            ctx.reporter.report(&event);
        }
        Ok(None) => ctx.stats.record_classified(false),
        Err(e) => {
            ctx.stats.record_rejected();
            warn!(height = item.block_height, "Skipping transaction: {e}");
        }
    }
}
