use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ApiConfig;
use crate::core::queue::WorkQueue;
use crate::core::stats::PipelineStats;
use crate::core::{Block, WorkItem};
use crate::rpc::{PAGE_SIZE, TxSource};

/// How many pages of [`PAGE_SIZE`] transactions to pull per block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagePolicy {
    /// `None` keeps fetching until an empty page.
    pub max_pages: Option<usize>,
}

impl PagePolicy {
    pub fn from_config(api: &ApiConfig) -> Self {
        Self {
            max_pages: api.page_limit(),
        }
    }
}

impl Default for PagePolicy {
    fn default() -> Self {
        Self::from_config(&ApiConfig::default())
    }
}

/// Why ingestion of a block ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    /// An empty page was returned.
    Exhausted,
    /// The page cap was reached.
    Truncated,
    /// A page fetch failed; the rest of the block is skipped.
    FetchFailed,
    /// Shutdown was requested or the queue closed.
    Interrupted,
}

/// The single producer: processes one block at a time, in arrival order,
/// pushing its transactions onto the work queue.
pub struct IngestionDriver {
    source: Arc<dyn TxSource>,
    queue: WorkQueue<WorkItem>,
    policy: PagePolicy,
    stats: Arc<PipelineStats>,
    shutdown: CancellationToken,
}

impl IngestionDriver {
    pub fn new(
        source: Arc<dyn TxSource>,
        queue: WorkQueue<WorkItem>,
        policy: PagePolicy,
        stats: Arc<PipelineStats>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            source,
            queue,
            policy,
            stats,
            shutdown,
        }
    }

    /// Run until shutdown or until the block channel closes.
    pub async fn run(self, mut blocks: mpsc::Receiver<Block>) {
        info!("Ingestion driver started, waiting for blocks...");

        loop {
            if self.queue.is_closed() {
                warn!("Work queue closed, no more blocks will be ingested");
                break;
            }
            let block = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                block = blocks.recv() => match block {
                    Some(block) => block,
                    None => {
                        info!("Block feed closed");
                        break;
                    }
                },
            };

            let (enqueued, outcome) = self.ingest_block(&block).await;
            info!(
                height = block.height,
                enqueued,
                outcome = ?outcome,
                "Block ingested"
            );
            if outcome == BlockOutcome::Interrupted {
                break;
            }
        }

        let snap = self.stats.snapshot();
        info!(
            "Ingestion driver stopping after {} blocks, {} txs",
            snap.blocks, snap.enqueued
        );
    }

    /// Page through one block's transactions and enqueue them in fetch order.
    pub async fn ingest_block(&self, block: &Block) -> (usize, BlockOutcome) {
        self.stats.record_block();
        let mut enqueued = 0;
        let mut page = 0;

        let outcome = loop {
            if self.policy.max_pages.is_some_and(|max| page >= max) {
                if block.tx_count.is_some_and(|n| n > enqueued as u64) {
                    debug!(
                        height = block.height,
                        tx_count = ?block.tx_count,
                        "Page cap reached, remaining transactions skipped"
                    );
                }
                break BlockOutcome::Truncated;
            }

            let offset = page * PAGE_SIZE;
            let fetched = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break BlockOutcome::Interrupted,
                res = self.source.fetch_page(&block.id, offset) => res,
            };
            let txs = match fetched {
                Ok(txs) => txs,
                Err(e) => {
                    warn!(height = block.height, offset, "Failed to fetch txs: {e}");
                    break BlockOutcome::FetchFailed;
                }
            };
            if txs.is_empty() {
                break BlockOutcome::Exhausted;
            }

            debug!(height = block.height, offset, count = txs.len(), "Fetched page");
            for tx in txs {
                let item = WorkItem {
                    block_height: block.height,
                    tx,
                };
                let sent = tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => return (enqueued, BlockOutcome::Interrupted),
                    sent = self.queue.enqueue(item) => sent,
                };
                if let Err(e) = sent {
                    warn!(height = block.height, "Dropping remaining txs: {e}");
                    return (enqueued, BlockOutcome::Interrupted);
                }
                enqueued += 1;
                self.stats.record_enqueued();
            }
            page += 1;
        };

        (enqueued, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Transaction, Vout};
    use crate::error::{Error, Result};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Serves `total` synthetic txs per block in pages, optionally failing one page.
    struct FakeSource {
        totals: HashMap<String, usize>,
        fail_at: Option<(&'static str, usize)>,
        calls: Mutex<Vec<(String, usize)>>,
    }

    impl FakeSource {
        fn new(totals: &[(&str, usize)]) -> Self {
            Self {
                totals: totals.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
                fail_at: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(String, usize)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TxSource for FakeSource {
        async fn fetch_page(&self, block_hash: &str, offset: usize) -> Result<Vec<Transaction>> {
            self.calls.lock().unwrap().push((block_hash.to_string(), offset));
            if self.fail_at.is_some_and(|(hash, at)| hash == block_hash && at == offset) {
                return Err(Error::Status {
                    status: reqwest::StatusCode::BAD_GATEWAY,
                    url: format!("/block/{block_hash}/txs/{offset}"),
                });
            }
            let total = self.totals.get(block_hash).copied().unwrap_or(0);
            let end = total.min(offset + PAGE_SIZE);
            Ok((offset..end)
                .map(|i| Transaction {
                    txid: format!("{block_hash}:{i}"),
                    vout: vec![Vout {
                        value: 1_000,
                        script_pubkey: None,
                        script_type: None,
                        address: None,
                    }],
                })
                .collect())
        }
    }

    fn block(id: &str, height: u32) -> Block {
        Block {
            id: id.to_string(),
            height,
            tx_count: None,
        }
    }

    fn driver(
        source: Arc<FakeSource>,
        queue: &WorkQueue<WorkItem>,
        policy: PagePolicy,
    ) -> IngestionDriver {
        IngestionDriver::new(
            source,
            queue.clone(),
            policy,
            Arc::new(PipelineStats::new()),
            CancellationToken::new(),
        )
    }

    async fn drain(queue: &WorkQueue<WorkItem>) -> Vec<WorkItem> {
        queue.close().unwrap();
        let mut items = Vec::new();
        while let Some(item) = queue.dequeue().await {
            items.push(item);
        }
        items
    }

    #[tokio::test]
    async fn empty_first_page_enqueues_nothing() {
        let source = Arc::new(FakeSource::new(&[]));
        let queue = WorkQueue::bounded(100);
        let d = driver(source.clone(), &queue, PagePolicy::default());

        let (count, outcome) = d.ingest_block(&block("empty", 1)).await;
        assert_eq!(count, 0);
        assert_eq!(outcome, BlockOutcome::Exhausted);
        assert_eq!(source.calls(), vec![("empty".to_string(), 0)]);
        assert!(drain(&queue).await.is_empty());
    }

    #[tokio::test]
    async fn default_cap_stops_after_four_pages() {
        let source = Arc::new(FakeSource::new(&[("big", 3000)]));
        let queue = WorkQueue::bounded(1000);
        let d = driver(source.clone(), &queue, PagePolicy::default());

        let (count, outcome) = d.ingest_block(&block("big", 7)).await;
        assert_eq!(count, 100);
        assert_eq!(outcome, BlockOutcome::Truncated);
        let offsets: Vec<usize> = source.calls().into_iter().map(|(_, o)| o).collect();
        assert_eq!(offsets, vec![0, 25, 50, 75]);
    }

    #[tokio::test]
    async fn uncapped_fetches_until_empty_page() {
        let source = Arc::new(FakeSource::new(&[("blk", 60)]));
        let queue = WorkQueue::bounded(1000);
        let policy = PagePolicy { max_pages: None };
        let d = driver(source.clone(), &queue, policy);

        let (count, outcome) = d.ingest_block(&block("blk", 7)).await;
        assert_eq!(count, 60);
        assert_eq!(outcome, BlockOutcome::Exhausted);
        let offsets: Vec<usize> = source.calls().into_iter().map(|(_, o)| o).collect();
        assert_eq!(offsets, vec![0, 25, 50, 75]);
    }

    #[tokio::test]
    async fn page_size_key_in_config_is_ignored() {
        let config =
            crate::config::Config::parse("[api]\npage_size = 10\nmax_pages = 0\n").unwrap();
        let source = Arc::new(FakeSource::new(&[("blk", 60)]));
        let queue = WorkQueue::bounded(1000);
        let d = driver(source.clone(), &queue, PagePolicy::from_config(&config.api));

        let (count, _) = d.ingest_block(&block("blk", 7)).await;
        assert_eq!(count, 60);
        let offsets: Vec<usize> = source.calls().into_iter().map(|(_, o)| o).collect();
        assert!(offsets.windows(2).all(|w| w[1] - w[0] == PAGE_SIZE));

        let ids: std::collections::HashSet<String> =
            drain(&queue).await.into_iter().map(|i| i.tx.txid).collect();
        assert_eq!(ids.len(), 60);
    }

    #[tokio::test]
    async fn preserves_fetch_order() {
        let source = Arc::new(FakeSource::new(&[("blk", 60)]));
        let queue = WorkQueue::bounded(1000);
        let d = driver(source, &queue, PagePolicy::default());
        d.ingest_block(&block("blk", 42)).await;

        let items = drain(&queue).await;
        let ids: Vec<String> = items.iter().map(|i| i.tx.txid.clone()).collect();
        let expected: Vec<String> = (0..60).map(|i| format!("blk:{i}")).collect();
        assert_eq!(ids, expected);
        assert!(items.iter().all(|i| i.block_height == 42));
    }

    #[tokio::test]
    async fn fetch_error_aborts_block() {
        let mut fake = FakeSource::new(&[("blk", 100)]);
        fake.fail_at = Some(("blk", 25));
        let source = Arc::new(fake);
        let queue = WorkQueue::bounded(1000);
        let d = driver(source.clone(), &queue, PagePolicy::default());

        let (count, outcome) = d.ingest_block(&block("blk", 1)).await;
        assert_eq!(count, 25);
        assert_eq!(outcome, BlockOutcome::FetchFailed);
        assert_eq!(source.calls().len(), 2);
    }

    #[tokio::test]
    async fn failed_block_does_not_stop_driver() {
        let mut fake = FakeSource::new(&[("bad", 50), ("good", 10)]);
        fake.fail_at = Some(("bad", 0));
        let source = Arc::new(fake);
        let queue = WorkQueue::bounded(1000);
        let d = driver(source, &queue, PagePolicy::default());

        let (tx, rx) = mpsc::channel(4);
        tx.send(block("bad", 1)).await.unwrap();
        tx.send(block("good", 2)).await.unwrap();
        drop(tx);
        d.run(rx).await;

        let items = drain(&queue).await;
        assert_eq!(items.len(), 10);
        assert!(items.iter().all(|i| i.block_height == 2));
    }

    #[tokio::test]
    async fn blocks_are_processed_sequentially() {
        let source = Arc::new(FakeSource::new(&[("a", 30), ("b", 30)]));
        let queue = WorkQueue::bounded(1000);
        let d = driver(source, &queue, PagePolicy::default());

        let (tx, rx) = mpsc::channel(4);
        tx.send(block("a", 1)).await.unwrap();
        tx.send(block("b", 2)).await.unwrap();
        drop(tx);
        d.run(rx).await;

        let heights: Vec<u32> = drain(&queue).await.iter().map(|i| i.block_height).collect();
        assert_eq!(heights.len(), 60);
        assert!(heights[..30].iter().all(|&h| h == 1));
        assert!(heights[30..].iter().all(|&h| h == 2));
    }

    #[tokio::test]
    async fn shutdown_unblocks_full_queue() {
        let source = Arc::new(FakeSource::new(&[("blk", 100)]));
        let queue = WorkQueue::bounded(5);
        let shutdown = CancellationToken::new();
        let d = IngestionDriver::new(
            source,
            queue.clone(),
            PagePolicy::default(),
            Arc::new(PipelineStats::new()),
            shutdown.clone(),
        );

        let (tx, rx) = mpsc::channel(4);
        tx.send(block("blk", 1)).await.unwrap();
        let handle = tokio::spawn(d.run(rx));

        // nothing consumes, so the driver parks on the full queue
        while queue.len() < 5 {
            tokio::task::yield_now().await;
        }
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("driver should observe shutdown while blocked")
            .unwrap();

        // the queue is still open; closing is the pool's job
        assert!(!queue.is_closed());
        assert_eq!(drain(&queue).await.len(), 5);
    }

    #[tokio::test]
    async fn closed_queue_is_soft_failure() {
        let source = Arc::new(FakeSource::new(&[("blk", 10)]));
        let queue = WorkQueue::bounded(100);
        queue.close().unwrap();
        let d = driver(source, &queue, PagePolicy::default());

        let (count, outcome) = d.ingest_block(&block("blk", 1)).await;
        assert_eq!(count, 0);
        assert_eq!(outcome, BlockOutcome::Interrupted);
    }

    #[tokio::test]
    async fn driver_exits_once_queue_is_closed() {
        let source = Arc::new(FakeSource::new(&[("blk", 10)]));
        let queue = WorkQueue::bounded(100);
        queue.close().unwrap();
        let d = driver(source.clone(), &queue, PagePolicy::default());

        let (tx, rx) = mpsc::channel(4);
        tx.send(block("blk", 1)).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), d.run(rx))
            .await
            .expect("driver should not wait on a closed queue");
        assert!(source.calls().is_empty());
    }

    /// One page holding a single whale, then nothing.
    struct WhaleSource;

    #[async_trait]
    impl TxSource for WhaleSource {
        async fn fetch_page(&self, _block_hash: &str, offset: usize) -> Result<Vec<Transaction>> {
            if offset > 0 {
                return Ok(Vec::new());
            }
            let out = |value| Vout {
                value,
                script_pubkey: None,
                script_type: None,
                address: None,
            };
            Ok(vec![
                Transaction {
                    txid: "whale".into(),
                    vout: vec![out(500_000_000_000), out(1)],
                },
                Transaction {
                    txid: "boundary".into(),
                    vout: vec![out(1_000_000_000)],
                },
                Transaction {
                    txid: "minnow".into(),
                    vout: vec![out(25_000)],
                },
            ])
        }
    }

    #[tokio::test]
    async fn feed_to_reporter_with_fallback_price() {
        use crate::core::WhaleEvent;
        use crate::core::valuation::PriceStore;
        use crate::notifications::Reporter;
        use crate::signals::WhaleClassifier;
        use crate::workers::{WorkerContext, WorkerPool};

        #[derive(Default)]
        struct Collect(Mutex<Vec<WhaleEvent>>);
        impl Reporter for Collect {
            fn report(&self, event: &WhaleEvent) {
                self.0.lock().unwrap().push(event.clone());
            }
        }

        let reporter = Arc::new(Collect::default());
        let stats = Arc::new(PipelineStats::new());
        let queue = WorkQueue::bounded(4);
        // price never refreshed, so the fallback applies
        let pool = WorkerPool::start(
            3,
            queue.clone(),
            WorkerContext {
                classifier: WhaleClassifier::from_btc(10.0).unwrap(),
                prices: Arc::new(PriceStore::new(60_000.0)),
                reporter: reporter.clone(),
                stats: stats.clone(),
            },
        );
        let driver = IngestionDriver::new(
            Arc::new(WhaleSource),
            queue,
            PagePolicy::default(),
            stats.clone(),
            CancellationToken::new(),
        );

        let (tx, rx) = mpsc::channel(4);
        tx.send(block("00aa", 870_000)).await.unwrap();
        drop(tx);
        driver.run(rx).await;
        pool.stop().await;

        let events = reporter.0.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].txid, "whale");
        assert_eq!(events[0].block_height, 870_000);
        assert!((events[0].value_btc - 5000.00000001).abs() < 1e-8);
        assert!((events[0].value_fiat - 5000.00000001 * 60_000.0).abs() < 1e-3);

        let snap = stats.snapshot();
        assert_eq!(snap.blocks, 1);
        assert_eq!(snap.enqueued, 3);
        assert_eq!(snap.classified, 3);
        assert_eq!(snap.whales, 1);
    }
}
