mod config;
mod core;
mod error;
mod notifications;
mod rpc;
mod signals;
mod workers;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::core::pipeline::{IngestionDriver, PagePolicy};
use crate::core::queue::WorkQueue;
use crate::core::stats::PipelineStats;
use crate::core::valuation::{PriceStore, refresh_price, run_price_refresher};
use crate::error::Result;
use crate::notifications::ConsoleReporter;
use crate::rpc::feed::BlockFeed;
use crate::rpc::{EsploraClient, PriceOracle, TxSource};
use crate::signals::WhaleClassifier;
use crate::workers::{WorkerContext, WorkerPool};

fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("whalewatch=info".parse().unwrap()),
        )
        .init();

    tracing::info!("🐳 whalewatch starting...");

    let config = Config::load_default();
    tracing::info!("Config: {:?}", config);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<()> {
    let classifier = WhaleClassifier::from_btc(config.whale.threshold_btc)?;
    tracing::info!("Whale threshold: {}", classifier.threshold());
    let client = Arc::new(EsploraClient::new(&config.api)?);
    let oracle: Arc<dyn PriceOracle> = client.clone();
    let source: Arc<dyn TxSource> = client;

    // Initial price, before anything can be classified
    let prices = Arc::new(PriceStore::new(config.price.fallback));
    let rate = refresh_price(oracle.as_ref(), &prices, &config.price.currency).await;
    if prices.is_set() {
        tracing::info!("Current BTC price: {rate:.2} {}", config.price.currency);
    } else {
        tracing::warn!(
            "Price oracle unavailable, valuing at fallback {:.2} {}",
            prices.fallback(),
            config.price.currency
        );
    }

    let stats = Arc::new(PipelineStats::new());
    let queue = WorkQueue::bounded(config.pipeline.queue_capacity);
    let pool = WorkerPool::start(
        config.pipeline.workers,
        queue.clone(),
        WorkerContext {
            classifier,
            prices: prices.clone(),
            reporter: Arc::new(ConsoleReporter::new(config.price.currency.clone())),
            stats: stats.clone(),
        },
    );
    tracing::info!("{} workers ready", pool.size());

    // No reconnect: a feed that can't be reached at startup is fatal
    let feed = match BlockFeed::connect(&config.feed.ws_url).await {
        Ok(feed) => feed,
        Err(e) => {
            pool.stop().await;
            return Err(e);
        }
    };

    let shutdown = CancellationToken::new();
    let (block_tx, block_rx) = mpsc::channel(config.feed.block_backlog);

    let listener = tokio::spawn({
        let shutdown = shutdown.clone();
        let ping = Duration::from_secs(config.feed.ping_interval_secs);
        async move {
            if let Err(e) = feed.run(block_tx, ping, shutdown).await {
                tracing::error!("Feed read failed, listener exiting: {e}");
            }
        }
    });

    let mut driver = tokio::spawn(
        IngestionDriver::new(
            source,
            queue,
            PagePolicy::from_config(&config.api),
            stats.clone(),
            shutdown.clone(),
        )
        .run(block_rx),
    );

    let refresher = (config.price.refresh_secs > 0).then(|| {
        tokio::spawn(run_price_refresher(
            oracle,
            prices,
            config.price.currency.clone(),
            Duration::from_secs(config.price.refresh_secs),
            shutdown.clone(),
        ))
    });

    // The driver ends on its own once the listener drops its sender.
    let driver_done = tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                tracing::error!("Failed to listen for interrupt: {e}");
            }
            tracing::info!("Shutting down...");
            false
        }
        _ = &mut driver => {
            tracing::warn!("Block feed ended, shutting down");
            true
        }
    };

    // Producer side first, so nothing enqueues onto a closed queue.
    shutdown.cancel();
    if let Err(e) = listener.await {
        tracing::warn!("Feed listener task failed: {e}");
    }
    if !driver_done {
        if let Err(e) = driver.await {
            tracing::warn!("Ingestion driver task failed: {e}");
        }
    }
    if let Some(refresher) = refresher {
        if let Err(e) = refresher.await {
            tracing::warn!("Price refresher task failed: {e}");
        }
    }

    pool.stop().await;

    let snap = stats.snapshot();
    tracing::info!(
        "Processed {} blocks, {} txs enqueued, {} classified, {} whales, {} rejected",
        snap.blocks,
        snap.enqueued,
        snap.classified,
        snap.whales,
        snap.rejected
    );
    Ok(())
}
