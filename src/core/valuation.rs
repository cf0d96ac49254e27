use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::rpc::PriceOracle;

/// Latest fiat-per-BTC rate, shared between the price refresher and the workers.
///
/// Readers never block each other. A rate that was never set reads as the
/// fallback supplied at construction.
#[derive(Debug)]
pub struct PriceStore {
    rate: RwLock<Option<f64>>,
    fallback: f64,
}

impl PriceStore {
    pub fn new(fallback: f64) -> Self {
        Self {
            rate: RwLock::new(None),
            fallback,
        }
    }

    /// Replace the current rate unconditionally.
    pub fn set(&self, rate: f64) {
        *self.rate.write().unwrap_or_else(PoisonError::into_inner) = Some(rate);
    }

    pub fn get(&self) -> f64 {
        self.rate
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .unwrap_or(self.fallback)
    }

    /// Whether a live rate has been stored at least once.
    pub fn is_set(&self) -> bool {
        self.rate
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn fallback(&self) -> f64 {
        self.fallback
    }
}

/// Fetch a fresh price and store it. Failures are logged and leave the
/// store untouched, so readers keep the last good rate (or the fallback).
pub async fn refresh_price(oracle: &dyn PriceOracle, store: &PriceStore, currency: &str) -> f64 {
    match oracle.fetch_price(currency).await {
        Ok(rate) if rate.is_finite() && rate > 0.0 => {
            store.set(rate);
            debug!(rate, currency, "Price refreshed");
        }
        Ok(rate) => warn!(rate, currency, "Ignoring non-positive price quote"),
        Err(e) => warn!("Price fetch failed: {e}, keeping {:.2} {currency}", store.get()),
    }
    store.get()
}

/// Refresh the price every `period` until cancelled.
pub async fn run_price_refresher(
    oracle: Arc<dyn PriceOracle>,
    store: Arc<PriceStore>,
    currency: String,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    // The first tick fires immediately and the startup fetch already happened.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                refresh_price(oracle.as_ref(), &store, &currency).await;
            }
        }
    }
    info!("Price refresher stopped");
}
