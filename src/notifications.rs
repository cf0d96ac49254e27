use std::io::Write;

use crate::core::WhaleEvent;

/// Sink for classified whale events.
pub trait Reporter: Send + Sync {
    fn report(&self, event: &WhaleEvent);
}

/// Prints one alert line per whale to stdout.
pub struct ConsoleReporter {
    currency: String,
}

impl ConsoleReporter {
    pub fn new(currency: impl Into<String>) -> Self {
        Self {
            currency: currency.into(),
        }
    }
}

impl Reporter for ConsoleReporter {
    fn report(&self, event: &WhaleEvent) {
        let line = format_alert(event, &self.currency);
        // Lock per line so concurrent workers never interleave output.
        let mut out = std::io::stdout().lock();
        if let Err(e) = writeln!(out, "{line}") {
            tracing::debug!("Failed to write whale alert: {e}");
        }
    }
}

/// Human-readable alert line.
pub fn format_alert(event: &WhaleEvent, currency: &str) -> String {
    format!(
        "🐳 Whale Alert! TxID: {} | Value: {:.8} BTC ({:.2} {currency}) | block {}",
        event.txid, event.value_btc, event.value_fiat, event.block_height
    )
}
