use bitcoin::SignedAmount;
use chrono::Utc;

use crate::core::{Transaction, WhaleEvent, WorkItem};
use crate::error::{ClassifyError, Error, Result};

/// Flags transactions whose total output strictly exceeds a threshold.
#[derive(Debug, Clone, Copy)]
pub struct WhaleClassifier {
    threshold: SignedAmount,
}

impl WhaleClassifier {
    pub fn new(threshold: SignedAmount) -> Self {
        Self { threshold }
    }

    /// Build from a threshold expressed in BTC.
    pub fn from_btc(threshold_btc: f64) -> Result<Self> {
        let threshold = SignedAmount::from_btc(threshold_btc)
            .map_err(|e| Error::Config(format!("invalid whale threshold {threshold_btc}: {e}")))?;
        if threshold <= SignedAmount::ZERO {
            return Err(Error::Config(format!(
                "whale threshold must be positive, got {threshold_btc}"
            )));
        }
        Ok(Self::new(threshold))
    }

    pub fn threshold(&self) -> SignedAmount {
        self.threshold
    }

    /// Classify one queued transaction against the given fiat rate.
    ///
    /// Returns `Ok(None)` for ordinary transactions and `Ok(Some(_))` for whales.
    pub fn classify(
        &self,
        item: &WorkItem,
        rate: f64,
    ) -> std::result::Result<Option<WhaleEvent>, ClassifyError> {
        let total = total_output_value(&item.tx)?;
        if total <= self.threshold {
            return Ok(None);
        }

        let value_btc = total.to_btc();
        Ok(Some(WhaleEvent {
            txid: item.tx.txid.clone(),
            block_height: item.block_height,
            value_sats: total.to_sat(),
            value_btc,
            value_fiat: value_btc * rate,
            detected_at: Utc::now(),
        }))
    }
}

/// Sum output values in satoshis with exact integer arithmetic.
pub fn total_output_value(tx: &Transaction) -> std::result::Result<SignedAmount, ClassifyError> {
    let mut total: i64 = 0;
    for (index, out) in tx.vout.iter().enumerate() {
        if out.value < 0 {
            return Err(ClassifyError::NegativeValue {
                txid: tx.txid.clone(),
                index,
                value: out.value,
            });
        }
        total = total.checked_add(out.value).ok_or_else(|| ClassifyError::Overflow {
            txid: tx.txid.clone(),
        })?;
    }
    Ok(SignedAmount::from_sat(total))
}
