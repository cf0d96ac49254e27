pub mod pipeline;
pub mod queue;
pub mod stats;
pub mod valuation;

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// A block as announced by the feed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Block {
    pub id: String,
    pub height: u32,
    #[serde(default)]
    pub tx_count: Option<u64>,
}

/// A confirmed transaction as returned by the block txs endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Transaction {
    pub txid: String,
    #[serde(default)]
    pub vout: Vec<Vout>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Vout {
    /// Value in satoshis.
    pub value: i64,
    #[serde(rename = "scriptpubkey", default)]
    pub script_pubkey: Option<String>,
    #[serde(rename = "scriptpubkey_type", default)]
    pub script_type: Option<String>,
    #[serde(rename = "scriptpubkey_address", default)]
    pub address: Option<String>,
}

/// One unit of work on the queue: a transaction tagged with the block it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub block_height: u32,
    pub tx: Transaction,
}

/// A transaction whose total output exceeded the whale threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct WhaleEvent {
    pub txid: String,
    pub block_height: u32,
    pub value_sats: i64,
    pub value_btc: f64,
    pub value_fiat: f64,
    pub detected_at: DateTime<Utc>,
}
