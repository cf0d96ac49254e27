use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Unexpected HTTP status {status} from {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("Price response has no {0} quote")]
    MissingCurrency(String),

    #[error("Malformed block notification: {0}")]
    MalformedBlock(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Why a transaction could not be classified.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("tx {txid}: output {index} has negative value {value}")]
    NegativeValue { txid: String, index: usize, value: i64 },

    #[error("tx {txid}: output sum overflows")]
    Overflow { txid: String },
}

/// Misuse of the work queue.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("work queue is closed")]
    Closed,

    #[error("work queue was already closed")]
    AlreadyClosed,
}
