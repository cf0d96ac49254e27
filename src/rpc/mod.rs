pub mod feed;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::config::ApiConfig;
use crate::core::Transaction;
use crate::error::{Error, Result};

/// Items per page of `/block/:hash/txs`, fixed by the API.
pub const PAGE_SIZE: usize = 25;

/// Source of the transactions confirmed in a block, one page at a time.
#[async_trait]
pub trait TxSource: Send + Sync {
    /// Fetch the page of transactions starting at item `offset`.
    /// An empty page means there is nothing further.
    async fn fetch_page(&self, block_hash: &str, offset: usize) -> Result<Vec<Transaction>>;
}

/// Source of the current fiat value of one BTC.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn fetch_price(&self, currency: &str) -> Result<f64>;
}

/// Minimal client for an Esplora-style REST API (mempool.space).
pub struct EsploraClient {
    base_url: String,
    client: Client,
}

impl EsploraClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: String) -> Result<T> {
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Status { status, url });
        }
        let body = resp.bytes().await?;
        debug!(%url, bytes = body.len(), "GET ok");
        Ok(serde_json::from_slice(&body)?)
    }
}

/// `/block/:hash/txs` for the first page, `/block/:hash/txs/:start_index` after.
pub fn block_txs_url(base_url: &str, block_hash: &str, offset: usize) -> String {
    if offset == 0 {
        format!("{base_url}/block/{block_hash}/txs")
    } else {
        format!("{base_url}/block/{block_hash}/txs/{offset}")
    }
}

/// Pick the quote for `currency` out of a `/v1/prices` response.
pub fn price_from_response(body: &Value, currency: &str) -> Result<f64> {
    body.get(currency)
        .and_then(Value::as_f64)
        .ok_or_else(|| Error::MissingCurrency(currency.to_string()))
}

#[async_trait]
impl TxSource for EsploraClient {
    async fn fetch_page(&self, block_hash: &str, offset: usize) -> Result<Vec<Transaction>> {
        self.get_json(block_txs_url(&self.base_url, block_hash, offset))
            .await
    }
}

#[async_trait]
impl PriceOracle for EsploraClient {
    async fn fetch_price(&self, currency: &str) -> Result<f64> {
        let body: Value = self.get_json(format!("{}/v1/prices", self.base_url)).await?;
        price_from_response(&body, currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_page_has_no_offset() {
        assert_eq!(
            block_txs_url("https://mempool.space/api", "00ab", 0),
            "https://mempool.space/api/block/00ab/txs"
        );
        assert_eq!(
            block_txs_url("https://mempool.space/api", "00ab", 25),
            "https://mempool.space/api/block/00ab/txs/25"
        );
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let client = EsploraClient::new(&ApiConfig {
            base_url: "http://localhost:3000/api/".into(),
            ..ApiConfig::default()
        })
        .unwrap();
        assert_eq!(client.base_url, "http://localhost:3000/api");
    }

    #[test]
    fn picks_requested_currency() {
        let body = json!({"time": 1_700_000_000, "USD": 97123.0, "EUR": 89000, "GBP": 76000});
        assert_eq!(price_from_response(&body, "USD").unwrap(), 97123.0);
        assert_eq!(price_from_response(&body, "EUR").unwrap(), 89000.0);
    }

    #[test]
    fn missing_currency_is_an_error() {
        let body = json!({"USD": 97123.0});
        assert!(matches!(
            price_from_response(&body, "JPY"),
            Err(Error::MissingCurrency(c)) if c == "JPY"
        ));
    }

    #[test]
    fn decodes_esplora_transactions() {
        let page = r#"[
            {
                "txid": "f4184fc596403b9d638783cf57adfe4c75c605f6356fbc91338530e9831e9e16",
                "version": 1,
                "vin": [],
                "vout": [
                    {"scriptpubkey": "4104ae1a", "scriptpubkey_type": "p2pk", "value": 1000000000},
                    {"scriptpubkey": "0014abcd", "scriptpubkey_type": "v0_p2wpkh",
                     "scriptpubkey_address": "bc1qxyz", "value": 4000000000}
                ],
                "status": {"confirmed": true, "block_height": 170}
            }
        ]"#;
        let txs: Vec<Transaction> = serde_json::from_str(page).unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].vout.len(), 2);
        assert_eq!(txs[0].vout[0].value, 1_000_000_000);
        assert_eq!(txs[0].vout[0].address, None);
        assert_eq!(txs[0].vout[1].address.as_deref(), Some("bc1qxyz"));
        assert_eq!(txs[0].vout[1].script_type.as_deref(), Some("v0_p2wpkh"));
    }
}
