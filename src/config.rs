use serde::Deserialize;
use std::path::Path;

/// Environment variable that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "WHALEWATCH_CONFIG";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub feed: FeedConfig,
    pub api: ApiConfig,
    pub pipeline: PipelineConfig,
    pub whale: WhaleConfig,
    pub price: PriceConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FeedConfig {
    pub ws_url: String,
    /// Block notifications buffered between the listener and the driver.
    pub block_backlog: usize,
    pub ping_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    /// Pages fetched per block. 0 paginates until an empty page.
    pub max_pages: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PipelineConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WhaleConfig {
    pub threshold_btc: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PriceConfig {
    pub currency: String,
    pub fallback: f64,
    /// 0 disables the periodic refresh.
    pub refresh_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://mempool.space/api/v1/ws".into(),
            block_backlog: 16,
            ping_interval_secs: 30,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://mempool.space/api".into(),
            timeout_secs: 10,
            max_pages: 4,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            queue_capacity: 100,
        }
    }
}

impl Default for WhaleConfig {
    fn default() -> Self {
        Self { threshold_btc: 10.0 }
    }
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            currency: "USD".into(),
            fallback: 60_000.0,
            refresh_secs: 300,
        }
    }
}

impl ApiConfig {
    /// Page cap as an option; `None` means fetch until an empty page.
    pub fn page_limit(&self) -> Option<usize> {
        (self.max_pages > 0).then_some(self.max_pages)
    }
}

impl Config {
    /// Load config from a TOML file. Falls back to defaults if file doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("Config file {} not found, using defaults", path.display());
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse {}: {e}, using defaults", path.display());
                Self::default()
            }),
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Load from `$WHALEWATCH_CONFIG`, or `config.toml` in the working directory.
    pub fn load_default() -> Self {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "config.toml".into());
        Self::load(path)
    }

    /// Parse TOML and replace out-of-range values with their defaults.
    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        let mut config: Config = toml::from_str(contents)?;
        config.validate();
        Ok(config)
    }

    fn validate(&mut self) {
        if self.pipeline.workers == 0 {
            tracing::warn!("pipeline.workers must be at least 1, using default");
            self.pipeline.workers = PipelineConfig::default().workers;
        }
        if self.pipeline.queue_capacity == 0 {
            tracing::warn!("pipeline.queue_capacity must be at least 1, using default");
            self.pipeline.queue_capacity = PipelineConfig::default().queue_capacity;
        }
        if self.feed.block_backlog == 0 {
            self.feed.block_backlog = FeedConfig::default().block_backlog;
        }
        if self.feed.ping_interval_secs == 0 {
            self.feed.ping_interval_secs = FeedConfig::default().ping_interval_secs;
        }
        if !(self.whale.threshold_btc.is_finite() && self.whale.threshold_btc > 0.0) {
            tracing::warn!(
                "whale.threshold_btc must be positive, got {}, using default",
                self.whale.threshold_btc
            );
            self.whale.threshold_btc = WhaleConfig::default().threshold_btc;
        }
        if !(self.price.fallback.is_finite() && self.price.fallback > 0.0) {
            tracing::warn!("price.fallback must be positive, using default");
            self.price.fallback = PriceConfig::default().fallback;
        }
        self.price.currency = self.price.currency.trim().to_ascii_uppercase();
        if self.price.currency.is_empty() {
            self.price.currency = PriceConfig::default().currency;
        }
    }
}
