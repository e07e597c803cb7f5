//! Configuration management
//!
//! Settings come from a TOML file, then `.env` / environment overrides for
//! the node credentials and listen address. Every section has defaults, so
//! an empty file is a valid config.

use crate::types::FeeThresholds;
use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Top-level TOML configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub viewer: ViewerConfig,
    /// Coinbase payout address -> pool name
    #[serde(default)]
    pub pools: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit a stats line every N collector ticks
    #[serde(default = "default_stats_every")]
    pub stats_every_ticks: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            stats_every_ticks: default_stats_every(),
        }
    }
}

fn default_log_level() -> String { "info".to_string() }
fn default_stats_every() -> u64 { 20 }

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    #[serde(default)]
    pub rpc_user: Option<String>,
    #[serde(default)]
    pub rpc_password: Option<String>,
    #[serde(default = "default_rpc_timeout")]
    pub timeout_secs: u64,
    /// Extra attempts per call after a retryable failure
    #[serde(default = "default_rpc_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            rpc_user: None,
            rpc_password: None,
            timeout_secs: default_rpc_timeout(),
            retries: default_rpc_retries(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

fn default_rpc_url() -> String { "http://127.0.0.1:8332".to_string() }
fn default_rpc_timeout() -> u64 { 10 }
fn default_rpc_retries() -> u32 { 1 }
fn default_retry_delay() -> u64 { 500 }

#[derive(Debug, Clone, Deserialize)]
pub struct PollerConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Max blocks fetched in one tick when catching up (defaults to block capacity)
    #[serde(default)]
    pub backfill_limit: Option<usize>,
    #[serde(default = "default_tx_lookups")]
    pub max_tx_lookups_per_tick: usize,
    #[serde(default = "default_algorithm")]
    pub default_algorithm: String,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            backfill_limit: None,
            max_tx_lookups_per_tick: default_tx_lookups(),
            default_algorithm: default_algorithm(),
        }
    }
}

fn default_poll_interval() -> u64 { 30 }
fn default_tx_lookups() -> usize { 200 }
fn default_algorithm() -> String { "sha256d".to_string() }

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    /// Fee rate (coin/kB) at or above which a tx is high priority
    #[serde(default = "default_high_fee_rate")]
    pub high_fee_rate: Decimal,
    #[serde(default = "default_medium_fee_rate")]
    pub medium_fee_rate: Decimal,
    /// Recent blocks kept indexed for confirmation lookups
    #[serde(default = "default_lookback")]
    pub confirmation_lookback_blocks: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            high_fee_rate: default_high_fee_rate(),
            medium_fee_rate: default_medium_fee_rate(),
            confirmation_lookback_blocks: default_lookback(),
        }
    }
}

impl TrackerConfig {
    pub fn fee_thresholds(&self) -> FeeThresholds {
        FeeThresholds {
            high: self.high_fee_rate,
            medium: self.medium_fee_rate,
        }
    }
}

fn default_high_fee_rate() -> Decimal { FeeThresholds::default().high }
fn default_medium_fee_rate() -> Decimal { FeeThresholds::default().medium }
fn default_lookback() -> usize { 6 }

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_block_capacity")]
    pub block_capacity: usize,
    #[serde(default = "default_confirmed_capacity")]
    pub confirmed_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            block_capacity: default_block_capacity(),
            confirmed_capacity: default_confirmed_capacity(),
        }
    }
}

fn default_block_capacity() -> usize { 10 }
fn default_confirmed_capacity() -> usize { 50 }

#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_queue_capacity")]
    pub session_queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            session_queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_listen() -> String { "0.0.0.0:8080".to_string() }
fn default_queue_capacity() -> usize { 32 }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ViewerConfig {
    #[serde(default = "default_viewer_url")]
    pub url: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    #[serde(default = "default_backoff")]
    pub backoff: BackoffKind,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    /// Expected interval between pushes for one domain (the server tick)
    #[serde(default = "default_poll_interval")]
    pub expected_interval_secs: u64,
    /// A domain is stale after this many missed intervals
    #[serde(default = "default_stale_multiplier")]
    pub stale_after_multiplier: u32,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            url: default_viewer_url(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            backoff: default_backoff(),
            max_delay_ms: default_max_delay(),
            expected_interval_secs: default_poll_interval(),
            stale_after_multiplier: default_stale_multiplier(),
        }
    }
}

impl ViewerConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.expected_interval_secs * u64::from(self.stale_after_multiplier))
    }
}

fn default_viewer_url() -> String { "ws://127.0.0.1:8080/ws".to_string() }
fn default_max_attempts() -> u32 { 3 }
fn default_base_delay() -> u64 { 2_000 }
fn default_backoff() -> BackoffKind { BackoffKind::Fixed }
fn default_max_delay() -> u64 { 30_000 }
fn default_stale_multiplier() -> u32 { 3 }

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).with_context(|| "Failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `.env` and process environment overrides
    pub fn apply_env(&mut self) {
        dotenv::dotenv().ok();

        if let Ok(url) = std::env::var("NODE_RPC_URL") {
            self.node.rpc_url = url;
        }
        if let Ok(user) = std::env::var("NODE_RPC_USER") {
            self.node.rpc_user = Some(user);
        }
        if let Ok(password) = std::env::var("NODE_RPC_PASSWORD") {
            self.node.rpc_password = Some(password);
        }
        if let Ok(listen) = std::env::var("CHAINPULSE_LISTEN") {
            self.hub.listen = listen;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.poller.poll_interval_secs == 0 {
            bail!("poller.poll_interval_secs must be > 0");
        }
        if self.cache.block_capacity == 0 || self.cache.confirmed_capacity == 0 {
            bail!("cache capacities must be > 0");
        }
        if self.hub.session_queue_capacity == 0 {
            bail!("hub.session_queue_capacity must be > 0");
        }
        if self.tracker.medium_fee_rate > self.tracker.high_fee_rate {
            bail!("tracker.medium_fee_rate must not exceed tracker.high_fee_rate");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poller.poll_interval_secs)
    }

    /// Blocks fetched per tick when catching up
    pub fn backfill_limit(&self) -> usize {
        self.poller
            .backfill_limit
            .unwrap_or(self.cache.block_capacity)
            .max(1)
    }
}
