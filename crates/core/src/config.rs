use crate::events::Direction;
use crate::settings::{Settings, SettingsOverrides};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub stream: StreamConfig,
    pub gateway: GatewayConfig,
    pub sentiment: SentimentConfig,
    pub retry: RetryConfig,
    pub orchestrator: OrchestratorConfig,
    /// Settings applied to every symbol unless overridden.
    pub defaults: Settings,
    pub symbols: Vec<SymbolConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub url: String,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay_ms: u64,
    /// Attempts before the feed gives up and reports a fatal health condition (0 = unlimited).
    pub max_reconnect_attempts: u32,
    pub queue_capacity: usize,
    pub ping_interval_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8765/signals".to_string(),
            reconnect_delay_ms: 5_000,
            max_reconnect_attempts: 10,
            queue_capacity: 100,
            ping_interval_ms: 30_000,
        }
    }
}

impl StreamConfig {
    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    #[must_use]
    pub const fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub api_url: String,
    /// File holding the API wallet private key (hex, with or without 0x).
    pub credential_path: Option<PathBuf>,
    /// Master account whose positions are managed.
    pub account_address: Option<String>,
    /// Price tolerance for marketable limit orders, in basis points.
    pub slippage_bps: Decimal,
    /// Share of account value committed as margin per new position.
    pub margin_fraction: Decimal,
    /// Use the in-memory paper venue instead of the live exchange.
    pub paper: bool,
    pub paper_balance: Decimal,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.hyperliquid.xyz".to_string(),
            credential_path: None,
            account_address: None,
            slippage_bps: dec!(50),
            margin_fraction: dec!(0.25),
            paper: true,
            paper_balance: dec!(10000),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SentimentConfig {
    pub url: String,
    pub timeout_ms: u64,
    /// Skip the remote index and always report neutral.
    pub disabled: bool,
}

impl Default for SentimentConfig {
    fn default() -> Self {
        Self {
            url: "https://api.alternative.me/fng/?limit=1".to_string(),
            timeout_ms: 5_000,
            disabled: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub health_check_interval_ms: u64,
    /// Observability snapshot; never read back by the engine.
    pub snapshot_path: PathBuf,
    pub event_buffer: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            health_check_interval_ms: 30_000,
            snapshot_path: PathBuf::from("data/positions.json"),
            event_buffer: 1_000,
        }
    }
}

impl OrchestratorConfig {
    #[must_use]
    pub const fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SymbolConfig {
    pub symbol: String,
    /// Stream directions to subscribe to for this symbol.
    #[serde(default = "default_directions")]
    pub directions: Vec<Direction>,
    #[serde(default)]
    pub overrides: SettingsOverrides,
}

fn default_directions() -> Vec<Direction> {
    vec![Direction::Long, Direction::Short]
}
