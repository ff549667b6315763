use crate::error::GatewayError;
use crate::events::Direction;
use crate::position::{AccountState, Position};
use crate::sentiment::MarketSentiment;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Venue that owns positions. The engine only observes it by polling.
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    /// Current position for `symbol`, or `None` when flat.
    async fn get_position(&self, symbol: &str) -> Result<Option<Position>, GatewayError>;

    async fn get_mark_price(&self, symbol: &str) -> Result<Decimal, GatewayError>;

    async fn account_state(&self) -> Result<AccountState, GatewayError>;

    /// Submits an order opening `direction` on `symbol`; returns the venue transaction id.
    ///
    /// Sizing is the gateway's concern; `leverage` is the multiplier configured for the symbol.
    async fn open_position(
        &self,
        symbol: &str,
        direction: Direction,
        leverage: u32,
    ) -> Result<String, GatewayError>;

    /// Submits an order closing the `direction` position on `symbol`.
    async fn close_position(&self, symbol: &str, direction: Direction)
        -> Result<String, GatewayError>;
}

/// Source of the market sentiment gate.
///
/// Implementations must not fail: an unavailable provider substitutes
/// [`MarketSentiment::neutral`].
#[async_trait]
pub trait SentimentProvider: Send + Sync {
    async fn get_sentiment(&self) -> MarketSentiment;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AlertSeverity {
    Warning,
    Critical,
}

/// Operator-facing notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub symbol: Option<String>,
    pub action: String,
    pub message: String,
}

impl Alert {
    #[must_use]
    pub fn critical(symbol: Option<&str>, action: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: AlertSeverity::Critical,
            symbol: symbol.map(str::to_string),
            action: action.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn warning(symbol: Option<&str>, action: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: AlertSeverity::Warning,
            ..Self::critical(symbol, action, message)
        }
    }
}

/// Operator notification channel.
pub trait AlertSink: Send + Sync {
    fn alert(&self, alert: Alert);
}

/// Logs alerts under the `alert` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn alert(&self, alert: Alert) {
        let symbol = alert.symbol.as_deref().unwrap_or("-");
        match alert.severity {
            AlertSeverity::Critical => tracing::error!(
                target: "alert",
                symbol,
                action = %alert.action,
                "{}",
                alert.message
            ),
            AlertSeverity::Warning => tracing::warn!(
                target: "alert",
                symbol,
                action = %alert.action,
                "{}",
                alert.message
            ),
        }
    }
}
