use chrono::{DateTime, Utc};
use perp_guard_core::{Direction, SignalDirection};
use perp_guard_risk::{ProtectionLevels, RiskSnapshot};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Observable side effects of a symbol manager, broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ManagerEvent {
    /// Signal passed the sentiment gate; an open is being attempted.
    SignalAccepted { symbol: String, direction: Direction },

    SignalRejected {
        symbol: String,
        direction: SignalDirection,
        reason: String,
    },

    PositionOpened {
        symbol: String,
        direction: Direction,
        entry_price: Decimal,
        size: Decimal,
        entry_balance: Decimal,
        levels: ProtectionLevels,
    },

    OpenFailed {
        symbol: String,
        direction: Direction,
        error: String,
    },

    /// An already open position was adopted into monitoring.
    Reconciled {
        symbol: String,
        direction: Direction,
        entry_price: Decimal,
        size: Decimal,
    },

    TrailingActivated {
        symbol: String,
        stop_price: Decimal,
        progress_pct: Decimal,
    },

    TrailingRatcheted {
        symbol: String,
        from: Decimal,
        to: Decimal,
    },

    CloseTriggered { symbol: String, reason: String },

    PositionClosed {
        symbol: String,
        direction: Direction,
        reason: String,
        /// Balance after close minus balance at entry, when the balance could be read.
        realized_pnl: Option<Decimal>,
    },

    CloseFailed { symbol: String, error: String },
}

impl ManagerEvent {
    #[must_use]
    pub fn symbol(&self) -> &str {
        match self {
            Self::SignalAccepted { symbol, .. }
            | Self::SignalRejected { symbol, .. }
            | Self::PositionOpened { symbol, .. }
            | Self::OpenFailed { symbol, .. }
            | Self::Reconciled { symbol, .. }
            | Self::TrailingActivated { symbol, .. }
            | Self::TrailingRatcheted { symbol, .. }
            | Self::CloseTriggered { symbol, .. }
            | Self::PositionClosed { symbol, .. }
            | Self::CloseFailed { symbol, .. } => symbol,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    Flat,
    Opening,
    Monitoring,
    Closing,
}

/// Point-in-time view of one symbol manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerStatus {
    pub symbol: String,
    pub phase: PhaseKind,
    pub direction: Option<Direction>,
    pub position_id: Option<String>,
    pub opened_at: Option<DateTime<Utc>>,
    pub entry_price: Option<Decimal>,
    pub entry_balance: Option<Decimal>,
    pub levels: Option<ProtectionLevels>,
    pub risk: Option<RiskSnapshot>,
    pub is_closing: bool,
    pub last_close_reason: Option<String>,
    /// Sum of realized P&L over positions closed by this process.
    pub realized_pnl: Decimal,

    // Recent events (last 10)
    pub recent_events: Vec<ManagerEvent>,
}
