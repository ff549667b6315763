use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Liveness of the signal subscription, published on a `watch` channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedHealth {
    Connecting,
    Connected {
        since: DateTime<Utc>,
        /// Symbols the server acknowledged in its `connection` message.
        symbols: Vec<String>,
    },
    Reconnecting {
        attempt: u32,
        last_error: String,
    },
    /// Gave up after the maximum number of attempts; waits for an explicit reconnect.
    Fatal {
        attempts: u32,
        last_error: String,
    },
    Stopped,
}

impl FeedHealth {
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected { .. } => "connected",
            Self::Reconnecting { .. } => "reconnecting",
            Self::Fatal { .. } => "fatal",
            Self::Stopped => "stopped",
        }
    }
}
