use rust_decimal::Decimal;
use thiserror::Error;

/// Errors surfaced by an [`ExecutionGateway`](crate::traits::ExecutionGateway).
///
/// Transient kinds are retried with backoff; structural kinds abort the
/// current action immediately and page the operator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    /// Network or RPC failure.
    #[error("Network error: {0}")]
    Network(String),

    /// The venue did not answer in time.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Rate limit exceeded.
    #[error("Rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Temporary liquidity or spread unavailability.
    #[error("Liquidity unavailable: {0}")]
    Liquidity(String),

    /// Computed order size rounds to zero at the venue's precision.
    #[error("Order size for {symbol} rounds to zero")]
    ZeroSize { symbol: String },

    /// Margin requirement not met.
    #[error("Insufficient margin: need {required}, have {available}")]
    InsufficientMargin { required: Decimal, available: Decimal },

    /// Order rejected by the venue for a reason retries cannot fix.
    #[error("Order rejected: {0}")]
    Rejected(String),

    /// Symbol not listed on the venue.
    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    /// Venue response could not be interpreted.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Credentials missing or refused.
    #[error("Authentication error: {0}")]
    Auth(String),
}

impl GatewayError {
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    #[must_use]
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout(_) | Self::RateLimited { .. } | Self::Liquidity(_)
        )
    }

    /// Structural errors abort without burning the retry budget.
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        !self.is_retryable()
    }
}
