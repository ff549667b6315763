//! Attempt, settle, verify.
//!
//! Every state-changing call goes through the same sequence: submit with
//! retry, sleep for the settle delay, then re-query the venue. Only the
//! re-queried position decides the outcome. When the submission itself
//! fails, the venue is still queried once so a fill that raced the error is
//! not missed.

use crate::retry::RetryPolicy;
use perp_guard_core::{Direction, ExecutionGateway, GatewayError, Position};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Open,
    Close,
    Query,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Open => "open",
            Self::Close => "close",
            Self::Query => "query",
        })
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActionError {
    /// Non-retryable venue error; the action was abandoned on first failure.
    #[error("{action} {symbol} aborted: {source}")]
    Structural {
        symbol: String,
        action: ActionKind,
        source: GatewayError,
    },

    #[error("{action} {symbol} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        symbol: String,
        action: ActionKind,
        attempts: u32,
        last: GatewayError,
    },

    /// The venue accepted the action but ground truth disagrees after settling.
    #[error("{action} {symbol} not confirmed: {detail}")]
    VerificationFailed {
        symbol: String,
        action: ActionKind,
        detail: String,
    },
}

impl ActionError {
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        matches!(self, Self::Structural { .. })
    }

    #[must_use]
    pub const fn action(&self) -> ActionKind {
        match self {
            Self::Structural { action, .. }
            | Self::RetriesExhausted { action, .. }
            | Self::VerificationFailed { action, .. } => *action,
        }
    }
}

enum OpenAttempt {
    Submitted(String),
    AlreadyFilled(Position),
}

async fn query_position(
    gateway: &dyn ExecutionGateway,
    retry: &RetryPolicy,
    symbol: &str,
) -> Result<Option<Position>, ActionError> {
    retry
        .run(symbol, ActionKind::Query, move || gateway.get_position(symbol))
        .await
}

/// Opens `direction` on `symbol` and returns the confirmed venue position.
///
/// # Errors
/// Returns the submission error when the venue stays flat, or
/// `VerificationFailed` when the order was accepted but no matching
/// position appeared within the settle delay.
pub async fn open_and_verify(
    gateway: &dyn ExecutionGateway,
    retry: &RetryPolicy,
    symbol: &str,
    direction: Direction,
    leverage: u32,
    settle: Duration,
) -> Result<Position, ActionError> {
    // After a failed attempt the venue is checked before resubmitting: the
    // order may have filled with its acknowledgement lost.
    let resubmitting = AtomicBool::new(false);
    let resubmitting = &resubmitting;
    let submitted = retry
        .run(symbol, ActionKind::Open, move || async move {
            if resubmitting.swap(true, Ordering::SeqCst) {
                match gateway.get_position(symbol).await {
                    Ok(Some(position)) if holds(Some(&position), direction) => {
                        return Ok(OpenAttempt::AlreadyFilled(position));
                    }
                    Ok(_) => {}
                    Err(e) => return Err(e),
                }
            }
            gateway
                .open_position(symbol, direction, leverage)
                .await
                .map(OpenAttempt::Submitted)
        })
        .await;

    match submitted {
        Ok(OpenAttempt::AlreadyFilled(position)) => {
            warn!(symbol = %symbol, direction = %direction, "Earlier open attempt filled, not resubmitting");
            return Ok(position);
        }
        Ok(OpenAttempt::Submitted(tx)) => {
            info!(symbol = %symbol, direction = %direction, tx = %tx, "Open submitted, settling");
            tokio::time::sleep(settle).await;
        }
        Err(e) => {
            if let Ok(Some(position)) = gateway.get_position(symbol).await {
                if position.direction == direction {
                    warn!(symbol = %symbol, error = %e, "Open reported failure but venue shows the position");
                    return Ok(position);
                }
            }
            return Err(e);
        }
    }

    match query_position(gateway, retry, symbol).await? {
        Some(position) if position.direction == direction => Ok(position),
        Some(position) => Err(ActionError::VerificationFailed {
            symbol: symbol.to_string(),
            action: ActionKind::Open,
            detail: format!("venue shows {} instead of {direction}", position.direction),
        }),
        None => Err(ActionError::VerificationFailed {
            symbol: symbol.to_string(),
            action: ActionKind::Open,
            detail: format!("still flat after {}ms", settle.as_millis()),
        }),
    }
}

/// Closes the `direction` position on `symbol` and confirms the venue is flat on that side.
///
/// # Errors
/// Returns the submission error when the position is still open, or
/// `VerificationFailed` when the close was accepted but the position remains.
pub async fn close_and_verify(
    gateway: &dyn ExecutionGateway,
    retry: &RetryPolicy,
    symbol: &str,
    direction: Direction,
    settle: Duration,
) -> Result<(), ActionError> {
    let submitted = retry
        .run(symbol, ActionKind::Close, move || gateway.close_position(symbol, direction))
        .await;

    match submitted {
        Ok(tx) => {
            info!(symbol = %symbol, direction = %direction, tx = %tx, "Close submitted, settling");
            tokio::time::sleep(settle).await;
        }
        Err(e) => {
            if let Ok(position) = gateway.get_position(symbol).await {
                if !holds(position.as_ref(), direction) {
                    warn!(symbol = %symbol, error = %e, "Close reported failure but venue is already flat");
                    return Ok(());
                }
            }
            return Err(e);
        }
    }

    let position = query_position(gateway, retry, symbol).await?;
    if holds(position.as_ref(), direction) {
        return Err(ActionError::VerificationFailed {
            symbol: symbol.to_string(),
            action: ActionKind::Close,
            detail: format!("{direction} position still open after {}ms", settle.as_millis()),
        });
    }
    Ok(())
}

fn holds(position: Option<&Position>, direction: Direction) -> bool {
    position.is_some_and(|p| p.direction == direction && p.is_open())
}
