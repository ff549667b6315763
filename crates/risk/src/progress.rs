//! Balance-impact progress.
//!
//! Progress is the unrealized P&L of a position expressed as a percentage of
//! the account balance at entry, so leverage and size are accounted for
//! implicitly:
//!
//! ```text
//! priceDiff    = long ? mark - entry : entry - mark
//! pnl          = priceDiff * |size|
//! entryBalance = currentBalance - pnl
//! progressPct  = pnl / entryBalance * 100
//! ```

use perp_guard_core::{Direction, Position};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// What the tracker needs to know about a position at the moment it is first observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionEntry {
    pub direction: Direction,
    pub entry_price: Decimal,
    /// Absolute size.
    pub size: Decimal,
    pub entry_balance: Decimal,
}

impl PositionEntry {
    /// Seeds an entry from a freshly observed position and the current account balance.
    ///
    /// The balance at entry is inferred by removing the position's unrealized P&L.
    #[must_use]
    pub fn observe(position: &Position, current_balance: Decimal) -> Self {
        let pnl = position.pnl_at(position.mark_price);
        Self {
            direction: position.direction,
            entry_price: position.entry_price,
            size: position.size,
            entry_balance: infer_entry_balance(current_balance, pnl),
        }
    }

    /// P&L in quote currency at `mark_price`.
    #[must_use]
    pub fn pnl_at(&self, mark_price: Decimal) -> Decimal {
        let diff = match self.direction {
            Direction::Long => mark_price - self.entry_price,
            Direction::Short => self.entry_price - mark_price,
        };
        diff * self.size
    }

    #[must_use]
    pub fn progress_at(&self, mark_price: Decimal) -> Decimal {
        progress_pct(self.pnl_at(mark_price), self.entry_balance)
    }

    #[must_use]
    pub fn price_at(&self, progress: Decimal) -> Decimal {
        price_at_progress(self, progress)
    }
}

#[must_use]
pub fn infer_entry_balance(current_balance: Decimal, pnl: Decimal) -> Decimal {
    current_balance - pnl
}

/// `pnl / entry_balance * 100`; zero when the entry balance is not positive.
#[must_use]
pub fn progress_pct(pnl: Decimal, entry_balance: Decimal) -> Decimal {
    if entry_balance <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    pnl / entry_balance * HUNDRED
}

/// Mark price at which the position would show `progress` percent.
///
/// Inverse of [`PositionEntry::progress_at`]. Falls back to the entry price
/// when the size is zero.
#[must_use]
pub fn price_at_progress(entry: &PositionEntry, progress: Decimal) -> Decimal {
    if entry.size.is_zero() {
        return entry.entry_price;
    }
    let offset = progress / HUNDRED * entry.entry_balance / entry.size;
    match entry.direction {
        Direction::Long => entry.entry_price + offset,
        Direction::Short => entry.entry_price - offset,
    }
}
