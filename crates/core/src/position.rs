use crate::events::Direction;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Venue-side position as last observed through the gateway.
///
/// The engine never mutates this locally; a fresh copy is always re-queried
/// after an action settles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub direction: Direction,
    /// Absolute position size in base units.
    pub size: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
}

impl Position {
    /// Builds a position from a signed venue size (negative = short).
    ///
    /// Returns `None` when the size is zero.
    #[must_use]
    pub fn from_signed(
        symbol: impl Into<String>,
        signed_size: Decimal,
        entry_price: Decimal,
        mark_price: Decimal,
    ) -> Option<Self> {
        Direction::from_signed_size(signed_size).map(|direction| Self {
            symbol: symbol.into(),
            direction,
            size: signed_size.abs(),
            entry_price,
            mark_price,
        })
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.size.is_zero()
    }

    /// Unrealized P&L in quote currency at the given mark price.
    #[must_use]
    pub fn pnl_at(&self, mark_price: Decimal) -> Decimal {
        let diff = match self.direction {
            Direction::Long => mark_price - self.entry_price,
            Direction::Short => self.entry_price - mark_price,
        };
        diff * self.size
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub balance: Decimal,
}
