use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Side of a held or requested position.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// `1` for long, `-1` for short.
    #[must_use]
    pub const fn sign(self) -> i8 {
        match self {
            Self::Long => 1,
            Self::Short => -1,
        }
    }

    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }

    /// Infers the side from a signed venue position size.
    ///
    /// Returns `None` for a zero size.
    #[must_use]
    pub fn from_signed_size(size: Decimal) -> Option<Self> {
        if size > Decimal::ZERO {
            Some(Self::Long)
        } else if size < Decimal::ZERO {
            Some(Self::Short)
        } else {
            None
        }
    }

    /// Wire label used by the signal stream subscriptions.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Long => "long",
            Self::Short => "short",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    /// Accepts `long`/`short` (any case) as well as `1`/`-1`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "long" | "1" | "+1" | "buy" => Ok(Self::Long),
            "short" | "-1" | "sell" => Ok(Self::Short),
            other => Err(format!("invalid direction: {other} (expected long, short, 1 or -1)")),
        }
    }
}

/// Raw signal value as pushed by the stream: `-1`, `0` or `1`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SignalDirection {
    Short,
    Neutral,
    Long,
}

impl SignalDirection {
    /// Maps the signal to an actionable direction; `Neutral` has none.
    #[must_use]
    pub const fn actionable(self) -> Option<Direction> {
        match self {
            Self::Long => Some(Direction::Long),
            Self::Short => Some(Direction::Short),
            Self::Neutral => None,
        }
    }

    #[must_use]
    pub const fn as_i8(self) -> i8 {
        match self {
            Self::Short => -1,
            Self::Neutral => 0,
            Self::Long => 1,
        }
    }
}

impl TryFrom<i64> for SignalDirection {
    type Error = i64;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Self::Short),
            0 => Ok(Self::Neutral),
            1 => Ok(Self::Long),
            other => Err(other),
        }
    }
}

impl From<Direction> for SignalDirection {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Long => Self::Long,
            Direction::Short => Self::Short,
        }
    }
}

/// Inbound directional trading suggestion. Transient, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Signal {
    pub symbol: String,
    pub direction: SignalDirection,
    pub received_at: DateTime<Utc>,
}

impl Signal {
    #[must_use]
    pub fn new(symbol: impl Into<String>, direction: SignalDirection) -> Self {
        Self {
            symbol: symbol.into(),
            direction,
            received_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn signal_direction_from_wire_values() {
        assert_eq!(SignalDirection::try_from(-1), Ok(SignalDirection::Short));
        assert_eq!(SignalDirection::try_from(0), Ok(SignalDirection::Neutral));
        assert_eq!(SignalDirection::try_from(1), Ok(SignalDirection::Long));
        assert_eq!(SignalDirection::try_from(2), Err(2));
    }

    #[test]
    fn neutral_signal_is_not_actionable() {
        assert_eq!(SignalDirection::Neutral.actionable(), None);
        assert_eq!(SignalDirection::Long.actionable(), Some(Direction::Long));
    }

    #[test]
    fn direction_from_signed_size() {
        assert_eq!(Direction::from_signed_size(dec!(0.5)), Some(Direction::Long));
        assert_eq!(Direction::from_signed_size(dec!(-2)), Some(Direction::Short));
        assert_eq!(Direction::from_signed_size(Decimal::ZERO), None);
    }

    #[test]
    fn direction_parses_cli_forms() {
        assert_eq!("LONG".parse::<Direction>(), Ok(Direction::Long));
        assert_eq!("-1".parse::<Direction>(), Ok(Direction::Short));
        assert!("sideways".parse::<Direction>().is_err());
    }
}
