use perp_guard_core::{Direction, Settings};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Price-percentage take-profit and stop-loss prices for a fresh entry.
///
/// These are reference levels for reporting; the monitoring loop acts on
/// balance-impact progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionLevels {
    pub take_profit_price: Decimal,
    pub stop_loss_price: Decimal,
}

impl ProtectionLevels {
    #[must_use]
    pub fn derive(entry_price: Decimal, direction: Direction, settings: &Settings) -> Self {
        let tp = settings.take_profit_pct / Decimal::ONE_HUNDRED;
        let sl = settings.stop_loss_pct / Decimal::ONE_HUNDRED;
        match direction {
            Direction::Long => Self {
                take_profit_price: entry_price * (Decimal::ONE + tp),
                stop_loss_price: entry_price * (Decimal::ONE - sl),
            },
            Direction::Short => Self {
                take_profit_price: entry_price * (Decimal::ONE - tp),
                stop_loss_price: entry_price * (Decimal::ONE + sl),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn settings() -> Settings {
        Settings {
            take_profit_pct: dec!(3.6),
            stop_loss_pct: dec!(1.8),
            ..Settings::default()
        }
    }

    #[test]
    fn long_levels_from_entry_100() {
        let levels = ProtectionLevels::derive(dec!(100), Direction::Long, &settings());
        assert_eq!(levels.take_profit_price, dec!(103.6));
        assert_eq!(levels.stop_loss_price, dec!(98.2));
    }

    #[test]
    fn short_levels_are_mirrored() {
        let levels = ProtectionLevels::derive(dec!(100), Direction::Short, &settings());
        assert_eq!(levels.take_profit_price, dec!(96.4));
        assert_eq!(levels.stop_loss_price, dec!(101.8));
    }
}
