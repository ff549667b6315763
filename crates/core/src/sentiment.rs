use crate::events::Direction;
use serde::{Deserialize, Serialize};

/// Five-bucket classification of the 0..=100 sentiment index.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SentimentCategory {
    ExtremeFear,
    Fear,
    Neutral,
    Greed,
    ExtremeGreed,
}

impl SentimentCategory {
    /// Buckets: 0-24 extreme fear, 25-44 fear, 45-55 neutral, 56-75 greed, 76-100 extreme greed.
    #[must_use]
    pub const fn from_index(index: u8) -> Self {
        match index {
            0..=24 => Self::ExtremeFear,
            25..=44 => Self::Fear,
            45..=55 => Self::Neutral,
            56..=75 => Self::Greed,
            _ => Self::ExtremeGreed,
        }
    }

    #[must_use]
    pub const fn is_extreme(self) -> bool {
        matches!(self, Self::ExtremeFear | Self::ExtremeGreed)
    }

    /// The direction an extreme reading favours: short in extreme fear, long in extreme greed.
    #[must_use]
    pub const fn extreme_bias(self) -> Option<Direction> {
        match self {
            Self::ExtremeFear => Some(Direction::Short),
            Self::ExtremeGreed => Some(Direction::Long),
            _ => None,
        }
    }
}

/// Market mood reading. Computed on demand and used for a single decision only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarketSentiment {
    pub index: u8,
    pub category: SentimentCategory,
    pub can_open_long: bool,
    pub can_open_short: bool,
}

impl MarketSentiment {
    /// Classifies an index and derives the open permissions.
    ///
    /// Longs are blocked in extreme fear and shorts in extreme greed.
    #[must_use]
    pub fn from_index(index: u8) -> Self {
        let index = index.min(100);
        let category = SentimentCategory::from_index(index);
        Self {
            index,
            category,
            can_open_long: category != SentimentCategory::ExtremeFear,
            can_open_short: category != SentimentCategory::ExtremeGreed,
        }
    }

    /// Permissive default substituted when the provider is unavailable.
    #[must_use]
    pub const fn neutral() -> Self {
        Self {
            index: 50,
            category: SentimentCategory::Neutral,
            can_open_long: true,
            can_open_short: true,
        }
    }

    #[must_use]
    pub const fn permits(&self, direction: Direction) -> bool {
        match direction {
            Direction::Long => self.can_open_long,
            Direction::Short => self.can_open_short,
        }
    }

    /// True when the reading is an extreme opposite to `held`
    /// (long during extreme fear, short during extreme greed).
    #[must_use]
    pub fn is_extreme_against(&self, held: Direction) -> bool {
        matches!(
            (self.category, held),
            (SentimentCategory::ExtremeFear, Direction::Long)
                | (SentimentCategory::ExtremeGreed, Direction::Short)
        )
    }
}

impl Default for MarketSentiment {
    fn default() -> Self {
        Self::neutral()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_boundaries() {
        assert_eq!(SentimentCategory::from_index(0), SentimentCategory::ExtremeFear);
        assert_eq!(SentimentCategory::from_index(24), SentimentCategory::ExtremeFear);
        assert_eq!(SentimentCategory::from_index(25), SentimentCategory::Fear);
        assert_eq!(SentimentCategory::from_index(50), SentimentCategory::Neutral);
        assert_eq!(SentimentCategory::from_index(75), SentimentCategory::Greed);
        assert_eq!(SentimentCategory::from_index(76), SentimentCategory::ExtremeGreed);
        assert_eq!(SentimentCategory::from_index(100), SentimentCategory::ExtremeGreed);
    }

    #[test]
    fn extreme_fear_blocks_longs_only() {
        let s = MarketSentiment::from_index(10);
        assert!(!s.permits(Direction::Long));
        assert!(s.permits(Direction::Short));
        assert!(s.is_extreme_against(Direction::Long));
        assert!(!s.is_extreme_against(Direction::Short));
        assert_eq!(s.category.extreme_bias(), Some(Direction::Short));
    }

    #[test]
    fn extreme_greed_blocks_shorts_only() {
        let s = MarketSentiment::from_index(90);
        assert!(s.permits(Direction::Long));
        assert!(!s.permits(Direction::Short));
        assert!(s.is_extreme_against(Direction::Short));
    }

    #[test]
    fn neutral_default_is_permissive() {
        let s = MarketSentiment::default();
        assert!(s.can_open_long && s.can_open_short);
        assert!(!s.category.is_extreme());
    }
}
