use async_trait::async_trait;
use parking_lot::RwLock;
use perp_guard_core::{MarketSentiment, SentimentProvider};

/// Provider that always reports the last value it was given.
///
/// Used when the HTTP gate is disabled and in tests that script sentiment.
#[derive(Debug, Default)]
pub struct StaticSentiment {
    current: RwLock<MarketSentiment>,
}

impl StaticSentiment {
    #[must_use]
    pub fn new(sentiment: MarketSentiment) -> Self {
        Self {
            current: RwLock::new(sentiment),
        }
    }

    #[must_use]
    pub fn from_index(index: u8) -> Self {
        Self::new(MarketSentiment::from_index(index))
    }

    pub fn set(&self, sentiment: MarketSentiment) {
        *self.current.write() = sentiment;
    }

    pub fn set_index(&self, index: u8) {
        self.set(MarketSentiment::from_index(index));
    }
}

#[async_trait]
impl SentimentProvider for StaticSentiment {
    async fn get_sentiment(&self) -> MarketSentiment {
        *self.current.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perp_guard_core::SentimentCategory;

    #[tokio::test]
    async fn reports_latest_value() {
        let provider = StaticSentiment::default();
        assert_eq!(provider.get_sentiment().await, MarketSentiment::neutral());

        provider.set_index(10);
        let reading = provider.get_sentiment().await;
        assert_eq!(reading.category, SentimentCategory::ExtremeFear);
        assert!(!reading.can_open_long);
        assert!(reading.can_open_short);
    }
}
