//! Sentiment gate providers.
//!
//! [`FearGreedProvider`] reads the public fear/greed index over HTTP and
//! degrades to [`MarketSentiment::neutral`] when the index is unavailable.
//! [`StaticSentiment`] holds a fixed, settable reading.

mod fear_greed;
mod fixed;

pub use fear_greed::{FearGreedProvider, SentimentError};
pub use fixed::StaticSentiment;

pub use perp_guard_core::{MarketSentiment, SentimentCategory, SentimentProvider};
