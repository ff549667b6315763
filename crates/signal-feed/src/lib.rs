//! Signal Ingestion Channel.
//!
//! [`SignalFeed`] keeps one WebSocket subscription alive, validates pushed
//! events against the configured subscriptions and feeds them into a
//! [`SignalQueue`], which keeps the newest entries when full.

pub mod feed;
pub mod health;
pub mod message;
pub mod queue;

pub use feed::{FeedError, SignalFeed, SignalFeedHandle, Subscription};
pub use health::FeedHealth;
pub use message::{InboundMessage, SubscribeMessage};
pub use queue::SignalQueue;
