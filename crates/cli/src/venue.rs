//! Gateway and sentiment wiring from configuration.

use anyhow::{Context, Result};
use perp_guard_core::{ExecutionGateway, GatewayConfig, SentimentConfig, SentimentProvider};
use perp_guard_hyperliquid::{HyperliquidClient, HyperliquidGateway, PaperGateway};
use perp_guard_sentiment::{FearGreedProvider, StaticSentiment};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// The execution venue selected by `gateway.paper`.
pub enum Venue {
    /// In-memory fills at live mid prices.
    Paper {
        gateway: Arc<PaperGateway>,
        prices: Arc<HyperliquidClient>,
    },
    Live(Arc<HyperliquidGateway>),
}

impl Venue {
    /// # Errors
    /// Returns error if the HTTP client cannot be built or, for the live
    /// venue, the wallet credential cannot be loaded.
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        if config.paper {
            tracing::warn!(
                balance = %config.paper_balance,
                "Paper trading mode: orders fill in memory at live mid prices"
            );
            let prices = HyperliquidClient::new(config.api_url.clone())
                .context("failed to build price client")?;
            return Ok(Self::Paper {
                gateway: Arc::new(PaperGateway::new(config.paper_balance, config.margin_fraction)),
                prices: Arc::new(prices),
            });
        }

        let gateway =
            HyperliquidGateway::from_config(config).context("failed to initialise live gateway")?;
        tracing::info!(account = %gateway.account(), api_url = %config.api_url, "Live trading mode");
        Ok(Self::Live(Arc::new(gateway)))
    }

    #[must_use]
    pub fn gateway(&self) -> Arc<dyn ExecutionGateway> {
        match self {
            Self::Paper { gateway, .. } => gateway.clone(),
            Self::Live(gateway) => gateway.clone(),
        }
    }

    #[must_use]
    pub const fn is_paper(&self) -> bool {
        matches!(self, Self::Paper { .. })
    }

    /// Loads current marks into the paper venue. No-op when live.
    ///
    /// # Errors
    /// Returns error if the mid prices cannot be fetched.
    pub async fn prime(&self, symbols: &[String]) -> Result<()> {
        if let Self::Paper { gateway, prices } = self {
            let updated = gateway
                .sync_marks(prices, symbols)
                .await
                .context("failed to fetch mid prices")?;
            tracing::debug!(updated, "Paper marks primed");
        }
        Ok(())
    }

    /// Keeps paper marks current until `shutdown` flips. `None` when live.
    #[must_use]
    pub fn spawn_mark_sync(
        &self,
        symbols: Vec<String>,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> Option<JoinHandle<()>> {
        let Self::Paper { gateway, prices } = self else {
            return None;
        };
        let gateway = Arc::clone(gateway);
        let prices = Arc::clone(prices);

        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period.max(Duration::from_millis(100)));
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        if let Err(e) = gateway.sync_marks(&prices, &symbols).await {
                            tracing::warn!(error = %e, "Failed to refresh paper marks");
                        }
                    }
                }
            }
        }))
    }
}

/// Fear/greed index, or a fixed neutral reading when `sentiment.disabled` is set.
///
/// # Errors
/// Returns error if the HTTP client cannot be built.
pub fn sentiment_provider(config: &SentimentConfig) -> Result<Arc<dyn SentimentProvider>> {
    if config.disabled {
        tracing::info!("Sentiment gate disabled, every reading is neutral");
        return Ok(Arc::new(StaticSentiment::default()));
    }
    let provider = FearGreedProvider::new(config).context("failed to build sentiment client")?;
    Ok(Arc::new(provider))
}
