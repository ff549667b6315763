use async_trait::async_trait;
use perp_guard_core::{MarketSentiment, SentimentConfig, SentimentProvider};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum SentimentError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed index response: {0}")]
    Malformed(String),
}

/// Response body of the fear/greed index endpoint.
///
/// ```json
/// {"name": "Fear and Greed Index",
///  "data": [{"value": "40", "value_classification": "Fear", "timestamp": "1700000000"}]}
/// ```
#[derive(Debug, Deserialize)]
struct IndexResponse {
    #[serde(default)]
    data: Vec<IndexEntry>,
}

#[derive(Debug, Deserialize)]
struct IndexEntry {
    /// Published as a decimal string.
    value: serde_json::Value,
    #[serde(default)]
    value_classification: Option<String>,
}

/// HTTP client for the public fear/greed index.
pub struct FearGreedProvider {
    http: Client,
    url: String,
}

impl FearGreedProvider {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &SentimentConfig) -> Result<Self, SentimentError> {
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            http,
            url: config.url.clone(),
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetches and classifies the latest index value.
    ///
    /// # Errors
    /// Returns an error on transport failure, a non-success status, or a body
    /// without a usable `data[0].value`.
    pub async fn fetch(&self) -> Result<MarketSentiment, SentimentError> {
        let response = self
            .http
            .get(&self.url)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SentimentError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: IndexResponse = response.json().await?;
        let entry = body
            .data
            .first()
            .ok_or_else(|| SentimentError::Malformed("empty data array".to_string()))?;

        let index = parse_index(&entry.value)?;
        let sentiment = MarketSentiment::from_index(index);
        debug!(
            index,
            category = ?sentiment.category,
            published = entry.value_classification.as_deref().unwrap_or("-"),
            "Fetched sentiment index"
        );
        Ok(sentiment)
    }
}

fn parse_index(value: &serde_json::Value) -> Result<u8, SentimentError> {
    let raw = match value {
        serde_json::Value::String(s) => s.trim().parse::<u64>().ok(),
        serde_json::Value::Number(n) => n.as_u64(),
        _ => None,
    };
    raw.filter(|v| *v <= 100)
        .and_then(|v| u8::try_from(v).ok())
        .ok_or_else(|| SentimentError::Malformed(format!("index value {value}")))
}

#[async_trait]
impl SentimentProvider for FearGreedProvider {
    async fn get_sentiment(&self) -> MarketSentiment {
        match self.fetch().await {
            Ok(sentiment) => sentiment,
            Err(e) => {
                warn!(error = %e, "Sentiment provider unavailable, using neutral default");
                MarketSentiment::neutral()
            }
        }
    }
}
