use governor::{clock::DefaultClock, state::InMemoryState, Quota, RateLimiter};
use nonzero_ext::nonzero;
use perp_guard_core::GatewayError;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Rate-limited JSON transport for the `/info` and `/exchange` endpoints.
pub struct HyperliquidClient {
    http_client: Client,
    base_url: String,
    rate_limiter: Arc<RateLimiter<governor::state::direct::NotKeyed, InMemoryState, DefaultClock>>,
}

impl HyperliquidClient {
    /// # Errors
    /// Returns error if the HTTP client cannot be built
    pub fn new(base_url: impl Into<String>) -> Result<Self, GatewayError> {
        // 1200 requests per minute = 20 per second
        let quota = Quota::per_second(nonzero!(20u32));
        let rate_limiter = Arc::new(RateLimiter::direct(quota));

        let http_client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            rate_limiter,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Read-only query against `/info`.
    ///
    /// # Errors
    /// Returns the classified transport or venue error
    pub async fn info(&self, body: serde_json::Value) -> Result<serde_json::Value, GatewayError> {
        self.post("/info", body).await
    }

    /// Signed action against `/exchange`.
    ///
    /// # Errors
    /// Returns the classified transport or venue error
    pub async fn exchange(
        &self,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, GatewayError> {
        self.post("/exchange", body).await
    }

    async fn post(
        &self,
        endpoint: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, GatewayError> {
        self.rate_limiter.until_ready().await;
        let url = format!("{}{}", self.base_url, endpoint);
        debug!(url = %url, "POST");

        let response = self
            .http_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map_or(1_000, |secs| secs * 1_000);
            return Err(GatewayError::RateLimited { retry_after_ms });
        }
        if status.is_server_error() {
            return Err(GatewayError::network(format!("{endpoint} returned {status}")));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GatewayError::rejected(format!("{endpoint} returned {status}: {text}")));
        }

        response
            .json()
            .await
            .map_err(|e| GatewayError::Parse(e.to_string()))
    }
}

fn classify_transport(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout(e.to_string())
    } else {
        GatewayError::network(e.to_string())
    }
}
