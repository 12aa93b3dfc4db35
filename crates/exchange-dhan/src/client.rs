//! Authenticated HTTP client for the Dhan REST API.

use governor::{clock::DefaultClock, state::InMemoryState, Quota, RateLimiter};
use reqwest::Client;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use trend_trade_core::BrokerError;

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 100;

pub struct DhanClient {
    http_client: Client,
    base_url: String,
    access_token: String,
    client_id: String,
    rate_limiter: Arc<RateLimiter<governor::state::direct::NotKeyed, InMemoryState, DefaultClock>>,
}

impl DhanClient {
    /// # Panics
    /// Never; the quota constant is non-zero.
    #[must_use]
    pub fn new(base_url: String, access_token: String, client_id: String) -> Self {
        // Dhan data APIs allow 10 requests per second per token.
        let quota = Quota::per_second(NonZeroU32::new(10).unwrap());
        let rate_limiter = Arc::new(RateLimiter::direct(quota));

        Self {
            http_client: Client::new(),
            base_url,
            access_token,
            client_id,
            rate_limiter,
        }
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// GET with auth headers, rate limiting, and bounded retry on transient
    /// failures.
    ///
    /// # Errors
    /// `BrokerError::Transient` on network failures and 5xx, `Rejected` on
    /// 4xx responses.
    pub async fn get(&self, endpoint: &str) -> Result<serde_json::Value, BrokerError> {
        self.request_with_retry(|| {
            self.http_client
                .get(format!("{}{}", self.base_url, endpoint))
        })
        .await
    }

    /// POST with auth headers, rate limiting, and bounded retry on transient
    /// failures.
    ///
    /// # Errors
    /// `BrokerError::Transient` on network failures and 5xx, `Rejected` on
    /// 4xx responses.
    pub async fn post(
        &self,
        endpoint: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, BrokerError> {
        self.request_with_retry(|| {
            self.http_client
                .post(format!("{}{}", self.base_url, endpoint))
                .json(&body)
        })
        .await
    }

    async fn request_with_retry<F>(&self, build: F) -> Result<serde_json::Value, BrokerError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut last_err = None;
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let backoff = BACKOFF_BASE_MS * (1 << (attempt - 1));
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
            self.rate_limiter.until_ready().await;

            let result = build()
                .header("access-token", &self.access_token)
                .header("client-id", &self.client_id)
                .send()
                .await;

            match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json()
                            .await
                            .map_err(|e| BrokerError::Transient(format!("bad response body: {e}")));
                    }
                    let body = response.text().await.unwrap_or_default();
                    if status.is_server_error() {
                        tracing::warn!(%status, attempt, "Dhan 5xx, retrying");
                        last_err = Some(BrokerError::Transient(format!("{status}: {body}")));
                        continue;
                    }
                    return Err(BrokerError::Rejected(format!("{status}: {body}")));
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    tracing::warn!(error = %e, attempt, "Dhan request failed, retrying");
                    last_err = Some(BrokerError::Transient(e.to_string()));
                }
                Err(e) => return Err(BrokerError::Fatal(e.to_string())),
            }
        }
        Err(last_err.unwrap_or_else(|| BrokerError::Transient("request retries exhausted".into())))
    }
}
