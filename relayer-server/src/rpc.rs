//! HTTP JSON-RPC transport with retries.
//!
//! Transport failures, gateway responses that are not JSON-RPC, and rate
//! limit errors are retried with exponential backoff between `min_wait` and
//! `max_wait`. Other JSON-RPC errors (reverts, bad nonces) are returned as is.

use ethers::providers::{Http, HttpClientError, JsonRpcClient, Provider};
use serde::{Serialize, de::DeserializeOwned};
use std::fmt::Debug;
use std::time::Duration;
use url::Url;

/// JSON-RPC code used by Infura and others for request throttling.
const RATE_LIMITED: i64 = -32005;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub min_wait: Duration,
    pub max_wait: Duration,
}

impl RetryPolicy {
    /// Wait before retry number `attempt` (0-based): `min_wait * 2^attempt`,
    /// capped at `max_wait`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.min_wait
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_wait)
    }
}

fn is_retryable(error: &HttpClientError) -> bool {
    match error {
        HttpClientError::ReqwestError(_) => true,
        HttpClientError::SerdeJson { .. } => true,
        HttpClientError::JsonRpcError(e) => {
            e.code == 429
                || e.code == RATE_LIMITED
                || e.message.to_lowercase().contains("too many requests")
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryingHttp {
    inner: Http,
    policy: RetryPolicy,
}

impl RetryingHttp {
    pub fn new(url: Url, policy: RetryPolicy) -> Self {
        Self {
            inner: Http::new(url),
            policy,
        }
    }
}

#[async_trait::async_trait]
impl JsonRpcClient for RetryingHttp {
    type Error = HttpClientError;

    async fn request<T: Serialize + Send + Sync + Debug, R: DeserializeOwned + Send>(
        &self,
        method: &str,
        params: T,
    ) -> Result<R, HttpClientError> {
        let mut attempt = 0;
        loop {
            match self.inner.request(method, &params).await {
                Err(e) if attempt < self.policy.max_retries && is_retryable(&e) => {
                    let wait = self.policy.backoff(attempt);
                    attempt += 1;
                    tracing::warn!(
                        method,
                        attempt,
                        max_retries = self.policy.max_retries,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "RPC request failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
                result => return result,
            }
        }
    }
}

pub fn new_retrying_provider(url: Url, policy: RetryPolicy) -> Provider<RetryingHttp> {
    Provider::new(RetryingHttp::new(url, policy))
}
