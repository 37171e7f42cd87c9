//! Bounded retry wrapper for outbound calls to remote signing/identity
//! services reached over HTTP, used by embedders that perform a PCA-like
//! callout (issuing or rotating an identity) as part of their own control
//! loop. Nothing on the endpoint/profile serving path depends on this
//! module; it exists alongside it, not inside it.

use backoff::{backoff::Backoff, ExponentialBackoffBuilder};
use std::time::Duration;

/// Bounds on attempt count and backoff for [`send_with_retry`].
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first. Must be >= 1.
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    #[error("request failed after {attempts} attempt(s)")]
    Exhausted {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Sends the request built by `build`, retrying on transport errors and on
/// HTTP 400 — the remote signer's documented response while the requested
/// object is still propagating — up to `config.max_attempts` times.
///
/// Any other status, including every 2xx, is returned immediately without
/// inspecting the body: this helper retries transport and request framing,
/// it does not second-guess the caller's own response handling.
pub async fn send_with_retry(
    build: impl Fn() -> reqwest::RequestBuilder,
    config: &RetryConfig,
) -> Result<reqwest::Response, RetryError> {
    assert!(config.max_attempts >= 1, "max_attempts must be >= 1");

    let mut backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(config.initial_interval)
        .with_max_interval(config.max_interval)
        .with_max_elapsed_time(None)
        .build();

    let mut attempt = 1;
    loop {
        match build().send().await {
            Ok(resp) if resp.status().as_u16() != 400 => return Ok(resp),
            Ok(resp) if attempt >= config.max_attempts => return Ok(resp),
            Ok(resp) => {
                tracing::debug!(attempt, status = %resp.status(), "retrying propagating-object response");
            }
            Err(e) if is_retryable(&e) && attempt < config.max_attempts => {
                tracing::debug!(attempt, error = %e, "retrying transport error");
            }
            Err(source) => return Err(RetryError::Exhausted { attempts: attempt, source }),
        }

        let Some(delay) = backoff.next_backoff() else {
            // Can't happen with max_elapsed_time(None), but fall back to a
            // direct retry rather than looping forever on a `None`.
            attempt += 1;
            continue;
        };
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

fn is_retryable(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_retries_at_least_once() {
        let cfg = RetryConfig::default();
        assert!(cfg.max_attempts >= 1);
    }

    #[tokio::test]
    async fn single_attempt_config_never_sleeps_before_returning() {
        let cfg = RetryConfig {
            max_attempts: 1,
            ..RetryConfig::default()
        };
        let client = reqwest::Client::new();
        // An unroutable address fails fast; with max_attempts=1 this must
        // return after exactly one send, not retry into a timeout.
        let result = send_with_retry(
            || client.get("http://127.0.0.1:0/"),
            &cfg,
        )
        .await;
        assert!(result.is_err());
    }
}
