//! Optional startup callout to a remote identity issuer.
//!
//! Most deployments never set `--identity-issuer-url`: the destination
//! server resolves endpoints and profiles without ever needing its own
//! workload identity reissued. When an operator does point this at an
//! issuer, the request goes through the bounded retry helper rather than a
//! bare `reqwest::Client::send`, since issuers are commonly rate-limited
//! and briefly return 400 while a freshly-created identity is propagating.

use destination_core::retry::{send_with_retry, RetryConfig};
use tracing::{info, warn};

/// Requests a fresh identity from `issuer_url` and logs the outcome. Errors
/// are non-fatal: the destination service's own RPC surface is unaffected
/// either way, so a failed issuance is reported and swallowed rather than
/// aborting startup.
pub async fn fetch_identity(client: &reqwest::Client, issuer_url: &str) {
    let config = RetryConfig::default();
    let result = send_with_retry(|| client.post(issuer_url), &config).await;
    match result {
        Ok(resp) if resp.status().is_success() => {
            info!(%issuer_url, "identity issuance succeeded");
        }
        Ok(resp) => {
            warn!(%issuer_url, status = %resp.status(), "identity issuer returned a non-success status");
        }
        Err(error) => {
            warn!(%issuer_url, %error, "identity issuance failed");
        }
    }
}
