//! HTTP page retrieval with failure classification.
//!
//! Storefront adapters should use [`get_text`] instead of calling
//! `reqwest::RequestBuilder::send()` directly so every response is mapped
//! onto the [`FetchFailure`] taxonomy the collection loop understands.
//!
//! Only connection-level hiccups are retried here, and only briefly.
//! Rate limiting and bot detection are surfaced immediately as
//! [`FetchFailure::Blocked`]: backing off from a storefront is the
//! collection loop's decision, not the adapter's.

use std::time::Duration;

use reqwest::StatusCode;

use crate::FetchFailure;

/// Quick retries for connection-level errors within one invocation
/// (1s, then 2s).
const MAX_CONNECT_RETRIES: u32 = 2;

/// Sends the request built by `build_request` and returns the body text.
///
/// The closure is called on each try to construct a fresh
/// [`reqwest::RequestBuilder`], since builders are consumed by `.send()`.
///
/// # Errors
///
/// Returns a classified [`FetchFailure`]:
///
/// * connect, timeout, request, and body errors: [`FetchFailure::Transient`]
///   after [`MAX_CONNECT_RETRIES`] retries
/// * HTTP 429, 403, 503 and any other 4xx: [`FetchFailure::Blocked`]
/// * any other 5xx: [`FetchFailure::Transient`]
#[allow(clippy::future_not_send)]
pub async fn get_text<F>(build_request: F) -> Result<String, FetchFailure>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut attempt = 0;

    loop {
        if attempt > 0 {
            let delay = Duration::from_secs(1u64 << (attempt - 1));
            log::debug!("  connect retry {attempt}/{MAX_CONNECT_RETRIES} in {delay:?}...");
            tokio::time::sleep(delay).await;
        }

        match build_request().send().await {
            Err(e) => {
                if is_transient(&e) && attempt < MAX_CONNECT_RETRIES {
                    log::debug!("  transient error: {e}");
                    attempt += 1;
                    continue;
                }
                return Err(FetchFailure::transient(e.to_string()));
            }
            Ok(response) => {
                let status = response.status();
                if let Some(failure) = classify_status(status) {
                    log::debug!("  HTTP {status} from {}", response.url());
                    return Err(failure);
                }

                return response
                    .text()
                    .await
                    .map_err(|e| FetchFailure::transient(format!("body read failed: {e}")));
            }
        }
    }
}

/// Maps a response status onto the failure taxonomy. `None` for 2xx/3xx.
#[must_use]
pub fn classify_status(status: StatusCode) -> Option<FetchFailure> {
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::FORBIDDEN
        || status == StatusCode::SERVICE_UNAVAILABLE
    {
        return Some(FetchFailure::blocked(format!("HTTP {status}")));
    }
    if status.is_server_error() {
        return Some(FetchFailure::transient(format!("HTTP {status}")));
    }
    if status.is_client_error() {
        return Some(FetchFailure::blocked(format!("HTTP {status}")));
    }
    None
}

/// Returns `true` if the error is likely transient and worth a quick retry.
fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_body() || e.is_request()
}
