use std::thread::sleep;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use log::debug;
use reqwest::StatusCode;
use reqwest::blocking::{RequestBuilder, Response};

use crate::pacing::Pacer;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

/// Send a request built by `build`, pacing every attempt and retrying transient failures.
///
/// Non-retryable HTTP statuses are returned to the caller, which decides what a 404 means.
pub fn send_with_retry<F>(
    pacer: &mut Pacer,
    policy: &RetryPolicy,
    service: &str,
    build: F,
) -> Result<Response>
where
    F: Fn() -> RequestBuilder,
{
    for attempt in 0..=policy.max_retries {
        pacer.wait();
        match build().send() {
            Ok(response) => {
                let status = response.status();
                if attempt < policy.max_retries && is_retryable_status(status) {
                    debug!("{service} returned HTTP {status}; retrying (attempt {attempt})");
                    wait_before_retry(policy, attempt);
                    continue;
                }
                return Ok(response);
            }
            Err(error) => {
                if attempt < policy.max_retries && is_retryable_error(&error) {
                    debug!("{service} request failed: {error}; retrying (attempt {attempt})");
                    wait_before_retry(policy, attempt);
                    continue;
                }
                return Err(error).with_context(|| format!("failed to call {service}"));
            }
        }
    }

    bail!("{service} request exhausted retry budget")
}

/// Fail with the status and a short body excerpt unless the response succeeded.
pub fn ensure_success(response: Response, service: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    let excerpt = body.chars().take(200).collect::<String>();
    bail!("{service} request failed with HTTP {status}: {excerpt}")
}

fn wait_before_retry(policy: &RetryPolicy, attempt: usize) {
    let exponent = u32::try_from(attempt).unwrap_or(16);
    let base = policy
        .retry_delay_ms
        .saturating_mul(2u64.saturating_pow(exponent));
    let jitter = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| u64::from(duration.subsec_millis() % 100))
        .unwrap_or(0);
    sleep(Duration::from_millis(base.saturating_add(jitter)));
}

pub fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::is_retryable_status;

    #[test]
    fn only_transient_statuses_are_retried() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::UNAUTHORIZED));
        assert!(!is_retryable_status(StatusCode::UNPROCESSABLE_ENTITY));
    }
}
