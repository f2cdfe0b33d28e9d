/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use rand::{thread_rng, Rng};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{RequestBuilder, Response, StatusCode};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::metrics::SyncMetrics;

const MAX_DELAY: Duration = Duration::from_secs(5);

/// Retry schedule for one logical request.
struct Backoff {
    next: Duration,
    attempt: u32,
    max_attempts: u32,
}

impl Backoff {
    fn new(attempts: u32) -> Self {
        Self {
            next: Duration::from_millis(200),
            attempt: 0,
            max_attempts: attempts.clamp(1, 5),
        }
    }

    /// Starts an attempt; false once the budget is spent.
    fn begin(&mut self) -> bool {
        if self.attempt >= self.max_attempts {
            return false;
        }
        self.attempt += 1;
        true
    }

    fn exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Delay before the next attempt. A server hint replaces the
    /// exponential step but is capped like it.
    fn delay(&mut self, hint: Option<Duration>) -> Duration {
        let jitter = Duration::from_millis(thread_rng().gen_range(0..=200));
        let base = hint.unwrap_or(self.next).min(MAX_DELAY);
        self.next = self.next.saturating_mul(2).min(MAX_DELAY);
        base + jitter
    }
}

/// Sends the request built by `build`, retrying transport errors, 429 and 5xx.
/// The last response is returned as-is so callers see the real status.
pub async fn send_with_retry_metrics<F>(
    mut build: F,
    attempts: u32,
    metrics: &SyncMetrics,
) -> Result<Response, reqwest::Error>
where
    F: FnMut() -> RequestBuilder,
{
    let mut backoff = Backoff::new(attempts);
    while backoff.begin() {
        let started = Instant::now();
        let hint = match build().send().await {
            Ok(resp) if !should_retry_status(resp.status()) => {
                metrics.remote_success(started.elapsed().as_millis() as u64);
                return Ok(resp);
            }
            Ok(resp) => {
                metrics.http_error();
                if backoff.exhausted() {
                    return Ok(resp);
                }
                retry_after(resp.headers())
            }
            Err(e) => {
                if e.is_timeout() {
                    metrics.http_timeout();
                } else {
                    metrics.http_error();
                }
                metrics.set_last_error(e.to_string());
                if backoff.exhausted() {
                    return Err(e);
                }
                None
            }
        };
        let wait = backoff.delay(hint);
        debug!(attempt = backoff.attempt, wait_ms = wait.as_millis() as u64, "retrying request");
        tokio::time::sleep(wait).await;
    }
    // begin() always admits the first attempt and every arm above returns on the last one.
    unreachable!("retry loop exits from within")
}

fn should_retry_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// `Retry-After` in delta-seconds form; HTTP dates are ignored.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let secs = headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse::<u64>().ok()?;
    Some(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn retries_only_throttling_and_server_errors() {
        assert!(should_retry_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(should_retry_status(StatusCode::BAD_GATEWAY));
        assert!(!should_retry_status(StatusCode::NOT_FOUND));
        assert!(!should_retry_status(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn retry_after_seconds_are_read_and_capped() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("2"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(2)));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(retry_after(&headers), None);

        let mut backoff = Backoff::new(3);
        let wait = backoff.delay(Some(Duration::from_secs(60)));
        assert!(wait >= MAX_DELAY && wait <= MAX_DELAY + Duration::from_millis(200));
    }

    #[test]
    fn backoff_doubles_and_respects_attempt_budget() {
        let mut backoff = Backoff::new(2);
        assert!(backoff.begin());
        assert!(!backoff.exhausted());
        let first = backoff.delay(None);
        let second = backoff.delay(None);
        assert!(first < Duration::from_millis(401));
        assert!(second >= Duration::from_millis(400));
        assert!(backoff.begin());
        assert!(backoff.exhausted());
        assert!(!backoff.begin());
    }
}
