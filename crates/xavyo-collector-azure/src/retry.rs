//! Bounded retry with linear backoff and `Retry-After` honoring.
//!
//! Graph reads, Resource Manager calls and `$batch` envelopes all retry
//! under one policy. Each wait is
//! `(attempt + 1) * step_delay`, plus the server's `Retry-After` clamped to
//! the policy window when the response carried one.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use tracing::warn;

use crate::config::RetryPolicy;

/// Parses a `Retry-After` header value.
///
/// Accepts delta-seconds (`"120"`) or an HTTP-date
/// (`"Wed, 21 Oct 2015 07:28:00 GMT"`). Dates in the past yield zero.
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let value = header_value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?;
    let remaining = at.with_timezone(&Utc) - Utc::now();
    Some(remaining.to_std().unwrap_or(Duration::ZERO))
}

/// Returns true for retryable statuses: 429 and 5xx.
#[must_use]
pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

impl RetryPolicy {
    /// Clamps a server-supplied `Retry-After` into the policy window.
    #[must_use]
    pub fn clamp_retry_after(&self, retry_after: Duration) -> Duration {
        if retry_after > self.retry_after_max {
            warn!(
                "Retry-After {:?} exceeds max, capping at {:?}",
                retry_after, self.retry_after_max
            );
        }
        retry_after.clamp(self.retry_after_min, self.retry_after_max)
    }

    /// Delay before the next attempt, given the zero-based attempt that just failed.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let step = self.step_delay.saturating_mul(attempt.saturating_add(1));
        match retry_after {
            Some(server) => step.saturating_add(self.clamp_retry_after(server)),
            None => step,
        }
    }

    /// Returns true if another attempt is allowed after `attempt` (zero-based) failed.
    #[must_use]
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt.saturating_add(1) < self.max_attempts
    }
}
