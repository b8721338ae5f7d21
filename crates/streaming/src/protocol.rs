//! Wire protocol constants and the delivery retry policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Version byte that opens every framed envelope.
pub const FRAME_VERSION: u8 = 1;

/// Reply sent by the inbound pipeline for every received message.
pub const ACK: &[u8] = b"ACK";

/// Per-attempt deadline for one request/reply round trip.
pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(1000);

/// Retries after the first failed attempt.
pub const MAX_RETRIES: u32 = 3;

/// How the outbound pipeline retries a failed delivery.
///
/// An envelope gets `max_retries + 1` attempts, each bounded by
/// `request_timeout`. Between attempts the pipeline sleeps, starting at
/// `initial_backoff` and multiplying by `backoff_multiplier` up to
/// `max_backoff`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub request_timeout: Duration,
    pub initial_backoff: Duration,
    pub backoff_multiplier: f64,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            request_timeout: REQUEST_TIMEOUT,
            initial_backoff: Duration::from_millis(50),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// A policy that gives up after the first failure.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Total attempts per envelope.
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Backoff to use after `current`, never above `max_backoff`.
    ///
    /// A multiplier that yields a negative, NaN or overflowing delay falls
    /// back to `max_backoff`.
    pub fn next_backoff(&self, current: Duration) -> Duration {
        let scaled = current.as_secs_f64() * self.backoff_multiplier;
        Duration::try_from_secs_f64(scaled)
            .map(|next| next.min(self.max_backoff))
            .unwrap_or(self.max_backoff)
    }
}
