// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Authentication core configuration
//!
//! Provides builder API for the timing and resource knobs of the
//! [`SecurityManager`](super::SecurityManager).

use std::time::Duration;

use super::SecurityError;

/// Default retransmit period for unanswered handshake messages.
pub const DEFAULT_RESEND_PERIOD: Duration = Duration::from_millis(500);
/// Default wake-up period of the receive worker when idle.
pub const DEFAULT_RECEIVE_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Default capacity of the builtin writer histories.
pub const DEFAULT_WRITER_HISTORY_DEPTH: usize = 64;
/// Default number of local identity validation attempts.
pub const DEFAULT_LOCAL_IDENTITY_ATTEMPTS: u32 = 16;

/// Policy applied when local identity validation answers `PENDING_RETRY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first; `None` retries until an answer.
    pub max_attempts: Option<u32>,
    /// Pause between attempts.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Bounded, immediate retries.
    pub fn bounded(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            backoff: Duration::ZERO,
        }
    }

    /// Retry immediately until the plugin answers `OK` or `FAILED`.
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            backoff: Duration::ZERO,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Whether another attempt is allowed after `attempts` have been made.
    pub fn allows(&self, attempts: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempts < max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::bounded(DEFAULT_LOCAL_IDENTITY_ATTEMPTS)
    }
}

/// Authentication core configuration.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use hdds_auth::security::{AuthConfig, RetryPolicy};
///
/// let config = AuthConfig::builder()
///     .resend_period(Duration::from_millis(200))
///     .local_identity_retry(RetryPolicy::unbounded())
///     .build()
///     .expect("valid configuration");
/// assert_eq!(config.writer_history_depth, 64);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    /// Period between retransmissions of an unanswered handshake message.
    pub resend_period: Duration,

    /// Retry policy for `PENDING_RETRY` during `init()`.
    pub local_identity_retry: RetryPolicy,

    /// Capacity of the builtin writer histories
    /// (see `MemoryEndpointFactory::from_config`).
    pub writer_history_depth: usize,

    /// How long the receive worker blocks before checking for shutdown.
    pub receive_poll_interval: Duration,
}

impl AuthConfig {
    pub fn builder() -> AuthConfigBuilder {
        AuthConfigBuilder::default()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            resend_period: DEFAULT_RESEND_PERIOD,
            local_identity_retry: RetryPolicy::default(),
            writer_history_depth: DEFAULT_WRITER_HISTORY_DEPTH,
            receive_poll_interval: DEFAULT_RECEIVE_POLL_INTERVAL,
        }
    }
}

/// Builder for [`AuthConfig`].
///
/// [`build()`](AuthConfigBuilder::build) rejects zero periods and an empty
/// history with [`SecurityError::ConfigurationError`].
#[derive(Debug, Default)]
pub struct AuthConfigBuilder {
    config: AuthConfig,
}

impl AuthConfigBuilder {
    pub fn resend_period(mut self, period: Duration) -> Self {
        self.config.resend_period = period;
        self
    }

    pub fn local_identity_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.local_identity_retry = policy;
        self
    }

    pub fn writer_history_depth(mut self, depth: usize) -> Self {
        self.config.writer_history_depth = depth;
        self
    }

    pub fn receive_poll_interval(mut self, interval: Duration) -> Self {
        self.config.receive_poll_interval = interval;
        self
    }

    pub fn build(self) -> Result<AuthConfig, SecurityError> {
        let config = self.config;

        if config.resend_period.is_zero() {
            return Err(SecurityError::ConfigurationError(
                "resend_period must be non-zero".into(),
            ));
        }
        if config.receive_poll_interval.is_zero() {
            return Err(SecurityError::ConfigurationError(
                "receive_poll_interval must be non-zero".into(),
            ));
        }
        if config.writer_history_depth == 0 {
            return Err(SecurityError::ConfigurationError(
                "writer_history_depth must be at least 1".into(),
            ));
        }
        // A pending local identity gets at least one immediate retry.
        if matches!(config.local_identity_retry.max_attempts, Some(0 | 1)) {
            return Err(SecurityError::ConfigurationError(
                "local_identity_retry needs at least two attempts".into(),
            ));
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = AuthConfig::builder()
            .build()
            .expect("Default config should be valid");
        assert_eq!(config, AuthConfig::default());
        assert_eq!(config.resend_period, Duration::from_millis(500));
        assert_eq!(
            config.local_identity_retry.max_attempts,
            Some(DEFAULT_LOCAL_IDENTITY_ATTEMPTS)
        );
    }

    #[test]
    fn test_builder_rejects_zero_values() {
        let err = AuthConfig::builder()
            .resend_period(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(matches!(err, SecurityError::ConfigurationError(_)));

        assert!(AuthConfig::builder().writer_history_depth(0).build().is_err());
        assert!(AuthConfig::builder()
            .receive_poll_interval(Duration::ZERO)
            .build()
            .is_err());
        assert!(AuthConfig::builder()
            .local_identity_retry(RetryPolicy::bounded(0))
            .build()
            .is_err());
    }

    #[test]
    fn test_builder_requires_a_retry_after_the_first_attempt() {
        let err = AuthConfig::builder()
            .local_identity_retry(RetryPolicy::bounded(1))
            .build()
            .unwrap_err();
        assert!(matches!(err, SecurityError::ConfigurationError(_)));

        let config = AuthConfig::builder()
            .local_identity_retry(RetryPolicy::bounded(2))
            .build()
            .expect("one retry is enough");
        assert!(config.local_identity_retry.allows(1));
    }

    #[test]
    fn test_retry_policy_allows() {
        let bounded = RetryPolicy::bounded(2);
        assert!(bounded.allows(1));
        assert!(!bounded.allows(2));

        let unbounded = RetryPolicy::unbounded().with_backoff(Duration::from_millis(5));
        assert!(unbounded.allows(u32::MAX));
        assert_eq!(unbounded.backoff, Duration::from_millis(5));
    }
}
