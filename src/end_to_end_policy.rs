//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
use crate::availability_strategy::AvailabilityStrategy;
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// Default end-to-end operation timeout.
pub const DEFAULT_END_TO_END_TIMEOUT: Duration = Duration::from_secs(2);

// Below this, a single slow region is likely to consume the whole budget.
const LOW_TIMEOUT_WARNING: Duration = Duration::from_millis(100);

/// Bounds the total wall-clock time of a logical operation, across all
/// retries and regions.
///
/// When enabled, the operation fails with
/// [`DeadlineExceeded`](crate::NoSQLErrorCode::DeadlineExceeded) as soon as the
/// timeout elapses, even if attempts are still in flight; those attempts are
/// cancelled.
///
/// The optional [`AvailabilityStrategy`] controls racing across regions. If it
/// is absent, regions are tried sequentially.
///
/// Instances are immutable. Use [`EndToEndOperationLatencyPolicyConfig::builder()`]
/// to create one, or the shared [`default_policy()`](EndToEndOperationLatencyPolicyConfig::default_policy())
/// and [`disabled()`](EndToEndOperationLatencyPolicyConfig::disabled()) instances.
///
/// Note: very low timeouts can fail every operation before any region has a
/// chance to answer.
#[derive(Clone, Debug)]
pub struct EndToEndOperationLatencyPolicyConfig {
    enabled: bool,
    timeout: Duration,
    availability_strategy: Option<AvailabilityStrategy>,
    // computed once at construction, used for diagnostics
    repr: String,
}

impl PartialEq for EndToEndOperationLatencyPolicyConfig {
    fn eq(&self, other: &Self) -> bool {
        self.enabled == other.enabled
            && self.timeout == other.timeout
            && self.availability_strategy == other.availability_strategy
    }
}

impl Eq for EndToEndOperationLatencyPolicyConfig {}

impl EndToEndOperationLatencyPolicyConfig {
    /// Create a builder for a policy with the given end-to-end timeout.
    pub fn builder(timeout: Duration) -> EndToEndOperationLatencyPolicyConfigBuilder {
        EndToEndOperationLatencyPolicyConfigBuilder::new(timeout)
    }

    fn new(
        enabled: bool,
        timeout: Duration,
        availability_strategy: Option<AvailabilityStrategy>,
    ) -> Self {
        let strategy = match &availability_strategy {
            Some(s) => s.to_string(),
            None => "None".to_string(),
        };
        let repr = format!(
            "EndToEndOperationLatencyPolicy{{enabled={}, timeout={}ms, availability_strategy={}}}",
            enabled,
            timeout.as_millis(),
            strategy
        );
        EndToEndOperationLatencyPolicyConfig {
            enabled,
            timeout,
            availability_strategy,
            repr,
        }
    }

    /// Enabled, 2 second timeout, sequential failover.
    pub fn default_policy() -> &'static EndToEndOperationLatencyPolicyConfig {
        static DEFAULT: OnceLock<EndToEndOperationLatencyPolicyConfig> = OnceLock::new();
        DEFAULT.get_or_init(|| Self::new(true, DEFAULT_END_TO_END_TIMEOUT, None))
    }

    /// No operation-wide deadline; only per-attempt timeouts apply.
    pub fn disabled() -> &'static EndToEndOperationLatencyPolicyConfig {
        static DISABLED: OnceLock<EndToEndOperationLatencyPolicyConfig> = OnceLock::new();
        DISABLED.get_or_init(|| Self::new(false, DEFAULT_END_TO_END_TIMEOUT, None))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn end_to_end_operation_timeout(&self) -> Duration {
        self.timeout
    }

    pub fn availability_strategy(&self) -> Option<&AvailabilityStrategy> {
        self.availability_strategy.as_ref()
    }

    /// The absolute deadline for an operation started at `start`, or `None`
    /// if the policy is disabled.
    pub(crate) fn deadline(&self, start: Instant) -> Option<Instant> {
        if !self.enabled {
            return None;
        }
        start.checked_add(self.timeout)
    }

    /// The strategy to apply: racing only when the policy is enabled.
    pub(crate) fn effective_strategy(&self) -> AvailabilityStrategy {
        match (&self.availability_strategy, self.enabled) {
            (Some(s), true) => s.clone(),
            _ => AvailabilityStrategy::sequential(),
        }
    }
}

impl fmt::Display for EndToEndOperationLatencyPolicyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr)
    }
}

/// Builder for [`EndToEndOperationLatencyPolicyConfig`].
#[derive(Clone, Debug)]
pub struct EndToEndOperationLatencyPolicyConfigBuilder {
    enabled: bool,
    timeout: Duration,
    availability_strategy: Option<AvailabilityStrategy>,
}

impl EndToEndOperationLatencyPolicyConfigBuilder {
    pub fn new(timeout: Duration) -> Self {
        EndToEndOperationLatencyPolicyConfigBuilder {
            enabled: true,
            timeout,
            availability_strategy: None,
        }
    }

    /// Enable or disable the policy. Policies are enabled by default.
    pub fn enable(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the availability strategy used to race regions.
    pub fn availability_strategy(mut self, strategy: impl Into<AvailabilityStrategy>) -> Self {
        self.availability_strategy = Some(strategy.into());
        self
    }

    pub fn build(self) -> EndToEndOperationLatencyPolicyConfig {
        if self.enabled && self.timeout < LOW_TIMEOUT_WARNING {
            warn!(
                "end-to-end operation timeout of {}ms is very low and may fail all regions",
                self.timeout.as_millis()
            );
        }
        EndToEndOperationLatencyPolicyConfig::new(
            self.enabled,
            self.timeout,
            self.availability_strategy,
        )
    }
}
