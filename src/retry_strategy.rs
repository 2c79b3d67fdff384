//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
use crate::error::{ia_err, NoSQLError};
use crate::session_retry_options::RegionSwitchHint;
use std::collections::HashMap;
use std::result::Result;
use std::time::Duration;

/// Default number of in-place retries of a throttled (429) attempt.
pub const DEFAULT_MAX_THROTTLE_RETRIES: u32 = 9;

/// Default cumulative time spent waiting on throttled attempts.
pub const DEFAULT_MAX_THROTTLE_WAIT: Duration = Duration::from_secs(30);

const THROTTLE_BACKOFF_INITIAL: Duration = Duration::from_millis(100);
const THROTTLE_BACKOFF_MAX: Duration = Duration::from_secs(5);

/// The kind of logical operation being executed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum OperationType {
    Read,
    Query,
    ReadFeed,
    Create,
    Upsert,
    Replace,
    Patch,
    Delete,
    Batch,
    ExecuteStoredProcedure,
}

impl OperationType {
    /// Read-only operations are always safe to retry in another region.
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            OperationType::Read | OperationType::Query | OperationType::ReadFeed
        )
    }

    pub fn is_write(&self) -> bool {
        !self.is_read_only()
    }
}

/// Retry settings applied to one kind of operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RetryConfig {
    pub(crate) region_switch_hint: RegionSwitchHint,
    pub(crate) max_throttle_retries: u32,
    pub(crate) max_throttle_wait: Duration,
    pub(crate) attempt_timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            region_switch_hint: RegionSwitchHint::default(),
            max_throttle_retries: DEFAULT_MAX_THROTTLE_RETRIES,
            max_throttle_wait: DEFAULT_MAX_THROTTLE_WAIT,
            attempt_timeout: None,
        }
    }
}

impl RetryConfig {
    pub fn new() -> RetryConfig {
        RetryConfig::default()
    }

    pub fn region_switch_hint(mut self, hint: RegionSwitchHint) -> Self {
        self.region_switch_hint = hint;
        self
    }

    /// Maximum in-place retries of a throttled attempt.
    pub fn max_throttle_retries(mut self, n: u32) -> Self {
        self.max_throttle_retries = n;
        self
    }

    /// Maximum cumulative wait on throttled attempts.
    pub fn max_throttle_wait(mut self, t: Duration) -> Self {
        self.max_throttle_wait = t;
        self
    }

    /// Timeout of a single attempt. Must be at least 1 millisecond.
    pub fn attempt_timeout(mut self, t: Duration) -> Result<Self, NoSQLError> {
        if t < Duration::from_millis(1) {
            return ia_err!("attempt timeout must be at least 1ms");
        }
        self.attempt_timeout = Some(t);
        Ok(self)
    }

    pub fn get_region_switch_hint(&self) -> RegionSwitchHint {
        self.region_switch_hint
    }

    pub fn get_max_throttle_retries(&self) -> u32 {
        self.max_throttle_retries
    }

    pub fn get_max_throttle_wait(&self) -> Duration {
        self.max_throttle_wait
    }

    pub fn get_attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout
    }

    // Exponential backoff used when the service gives no retry-after value.
    pub(crate) fn throttle_backoff(&self, retries: u32) -> Duration {
        let shift = retries.min(16);
        THROTTLE_BACKOFF_INITIAL
            .saturating_mul(1u32 << shift)
            .min(THROTTLE_BACKOFF_MAX)
    }
}

/// Retry configuration per [`OperationType`], with a default for operation
/// types that have no override.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RetryStrategy {
    default: RetryConfig,
    overrides: HashMap<OperationType, RetryConfig>,
}

impl RetryStrategy {
    pub fn builder() -> RetryStrategyBuilder {
        RetryStrategyBuilder::default()
    }

    /// The configuration that applies to `op`.
    pub fn config_for(&self, op: OperationType) -> &RetryConfig {
        self.overrides.get(&op).unwrap_or(&self.default)
    }

    pub fn default_config(&self) -> &RetryConfig {
        &self.default
    }

    pub(crate) fn has_override(&self, op: OperationType) -> bool {
        self.overrides.contains_key(&op)
    }
}

/// Builder for [`RetryStrategy`].
///
/// Overrides are merged incrementally: setting the region switch hint for an
/// operation type keeps any other override already made for that type, and
/// starts from the default configuration otherwise.
#[derive(Clone, Debug, Default)]
pub struct RetryStrategyBuilder {
    default: RetryConfig,
    overrides: HashMap<OperationType, RetryConfig>,
}

impl RetryStrategyBuilder {
    /// Replace the default configuration.
    pub fn default_config(mut self, config: RetryConfig) -> Self {
        self.default = config;
        self
    }

    /// Replace the configuration for one operation type.
    pub fn config_for(mut self, op: OperationType, config: RetryConfig) -> Self {
        self.overrides.insert(op, config);
        self
    }

    /// Apply a change to the configuration of the given operation types,
    /// starting from the existing override or the default.
    pub fn update<F>(mut self, ops: &[OperationType], f: F) -> Self
    where
        F: Fn(RetryConfig) -> RetryConfig,
    {
        for op in ops {
            let current = self
                .overrides
                .get(op)
                .cloned()
                .unwrap_or_else(|| self.default.clone());
            self.overrides.insert(*op, f(current));
        }
        self
    }

    /// Set the region switch hint for the given operation types.
    pub fn region_switch_hint(self, ops: &[OperationType], hint: RegionSwitchHint) -> Self {
        self.update(ops, |c| c.region_switch_hint(hint))
    }

    /// Set the throttle retry limits for the given operation types.
    pub fn throttle_limits(self, ops: &[OperationType], retries: u32, wait: Duration) -> Self {
        self.update(ops, |c| c.max_throttle_retries(retries).max_throttle_wait(wait))
    }

    pub fn build(self) -> RetryStrategy {
        RetryStrategy {
            default: self.default,
            overrides: self.overrides,
        }
    }
}
