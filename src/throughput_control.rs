//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
//! Configuration of throughput control groups.
//!
//! A throughput control group caps the throughput (in request units per
//! second) that operations tagged with the group may consume against one
//! container. A *local* group enforces the cap within a single [`Handle`](crate::Handle).
//! A *global* group shares the cap between every client using the same
//! control container: each client periodically records its usage there and
//! takes an equal share of the cap among the clients seen recently.
//!
//! ```no_run
//! use nosql_multiregion_rust_sdk::{GlobalThroughputControlConfigBuilder, ThroughputControlGroupConfigBuilder};
//! # fn main() -> Result<(), nosql_multiregion_rust_sdk::NoSQLError> {
//! let group = ThroughputControlGroupConfigBuilder::default()
//!     .group_name("batch-jobs")
//!     .target_container("dbs/shop/colls/orders")
//!     .target_throughput(10000u32)
//!     .build()?;
//! let global = GlobalThroughputControlConfigBuilder::default()
//!     .control_container("dbs/shop/colls/throughput-control")
//!     .build()?;
//! # Ok(())
//! # }
//! ```
use crate::error::{ia_err, NoSQLError};
use derive_builder::Builder;
use std::result::Result;
use std::time::Duration;

/// Smallest allowed interval between usage record renewals.
pub const MIN_CONTROL_ITEM_RENEW_INTERVAL: Duration = Duration::from_secs(5);

/// Default interval between usage record renewals.
pub const DEFAULT_CONTROL_ITEM_RENEW_INTERVAL: Duration = Duration::from_secs(5);

/// Default age after which a client's usage record is considered stale.
pub const DEFAULT_CONTROL_ITEM_EXPIRE_INTERVAL: Duration = Duration::from_secs(11);

/// A named throughput cap for operations against one container.
///
/// Exactly one of `target_throughput` or `target_throughput_threshold` must
/// be set; this is checked when the group is activated on a handle.
#[derive(Builder, Clone, Debug, PartialEq)]
#[builder(
    pattern = "owned",
    build_fn(validate = "Self::validate", error = "NoSQLError")
)]
pub struct ThroughputControlGroupConfig {
    /// Name of the group, unique within a handle.
    #[builder(setter(into))]
    group_name: String,
    /// Link of the container the group governs, `dbs/{db}/colls/{coll}`.
    #[builder(setter(into))]
    target_container: String,
    /// Absolute cap in request units per second, greater than 0.
    #[builder(setter(into, strip_option), default)]
    target_throughput: Option<u32>,
    /// Cap as a fraction, in (0, 1], of the container's provisioned throughput.
    #[builder(setter(into, strip_option), default)]
    target_throughput_threshold: Option<f64>,
    /// Operations on the target container that name no group use the default group.
    #[builder(default)]
    is_default: bool,
}

impl ThroughputControlGroupConfigBuilder {
    fn validate(&self) -> Result<(), NoSQLError> {
        if let Some(name) = &self.group_name {
            if name.trim().is_empty() {
                return ia_err!("throughput control group name must not be empty");
            }
        }
        if let Some(c) = &self.target_container {
            if c.trim_matches('/').is_empty() {
                return ia_err!("throughput control target container must not be empty");
            }
        }
        if let Some(Some(0)) = self.target_throughput {
            return ia_err!("target throughput must be greater than 0");
        }
        if let Some(Some(t)) = self.target_throughput_threshold {
            if !(t > 0.0 && t <= 1.0) {
                return ia_err!(
                    "target throughput threshold must be in (0, 1], got {}",
                    t
                );
            }
        }
        Ok(())
    }
}

impl ThroughputControlGroupConfig {
    pub fn group_name(&self) -> &str {
        &self.group_name
    }

    pub fn target_container(&self) -> &str {
        self.target_container.trim_matches('/')
    }

    pub fn target_throughput(&self) -> Option<u32> {
        self.target_throughput
    }

    pub fn target_throughput_threshold(&self) -> Option<f64> {
        self.target_throughput_threshold
    }

    pub fn is_default(&self) -> bool {
        self.is_default
    }

    // Checked at activation time.
    pub(crate) fn validate_target(&self) -> Result<(), NoSQLError> {
        match (self.target_throughput, self.target_throughput_threshold) {
            (Some(_), Some(_)) => ia_err!(
                "throughput control group '{}': target throughput and target throughput threshold are mutually exclusive",
                self.group_name
            ),
            (None, None) => ia_err!(
                "throughput control group '{}': one of target throughput or target throughput threshold is required",
                self.group_name
            ),
            _ => Ok(()),
        }
    }
}

/// Settings of the shared control container used by global groups.
///
/// `control_item_expire_interval` must be at least
/// `2 * control_item_renew_interval + 1s`, so a client is only considered
/// gone after it missed at least one renewal.
#[derive(Builder, Clone, Debug, PartialEq, Eq)]
#[builder(
    pattern = "owned",
    build_fn(validate = "Self::validate", error = "NoSQLError")
)]
pub struct GlobalThroughputControlConfig {
    /// Link of the container holding the usage records.
    #[builder(setter(into))]
    control_container: String,
    #[builder(default = "DEFAULT_CONTROL_ITEM_RENEW_INTERVAL")]
    control_item_renew_interval: Duration,
    #[builder(default = "DEFAULT_CONTROL_ITEM_EXPIRE_INTERVAL")]
    control_item_expire_interval: Duration,
}

impl GlobalThroughputControlConfigBuilder {
    fn validate(&self) -> Result<(), NoSQLError> {
        let renew = self
            .control_item_renew_interval
            .unwrap_or(DEFAULT_CONTROL_ITEM_RENEW_INTERVAL);
        let expire = self
            .control_item_expire_interval
            .unwrap_or(DEFAULT_CONTROL_ITEM_EXPIRE_INTERVAL);
        if renew < MIN_CONTROL_ITEM_RENEW_INTERVAL {
            return ia_err!(
                "control item renew interval must be at least {}s, got {}ms",
                MIN_CONTROL_ITEM_RENEW_INTERVAL.as_secs(),
                renew.as_millis()
            );
        }
        let min_expire = renew * 2 + Duration::from_secs(1);
        if expire < min_expire {
            return ia_err!(
                "control item expire interval must be at least {}ms (2 * renew interval + 1s), got {}ms",
                min_expire.as_millis(),
                expire.as_millis()
            );
        }
        if let Some(c) = &self.control_container {
            if c.trim_matches('/').is_empty() {
                return ia_err!("control container must not be empty");
            }
        }
        Ok(())
    }
}

impl GlobalThroughputControlConfig {
    pub fn control_container(&self) -> &str {
        self.control_container.trim_matches('/')
    }

    pub fn control_item_renew_interval(&self) -> Duration {
        self.control_item_renew_interval
    }

    pub fn control_item_expire_interval(&self) -> Duration {
        self.control_item_expire_interval
    }
}

/// What to do with an operation that would exceed its group's share.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ThroughputLimitBehavior {
    /// Wait for the next accounting period.
    #[default]
    Delay,
    /// Fail with [`ThroughputLimitExceeded`](crate::NoSQLErrorCode::ThroughputLimitExceeded).
    Reject,
}

/// Handle-wide throughput control settings.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ThroughputControlOptions {
    pub(crate) fallback_on_init_error: bool,
    pub(crate) limit_behavior: ThroughputLimitBehavior,
}

impl ThroughputControlOptions {
    pub fn new() -> ThroughputControlOptions {
        ThroughputControlOptions::default()
    }

    /// If a group cannot be initialized (for example the control container
    /// is unreachable), let its operations through uncontrolled instead of
    /// failing them. Defaults to false.
    pub fn fallback_on_init_error(mut self, fallback: bool) -> Self {
        self.fallback_on_init_error = fallback;
        self
    }

    pub fn limit_behavior(mut self, behavior: ThroughputLimitBehavior) -> Self {
        self.limit_behavior = behavior;
        self
    }

    pub fn is_fallback_on_init_error(&self) -> bool {
        self.fallback_on_init_error
    }

    pub fn get_limit_behavior(&self) -> ThroughputLimitBehavior {
        self.limit_behavior
    }
}
