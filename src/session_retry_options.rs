//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
use crate::error::{ia_err, NoSQLError};
use std::fmt;
use std::result::Result;
use std::str::FromStr;
use std::time::Duration;

/// Default minimum time spent retrying in one region before switching.
pub const DEFAULT_MIN_TIMEOUT_PER_REGION: Duration = Duration::from_millis(500);

/// Smallest allowed value for the minimum time spent in one region.
pub const MIN_MIN_TIMEOUT_PER_REGION: Duration = Duration::from_millis(100);

/// Default number of attempts made in one region before switching.
pub const DEFAULT_MAX_RETRIES_PER_REGION: u32 = 1;

const SESSION_BACKOFF_INITIAL: Duration = Duration::from_millis(5);
const SESSION_BACKOFF_MAX: Duration = Duration::from_millis(50);

/// Hint deciding how eagerly a read switches regions when the local replica
/// has not caught up with the session token yet.
#[derive(Clone, Copy, Default, Debug, Eq, PartialEq, Hash)]
pub enum RegionSwitchHint {
    /// Keep retrying the local region for a while before moving on. Lower
    /// cost, higher latency when the local region lags.
    #[default]
    LocalRegionPreferred,
    /// Move to the next region after a short tolerance. Lower latency, but
    /// the remote region may also need to catch up.
    RemoteRegionPreferred,
}

impl RegionSwitchHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegionSwitchHint::LocalRegionPreferred => "LOCAL_REGION_PREFERRED",
            RegionSwitchHint::RemoteRegionPreferred => "REMOTE_REGION_PREFERRED",
        }
    }
}

impl fmt::Display for RegionSwitchHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegionSwitchHint {
    type Err = NoSQLError;

    /// Accepts `LOCAL_REGION_PREFERRED`/`local` and
    /// `REMOTE_REGION_PREFERRED`/`remote`, in any case. Blank values are rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let v = s.trim().to_uppercase();
        match v.as_str() {
            "" => ia_err!("region switch hint must not be empty"),
            "LOCAL_REGION_PREFERRED" | "LOCAL" => Ok(RegionSwitchHint::LocalRegionPreferred),
            "REMOTE_REGION_PREFERRED" | "REMOTE" => Ok(RegionSwitchHint::RemoteRegionPreferred),
            _ => ia_err!("invalid region switch hint '{}'", s),
        }
    }
}

/// Options controlling retries of session-consistent reads that hit a
/// replica which has not caught up with the session token (404/1002).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionRetryOptions {
    pub(crate) region_switch_hint: RegionSwitchHint,
    pub(crate) min_timeout_per_region: Duration,
    pub(crate) max_retries_per_region: u32,
}

impl Default for SessionRetryOptions {
    fn default() -> Self {
        SessionRetryOptions {
            region_switch_hint: RegionSwitchHint::default(),
            min_timeout_per_region: DEFAULT_MIN_TIMEOUT_PER_REGION,
            max_retries_per_region: DEFAULT_MAX_RETRIES_PER_REGION,
        }
    }
}

impl SessionRetryOptions {
    pub fn new() -> SessionRetryOptions {
        SessionRetryOptions::default()
    }

    /// Set the region switch hint.
    pub fn region_switch_hint(mut self, hint: RegionSwitchHint) -> Result<Self, NoSQLError> {
        self.region_switch_hint = hint;
        Ok(self)
    }

    /// Set the region switch hint from its string form, see [`RegionSwitchHint::from_str()`].
    pub fn region_switch_hint_str(self, hint: &str) -> Result<Self, NoSQLError> {
        let h = hint.parse::<RegionSwitchHint>()?;
        self.region_switch_hint(h)
    }

    /// Minimum time to keep retrying in the local region with
    /// [`RegionSwitchHint::LocalRegionPreferred`]. Must be at least 100ms.
    pub fn min_timeout_per_region(mut self, t: Duration) -> Result<Self, NoSQLError> {
        if t < MIN_MIN_TIMEOUT_PER_REGION {
            return ia_err!(
                "min timeout per region must be at least {}ms, got {}ms",
                MIN_MIN_TIMEOUT_PER_REGION.as_millis(),
                t.as_millis()
            );
        }
        self.min_timeout_per_region = t;
        Ok(self)
    }

    /// Number of attempts made in one region before switching. Must be at least 1.
    pub fn max_retries_per_region(mut self, n: u32) -> Result<Self, NoSQLError> {
        if n < 1 {
            return ia_err!("max retries per region must be at least 1");
        }
        self.max_retries_per_region = n;
        Ok(self)
    }

    pub fn get_region_switch_hint(&self) -> RegionSwitchHint {
        self.region_switch_hint
    }

    pub fn get_min_timeout_per_region(&self) -> Duration {
        self.min_timeout_per_region
    }

    pub fn get_max_retries_per_region(&self) -> u32 {
        self.max_retries_per_region
    }

    /// Decide whether to retry in the same region after `attempts` attempts
    /// that all hit 404/1002, having spent `elapsed` in this region.
    pub(crate) fn should_retry_in_region(&self, attempts: u32, elapsed: Duration) -> bool {
        match self.region_switch_hint {
            RegionSwitchHint::RemoteRegionPreferred => attempts < self.max_retries_per_region,
            RegionSwitchHint::LocalRegionPreferred => {
                attempts < self.max_retries_per_region || elapsed < self.min_timeout_per_region
            }
        }
    }

    /// Delay before the next local retry, after `attempts` attempts.
    pub(crate) fn backoff(&self, attempts: u32) -> Duration {
        let shift = attempts.saturating_sub(1).min(16);
        SESSION_BACKOFF_INITIAL
            .saturating_mul(1u32 << shift)
            .min(SESSION_BACKOFF_MAX)
    }
}
