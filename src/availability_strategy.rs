//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
//! Strategies choosing which regions an operation may use, and when.
//!
use crate::error::{ia_err, NoSQLError};
use crate::region::{dedup_regions, ExcludedRegions, Region};
use std::fmt;
use std::result::Result;
use std::time::Duration;

/// Default delay before the second region is tried in parallel.
pub const DEFAULT_THRESHOLD: Duration = Duration::from_millis(500);

/// Default additional delay before each further region is tried in parallel.
pub const DEFAULT_THRESHOLD_STEP: Duration = Duration::from_millis(100);

// usize::MAX means "every eligible region".
const ALL_REGIONS: usize = usize::MAX;

/// Strategy used to pick, order and schedule the regions for one operation.
///
/// - [`AvailabilityStrategy::Default`] tries the eligible regions one after
///   another, moving on only when an attempt fails with a retryable error.
/// - [`AvailabilityStrategy::ThresholdBased`] races regions: the first region
///   is tried immediately, and if no success arrives within the threshold the
///   next region is tried in parallel, and so on.
///
/// Both variants filter the preferred region list the same way, see
/// [`effective_retry_regions()`](AvailabilityStrategy::effective_retry_regions()).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AvailabilityStrategy {
    Default(DefaultAvailabilityStrategy),
    ThresholdBased(ThresholdBasedAvailabilityStrategy),
}

impl Default for AvailabilityStrategy {
    fn default() -> Self {
        AvailabilityStrategy::Default(DefaultAvailabilityStrategy::default())
    }
}

impl From<DefaultAvailabilityStrategy> for AvailabilityStrategy {
    fn from(s: DefaultAvailabilityStrategy) -> Self {
        AvailabilityStrategy::Default(s)
    }
}

impl From<ThresholdBasedAvailabilityStrategy> for AvailabilityStrategy {
    fn from(s: ThresholdBasedAvailabilityStrategy) -> Self {
        AvailabilityStrategy::ThresholdBased(s)
    }
}

impl AvailabilityStrategy {
    /// Sequential failover across every eligible region.
    pub fn sequential() -> AvailabilityStrategy {
        AvailabilityStrategy::default()
    }

    /// Parallel racing with the default threshold (500ms) and step (100ms).
    pub fn threshold_based() -> AvailabilityStrategy {
        AvailabilityStrategy::ThresholdBased(ThresholdBasedAvailabilityStrategy::new())
    }

    /// The maximum number of regions an operation may use.
    pub fn regions_to_try(&self) -> usize {
        match self {
            AvailabilityStrategy::Default(s) => s.regions_to_try,
            AvailabilityStrategy::ThresholdBased(s) => s.regions_to_try,
        }
    }

    /// Returns true if attempts may run concurrently.
    pub fn is_racing(&self) -> bool {
        matches!(self, AvailabilityStrategy::ThresholdBased(_))
    }

    /// Filter and order the candidate regions for one operation.
    ///
    /// The result keeps the order of `preferred_regions`, never contains a
    /// region from `exclude_regions`, and holds at most
    /// [`regions_to_try()`](AvailabilityStrategy::regions_to_try()) entries.
    /// Repeated preferred regions are only kept once. An empty result means
    /// there is no eligible region and the caller must fail fast.
    pub fn effective_retry_regions(
        &self,
        preferred_regions: &[Region],
        exclude_regions: Option<&ExcludedRegions>,
    ) -> Vec<Region> {
        let mut regions = dedup_regions(preferred_regions);
        if let Some(ex) = exclude_regions {
            regions.retain(|r| !ex.contains(r));
        }
        regions.truncate(self.regions_to_try());
        regions
    }

    /// Delay, measured from the start of the operation, before the attempt in
    /// the region at position `index` may be launched.
    ///
    /// Returns `None` for sequential strategies, which have no schedule.
    pub fn launch_delay(&self, index: usize) -> Option<Duration> {
        match self {
            AvailabilityStrategy::Default(_) => None,
            AvailabilityStrategy::ThresholdBased(s) => Some(s.launch_delay(index)),
        }
    }
}

impl fmt::Display for AvailabilityStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AvailabilityStrategy::Default(s) => {
                write!(f, "Default{{regions_to_try={}}}", fmt_count(s.regions_to_try))
            }
            AvailabilityStrategy::ThresholdBased(s) => write!(
                f,
                "ThresholdBased{{threshold={}ms, threshold_step={}ms, regions_to_try={}}}",
                s.threshold.as_millis(),
                s.threshold_step.as_millis(),
                fmt_count(s.regions_to_try)
            ),
        }
    }
}

fn fmt_count(n: usize) -> String {
    if n == ALL_REGIONS {
        return "all".to_string();
    }
    n.to_string()
}

fn check_regions_to_try(n: usize) -> Result<(), NoSQLError> {
    if n == 0 {
        return ia_err!("number of regions to try must be at least 1");
    }
    Ok(())
}

fn millis_to_duration(name: &str, ms: i64) -> Result<Duration, NoSQLError> {
    if ms < 0 {
        return ia_err!("{} must not be negative, got {}ms", name, ms);
    }
    Ok(Duration::from_millis(ms as u64))
}

/// Sequential failover strategy.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DefaultAvailabilityStrategy {
    regions_to_try: usize,
}

impl Default for DefaultAvailabilityStrategy {
    fn default() -> Self {
        DefaultAvailabilityStrategy {
            regions_to_try: ALL_REGIONS,
        }
    }
}

impl DefaultAvailabilityStrategy {
    /// Create a sequential strategy that uses at most `regions_to_try` regions.
    ///
    /// `regions_to_try` must be at least 1.
    pub fn new(regions_to_try: usize) -> Result<Self, NoSQLError> {
        check_regions_to_try(regions_to_try)?;
        Ok(DefaultAvailabilityStrategy { regions_to_try })
    }

    pub fn regions_to_try(&self) -> usize {
        self.regions_to_try
    }
}

/// Racing strategy launching staggered parallel attempts across regions.
///
/// With `n` eligible regions, region 0 is attempted immediately, region 1
/// after the threshold without a
/// success, and region `i > 1` after `threshold + (i - 1) * threshold_step`.
/// Earlier attempts are never cancelled when a later one is launched.
///
/// All setters validate their input and fail immediately on invalid values.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ThresholdBasedAvailabilityStrategy {
    threshold: Duration,
    threshold_step: Duration,
    regions_to_try: usize,
}

impl Default for ThresholdBasedAvailabilityStrategy {
    fn default() -> Self {
        ThresholdBasedAvailabilityStrategy {
            threshold: DEFAULT_THRESHOLD,
            threshold_step: DEFAULT_THRESHOLD_STEP,
            regions_to_try: ALL_REGIONS,
        }
    }
}

impl ThresholdBasedAvailabilityStrategy {
    /// Create a strategy with the default threshold (500ms) and step (100ms).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a strategy from signed millisecond values, as read from
    /// configuration. Negative values are rejected.
    pub fn from_millis(threshold_ms: i64, threshold_step_ms: i64) -> Result<Self, NoSQLError> {
        Self::new()
            .threshold_millis(threshold_ms)?
            .threshold_step_millis(threshold_step_ms)
    }

    /// Set the delay before the second region is attempted.
    pub fn threshold(mut self, threshold: Duration) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set the threshold from a signed millisecond value. Negative values are rejected.
    pub fn threshold_millis(self, ms: i64) -> Result<Self, NoSQLError> {
        let d = millis_to_duration("threshold", ms)?;
        Ok(self.threshold(d))
    }

    /// Set the additional delay between each further region.
    pub fn threshold_step(mut self, step: Duration) -> Self {
        self.threshold_step = step;
        self
    }

    /// Set the step from a signed millisecond value. Negative values are rejected.
    pub fn threshold_step_millis(self, ms: i64) -> Result<Self, NoSQLError> {
        let d = millis_to_duration("threshold step", ms)?;
        Ok(self.threshold_step(d))
    }

    /// Limit the number of regions raced. Must be at least 1.
    pub fn regions_to_try(mut self, n: usize) -> Result<Self, NoSQLError> {
        check_regions_to_try(n)?;
        self.regions_to_try = n;
        Ok(self)
    }

    pub fn get_threshold(&self) -> Duration {
        self.threshold
    }

    pub fn get_threshold_step(&self) -> Duration {
        self.threshold_step
    }

    pub fn get_regions_to_try(&self) -> usize {
        self.regions_to_try
    }

    pub(crate) fn launch_delay(&self, index: usize) -> Duration {
        match index {
            0 => Duration::ZERO,
            _ => {
                let steps = u32::try_from(index - 1).unwrap_or(u32::MAX);
                self.threshold
                    .saturating_add(self.threshold_step.saturating_mul(steps))
            }
        }
    }
}
