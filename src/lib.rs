//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
//! NoSQL Multi-Region Rust SDK
//!
//! This crate is the request routing core of a client for a globally
//! distributed NoSQL document database. For every logical operation it
//! decides which regions to contact and in what order, when to fail over or
//! race a second region, how long the whole operation may take, how session
//! tokens are carried between regions and retries, and how much throughput
//! the operation may consume.
//!
//! This SDK supplies and uses Rust `async` methods throughout, using the [tokio](https://crates.io/crates/tokio) runtime. There is currently no blocking support.
//!
//! The general flow for an application is:
//! - Create a [`HandleBuilder`] with the preferred regions and all other needed parameters
//! - Create a [`Handle`] from the [`HandleBuilder`] that will be used throughout the application, across all threads
//! - Run operations with [`Handle::execute()`], passing an [`OperationRequest`] and [`RequestOptions`]
//!
//! ## Simple Example
//! ```no_run
//! use nosql_multiregion_rust_sdk::{Handle, OperationRequest, OperationType, RequestOptions};
//! use std::error::Error;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn Error>> {
//!     let handle = Handle::builder()
//!         .preferred_regions(&["West US", "East US"])?
//!         .region_endpoint("West US", "https://westus.example.com")?
//!         .region_endpoint("East US", "https://eastus.example.com")?
//!         .build()
//!         .await?;
//!     let req = OperationRequest::new(OperationType::Read, "dbs/shop/colls/orders/docs/1234")
//!         .partition_key("customer-17");
//!     let resp = handle.execute(req, &RequestOptions::new()).await?;
//!     println!("read from {}: {:?}", resp.region(), resp.body());
//!     Ok(())
//! }
//! ```
//!
//! ## Regions and failover
//!
//! Regions are tried in the order given to [`HandleBuilder::preferred_regions()`],
//! minus any [`ExcludedRegions`] of the operation. With the default
//! [`AvailabilityStrategy`] one region is tried after the other: transient
//! failures (network errors, timeouts, 503, stale routing 410) move the
//! operation to the next region, while errors such as 400, 401, 404 or 409
//! end it immediately.
//!
//! Writes are only sent to the first eligible region unless
//! [`NonIdempotentWriteRetryOptions`] are enabled, in which case a tracking id
//! is attached so that a retried write can be recognized as a duplicate.
//!
//! ## End-to-end timeout and racing
//!
//! An [`EndToEndOperationLatencyPolicyConfig`] bounds the total time of an
//! operation. When it expires the operation fails with
//! [`NoSQLErrorCode::DeadlineExceeded`] right away, and every attempt still
//! running is cancelled. A policy may carry a
//! [`ThresholdBasedAvailabilityStrategy`]: the first region is tried
//! immediately, the second one after `threshold` if no response succeeded yet,
//! and each further one `threshold_step` later. The first success wins.
//!
//! ```no_run
//! use nosql_multiregion_rust_sdk::{EndToEndOperationLatencyPolicyConfig, ThresholdBasedAvailabilityStrategy};
//! use std::time::Duration;
//! # fn main() -> Result<(), nosql_multiregion_rust_sdk::NoSQLError> {
//! let policy = EndToEndOperationLatencyPolicyConfig::builder(Duration::from_secs(1))
//!     .availability_strategy(ThresholdBasedAvailabilityStrategy::from_millis(300, 50)?)
//!     .build();
//! # Ok(())
//! # }
//! ```
//!
//! ## Session consistency
//!
//! Reads at [`ConsistencyLevel::Session`] send the latest [`SessionToken`]
//! known for their partition. Every successful response's token is merged
//! into the handle's [`SessionTokenStore`], so tokens never move backwards.
//! A replica that has not caught up yet answers 404/1002; the
//! [`SessionRetryOptions`] decide how long to keep retrying there before
//! switching regions.
//!
//! ## Throughput control
//!
//! Operations can be accounted to a throughput control group that caps the
//! throughput they consume, either within the handle or shared with other
//! clients through a control container. See [`ThroughputControlGroupConfig`].
//!
//! ## Configuration from the environment
//!
//! See [`HandleBuilder::from_environment()`] for the variables read.
//!
//! ## Logging
//!
//! The SDK logs through [tracing](https://crates.io/crates/tracing); install a
//! subscriber in the application to see region launches, failovers and
//! throughput control decisions.

pub(crate) mod handle_builder;
pub use crate::handle_builder::HandleBuilder;

pub(crate) mod handle;
pub use crate::handle::Handle;

pub(crate) mod availability_strategy;
pub use crate::availability_strategy::{
    AvailabilityStrategy, DefaultAvailabilityStrategy, ThresholdBasedAvailabilityStrategy,
    DEFAULT_THRESHOLD, DEFAULT_THRESHOLD_STEP,
};


pub(crate) mod consistency;
pub use crate::consistency::ConsistencyLevel;

pub(crate) mod diagnostics;
pub use crate::diagnostics::{AttemptDiagnostics, AttemptOutcome, OperationDiagnostics};

pub(crate) mod end_to_end_policy;
pub use crate::end_to_end_policy::{
    EndToEndOperationLatencyPolicyConfig, EndToEndOperationLatencyPolicyConfigBuilder,
    DEFAULT_END_TO_END_TIMEOUT,
};

pub(crate) mod error;
pub use crate::error::{sub_status, NoSQLError, NoSQLErrorCode};

pub(crate) mod http_transport;
pub use crate::http_transport::HttpTransport;

#[cfg(test)]
pub(crate) mod mock_transport;

pub(crate) mod non_idempotent_write;
pub use crate::non_idempotent_write::{NonIdempotentWriteRetryOptions, TRACKING_ID_PROPERTY};

pub(crate) mod orchestrator;

pub(crate) mod region;
pub use crate::region::{ExcludedRegions, Region};

pub(crate) mod request_options;
pub use crate::request_options::RequestOptions;

pub(crate) mod retry_strategy;
pub use crate::retry_strategy::{
    OperationType, RetryConfig, RetryStrategy, RetryStrategyBuilder, DEFAULT_MAX_THROTTLE_RETRIES,
    DEFAULT_MAX_THROTTLE_WAIT,
};

pub(crate) mod session;
pub use crate::session::{SessionContainer, SessionToken, SessionTokenStore};

pub(crate) mod session_retry_options;
pub use crate::session_retry_options::{RegionSwitchHint, SessionRetryOptions};

#[cfg(test)]
pub(crate) mod session_tests;

pub(crate) mod throughput_control;
pub use crate::throughput_control::{
    GlobalThroughputControlConfig, GlobalThroughputControlConfigBuilder,
    ThroughputControlGroupConfig, ThroughputControlGroupConfigBuilder, ThroughputControlOptions,
    ThroughputLimitBehavior,
};

pub(crate) mod throughput_governor;
pub use crate::throughput_governor::{
    ControlResourceClient, InMemoryControlResource, ThroughputUsageRecord,
};

#[cfg(test)]
pub(crate) mod throughput_tests;

pub(crate) mod transport;
pub use crate::transport::{OperationRequest, OperationResponse, Transport};
