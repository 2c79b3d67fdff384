//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
//! Builder for creating a [`NoSQL Handle`](crate::Handle)
//!

use std::default::Default;
use std::env;
use std::result::Result;
use std::sync::Arc;
use std::time::Duration;

use crate::consistency::ConsistencyLevel;
use crate::end_to_end_policy::EndToEndOperationLatencyPolicyConfig;
use crate::error::{ia_err, NoSQLError};
use crate::handle::Handle;
use crate::non_idempotent_write::NonIdempotentWriteRetryOptions;
use crate::region::{dedup_regions, parse_region_list, Region};
use crate::retry_strategy::RetryStrategy;
use crate::session::SessionTokenStore;
use crate::session_retry_options::{RegionSwitchHint, SessionRetryOptions};
use crate::throughput_control::{
    GlobalThroughputControlConfig, ThroughputControlGroupConfig, ThroughputControlOptions,
};
use crate::throughput_governor::ControlResourceClient;
use crate::transport::Transport;
use reqwest::Client;
use url::Url;

/// Builder used to set all the parameters to create a [`NoSQL Handle`](crate::Handle).
///
/// At least one preferred region is required. Unless a custom
/// [`Transport`] is given, every preferred region also needs an endpoint.
#[derive(Default, Debug, Clone)]
pub struct HandleBuilder {
    pub(crate) preferred_regions: Vec<Region>,
    pub(crate) endpoints: Vec<(Region, String)>,
    pub(crate) account_consistency: ConsistencyLevel,
    pub(crate) consistency: Option<ConsistencyLevel>,
    pub(crate) end_to_end_policy: Option<EndToEndOperationLatencyPolicyConfig>,
    pub(crate) session_retry_options: SessionRetryOptions,
    pub(crate) retry_strategy: RetryStrategy,
    pub(crate) non_idempotent_write_retry: NonIdempotentWriteRetryOptions,
    pub(crate) timeout: Option<Duration>,
    pub(crate) client: Option<Client>,
    pub(crate) transport: Option<Arc<dyn Transport>>,
    pub(crate) session_store: Option<Arc<dyn SessionTokenStore>>,
    pub(crate) control_client: Option<Arc<dyn ControlResourceClient>>,
    pub(crate) throughput_control_options: ThroughputControlOptions,
    pub(crate) throughput_groups: Vec<(
        ThroughputControlGroupConfig,
        Option<GlobalThroughputControlConfig>,
    )>,
    // For error messaging
    pub(crate) from_environment: bool,
}

impl HandleBuilder {
    /// Create a new HandleBuilder struct.
    ///
    /// Consider calling [`from_environment()`](HandleBuilder::from_environment())
    /// to collect parameters from the local environment first.
    pub fn new() -> Self {
        HandleBuilder {
            ..Default::default()
        }
    }
    /// Build a new [`Handle`].
    ///
    /// This validates the configuration, creates the default transport if
    /// needed, and initializes all throughput control groups (which may
    /// contact the control container).
    pub async fn build(self) -> Result<Handle, NoSQLError> {
        Handle::new(&self).await
    }
    /// Gather configuration settings from the current envrionment.
    ///
    /// Values can be overridden in code if this method is called first and
    /// other methods are called afterwards, for example:
    ///```no_run
    /// # use nosql_multiregion_rust_sdk::Handle;
    /// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
    ///   let handle = Handle::builder()
    ///       .from_environment()?
    ///       .region_endpoint("eastus", "https://eastus.example.com")?
    ///       .build()
    ///       .await?;
    /// # Ok(())
    /// # }
    ///```
    /// The following environment variables are used:
    ///
    /// | variable | description |
    /// | -------- | ----------- |
    /// | `NOSQL_PREFERRED_REGIONS` | Comma separated region names, most preferred first. See [`HandleBuilder::preferred_regions()`]. |
    /// | `NOSQL_REGION_ENDPOINTS` | Comma separated `region=url` pairs. See [`HandleBuilder::region_endpoint()`]. |
    /// | `NOSQL_CONSISTENCY` | Client consistency level, for example `session` or `eventual`. |
    /// | `NOSQL_END_TO_END_TIMEOUT_MS` | Enables an end-to-end policy with this timeout. |
    /// | `NOSQL_REGION_SWITCH_HINT` | `local` or `remote`. See [`RegionSwitchHint`]. |
    /// | `NOSQL_TIMEOUT_MS` | Per-attempt timeout. See [`HandleBuilder::timeout()`]. |
    ///
    pub fn from_environment(mut self) -> Result<Self, NoSQLError> {
        self.from_environment = true;
        if let Ok(val) = env::var("NOSQL_PREFERRED_REGIONS") {
            self.preferred_regions = dedup_regions(&parse_region_list(&val));
        }
        if let Ok(val) = env::var("NOSQL_REGION_ENDPOINTS") {
            for pair in val.split(',').filter(|p| !p.trim().is_empty()) {
                match pair.split_once('=') {
                    Some((region, endpoint)) => {
                        self = self.region_endpoint(region, endpoint)?;
                    }
                    None => {
                        return ia_err!(
                            "invalid entry '{}' in NOSQL_REGION_ENDPOINTS: expected region=url",
                            pair
                        );
                    }
                }
            }
        }
        if let Ok(val) = env::var("NOSQL_CONSISTENCY") {
            self.consistency = Some(val.parse::<ConsistencyLevel>()?);
        }
        if let Ok(val) = env::var("NOSQL_END_TO_END_TIMEOUT_MS") {
            let ms = Self::parse_millis("NOSQL_END_TO_END_TIMEOUT_MS", &val)?;
            self.end_to_end_policy = Some(
                EndToEndOperationLatencyPolicyConfig::builder(Duration::from_millis(ms)).build(),
            );
        }
        if let Ok(val) = env::var("NOSQL_REGION_SWITCH_HINT") {
            let hint = val.parse::<RegionSwitchHint>()?;
            self.session_retry_options = self.session_retry_options.region_switch_hint(hint)?;
        }
        if let Ok(val) = env::var("NOSQL_TIMEOUT_MS") {
            let ms = Self::parse_millis("NOSQL_TIMEOUT_MS", &val)?;
            self = self.timeout(Duration::from_millis(ms))?;
        }
        Ok(self)
    }

    fn parse_millis(var: &str, val: &str) -> Result<u64, NoSQLError> {
        match val.trim().parse::<u64>() {
            Ok(v) if v > 0 => Ok(v),
            _ => ia_err!("invalid value '{}' for {}: expected milliseconds > 0", val, var),
        }
    }

    /// Set the regions to use, most preferred first.
    ///
    /// Names are normalized (see [`Region::new()`]) and repeated names are
    /// only kept once.
    pub fn preferred_regions(mut self, regions: &[&str]) -> Result<Self, NoSQLError> {
        let list: Vec<Region> = regions.iter().map(|r| Region::new(r)).collect();
        if list.iter().any(|r| r.name().is_empty()) {
            return ia_err!("preferred region names must not be empty");
        }
        self.preferred_regions = dedup_regions(&list);
        Ok(self)
    }

    /// Set the endpoint used by the default transport for a region.
    ///
    /// Examples:
    /// ```text
    ///     https://westus.example.com
    ///     http://localhost:8080
    /// ```
    pub fn region_endpoint(mut self, region: &str, endpoint: &str) -> Result<Self, NoSQLError> {
        let r = Region::new(region);
        if r.name().is_empty() {
            return ia_err!("region name must not be empty");
        }
        let ep = endpoint.trim();
        if !ep.starts_with("http://") && !ep.starts_with("https://") {
            Url::parse(&format!("https://{}", ep))?;
        } else {
            Url::parse(ep)?;
        }
        self.endpoints.retain(|(er, _)| er != &r);
        self.endpoints.push((r, ep.to_string()));
        Ok(self)
    }

    /// The default consistency level of the database account. Operations
    /// cannot use a stronger level. Defaults to [`ConsistencyLevel::Session`].
    pub fn account_consistency(mut self, c: ConsistencyLevel) -> Result<Self, NoSQLError> {
        self.account_consistency = c;
        Ok(self)
    }

    /// Relax the consistency level for all operations of this handle.
    pub fn consistency_level(mut self, c: ConsistencyLevel) -> Result<Self, NoSQLError> {
        self.consistency = Some(c);
        Ok(self)
    }

    /// Set the end-to-end policy for operations that do not set their own.
    ///
    /// By default no end-to-end deadline applies and regions are tried one
    /// after another.
    pub fn end_to_end_policy(
        mut self,
        policy: EndToEndOperationLatencyPolicyConfig,
    ) -> Result<Self, NoSQLError> {
        self.end_to_end_policy = Some(policy);
        Ok(self)
    }

    pub fn session_retry_options(mut self, options: SessionRetryOptions) -> Result<Self, NoSQLError> {
        self.session_retry_options = options;
        Ok(self)
    }

    pub fn retry_strategy(mut self, strategy: RetryStrategy) -> Result<Self, NoSQLError> {
        self.retry_strategy = strategy;
        Ok(self)
    }

    pub fn non_idempotent_write_retry(
        mut self,
        options: NonIdempotentWriteRetryOptions,
    ) -> Result<Self, NoSQLError> {
        self.non_idempotent_write_retry = options;
        Ok(self)
    }

    /// Specify a [`reqwest::Client`] for the default transport.
    ///
    /// If your application already has a reqwest Client, you can pass that
    /// into the HandleBuilder to avoid creating multiple connection pools.
    pub fn reqwest_client(mut self, client: &Client) -> Result<Self, NoSQLError> {
        self.client = Some(client.clone());
        Ok(self)
    }

    /// Specify the timeout of a single attempt.
    ///
    /// The default timeout is 30 seconds. An end-to-end policy bounds it
    /// further by the time left for the operation.
    pub fn timeout(mut self, timeout: Duration) -> Result<Self, NoSQLError> {
        if timeout < Duration::from_millis(1) {
            return ia_err!("timeout must be at least 1ms");
        }
        self.timeout = Some(timeout);
        Ok(self)
    }

    /// Use a custom [`Transport`] instead of the default HTTP transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Result<Self, NoSQLError> {
        self.transport = Some(transport);
        Ok(self)
    }

    /// Use a custom [`SessionTokenStore`], for example one shared between handles.
    pub fn session_store(mut self, store: Arc<dyn SessionTokenStore>) -> Result<Self, NoSQLError> {
        self.session_store = Some(store);
        Ok(self)
    }

    /// Set the client used to reach the throughput control container.
    pub fn control_resource_client(
        mut self,
        client: Arc<dyn ControlResourceClient>,
    ) -> Result<Self, NoSQLError> {
        self.control_client = Some(client);
        Ok(self)
    }

    pub fn throughput_control_options(
        mut self,
        options: ThroughputControlOptions,
    ) -> Result<Self, NoSQLError> {
        self.throughput_control_options = options;
        Ok(self)
    }

    /// Enable a throughput control group enforced by this handle alone.
    pub fn local_throughput_control_group(
        mut self,
        config: ThroughputControlGroupConfig,
    ) -> Result<Self, NoSQLError> {
        config.validate_target()?;
        self.throughput_groups.push((config, None));
        Ok(self)
    }

    /// Enable a throughput control group shared with every client using
    /// the same control container.
    pub fn global_throughput_control_group(
        mut self,
        config: ThroughputControlGroupConfig,
        global: GlobalThroughputControlConfig,
    ) -> Result<Self, NoSQLError> {
        config.validate_target()?;
        self.throughput_groups.push((config, Some(global)));
        Ok(self)
    }
}
