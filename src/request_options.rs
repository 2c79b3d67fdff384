//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
use crate::consistency::ConsistencyLevel;
use crate::end_to_end_policy::EndToEndOperationLatencyPolicyConfig;
use crate::error::{ia_err, NoSQLError};
use crate::non_idempotent_write::NonIdempotentWriteRetryOptions;
use crate::region::ExcludedRegions;
use crate::session::SessionToken;
use crate::session_retry_options::SessionRetryOptions;
use std::result::Result;
use std::time::Duration;

/// Per-operation settings overriding the [`Handle`](crate::Handle) defaults.
///
/// Every field is optional; unset fields fall back to the values given to
/// the [`HandleBuilder`](crate::HandleBuilder).
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    pub(crate) consistency_level: Option<ConsistencyLevel>,
    pub(crate) excluded_regions: Option<ExcludedRegions>,
    pub(crate) end_to_end_policy: Option<EndToEndOperationLatencyPolicyConfig>,
    pub(crate) session_retry_options: Option<SessionRetryOptions>,
    pub(crate) throughput_control_group: Option<String>,
    pub(crate) non_idempotent_write_retry: Option<NonIdempotentWriteRetryOptions>,
    pub(crate) attempt_timeout: Option<Duration>,
    pub(crate) session_token: Option<SessionToken>,
}

impl RequestOptions {
    pub fn new() -> RequestOptions {
        RequestOptions::default()
    }

    /// Relax the consistency level for this operation.
    pub fn consistency_level(mut self, c: ConsistencyLevel) -> Self {
        self.consistency_level = Some(c);
        self
    }

    /// Regions that must not be contacted for this operation.
    pub fn excluded_regions(mut self, excluded: ExcludedRegions) -> Self {
        self.excluded_regions = Some(excluded);
        self
    }

    pub fn end_to_end_policy(mut self, policy: EndToEndOperationLatencyPolicyConfig) -> Self {
        self.end_to_end_policy = Some(policy);
        self
    }

    pub fn session_retry_options(mut self, options: SessionRetryOptions) -> Self {
        self.session_retry_options = Some(options);
        self
    }

    /// Name of the throughput control group this operation is accounted to.
    pub fn throughput_control_group(mut self, group_name: &str) -> Self {
        self.throughput_control_group = Some(group_name.to_string());
        self
    }

    pub fn non_idempotent_write_retry(mut self, options: NonIdempotentWriteRetryOptions) -> Self {
        self.non_idempotent_write_retry = Some(options);
        self
    }

    /// Timeout of each single attempt.
    ///
    /// If set, it must be greater than or equal to 1 millisecond.
    pub fn attempt_timeout(mut self, t: Duration) -> Result<Self, NoSQLError> {
        if t < Duration::from_millis(1) {
            return ia_err!("attempt timeout must be at least 1ms");
        }
        self.attempt_timeout = Some(t);
        Ok(self)
    }

    /// Session token to send on the first attempt, for example one handed
    /// over from another client.
    pub fn session_token(mut self, token: SessionToken) -> Self {
        self.session_token = Some(token);
        self
    }
}
