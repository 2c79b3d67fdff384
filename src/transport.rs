//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
//! The narrow interface between the routing core and the network.
//!
use crate::consistency::ConsistencyLevel;
use crate::diagnostics::OperationDiagnostics;
use crate::error::NoSQLError;
use crate::region::Region;
use crate::retry_strategy::OperationType;
use crate::session::SessionToken;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::Debug;
use std::result::Result;
use std::sync::Arc;
use std::time::Duration;

/// Sends a single attempt of an operation to a single region.
///
/// Implementations perform no retries of their own: every retry, failover and
/// timeout decision is made by the caller. Errors must carry the service
/// status code and sub-status (see [`NoSQLError::from_int()`]), or
/// [`NetworkError`](crate::NoSQLErrorCode::NetworkError) /
/// [`RequestTimeout`](crate::NoSQLErrorCode::RequestTimeout) for failures
/// that never produced a response.
///
/// The returned future may be dropped before completion when the attempt is
/// cancelled; implementations must tolerate that.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    async fn send(
        &self,
        region: &Region,
        request: &OperationRequest,
        timeout: Duration,
    ) -> Result<OperationResponse, NoSQLError>;
}

/// A logical operation against a resource.
///
/// The routing core fills in the consistency level, session token and
/// tracking id for each attempt before handing it to the [`Transport`].
#[derive(Clone, Debug)]
pub struct OperationRequest {
    pub(crate) operation_type: OperationType,
    pub(crate) resource_link: String,
    pub(crate) partition_key: Option<String>,
    pub(crate) body: Option<Bytes>,
    pub(crate) idempotency_key: Option<String>,
    pub(crate) consistency: Option<ConsistencyLevel>,
    pub(crate) session_token: Option<SessionToken>,
    pub(crate) tracking_id: Option<String>,
}

impl OperationRequest {
    /// Create a new request. `resource_link` addresses the target, for
    /// example `dbs/shop/colls/orders/docs/1234`.
    pub fn new(operation_type: OperationType, resource_link: &str) -> OperationRequest {
        OperationRequest {
            operation_type,
            resource_link: resource_link.trim_matches('/').to_string(),
            partition_key: None,
            body: None,
            idempotency_key: None,
            consistency: None,
            session_token: None,
            tracking_id: None,
        }
    }

    pub fn partition_key(mut self, pk: &str) -> Self {
        self.partition_key = Some(pk.to_string());
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Caller-supplied key identifying this logical write. When
    /// non-idempotent write retries are enabled it is used as the tracking id.
    pub fn idempotency_key(mut self, key: &str) -> Self {
        self.idempotency_key = Some(key.to_string());
        self
    }

    pub fn operation_type(&self) -> OperationType {
        self.operation_type
    }

    pub fn resource_link(&self) -> &str {
        &self.resource_link
    }

    pub fn get_partition_key(&self) -> Option<&str> {
        self.partition_key.as_deref()
    }

    pub fn get_body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// The effective consistency level of the operation.
    pub fn consistency(&self) -> Option<ConsistencyLevel> {
        self.consistency
    }

    /// The session token to send with this attempt.
    pub fn session_token(&self) -> Option<&SessionToken> {
        self.session_token.as_ref()
    }

    /// The tracking id of a retryable write.
    pub fn tracking_id(&self) -> Option<&str> {
        self.tracking_id.as_deref()
    }
}

/// The successful result of an operation.
#[derive(Clone, Debug, Default)]
pub struct OperationResponse {
    pub(crate) status_code: u16,
    pub(crate) body: Bytes,
    pub(crate) session_token: Option<SessionToken>,
    pub(crate) request_charge: f64,
    pub(crate) region: Region,
    pub(crate) diagnostics: Option<Arc<OperationDiagnostics>>,
}

impl OperationResponse {
    /// Create a response. Used by [`Transport`] implementations.
    pub fn new(region: &Region, status_code: u16, body: impl Into<Bytes>) -> OperationResponse {
        OperationResponse {
            status_code,
            body: body.into(),
            region: region.clone(),
            ..Default::default()
        }
    }

    pub fn with_session_token(mut self, token: SessionToken) -> Self {
        self.session_token = Some(token);
        self
    }

    /// Set the throughput units consumed by the operation.
    pub fn with_request_charge(mut self, charge: f64) -> Self {
        self.request_charge = charge;
        self
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The session token after this operation. Once returned from
    /// [`Handle::execute()`](crate::Handle::execute()) this is the merged
    /// token for the partition, not only the one sent by the region.
    pub fn session_token(&self) -> Option<&SessionToken> {
        self.session_token.as_ref()
    }

    pub fn request_charge(&self) -> f64 {
        self.request_charge
    }

    /// The region that produced this response.
    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn diagnostics(&self) -> Option<&OperationDiagnostics> {
        self.diagnostics.as_deref()
    }
}
