//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
use crate::consistency::resolve_consistency;
use crate::end_to_end_policy::EndToEndOperationLatencyPolicyConfig;
use crate::error::{ia_err, NoSQLError, NoSQLErrorCode};
use crate::handle_builder::HandleBuilder;
use crate::http_transport::HttpTransport;
use crate::orchestrator::RetryOrchestrator;
use crate::region::Region;
use crate::request_options::RequestOptions;
use crate::session::{session_scope, SessionContainer, SessionToken, SessionTokenStore};
use crate::throughput_governor::ThroughputControlStore;
use crate::transport::{OperationRequest, OperationResponse, Transport};

use std::result::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// **The main database handle**.
///
/// This should be created once and used
/// throughout the application lifetime, across all threads.
///
/// Note: there is no need to enclose this struct in an `Rc` or [`Arc`], as it uses an
/// [`Arc`] internally, so calling `.clone()` on this struct will always return the
/// same underlying handle.
#[derive(Clone, Debug)]
pub struct Handle {
    // Use an inner Arc so cloning keeps the same contents
    pub(crate) inner: Arc<HandleRef>,
}

#[derive(Debug)]
pub(crate) struct HandleRef {
    pub(crate) orchestrator: RetryOrchestrator,
    session_store: Arc<dyn SessionTokenStore>,
    throughput: Arc<ThroughputControlStore>,
    client_id: String,
    closed: AtomicBool,
}

impl Drop for HandleRef {
    fn drop(&mut self) {
        self.throughput.close();
    }
}

impl Handle {
    /// Create a new [`HandleBuilder`].
    pub fn builder() -> HandleBuilder {
        HandleBuilder::new()
    }

    // Create the new Handle based on builder configuration
    pub(crate) async fn new(b: &HandleBuilder) -> Result<Handle, NoSQLError> {
        if b.preferred_regions.is_empty() {
            if b.from_environment {
                return ia_err!("cannot build handle: no preferred regions. set NOSQL_PREFERRED_REGIONS.");
            }
            return ia_err!("cannot build handle: no preferred regions. call HandleBuilder::preferred_regions()");
        }
        resolve_consistency(b.account_consistency, b.consistency, None)?;
        let timeout = b.timeout.unwrap_or(DEFAULT_TIMEOUT);

        let transport: Arc<dyn Transport> = match &b.transport {
            Some(t) => t.clone(),
            None => {
                let c = match &b.client {
                    Some(c) => c.clone(),
                    None => reqwest::Client::builder()
                        .timeout(timeout)
                        .connect_timeout(timeout)
                        .build()?,
                };
                let mut ht = HttpTransport::new(c);
                for (region, endpoint) in &b.endpoints {
                    ht = ht.endpoint(region, endpoint)?;
                }
                if let Some(r) = b.preferred_regions.iter().find(|r| !ht.has_endpoint(r)) {
                    if b.from_environment {
                        return ia_err!("can't determine endpoint of region {}: set NOSQL_REGION_ENDPOINTS", r);
                    }
                    return ia_err!("can't determine endpoint of region {}: call HandleBuilder::region_endpoint()", r);
                }
                Arc::new(ht)
            }
        };

        let session_store: Arc<dyn SessionTokenStore> = match &b.session_store {
            Some(s) => s.clone(),
            None => Arc::new(SessionContainer::new()),
        };

        let client_id = format!("{:032x}", rand::random::<u128>());
        let throughput = Arc::new(ThroughputControlStore::new(
            b.throughput_groups.clone(),
            b.control_client.clone(),
            b.throughput_control_options.clone(),
            &client_id,
        )?);
        if !throughput.is_empty() {
            throughput.activate().await;
        }

        let end_to_end_policy = b
            .end_to_end_policy
            .clone()
            .unwrap_or_else(|| EndToEndOperationLatencyPolicyConfig::disabled().clone());
        debug!(
            "Creating new Handle: client_id={}, regions={:?}, account_consistency={}, policy={}",
            client_id, b.preferred_regions, b.account_consistency, end_to_end_policy
        );

        Ok(Handle {
            inner: Arc::new(HandleRef {
                orchestrator: RetryOrchestrator {
                    transport,
                    session_store: session_store.clone(),
                    preferred_regions: b.preferred_regions.clone(),
                    account_consistency: b.account_consistency,
                    consistency: b.consistency,
                    end_to_end_policy,
                    session_retry_options: b.session_retry_options.clone(),
                    retry_strategy: b.retry_strategy.clone(),
                    non_idempotent_write_retry: b.non_idempotent_write_retry.clone(),
                    throughput: throughput.clone(),
                    attempt_timeout: timeout,
                },
                session_store,
                throughput,
                client_id,
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Execute one logical operation.
    ///
    /// The operation is routed across the preferred regions according to
    /// the end-to-end policy, retried as the retry configuration allows, and
    /// accounted to its throughput control group. Only the terminal result
    /// is returned; both a response and an error carry the diagnostics of
    /// every attempt made.
    pub async fn execute(
        &self,
        request: OperationRequest,
        options: &RequestOptions,
    ) -> Result<OperationResponse, NoSQLError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(NoSQLError::new(
                NoSQLErrorCode::IllegalState,
                "handle is closed",
            ));
        }
        self.inner.orchestrator.execute(request, options).await
    }

    /// The latest session token known for a partition of a container.
    pub fn session_token(&self, container_link: &str, partition_key: Option<&str>) -> Option<SessionToken> {
        self.inner
            .session_store
            .get(&session_scope(container_link, partition_key))
    }

    pub fn preferred_regions(&self) -> &[Region] {
        &self.inner.orchestrator.preferred_regions
    }

    /// The identifier of this handle in throughput usage records.
    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    /// Stop background throughput control renewals. Later operations fail
    /// with IllegalState. Calling this more than once has no further effect.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            debug!("closing handle {}", self.inner.client_id);
            self.inner.throughput.close();
        }
    }
}
