//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
//! The operation execution loop.
//!
//! An operation is run against an ordered list of regions, either one region
//! after another (failing over on transient errors) or by racing staggered
//! attempts in several regions. The whole loop runs under the end-to-end
//! deadline: when it fires, every attempt still running is cancelled and the
//! caller gets DeadlineExceeded immediately.
use crate::availability_strategy::AvailabilityStrategy;
use crate::consistency::{resolve_consistency, uses_session_token, ConsistencyLevel};
use crate::diagnostics::DiagnosticsCollector;
use crate::end_to_end_policy::EndToEndOperationLatencyPolicyConfig;
use crate::error::{NoSQLError, NoSQLErrorCode, RetryClass};
use crate::non_idempotent_write::{
    inject_tracking_id, new_tracking_id, NonIdempotentWriteRetryOptions,
};
use crate::region::Region;
use crate::request_options::RequestOptions;
use crate::retry_strategy::{OperationType, RetryConfig, RetryStrategy};
use crate::session::{session_scope, SessionToken, SessionTokenStore};
use crate::session_retry_options::SessionRetryOptions;
use crate::throughput_governor::{ThroughputControlGroupInternal, ThroughputControlStore};
use crate::transport::{OperationRequest, OperationResponse, Transport};

use std::result::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

#[derive(Debug)]
pub(crate) struct RetryOrchestrator {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) session_store: Arc<dyn SessionTokenStore>,
    pub(crate) preferred_regions: Vec<Region>,
    pub(crate) account_consistency: ConsistencyLevel,
    pub(crate) consistency: Option<ConsistencyLevel>,
    pub(crate) end_to_end_policy: EndToEndOperationLatencyPolicyConfig,
    pub(crate) session_retry_options: SessionRetryOptions,
    pub(crate) retry_strategy: RetryStrategy,
    pub(crate) non_idempotent_write_retry: NonIdempotentWriteRetryOptions,
    pub(crate) throughput: Arc<ThroughputControlStore>,
    pub(crate) attempt_timeout: Duration,
}

// State shared by every attempt of one logical operation.
#[derive(Debug)]
struct OperationContext {
    transport: Arc<dyn Transport>,
    store: Arc<dyn SessionTokenStore>,
    request: OperationRequest,
    scope: String,
    send_session_token: bool,
    explicit_token: Option<SessionToken>,
    session_retry: SessionRetryOptions,
    retry_config: RetryConfig,
    attempt_timeout: Duration,
    // writes without non-idempotent retry: only 429s are retried
    throttle_only: bool,
    start: Instant,
    deadline: Option<Instant>,
    timeout: Duration,
    group: Option<Arc<ThroughputControlGroupInternal>>,
    diagnostics: DiagnosticsCollector,
    cancel: CancellationToken,
}

impl RetryOrchestrator {
    pub(crate) async fn execute(
        &self,
        request: OperationRequest,
        options: &RequestOptions,
    ) -> Result<OperationResponse, NoSQLError> {
        let start = Instant::now();
        let policy = options
            .end_to_end_policy
            .as_ref()
            .unwrap_or(&self.end_to_end_policy);
        let op = request.operation_type;
        let consistency = resolve_consistency(
            self.account_consistency,
            self.consistency,
            options.consistency_level,
        )?;
        let non_idempotent = options
            .non_idempotent_write_retry
            .as_ref()
            .unwrap_or(&self.non_idempotent_write_retry);
        let cross_region = op.is_read_only() || non_idempotent.enabled;

        let mut request = request;
        request.consistency = Some(consistency);
        if op.is_write() && non_idempotent.enabled {
            let tracking_id = request
                .idempotency_key
                .clone()
                .unwrap_or_else(new_tracking_id);
            if non_idempotent.use_tracking_id_property {
                if let Some(body) = &request.body {
                    request.body = Some(inject_tracking_id(body, &tracking_id)?);
                }
            }
            request.tracking_id = Some(tracking_id);
        }

        let strategy = policy.effective_strategy();
        let mut regions = strategy
            .effective_retry_regions(&self.preferred_regions, options.excluded_regions.as_ref());
        if !cross_region {
            regions.truncate(1);
        }
        let racing = strategy.is_racing() && cross_region && regions.len() > 1;
        let policy_repr = policy.to_string();
        let diagnostics = DiagnosticsCollector::new(start);

        if regions.is_empty() {
            debug!("{:?} on {}: no eligible region", op, request.resource_link);
            let d = diagnostics.snapshot(op, policy_repr, regions);
            return Err(NoSQLError::new(
                NoSQLErrorCode::RoutingExhausted,
                "no eligible region: every preferred region is excluded",
            )
            .with_diagnostics(d));
        }

        let group = self.throughput.resolve(
            options.throughput_control_group.as_deref(),
            &request.resource_link,
        )?;
        let retry_config = self.retry_strategy.config_for(op).clone();
        let session_retry = self.session_retry_for(op, options);
        let attempt_timeout = options
            .attempt_timeout
            .or(retry_config.get_attempt_timeout())
            .unwrap_or(self.attempt_timeout);

        let ctx = Arc::new(OperationContext {
            transport: self.transport.clone(),
            store: self.session_store.clone(),
            scope: session_scope(&request.resource_link, request.partition_key.as_deref()),
            send_session_token: uses_session_token(consistency, op),
            explicit_token: options.session_token.clone(),
            request,
            session_retry,
            retry_config,
            attempt_timeout,
            throttle_only: !cross_region,
            start,
            deadline: policy.deadline(start),
            timeout: policy.end_to_end_operation_timeout(),
            group,
            diagnostics,
            cancel: CancellationToken::new(),
        });

        trace!(
            "{:?} on {}: regions={:?} policy={} racing={}",
            op,
            ctx.request.resource_link,
            regions,
            policy_repr,
            racing
        );

        let work = async {
            if racing {
                run_racing(ctx.clone(), &regions, &strategy).await
            } else {
                run_sequential(&ctx, &regions).await
            }
        };
        let result = match ctx.deadline {
            Some(at) => {
                tokio::select! {
                    r = work => r,
                    _ = tokio::time::sleep_until(at) => {
                        debug!(
                            "{:?} on {}: end-to-end timeout of {:?} expired",
                            op, ctx.request.resource_link, ctx.timeout
                        );
                        Err(ctx.deadline_error(None))
                    }
                }
            }
            None => work.await,
        };
        ctx.cancel.cancel();

        let d = ctx.diagnostics.snapshot(op, policy_repr, regions);
        match result {
            Ok(mut resp) => {
                resp.diagnostics = Some(d);
                Ok(resp)
            }
            Err(e) => Err(e.with_diagnostics(d)),
        }
    }

    // The request's own options win; then a per-operation retry strategy
    // override of the hint; then the handle's options.
    fn session_retry_for(
        &self,
        op: OperationType,
        options: &RequestOptions,
    ) -> SessionRetryOptions {
        if let Some(o) = &options.session_retry_options {
            return o.clone();
        }
        let mut o = self.session_retry_options.clone();
        if self.retry_strategy.has_override(op) {
            o.region_switch_hint = self.retry_strategy.config_for(op).get_region_switch_hint();
        }
        o
    }
}

impl OperationContext {
    fn deadline_passed(&self) -> bool {
        match self.deadline {
            Some(at) => Instant::now() >= at,
            None => false,
        }
    }

    fn deadline_error(&self, cause: Option<NoSQLError>) -> NoSQLError {
        let err = NoSQLError::new(
            NoSQLErrorCode::DeadlineExceeded,
            &format!(
                "operation did not complete within the end-to-end timeout of {}ms",
                self.timeout.as_millis()
            ),
        );
        match cause {
            Some(c) => err.with_cause(c),
            None => err,
        }
    }

    fn cancelled_error(&self) -> NoSQLError {
        NoSQLError::new(NoSQLErrorCode::Cancelled, "attempt cancelled")
    }

    // Never longer than what is left of the end-to-end budget.
    fn timeout_for_attempt(&self) -> Duration {
        let t = match self.deadline {
            Some(at) => self
                .attempt_timeout
                .min(at.saturating_duration_since(Instant::now())),
            None => self.attempt_timeout,
        };
        t.max(Duration::from_millis(1))
    }

    // The operation's first attempt sends the caller's token if there is
    // one; every later attempt, in any region, sends the merged token.
    fn session_token_for(&self, first: bool) -> Option<SessionToken> {
        if !self.send_session_token {
            return None;
        }
        if first {
            if let Some(t) = &self.explicit_token {
                return Some(t.clone());
            }
            return self.store.get(&self.scope);
        }
        match (self.store.get(&self.scope), &self.explicit_token) {
            (Some(stored), Some(explicit)) => Some(stored.merge(explicit)),
            (Some(stored), None) => Some(stored),
            (None, explicit) => explicit.clone(),
        }
    }

    async fn pause(&self, d: Duration) -> Result<(), NoSQLError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(self.cancelled_error()),
            _ = tokio::time::sleep(d) => Ok(()),
        }
    }
}

/// All attempts in one region: in-place retries for throttling and for
/// session-not-available, as allowed by the retry configuration.
async fn attempt_in_region(
    ctx: &OperationContext,
    ordinal: usize,
    region: &Region,
) -> Result<OperationResponse, NoSQLError> {
    let region_start = Instant::now();
    let mut first = ordinal == 0;
    let mut session_attempts: u32 = 0;
    let mut throttle_retries: u32 = 0;
    let mut throttle_waited = Duration::ZERO;
    loop {
        if let Some(g) = &ctx.group {
            tokio::select! {
                r = g.acquire() => r?,
                _ = ctx.cancel.cancelled() => return Err(ctx.cancelled_error()),
            }
        }

        let mut request = ctx.request.clone();
        request.session_token = ctx.session_token_for(first);
        first = false;

        let timeout = ctx.timeout_for_attempt();
        let slot = ctx.diagnostics.begin(region, ordinal);
        let result =
            match tokio::time::timeout(timeout, ctx.transport.send(region, &request, timeout)).await {
                Ok(r) => r,
                Err(_) => Err(NoSQLError::new(
                    NoSQLErrorCode::RequestTimeout,
                    &format!(
                        "attempt in region {} timed out after {}ms",
                        region,
                        timeout.as_millis()
                    ),
                )),
            };

        let e = match result {
            Ok(mut resp) => {
                ctx.diagnostics.succeeded(slot, resp.status_code as i32);
                if let Some(g) = &ctx.group {
                    g.record_charge(resp.request_charge);
                }
                if let Some(t) = resp.session_token.take() {
                    resp.session_token = Some(ctx.store.merge(&ctx.scope, &t));
                }
                resp.region = region.clone();
                return Ok(resp);
            }
            Err(e) => e,
        };
        ctx.diagnostics.failed(slot, &e);
        trace!("attempt in region {} failed: {}", region, e);

        match e.retry_class() {
            RetryClass::Throttled => {
                let cfg = &ctx.retry_config;
                let wait = e
                    .retry_after()
                    .unwrap_or_else(|| cfg.throttle_backoff(throttle_retries));
                if throttle_retries >= cfg.get_max_throttle_retries()
                    || throttle_waited + wait > cfg.get_max_throttle_wait()
                {
                    debug!(
                        "region {}: giving up after {} throttled retries",
                        region, throttle_retries
                    );
                    return Err(e);
                }
                throttle_retries += 1;
                throttle_waited += wait;
                trace!("region {}: throttled, retrying in {:?}", region, wait);
                ctx.pause(wait).await?;
            }
            RetryClass::SessionNotAvailable if !ctx.throttle_only => {
                session_attempts += 1;
                if !ctx
                    .session_retry
                    .should_retry_in_region(session_attempts, region_start.elapsed())
                {
                    return Err(e);
                }
                ctx.pause(ctx.session_retry.backoff(session_attempts))
                    .await?;
            }
            _ => return Err(e),
        }
    }
}

fn routing_exhausted(regions: usize, cause: Option<NoSQLError>) -> NoSQLError {
    let err = NoSQLError::new(
        NoSQLErrorCode::RoutingExhausted,
        &format!("operation failed in all {} eligible regions", regions),
    );
    match cause {
        Some(c) => err.with_cause(c),
        None => err,
    }
}

/// Try one region after the other, failing over on transient errors.
async fn run_sequential(
    ctx: &OperationContext,
    regions: &[Region],
) -> Result<OperationResponse, NoSQLError> {
    let mut last_error: Option<NoSQLError> = None;
    for (ordinal, region) in regions.iter().enumerate() {
        if ctx.deadline_passed() {
            return Err(ctx.deadline_error(last_error));
        }
        if let Some(e) = &last_error {
            debug!("failing over to region {}: {}", region, e);
        }
        match attempt_in_region(ctx, ordinal, region).await {
            Ok(resp) => return Ok(resp),
            Err(e) => match e.retry_class() {
                RetryClass::Transient | RetryClass::SessionNotAvailable => last_error = Some(e),
                RetryClass::Throttled | RetryClass::Fatal => return Err(e),
            },
        }
    }
    if ctx.deadline_passed() {
        return Err(ctx.deadline_error(last_error));
    }
    Err(routing_exhausted(regions.len(), last_error))
}

/// Launch attempts on the strategy's schedule and take the first success.
///
/// Launches are driven by time only: region `i` starts at its scheduled
/// offset even if earlier regions already failed. Once all launched attempts
/// have failed and no launch remains, the most specific error is returned.
async fn run_racing(
    ctx: Arc<OperationContext>,
    regions: &[Region],
    strategy: &AvailabilityStrategy,
) -> Result<OperationResponse, NoSQLError> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Result<OperationResponse, NoSQLError>>();
    let due = |i: usize| ctx.start + strategy.launch_delay(i).unwrap_or_default();
    let mut launched = 0;
    let mut finished = 0;
    let mut errors: Vec<NoSQLError> = Vec::new();

    loop {
        while launched < regions.len() && Instant::now() >= due(launched) {
            if ctx.deadline_passed() {
                return Err(ctx.deadline_error(most_specific(errors)));
            }
            let region = regions[launched].clone();
            debug!(
                "launching attempt {} in region {} at {:?}",
                launched,
                region,
                ctx.start.elapsed()
            );
            let task_ctx = ctx.clone();
            let task_tx = tx.clone();
            let ordinal = launched;
            tokio::spawn(async move {
                let result = tokio::select! {
                    r = attempt_in_region(&task_ctx, ordinal, &region) => r,
                    _ = task_ctx.cancel.cancelled() => return,
                };
                let _ = task_tx.send(result);
            });
            launched += 1;
        }

        if finished == launched && launched == regions.len() {
            if ctx.deadline_passed() {
                return Err(ctx.deadline_error(most_specific(errors)));
            }
            return Err(routing_exhausted(regions.len(), most_specific(errors)));
        }

        let next_launch = if launched < regions.len() {
            Some(due(launched))
        } else {
            None
        };
        tokio::select! {
            Some(result) = rx.recv() => {
                finished += 1;
                match result {
                    Ok(resp) => return Ok(resp),
                    Err(e) => {
                        // a launch turned away by throughput control leaves
                        // the attempts still running to finish
                        let others_running = finished < launched;
                        if e.retry_class() == RetryClass::Fatal
                            && !(e.code == NoSQLErrorCode::ThroughputLimitExceeded && others_running)
                        {
                            return Err(e);
                        }
                        errors.push(e);
                    }
                }
            }
            _ = tokio::time::sleep_until(next_launch.unwrap_or(ctx.start)), if next_launch.is_some() => {}
        }
    }
}

// Non-network errors say more about what went wrong; the latest one wins a tie.
fn most_specific(errors: Vec<NoSQLError>) -> Option<NoSQLError> {
    errors.into_iter().max_by_key(|e| e.specificity())
}
