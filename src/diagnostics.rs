//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
use crate::error::NoSQLError;
use crate::region::Region;
use crate::retry_strategy::OperationType;
use serde::Serializer;
use serde_derive::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

fn as_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64() * 1000.0)
}

fn debug_str<T: fmt::Debug, S: Serializer>(v: &T, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format!("{:?}", v))
}

/// How a single attempt ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum AttemptOutcome {
    /// Still running when the diagnostics were taken. Never present in the
    /// diagnostics returned to callers, where it becomes `Cancelled`.
    InFlight,
    Succeeded,
    Failed,
    Cancelled,
}

/// One request sent to one region.
#[derive(Clone, Debug, Serialize)]
pub struct AttemptDiagnostics {
    pub region: Region,
    /// Position of the region in the effective region list.
    pub region_ordinal: usize,
    /// Time from the start of the operation to the start of this attempt.
    #[serde(serialize_with = "as_millis", rename = "started_after_ms")]
    pub started_after: Duration,
    #[serde(serialize_with = "as_millis", rename = "latency_ms")]
    pub latency: Duration,
    /// Status code of the response or error, 0 if the attempt did not finish.
    pub status_code: i32,
    pub sub_status: i32,
    pub outcome: AttemptOutcome,
}

/// Everything recorded while executing one logical operation.
///
/// Available from both [`OperationResponse::diagnostics()`](crate::OperationResponse::diagnostics())
/// and [`NoSQLError::diagnostics()`].
#[derive(Clone, Debug, Serialize)]
pub struct OperationDiagnostics {
    #[serde(serialize_with = "debug_str")]
    pub(crate) operation_type: OperationType,
    pub(crate) policy: String,
    pub(crate) effective_regions: Vec<Region>,
    pub(crate) attempts: Vec<AttemptDiagnostics>,
    #[serde(serialize_with = "as_millis", rename = "total_latency_ms")]
    pub(crate) total_latency: Duration,
}

impl OperationDiagnostics {
    pub fn operation_type(&self) -> OperationType {
        self.operation_type
    }

    /// The end-to-end policy in effect, in its canonical string form.
    pub fn policy(&self) -> &str {
        &self.policy
    }

    /// The regions the operation was allowed to use, in order.
    pub fn effective_regions(&self) -> &[Region] {
        &self.effective_regions
    }

    pub fn attempts(&self) -> &[AttemptDiagnostics] {
        &self.attempts
    }

    /// Distinct regions that received at least one attempt, in order of first contact.
    pub fn regions_contacted(&self) -> Vec<Region> {
        let mut out: Vec<Region> = Vec::new();
        for a in &self.attempts {
            if !out.contains(&a.region) {
                out.push(a.region.clone());
            }
        }
        out
    }

    pub fn total_latency(&self) -> Duration {
        self.total_latency
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl fmt::Display for OperationDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json())
    }
}

// Shared between concurrently running attempts of one operation.
#[derive(Clone, Debug)]
pub(crate) struct DiagnosticsCollector {
    start: Instant,
    attempts: Arc<Mutex<Vec<AttemptDiagnostics>>>,
}

impl DiagnosticsCollector {
    pub(crate) fn new(start: Instant) -> DiagnosticsCollector {
        DiagnosticsCollector {
            start,
            attempts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register an attempt that is about to be sent, returning its slot.
    pub(crate) fn begin(&self, region: &Region, region_ordinal: usize) -> usize {
        let mut guard = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        guard.push(AttemptDiagnostics {
            region: region.clone(),
            region_ordinal,
            started_after: self.start.elapsed(),
            latency: Duration::ZERO,
            status_code: 0,
            sub_status: 0,
            outcome: AttemptOutcome::InFlight,
        });
        guard.len() - 1
    }

    pub(crate) fn succeeded(&self, slot: usize, status_code: i32) {
        self.finish(slot, status_code, 0, AttemptOutcome::Succeeded);
    }

    pub(crate) fn failed(&self, slot: usize, err: &NoSQLError) {
        let outcome = match err.code {
            crate::NoSQLErrorCode::Cancelled => AttemptOutcome::Cancelled,
            _ => AttemptOutcome::Failed,
        };
        self.finish(slot, err.code as i32, err.sub_status, outcome);
    }

    fn finish(&self, slot: usize, status_code: i32, sub_status: i32, outcome: AttemptOutcome) {
        let mut guard = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(a) = guard.get_mut(slot) {
            a.latency = (self.start.elapsed()).saturating_sub(a.started_after);
            a.status_code = status_code;
            a.sub_status = sub_status;
            a.outcome = outcome;
        }
    }

    /// Freeze the collected attempts. Attempts still running are reported as cancelled.
    pub(crate) fn snapshot(
        &self,
        operation_type: OperationType,
        policy: String,
        effective_regions: Vec<Region>,
    ) -> Arc<OperationDiagnostics> {
        let now = self.start.elapsed();
        let mut attempts = self
            .attempts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for a in attempts.iter_mut() {
            if a.outcome == AttemptOutcome::InFlight {
                a.outcome = AttemptOutcome::Cancelled;
                a.latency = now.saturating_sub(a.started_after);
            }
        }
        Arc::new(OperationDiagnostics {
            operation_type,
            policy,
            effective_regions,
            attempts,
            total_latency: now,
        })
    }
}
