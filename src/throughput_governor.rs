//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
//! Runtime state of activated throughput control groups.
//!
//! Each group keeps its current share of the target throughput and a usage
//! window of one-second accounting periods. Global groups renew their share
//! from a shared control container in a background task; the renewal is the
//! only writer of the share, request admission only reads it.
use crate::error::{ia_err, ia_error, sub_status, NoSQLError, NoSQLErrorCode};
use crate::session::container_link;
use crate::throughput_control::{
    GlobalThroughputControlConfig, ThroughputControlGroupConfig, ThroughputControlOptions,
    ThroughputLimitBehavior, DEFAULT_CONTROL_ITEM_RENEW_INTERVAL,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_derive::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::result::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Length of one admission accounting period.
pub(crate) const ACCOUNTING_PERIOD: Duration = Duration::from_secs(1);

/// The record one client keeps in the control container for one group.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThroughputUsageRecord {
    /// `{group_scope}.{client_id}`
    pub id: String,
    /// `{target container}.{group name}`, shared by all clients of the group.
    pub group_scope: String,
    pub client_id: String,
    /// Throughput consumed by the client during its last full period.
    pub throughput_usage: f64,
    pub last_renewed: DateTime<Utc>,
    /// Seconds after which the record may be dropped by the store.
    pub ttl: i64,
}

/// Access to the shared container holding throughput usage records.
///
/// No transactional guarantee is needed: stale reads only make the computed
/// share temporarily inaccurate.
#[async_trait]
pub trait ControlResourceClient: Send + Sync + Debug {
    /// Create or replace `record` in `control_container`.
    async fn upsert(
        &self,
        control_container: &str,
        record: &ThroughputUsageRecord,
    ) -> Result<(), NoSQLError>;

    /// Read every record of `group_scope` in `control_container`.
    async fn read_all(
        &self,
        control_container: &str,
        group_scope: &str,
    ) -> Result<Vec<ThroughputUsageRecord>, NoSQLError>;

    /// The throughput provisioned for `target_container`, used by groups
    /// configured with a target threshold.
    async fn provisioned_throughput(&self, target_container: &str) -> Result<f64, NoSQLError> {
        Err(NoSQLError::new(
            NoSQLErrorCode::IllegalState,
            &format!(
                "provisioned throughput of {} is not available from this control client",
                target_container
            ),
        ))
    }
}

/// A [`ControlResourceClient`] keeping records as JSON documents in memory.
///
/// Clients of the same process can share one instance to coordinate a
/// global group. It can also be marked unavailable to exercise failures.
#[derive(Debug, Default)]
pub struct InMemoryControlResource {
    // container -> id -> document
    documents: Mutex<HashMap<String, HashMap<String, String>>>,
    provisioned: Mutex<HashMap<String, f64>>,
    unavailable: AtomicBool,
}

impl InMemoryControlResource {
    pub fn new() -> InMemoryControlResource {
        InMemoryControlResource::default()
    }

    pub fn set_provisioned_throughput(&self, target_container: &str, throughput: f64) {
        let mut guard = self.provisioned.lock().unwrap_or_else(|e| e.into_inner());
        guard.insert(target_container.trim_matches('/').to_string(), throughput);
    }

    /// When unavailable, every call fails with ServiceUnavailable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of records stored in a container.
    pub fn record_count(&self, control_container: &str) -> usize {
        let guard = self.documents.lock().unwrap_or_else(|e| e.into_inner());
        guard
            .get(control_container.trim_matches('/'))
            .map(|m| m.len())
            .unwrap_or(0)
    }

    fn check_available(&self) -> Result<(), NoSQLError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(NoSQLError::new(
                NoSQLErrorCode::ServiceUnavailable,
                "control resource is unavailable",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ControlResourceClient for InMemoryControlResource {
    async fn upsert(
        &self,
        control_container: &str,
        record: &ThroughputUsageRecord,
    ) -> Result<(), NoSQLError> {
        self.check_available()?;
        let doc = serde_json::to_string(record)?;
        let mut guard = self.documents.lock().unwrap_or_else(|e| e.into_inner());
        guard
            .entry(control_container.trim_matches('/').to_string())
            .or_default()
            .insert(record.id.clone(), doc);
        Ok(())
    }

    async fn read_all(
        &self,
        control_container: &str,
        group_scope: &str,
    ) -> Result<Vec<ThroughputUsageRecord>, NoSQLError> {
        self.check_available()?;
        let docs: Vec<String> = {
            let guard = self.documents.lock().unwrap_or_else(|e| e.into_inner());
            match guard.get(control_container.trim_matches('/')) {
                Some(m) => m.values().cloned().collect(),
                None => Vec::new(),
            }
        };
        let mut records = Vec::with_capacity(docs.len());
        for doc in docs {
            let record: ThroughputUsageRecord = serde_json::from_str(&doc)?;
            if record.group_scope == group_scope {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn provisioned_throughput(&self, target_container: &str) -> Result<f64, NoSQLError> {
        self.check_available()?;
        let guard = self.provisioned.lock().unwrap_or_else(|e| e.into_inner());
        match guard.get(target_container.trim_matches('/')) {
            Some(t) => Ok(*t),
            None => Err(NoSQLError::new(
                NoSQLErrorCode::NotFound,
                &format!("no provisioned throughput known for {}", target_container),
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum GroupStatus {
    Active,
    InitFailed,
}

/// Snapshot of a group's computed share.
#[derive(Clone, Debug)]
pub(crate) struct GroupShare {
    pub(crate) status: GroupStatus,
    pub(crate) target: f64,
    pub(crate) local_share: f64,
    /// Clients sharing the target, including this one.
    pub(crate) active_clients: usize,
    pub(crate) last_renewed: Option<Instant>,
    pub(crate) last_error: Option<NoSQLError>,
}

#[derive(Debug)]
struct UsageWindow {
    period_start: Instant,
    // charges not yet paid for by elapsed periods; may exceed one share
    consumed: f64,
    period_charges: f64,
    last_period_usage: f64,
}

impl UsageWindow {
    fn new(now: Instant) -> UsageWindow {
        UsageWindow {
            period_start: now,
            consumed: 0.0,
            period_charges: 0.0,
            last_period_usage: 0.0,
        }
    }

    fn roll(&mut self, now: Instant, share: f64) {
        let elapsed = now.saturating_duration_since(self.period_start);
        if elapsed < ACCOUNTING_PERIOD {
            return;
        }
        let periods = (elapsed.as_millis() / ACCOUNTING_PERIOD.as_millis()).min(u32::MAX as u128) as u32;
        self.last_period_usage = if periods == 1 {
            self.period_charges
        } else {
            0.0
        };
        self.period_charges = 0.0;
        self.consumed = (self.consumed - share * periods as f64).max(0.0);
        self.period_start += ACCOUNTING_PERIOD * periods;
    }
}

#[derive(Debug)]
pub(crate) enum Admission {
    Admitted,
    DelayUntil(Instant),
}

/// One activated throughput control group.
#[derive(Debug)]
pub(crate) struct ThroughputControlGroupInternal {
    config: ThroughputControlGroupConfig,
    global: Option<GlobalThroughputControlConfig>,
    control: Option<Arc<dyn ControlResourceClient>>,
    options: ThroughputControlOptions,
    client_id: String,
    group_scope: String,
    share: RwLock<GroupShare>,
    window: Mutex<UsageWindow>,
}

impl ThroughputControlGroupInternal {
    pub(crate) fn new(
        config: ThroughputControlGroupConfig,
        global: Option<GlobalThroughputControlConfig>,
        control: Option<Arc<dyn ControlResourceClient>>,
        options: ThroughputControlOptions,
        client_id: &str,
    ) -> ThroughputControlGroupInternal {
        let group_scope = format!("{}.{}", config.target_container(), config.group_name());
        ThroughputControlGroupInternal {
            config,
            global,
            control,
            options,
            client_id: client_id.to_string(),
            group_scope,
            share: RwLock::new(GroupShare {
                status: GroupStatus::InitFailed,
                target: 0.0,
                local_share: 0.0,
                active_clients: 1,
                last_renewed: None,
                last_error: Some(NoSQLError::new(
                    NoSQLErrorCode::ThroughputControlInitFailed,
                    "throughput control group is not initialized",
                )),
            }),
            window: Mutex::new(UsageWindow::new(Instant::now())),
        }
    }

    pub(crate) fn name(&self) -> &str {
        self.config.group_name()
    }

    pub(crate) fn config(&self) -> &ThroughputControlGroupConfig {
        &self.config
    }

    pub(crate) fn snapshot(&self) -> GroupShare {
        self.share.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// How often the share is recomputed, if it ever changes after activation.
    pub(crate) fn renew_interval(&self) -> Option<Duration> {
        match (&self.global, self.config.target_throughput_threshold()) {
            (Some(g), _) => Some(g.control_item_renew_interval()),
            (None, Some(_)) => Some(DEFAULT_CONTROL_ITEM_RENEW_INTERVAL),
            (None, None) => None,
        }
    }

    async fn resolve_target(&self) -> Result<f64, NoSQLError> {
        if let Some(t) = self.config.target_throughput() {
            return Ok(t as f64);
        }
        let threshold = self.config.target_throughput_threshold().unwrap_or(1.0);
        let control = self.control.as_ref().ok_or_else(|| {
            NoSQLError::new(
                NoSQLErrorCode::IllegalState,
                "a control resource client is required to resolve a throughput threshold",
            )
        })?;
        let provisioned = control
            .provisioned_throughput(self.config.target_container())
            .await?;
        let target = threshold * provisioned;
        // a zero share would never admit anything
        if !(target > 0.0) {
            return Err(NoSQLError::new(
                NoSQLErrorCode::IllegalState,
                &format!(
                    "throughput control group {}: {} has no provisioned throughput",
                    self.name(),
                    self.config.target_container()
                ),
            ));
        }
        Ok(target)
    }

    fn last_period_usage(&self) -> f64 {
        let share = self.snapshot().local_share;
        let mut w = self.window.lock().unwrap_or_else(|e| e.into_inner());
        w.roll(Instant::now(), share);
        w.last_period_usage
    }

    /// Recompute the share once: publish this client's usage record, read
    /// the peers and split the target evenly between the fresh ones.
    pub(crate) async fn renew_once(&self) -> Result<(), NoSQLError> {
        let target = self.resolve_target().await?;
        let (local_share, active_clients) = match (&self.global, &self.control) {
            (Some(global), Some(control)) => {
                let now = Utc::now();
                let record = ThroughputUsageRecord {
                    id: format!("{}.{}", self.group_scope, self.client_id),
                    group_scope: self.group_scope.clone(),
                    client_id: self.client_id.clone(),
                    throughput_usage: self.last_period_usage(),
                    last_renewed: now,
                    ttl: global.control_item_expire_interval().as_secs() as i64,
                };
                control
                    .upsert(global.control_container(), &record)
                    .await?;
                let peers = control
                    .read_all(global.control_container(), &self.group_scope)
                    .await?;
                let expire = chrono::Duration::milliseconds(
                    global.control_item_expire_interval().as_millis() as i64,
                );
                let fresh = peers
                    .iter()
                    .filter(|p| p.client_id != self.client_id)
                    .filter(|p| now.signed_duration_since(p.last_renewed) <= expire)
                    .count();
                (target / (fresh + 1) as f64, fresh + 1)
            }
            (Some(_), None) => {
                return Err(NoSQLError::new(
                    NoSQLErrorCode::IllegalState,
                    "global throughput control requires a control resource client",
                ))
            }
            _ => (target, 1),
        };
        let mut guard = self.share.write().unwrap_or_else(|e| e.into_inner());
        if guard.status != GroupStatus::Active {
            debug!("throughput control group {} is active", self.name());
        }
        *guard = GroupShare {
            status: GroupStatus::Active,
            target,
            local_share,
            active_clients,
            last_renewed: Some(Instant::now()),
            last_error: None,
        };
        trace!(
            "throughput control group {}: target={} clients={} share={}",
            self.name(),
            target,
            active_clients,
            local_share
        );
        Ok(())
    }

    /// First renewal. A failure leaves the group in InitFailed; whether its
    /// operations then fail or bypass control is decided at admission.
    pub(crate) async fn initialize(&self) {
        if let Err(e) = self.renew_once().await {
            warn!(
                "throughput control group {} failed to initialize: {}",
                self.name(),
                e
            );
            let mut guard = self.share.write().unwrap_or_else(|e| e.into_inner());
            guard.status = GroupStatus::InitFailed;
            guard.last_error = Some(e);
        }
    }

    fn init_failed_error(&self, cause: Option<NoSQLError>) -> NoSQLError {
        let err = NoSQLError::new(
            NoSQLErrorCode::ThroughputControlInitFailed,
            &format!(
                "throughput control group {} could not be initialized",
                self.name()
            ),
        );
        match cause {
            Some(c) => err.with_cause(c),
            None => err,
        }
    }

    /// Check whether an operation may start now.
    pub(crate) fn try_admit(&self, now: Instant) -> Result<Admission, NoSQLError> {
        let snapshot = self.snapshot();
        if snapshot.status == GroupStatus::InitFailed {
            if self.options.fallback_on_init_error {
                return Ok(Admission::Admitted);
            }
            return Err(self.init_failed_error(snapshot.last_error));
        }
        let mut w = self.window.lock().unwrap_or_else(|e| e.into_inner());
        w.roll(now, snapshot.local_share);
        if w.consumed < snapshot.local_share {
            return Ok(Admission::Admitted);
        }
        let next_period = w.period_start + ACCOUNTING_PERIOD;
        match self.options.limit_behavior {
            ThroughputLimitBehavior::Delay => Ok(Admission::DelayUntil(next_period)),
            ThroughputLimitBehavior::Reject => Err(NoSQLError::new(
                NoSQLErrorCode::ThroughputLimitExceeded,
                &format!(
                    "throughput control group {} exceeded its share of {} per second",
                    self.name(),
                    snapshot.local_share
                ),
            )
            .with_sub_status(sub_status::THROUGHPUT_CONTROL_REJECTED)
            .with_retry_after(next_period.saturating_duration_since(now))),
        }
    }

    /// Wait until an operation may start, or fail per the limit behavior.
    pub(crate) async fn acquire(&self) -> Result<(), NoSQLError> {
        loop {
            match self.try_admit(Instant::now())? {
                Admission::Admitted => return Ok(()),
                Admission::DelayUntil(at) => {
                    trace!(
                        "throughput control group {} delaying operation by {:?}",
                        self.name(),
                        at.saturating_duration_since(Instant::now())
                    );
                    tokio::time::sleep_until(at).await;
                }
            }
        }
    }

    /// Account the throughput consumed by one attempt.
    pub(crate) fn record_charge(&self, charge: f64) {
        if charge <= 0.0 {
            return;
        }
        let share = self.snapshot().local_share;
        let mut w = self.window.lock().unwrap_or_else(|e| e.into_inner());
        w.roll(Instant::now(), share);
        w.consumed += charge;
        w.period_charges += charge;
    }
}

/// All throughput control groups of one handle.
#[derive(Debug, Default)]
pub(crate) struct ThroughputControlStore {
    groups: HashMap<String, Arc<ThroughputControlGroupInternal>>,
    cancel: CancellationToken,
}

impl ThroughputControlStore {
    /// Validate and create the groups. Nothing is contacted until
    /// [`activate()`](Self::activate()).
    pub(crate) fn new(
        registrations: Vec<(ThroughputControlGroupConfig, Option<GlobalThroughputControlConfig>)>,
        control: Option<Arc<dyn ControlResourceClient>>,
        options: ThroughputControlOptions,
        client_id: &str,
    ) -> Result<ThroughputControlStore, NoSQLError> {
        let mut groups = HashMap::new();
        let mut default_containers: HashSet<String> = HashSet::new();
        for (config, global) in registrations {
            config.validate_target()?;
            if groups.contains_key(config.group_name()) {
                return ia_err!(
                    "throughput control group '{}' is enabled more than once",
                    config.group_name()
                );
            }
            if config.is_default()
                && !default_containers.insert(config.target_container().to_string())
            {
                return ia_err!(
                    "container {} already has a default throughput control group",
                    config.target_container()
                );
            }
            if control.is_none()
                && (global.is_some() || config.target_throughput_threshold().is_some())
            {
                return ia_err!(
                    "throughput control group '{}' requires a control resource client",
                    config.group_name()
                );
            }
            let name = config.group_name().to_string();
            let group = ThroughputControlGroupInternal::new(
                config,
                global,
                control.clone(),
                options.clone(),
                client_id,
            );
            groups.insert(name, Arc::new(group));
        }
        Ok(ThroughputControlStore {
            groups,
            cancel: CancellationToken::new(),
        })
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Initialize every group and start the renewal tasks.
    pub(crate) async fn activate(&self) {
        for group in self.groups.values() {
            group.initialize().await;
            if let Some(every) = group.renew_interval() {
                spawn_renewal(group.clone(), every, self.cancel.child_token());
            }
        }
    }

    pub(crate) fn group(&self, name: &str) -> Option<Arc<ThroughputControlGroupInternal>> {
        self.groups.get(name).cloned()
    }

    /// The group an operation on `resource_link` is accounted to: the named
    /// group if given, else the default group of the container, if any.
    pub(crate) fn resolve(
        &self,
        requested: Option<&str>,
        resource_link: &str,
    ) -> Result<Option<Arc<ThroughputControlGroupInternal>>, NoSQLError> {
        let container = container_link(resource_link);
        match requested {
            Some(name) => {
                let group = self.group(name).ok_or_else(|| {
                    ia_error!("throughput control group '{}' is not enabled", name)
                })?;
                if group.config().target_container() != container {
                    return ia_err!(
                        "throughput control group '{}' targets {}, not {}",
                        name,
                        group.config().target_container(),
                        container
                    );
                }
                Ok(Some(group))
            }
            None => Ok(self
                .groups
                .values()
                .find(|g| g.config().is_default() && g.config().target_container() == container)
                .cloned()),
        }
    }

    /// Stop all renewal tasks.
    pub(crate) fn close(&self) {
        self.cancel.cancel();
    }
}

fn spawn_renewal(
    group: Arc<ThroughputControlGroupInternal>,
    every: Duration,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("stopped renewal of throughput control group {}", group.name());
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = group.renew_once().await {
                        warn!(
                            "renewal of throughput control group {} failed: {}",
                            group.name(),
                            e
                        );
                    }
                }
            }
        }
    });
}
