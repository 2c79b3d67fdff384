//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
use crate::mock_transport::{ok_reply, MockTransport};
use crate::throughput_governor::{
    Admission, ControlResourceClient, GroupStatus, ThroughputControlGroupInternal,
    ThroughputControlStore, ThroughputUsageRecord,
};
use crate::{
    sub_status, GlobalThroughputControlConfig, GlobalThroughputControlConfigBuilder, Handle,
    InMemoryControlResource, NoSQLErrorCode, OperationRequest, OperationType, RequestOptions,
    ThroughputControlGroupConfig, ThroughputControlGroupConfigBuilder, ThroughputControlOptions,
    ThroughputLimitBehavior,
};
use chrono::Utc;
use std::error::Error;
use std::result::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const ORDERS: &str = "dbs/shop/colls/orders";
const CONTROL: &str = "dbs/shop/colls/control";

fn group(name: &str, target: u32) -> Result<ThroughputControlGroupConfig, Box<dyn Error>> {
    Ok(ThroughputControlGroupConfigBuilder::default()
        .group_name(name)
        .target_container(ORDERS)
        .target_throughput(target)
        .build()?)
}

fn near(d: Duration, ms: u64) -> bool {
    d >= Duration::from_millis(ms) && d < Duration::from_millis(ms + 5)
}

fn global() -> Result<GlobalThroughputControlConfig, Box<dyn Error>> {
    Ok(GlobalThroughputControlConfigBuilder::default()
        .control_container(CONTROL)
        .build()?)
}

fn global_group(
    control: &Arc<InMemoryControlResource>,
    client_id: &str,
    options: ThroughputControlOptions,
) -> Result<ThroughputControlGroupInternal, Box<dyn Error>> {
    Ok(ThroughputControlGroupInternal::new(
        group("shared", 10000)?,
        Some(global()?),
        Some(control.clone()),
        options,
        client_id,
    ))
}

fn local_group(
    target: u32,
    behavior: ThroughputLimitBehavior,
) -> Result<ThroughputControlGroupInternal, Box<dyn Error>> {
    Ok(ThroughputControlGroupInternal::new(
        group("local", target)?,
        None,
        None,
        ThroughputControlOptions::new().limit_behavior(behavior),
        "client-a",
    ))
}

#[tokio::test]
async fn test_global_share_split_between_clients() -> Result<(), Box<dyn Error>> {
    let control = Arc::new(InMemoryControlResource::new());
    let a = global_group(&control, "client-a", ThroughputControlOptions::new())?;
    let b = global_group(&control, "client-b", ThroughputControlOptions::new())?;

    a.initialize().await;
    assert_eq!(a.snapshot().status, GroupStatus::Active);
    assert_eq!(a.snapshot().local_share, 10000.0);

    b.initialize().await;
    assert_eq!(b.snapshot().local_share, 5000.0);
    assert_eq!(b.snapshot().active_clients, 2);

    a.renew_once().await?;
    assert_eq!(a.snapshot().local_share, 5000.0);
    assert_eq!(a.snapshot().target, 10000.0);
    assert_eq!(control.record_count(CONTROL), 2);

    // renewing again replaces the record instead of adding one
    a.renew_once().await?;
    assert_eq!(control.record_count(CONTROL), 2);
    Ok(())
}

#[tokio::test]
async fn test_stale_peers_are_ignored() -> Result<(), Box<dyn Error>> {
    let control = Arc::new(InMemoryControlResource::new());
    let scope = format!("{}.shared", ORDERS);
    let stale = ThroughputUsageRecord {
        id: format!("{}.client-gone", scope),
        group_scope: scope.clone(),
        client_id: "client-gone".to_string(),
        throughput_usage: 300.0,
        last_renewed: Utc::now() - chrono::Duration::seconds(20),
        ttl: 11,
    };
    control.upsert(CONTROL, &stale).await?;
    // records of other groups never count
    let other = ThroughputUsageRecord {
        id: "dbs/shop/colls/orders.other.client-x".to_string(),
        group_scope: format!("{}.other", ORDERS),
        client_id: "client-x".to_string(),
        throughput_usage: 0.0,
        last_renewed: Utc::now(),
        ttl: 11,
    };
    control.upsert(CONTROL, &other).await?;

    let a = global_group(&control, "client-a", ThroughputControlOptions::new())?;
    a.initialize().await;
    let share = a.snapshot();
    assert_eq!(share.status, GroupStatus::Active);
    assert_eq!(share.active_clients, 1);
    assert_eq!(share.local_share, 10000.0);
    Ok(())
}

#[tokio::test]
async fn test_share_grows_when_peer_stops_renewing() -> Result<(), Box<dyn Error>> {
    let control = Arc::new(InMemoryControlResource::new());
    let a = global_group(&control, "client-a", ThroughputControlOptions::new())?;
    let b = global_group(&control, "client-b", ThroughputControlOptions::new())?;
    a.initialize().await;
    b.initialize().await;
    a.renew_once().await?;
    assert_eq!(a.snapshot().local_share, 5000.0);
    assert_eq!(a.snapshot().active_clients, 2);

    // client-b goes away: its last record ages past the expire interval
    let scope = format!("{}.shared", ORDERS);
    let gone = ThroughputUsageRecord {
        id: format!("{}.client-b", scope),
        group_scope: scope,
        client_id: "client-b".to_string(),
        throughput_usage: 0.0,
        last_renewed: Utc::now() - chrono::Duration::seconds(12),
        ttl: 11,
    };
    control.upsert(CONTROL, &gone).await?;

    a.renew_once().await?;
    assert_eq!(a.snapshot().local_share, 10000.0);
    assert_eq!(a.snapshot().active_clients, 1);
    Ok(())
}

#[tokio::test]
async fn test_usage_record_format() -> Result<(), Box<dyn Error>> {
    let control = Arc::new(InMemoryControlResource::new());
    let a = global_group(&control, "client-a", ThroughputControlOptions::new())?;
    a.initialize().await;
    let records = control
        .read_all(CONTROL, &format!("{}.shared", ORDERS))
        .await?;
    assert_eq!(records.len(), 1);
    let r = &records[0];
    assert_eq!(r.id, "dbs/shop/colls/orders.shared.client-a");
    assert_eq!(r.client_id, "client-a");
    assert_eq!(r.ttl, 11);

    let json = serde_json::to_value(r)?;
    assert!(json.get("groupScope").is_some());
    assert!(json.get("lastRenewed").is_some());
    assert!(json.get("throughputUsage").is_some());
    Ok(())
}

#[tokio::test]
async fn test_threshold_target_uses_provisioned_throughput() -> Result<(), Box<dyn Error>> {
    let control = Arc::new(InMemoryControlResource::new());
    control.set_provisioned_throughput(ORDERS, 8000.0);
    let config = ThroughputControlGroupConfigBuilder::default()
        .group_name("quarter")
        .target_container(ORDERS)
        .target_throughput_threshold(0.25)
        .build()?;
    let g = ThroughputControlGroupInternal::new(
        config,
        None,
        Some(control.clone()),
        ThroughputControlOptions::new(),
        "client-a",
    );
    assert_eq!(g.renew_interval(), Some(Duration::from_secs(5)));
    g.initialize().await;
    assert_eq!(g.snapshot().local_share, 2000.0);
    // local groups never write usage records
    assert_eq!(control.record_count(CONTROL), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_delay_until_next_period() -> Result<(), Box<dyn Error>> {
    let g = local_group(10, ThroughputLimitBehavior::Delay)?;
    assert!(g.renew_interval().is_none());
    g.initialize().await;
    let start = Instant::now();

    assert!(matches!(g.try_admit(start)?, Admission::Admitted));
    g.record_charge(10.0);
    match g.try_admit(Instant::now())? {
        Admission::DelayUntil(at) => assert_eq!(at, start + Duration::from_secs(1)),
        other => return Err(format!("expected a delay, got {:?}", other).into()),
    }
    g.acquire().await?;
    assert!(near(start.elapsed(), 1000), "elapsed {:?}", start.elapsed());

    // a large charge is paid off over several periods
    g.record_charge(25.0);
    g.acquire().await?;
    assert!(near(start.elapsed(), 3000), "elapsed {:?}", start.elapsed());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_reject_over_share() -> Result<(), Box<dyn Error>> {
    let g = local_group(10, ThroughputLimitBehavior::Reject)?;
    g.initialize().await;
    g.record_charge(4.0);
    g.acquire().await?;
    g.record_charge(6.0);
    tokio::time::advance(Duration::from_millis(300)).await;
    let err = g.acquire().await.unwrap_err();
    assert_eq!(err.code, NoSQLErrorCode::ThroughputLimitExceeded);
    assert_eq!(err.sub_status, sub_status::THROUGHPUT_CONTROL_REJECTED);
    assert_eq!(err.retry_after(), Some(Duration::from_millis(700)));

    tokio::time::advance(Duration::from_millis(700)).await;
    g.acquire().await?;
    Ok(())
}

#[tokio::test]
async fn test_init_failure_without_fallback() -> Result<(), Box<dyn Error>> {
    let control = Arc::new(InMemoryControlResource::new());
    control.set_unavailable(true);
    let g = global_group(&control, "client-a", ThroughputControlOptions::new())?;
    g.initialize().await;
    assert_eq!(g.snapshot().status, GroupStatus::InitFailed);

    let err = g.acquire().await.unwrap_err();
    assert_eq!(err.code, NoSQLErrorCode::ThroughputControlInitFailed);
    let cause = err.cause().ok_or("missing cause")?;
    assert_eq!(cause.code, NoSQLErrorCode::ServiceUnavailable);

    // a later renewal activates the group
    control.set_unavailable(false);
    g.renew_once().await?;
    assert_eq!(g.snapshot().status, GroupStatus::Active);
    g.acquire().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_zero_target_never_hangs() -> Result<(), Box<dyn Error>> {
    let err = ThroughputControlGroupConfigBuilder::default()
        .group_name("none")
        .target_container(ORDERS)
        .target_throughput(0u32)
        .build()
        .unwrap_err();
    assert_eq!(err.code, NoSQLErrorCode::IllegalArgument);

    // a threshold of a container without provisioned throughput resolves to 0
    let control = Arc::new(InMemoryControlResource::new());
    control.set_provisioned_throughput(ORDERS, 0.0);
    let config = ThroughputControlGroupConfigBuilder::default()
        .group_name("half")
        .target_container(ORDERS)
        .target_throughput_threshold(0.5)
        .build()?;
    let g = ThroughputControlGroupInternal::new(
        config,
        None,
        Some(control.clone()),
        ThroughputControlOptions::new().limit_behavior(ThroughputLimitBehavior::Delay),
        "client-a",
    );
    g.initialize().await;
    assert_eq!(g.snapshot().status, GroupStatus::InitFailed);
    let admitted = tokio::time::timeout(Duration::from_secs(3600), g.acquire()).await?;
    let err = admitted.unwrap_err();
    assert_eq!(err.code, NoSQLErrorCode::ThroughputControlInitFailed);
    assert_eq!(err.cause().ok_or("missing cause")?.code, NoSQLErrorCode::IllegalState);
    Ok(())
}

#[tokio::test]
async fn test_init_failure_with_fallback() -> Result<(), Box<dyn Error>> {
    let control = Arc::new(InMemoryControlResource::new());
    control.set_unavailable(true);
    let options = ThroughputControlOptions::new().fallback_on_init_error(true);
    assert!(options.is_fallback_on_init_error());
    let g = global_group(&control, "client-a", options)?;
    g.initialize().await;
    assert_eq!(g.snapshot().status, GroupStatus::InitFailed);
    assert!(g.snapshot().last_error.is_some());
    for _ in 0..100 {
        g.acquire().await?;
        g.record_charge(1000.0);
    }
    Ok(())
}

#[tokio::test]
async fn test_renewal_failure_keeps_share() -> Result<(), Box<dyn Error>> {
    let control = Arc::new(InMemoryControlResource::new());
    let g = global_group(&control, "client-a", ThroughputControlOptions::new())?;
    g.initialize().await;
    control.set_unavailable(true);
    assert!(g.renew_once().await.is_err());
    let share = g.snapshot();
    assert_eq!(share.status, GroupStatus::Active);
    assert_eq!(share.local_share, 10000.0);
    Ok(())
}

#[test]
fn test_store_validation() -> Result<(), Box<dyn Error>> {
    let opts = ThroughputControlOptions::new();
    let control: Arc<dyn ControlResourceClient> = Arc::new(InMemoryControlResource::new());

    let dup = ThroughputControlStore::new(
        vec![(group("g1", 10)?, None), (group("g1", 20)?, None)],
        None,
        opts.clone(),
        "c",
    );
    assert_eq!(dup.unwrap_err().code, NoSQLErrorCode::IllegalArgument);

    let default_group = |name: &str| {
        ThroughputControlGroupConfigBuilder::default()
            .group_name(name)
            .target_container(ORDERS)
            .target_throughput(10u32)
            .is_default(true)
            .build()
    };
    let two_defaults = ThroughputControlStore::new(
        vec![(default_group("d1")?, None), (default_group("d2")?, None)],
        None,
        opts.clone(),
        "c",
    );
    assert!(two_defaults.is_err());

    let threshold = ThroughputControlGroupConfigBuilder::default()
        .group_name("t")
        .target_container(ORDERS)
        .target_throughput_threshold(0.5)
        .build()?;
    let no_client = ThroughputControlStore::new(vec![(threshold.clone(), None)], None, opts.clone(), "c");
    assert!(no_client.is_err());
    let with_client = ThroughputControlStore::new(
        vec![(threshold, None)],
        Some(control.clone()),
        opts.clone(),
        "c",
    )?;
    assert!(!with_client.is_empty());

    let global_no_client =
        ThroughputControlStore::new(vec![(group("g", 10)?, Some(global()?))], None, opts.clone(), "c");
    assert!(global_no_client.is_err());

    let empty = ThroughputControlStore::new(Vec::new(), None, opts, "c")?;
    assert!(empty.is_empty());
    assert!(empty.resolve(None, "dbs/shop/colls/orders/docs/1")?.is_none());
    Ok(())
}

#[test]
fn test_store_resolve() -> Result<(), Box<dyn Error>> {
    let other = ThroughputControlGroupConfigBuilder::default()
        .group_name("other")
        .target_container("dbs/shop/colls/customers")
        .target_throughput(10u32)
        .is_default(true)
        .build()?;
    let dflt = ThroughputControlGroupConfigBuilder::default()
        .group_name("orders-default")
        .target_container(ORDERS)
        .target_throughput(10u32)
        .is_default(true)
        .build()?;
    let store = ThroughputControlStore::new(
        vec![(group("named", 10)?, None), (other, None), (dflt, None)],
        None,
        ThroughputControlOptions::new(),
        "c",
    )?;
    let doc = "dbs/shop/colls/orders/docs/1";

    let g = store.resolve(Some("named"), doc)?.ok_or("no group")?;
    assert_eq!(g.name(), "named");
    let g = store.resolve(None, doc)?.ok_or("no default group")?;
    assert_eq!(g.name(), "orders-default");
    assert!(store.resolve(None, "dbs/shop/colls/invoices/docs/1")?.is_none());

    let err = store.resolve(Some("other"), doc).unwrap_err();
    assert_eq!(err.code, NoSQLErrorCode::IllegalArgument);
    assert!(store.resolve(Some("missing"), doc).is_err());
    assert!(store.group("named").is_some());
    assert!(store.group("missing").is_none());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_background_renewal_picks_up_new_clients() -> Result<(), Box<dyn Error>> {
    let control = Arc::new(InMemoryControlResource::new());
    let client: Arc<dyn ControlResourceClient> = control.clone();
    let first = ThroughputControlStore::new(
        vec![(group("shared", 10000)?, Some(global()?))],
        Some(client.clone()),
        ThroughputControlOptions::new(),
        "client-a",
    )?;
    first.activate().await;
    let g = first.group("shared").ok_or("no group")?;
    assert_eq!(g.snapshot().local_share, 10000.0);

    let second = ThroughputControlStore::new(
        vec![(group("shared", 10000)?, Some(global()?))],
        Some(client),
        ThroughputControlOptions::new(),
        "client-b",
    )?;
    second.activate().await;

    tokio::time::sleep(Duration::from_millis(5100)).await;
    assert_eq!(g.snapshot().local_share, 5000.0);

    first.close();
    second.close();
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_handle_rejects_over_share() -> Result<(), Box<dyn Error>> {
    let mock = Arc::new(MockTransport::new());
    mock.always("r1", 10, ok_reply("r1", None));
    let handle = Handle::builder()
        .preferred_regions(&["r1"])?
        .transport(mock.clone())?
        .throughput_control_options(
            ThroughputControlOptions::new().limit_behavior(ThroughputLimitBehavior::Reject),
        )?
        .local_throughput_control_group(group("one-per-second", 1)?)?
        .build()
        .await?;
    let read = || OperationRequest::new(OperationType::Read, "dbs/shop/colls/orders/docs/1");
    let opts = RequestOptions::new().throughput_control_group("one-per-second");

    handle.execute(read(), &opts).await?;
    let err = handle.execute(read(), &opts).await.unwrap_err();
    assert_eq!(err.code, NoSQLErrorCode::ThroughputLimitExceeded);
    assert_eq!(mock.calls_to("r1"), 1);

    // operations without the group are not limited
    handle.execute(read(), &RequestOptions::new()).await?;
    assert_eq!(mock.calls_to("r1"), 2);

    tokio::time::advance(Duration::from_secs(1)).await;
    handle.execute(read(), &opts).await?;
    assert_eq!(mock.calls_to("r1"), 3);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_handle_delays_over_share() -> Result<(), Box<dyn Error>> {
    let mock = Arc::new(MockTransport::new());
    mock.always("r1", 0, ok_reply("r1", None));
    let default_group = ThroughputControlGroupConfigBuilder::default()
        .group_name("orders")
        .target_container(ORDERS)
        .target_throughput(2u32)
        .is_default(true)
        .build()?;
    let handle = Handle::builder()
        .preferred_regions(&["r1"])?
        .transport(mock.clone())?
        .local_throughput_control_group(default_group)?
        .build()
        .await?;

    let start = Instant::now();
    for _ in 0..6 {
        let req = OperationRequest::new(OperationType::Read, "dbs/shop/colls/orders/docs/1");
        handle.execute(req, &RequestOptions::new()).await?;
    }
    // two per second, each charged 1.0
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(2), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(2100), "elapsed {:?}", elapsed);
    assert_eq!(mock.calls_to("r1"), 6);
    Ok(())
}
