//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
use crate::consistency::uses_session_token;
use crate::error::NoSQLErrorCode;
use crate::retry_strategy::OperationType;
use crate::session::{container_link, session_scope, SessionContainer, SessionToken, SessionTokenStore};
use crate::ConsistencyLevel;
use rand::Rng;
use std::error::Error;
use std::result::Result;
use std::sync::Arc;

fn random_token(rng: &mut impl Rng) -> SessionToken {
    let mut t = SessionToken::new(rng.gen_range(1..3), rng.gen_range(0..1000));
    for r in 0..4u32 {
        if rng.gen_bool(0.7) {
            t = t.region_lsn(r, rng.gen_range(0..100));
        }
    }
    t
}

#[test]
fn test_merge_takes_component_max() -> Result<(), Box<dyn Error>> {
    let a: SessionToken = "1#100#1=5#2=3".parse()?;
    let b: SessionToken = "1#90#1=3#2=7".parse()?;
    let expected: SessionToken = "1#100#1=5#2=7".parse()?;
    assert_eq!(a.merge(&b), expected);
    assert_eq!(b.merge(&a), expected);
    assert!(expected.is_as_recent_as(&a));
    assert!(expected.is_as_recent_as(&b));
    assert!(!a.is_as_recent_as(&b));
    Ok(())
}

#[test]
fn test_merge_newer_version_decides_regions() -> Result<(), Box<dyn Error>> {
    let old: SessionToken = "1#50#1=9#2=9".parse()?;
    let new: SessionToken = "2#40#1=4#3=1".parse()?;
    let merged = old.merge(&new);
    assert_eq!(merged.version(), 2);
    assert_eq!(merged.global_lsn(), 50);
    assert_eq!(merged.get_region_lsn(1), Some(9));
    assert_eq!(merged.get_region_lsn(2), None);
    assert_eq!(merged.get_region_lsn(3), Some(1));
    assert_eq!(merged, new.merge(&old));
    Ok(())
}

#[test]
fn test_merge_is_commutative_and_idempotent() {
    let mut rng = rand::thread_rng();
    for _ in 0..1000 {
        let a = random_token(&mut rng);
        let b = random_token(&mut rng);
        let ab = a.merge(&b);
        assert_eq!(ab, b.merge(&a), "{} / {}", a, b);
        assert_eq!(ab.merge(&b), ab);
        assert_eq!(a.merge(&a), a);
        assert!(ab.global_lsn() >= a.global_lsn().max(b.global_lsn()));
    }
}

#[test]
fn test_token_string_form() -> Result<(), Box<dyn Error>> {
    let t = SessionToken::new(3, 1200).region_lsn(2, 7).region_lsn(1, 20);
    assert_eq!(t.to_string(), "3#1200#1=20#2=7");
    let back: SessionToken = t.to_string().parse()?;
    assert_eq!(back, t);
    assert_eq!("4#0".parse::<SessionToken>()?, SessionToken::new(4, 0));

    for bad in ["", "x#1", "1", "1#y", "1#2#3", "1#2#a=1", "1#2#1=b"] {
        let err = bad.parse::<SessionToken>().unwrap_err();
        assert_eq!(err.code, NoSQLErrorCode::IllegalArgument, "{}", bad);
    }
    Ok(())
}

#[test]
fn test_store_never_moves_backwards() -> Result<(), Box<dyn Error>> {
    let store = SessionContainer::new();
    assert!(store.get("dbs/a/colls/b/pk").is_none());
    store.merge("dbs/a/colls/b/pk", &"1#10#1=5".parse()?);
    let merged = store.merge("dbs/a/colls/b/pk", &"1#8#1=2".parse()?);
    assert_eq!(merged.to_string(), "1#10#1=5");
    assert_eq!(store.get("dbs/a/colls/b/pk"), Some(merged));
    assert!(store.get("dbs/a/colls/b/other").is_none());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_merges_are_not_lost() -> Result<(), Box<dyn Error>> {
    let store = Arc::new(SessionContainer::new());
    let mut tasks = Vec::new();
    for r in 0..8u32 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            for lsn in 0..200u64 {
                store.merge("scope", &SessionToken::new(1, lsn).region_lsn(r, lsn));
                tokio::task::yield_now().await;
            }
        }));
    }
    for t in tasks {
        t.await?;
    }
    let final_token = store.get("scope").ok_or("no token stored")?;
    assert_eq!(final_token.global_lsn(), 199);
    for r in 0..8u32 {
        assert_eq!(final_token.get_region_lsn(r), Some(199));
    }
    Ok(())
}

#[test]
fn test_session_scope() {
    assert_eq!(container_link("dbs/shop/colls/orders/docs/1"), "dbs/shop/colls/orders");
    assert_eq!(container_link("/dbs/shop/colls/orders/"), "dbs/shop/colls/orders");
    assert_eq!(container_link("dbs/shop"), "dbs/shop");
    assert_eq!(
        session_scope("dbs/shop/colls/orders/docs/1", Some("pk1")),
        session_scope("dbs/shop/colls/orders/docs/2", Some("pk1"))
    );
    assert_ne!(
        session_scope("dbs/shop/colls/orders/docs/1", Some("pk1")),
        session_scope("dbs/shop/colls/orders/docs/1", Some("pk2"))
    );
    assert_eq!(session_scope("dbs/shop/colls/orders", None), "dbs/shop/colls/orders/");
}

#[test]
fn test_session_token_only_for_session_reads() {
    assert!(uses_session_token(ConsistencyLevel::Session, OperationType::Read));
    assert!(uses_session_token(ConsistencyLevel::Session, OperationType::Query));
    assert!(!uses_session_token(ConsistencyLevel::Session, OperationType::Upsert));
    assert!(!uses_session_token(ConsistencyLevel::Eventual, OperationType::Read));
    assert!(!uses_session_token(ConsistencyLevel::Strong, OperationType::Read));
}
