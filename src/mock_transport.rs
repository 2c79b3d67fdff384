//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
// A scripted Transport for unit tests. Each region replays a queue of
// replies, each after a delay; when the queue is empty the region's
// fallback reply (if any) is used.
use crate::error::{NoSQLError, NoSQLErrorCode};
use crate::region::Region;
use crate::session::SessionToken;
use crate::transport::{OperationRequest, OperationResponse, Transport};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Clone, Debug)]
pub(crate) struct Step {
    pub(crate) delay: Duration,
    pub(crate) reply: Result<OperationResponse, NoSQLError>,
}

#[derive(Clone, Debug)]
pub(crate) struct Call {
    pub(crate) region: Region,
    // offset from the creation of the transport
    pub(crate) at: Duration,
    pub(crate) request: OperationRequest,
}

#[derive(Debug)]
pub(crate) struct MockTransport {
    origin: Instant,
    script: Mutex<HashMap<Region, VecDeque<Step>>>,
    fallback: Mutex<HashMap<Region, Step>>,
    calls: Mutex<Vec<Call>>,
}

pub(crate) fn ok_reply(region: &str, token: Option<SessionToken>) -> Result<OperationResponse, NoSQLError> {
    let mut r = OperationResponse::new(&Region::new(region), 200, "{}").with_request_charge(1.0);
    if let Some(t) = token {
        r = r.with_session_token(t);
    }
    Ok(r)
}

pub(crate) fn err_reply(code: NoSQLErrorCode, sub_status: i32) -> Result<OperationResponse, NoSQLError> {
    Err(NoSQLError::new(code, "scripted failure").with_sub_status(sub_status))
}

impl MockTransport {
    pub(crate) fn new() -> MockTransport {
        MockTransport {
            origin: Instant::now(),
            script: Mutex::new(HashMap::new()),
            fallback: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue one reply for a region.
    pub(crate) fn push(&self, region: &str, delay_ms: u64, reply: Result<OperationResponse, NoSQLError>) {
        let mut guard = self.script.lock().unwrap();
        guard.entry(Region::new(region)).or_default().push_back(Step {
            delay: Duration::from_millis(delay_ms),
            reply,
        });
    }

    /// Reply used once the region's queue is empty.
    pub(crate) fn always(&self, region: &str, delay_ms: u64, reply: Result<OperationResponse, NoSQLError>) {
        let mut guard = self.fallback.lock().unwrap();
        guard.insert(
            Region::new(region),
            Step {
                delay: Duration::from_millis(delay_ms),
                reply,
            },
        );
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn calls_to(&self, region: &str) -> usize {
        let r = Region::new(region);
        self.calls.lock().unwrap().iter().filter(|c| c.region == r).count()
    }

    fn next_step(&self, region: &Region) -> Option<Step> {
        if let Some(s) = self
            .script
            .lock()
            .unwrap()
            .get_mut(region)
            .and_then(|q| q.pop_front())
        {
            return Some(s);
        }
        self.fallback.lock().unwrap().get(region).cloned()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        region: &Region,
        request: &OperationRequest,
        _timeout: Duration,
    ) -> Result<OperationResponse, NoSQLError> {
        self.calls.lock().unwrap().push(Call {
            region: region.clone(),
            at: self.origin.elapsed(),
            request: request.clone(),
        });
        let step = match self.next_step(region) {
            Some(s) => s,
            None => {
                return Err(NoSQLError::new(
                    NoSQLErrorCode::ServiceUnavailable,
                    &format!("no scripted reply for region {}", region),
                ))
            }
        };
        tokio::time::sleep(step.delay).await;
        step.reply
    }
}
