//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
use crate::error::{ia_err, user_agent, NoSQLError, NoSQLErrorCode};
use crate::region::Region;
use crate::retry_strategy::OperationType;
use crate::session::SessionToken;
use crate::transport::{OperationRequest, OperationResponse, Transport};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use std::collections::HashMap;
use std::result::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::trace;
use url::Url;

pub(crate) const REQUEST_ID_HEADER: &str = "x-nosql-request-id";
pub(crate) const SESSION_TOKEN_HEADER: &str = "x-nosql-session-token";
pub(crate) const CONSISTENCY_HEADER: &str = "x-nosql-consistency-level";
pub(crate) const PARTITION_KEY_HEADER: &str = "x-nosql-partition-key";
pub(crate) const TRACKING_ID_HEADER: &str = "x-nosql-tracking-id";
pub(crate) const SUB_STATUS_HEADER: &str = "x-nosql-substatus";
pub(crate) const RETRY_AFTER_HEADER: &str = "x-nosql-retry-after-ms";
pub(crate) const REQUEST_CHARGE_HEADER: &str = "x-nosql-request-charge";

/// The default [`Transport`]: one HTTP request per attempt, using `reqwest`.
///
/// Each region maps to a base endpoint URL; the resource link of the
/// operation is appended to it.
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoints: HashMap<Region, Url>,
    request_id: AtomicUsize,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client) -> HttpTransport {
        HttpTransport {
            client,
            endpoints: HashMap::new(),
            request_id: AtomicUsize::new(1),
        }
    }

    /// Set the endpoint of a region, for example `https://westus.example.com`.
    pub fn endpoint(mut self, region: &Region, endpoint: &str) -> Result<Self, NoSQLError> {
        let mut ep = endpoint.trim().to_string();
        if !ep.starts_with("http://") && !ep.starts_with("https://") {
            ep = format!("https://{}", ep);
        }
        if !ep.ends_with('/') {
            ep.push('/');
        }
        let url = Url::parse(&ep)?;
        self.endpoints.insert(region.clone(), url);
        Ok(self)
    }

    pub fn has_endpoint(&self, region: &Region) -> bool {
        self.endpoints.contains_key(region)
    }

    fn method(op: OperationType) -> Method {
        match op {
            OperationType::Read | OperationType::ReadFeed => Method::GET,
            OperationType::Replace => Method::PUT,
            OperationType::Patch => Method::PATCH,
            OperationType::Delete => Method::DELETE,
            _ => Method::POST,
        }
    }

    fn get_header<'a>(headers: &'a HeaderMap, field: &str) -> Option<&'a str> {
        headers.get(field).and_then(|v| v.to_str().ok())
    }

    fn build_headers(&self, request: &OperationRequest) -> Result<(usize, HeaderMap), NoSQLError> {
        let request_id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from(request_id));
        headers.insert("User-Agent", HeaderValue::from_str(user_agent())?);
        if let Some(c) = request.consistency() {
            headers.insert(CONSISTENCY_HEADER, HeaderValue::from_str(c.as_str())?);
        }
        if let Some(t) = request.session_token() {
            headers.insert(SESSION_TOKEN_HEADER, HeaderValue::from_str(&t.to_string())?);
        }
        if let Some(pk) = request.get_partition_key() {
            headers.insert(PARTITION_KEY_HEADER, HeaderValue::from_str(pk)?);
        }
        if let Some(id) = request.tracking_id() {
            headers.insert(TRACKING_ID_HEADER, HeaderValue::from_str(id)?);
        }
        if request.get_body().is_some() {
            headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        }
        Ok((request_id, headers))
    }
}

/// Turn a non-2xx response into an error carrying the status, sub-status
/// and retry-after hint.
pub(crate) fn error_from_response(
    status: u16,
    headers: &HeaderMap,
    content: &str,
) -> NoSQLError {
    let mut err = NoSQLError::from_int(
        status as i32,
        &format!("got http status {}, response text: {}", status, content),
    );
    if let Some(s) = HttpTransport::get_header(headers, SUB_STATUS_HEADER) {
        if let Ok(v) = s.trim().parse::<i32>() {
            err = err.with_sub_status(v);
        }
    }
    if let Some(s) = HttpTransport::get_header(headers, RETRY_AFTER_HEADER) {
        if let Ok(ms) = s.trim().parse::<u64>() {
            err = err.with_retry_after(Duration::from_millis(ms));
        }
    }
    err
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        region: &Region,
        request: &OperationRequest,
        timeout: Duration,
    ) -> Result<OperationResponse, NoSQLError> {
        let base = match self.endpoints.get(region) {
            Some(u) => u,
            None => {
                return Err(NoSQLError::new(
                    NoSQLErrorCode::IllegalState,
                    &format!("no endpoint configured for region {}", region),
                ))
            }
        };
        let url = base.join(request.resource_link())?;
        let (request_id, headers) = self.build_headers(request)?;
        trace!(
            "sending {:?} {} to region {} request_id={}",
            request.operation_type(),
            url,
            region,
            request_id
        );

        let mut rb = self
            .client
            .request(Self::method(request.operation_type()), url)
            .timeout(timeout)
            .headers(headers);
        if let Some(body) = request.get_body() {
            rb = rb.body(body.clone());
        }
        let resp = rb.send().await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let headers = resp.headers().clone();
            let content = resp.text().await?;
            return Err(error_from_response(status, &headers, &content));
        }

        if let Some(rid) = Self::get_header(resp.headers(), REQUEST_ID_HEADER) {
            if rid.parse::<usize>().ok() != Some(request_id) {
                return ia_err!("expected request_id {}, found {}", request_id, rid);
            }
        }
        let session_token = match Self::get_header(resp.headers(), SESSION_TOKEN_HEADER) {
            Some(s) => Some(s.parse::<SessionToken>()?),
            None => None,
        };
        let charge = Self::get_header(resp.headers(), REQUEST_CHARGE_HEADER)
            .and_then(|s| s.trim().parse::<f64>().ok())
            .unwrap_or(0.0);
        let body = resp.bytes().await?;

        let mut out = OperationResponse::new(region, status, body).with_request_charge(charge);
        if let Some(t) = session_token {
            out = out.with_session_token(t);
        }
        Ok(out)
    }
}
