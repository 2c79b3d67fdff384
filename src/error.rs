//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
use crate::diagnostics::OperationDiagnostics;
use num_enum::TryFromPrimitive;
use std::sync::Arc;
use std::time::Duration;

include!(concat!(env!("OUT_DIR"), "/ua.rs"));

pub(crate) fn sdk_version() -> &'static str {
    SDK_VERSION
}

pub(crate) fn user_agent() -> &'static str {
    USER_AGENT
}

/// Error returned by all operations in this library.
///
/// Errors coming back from the service carry the service status code in
/// [`NoSQLError::code`] and, where present, a sub-status refining it. Errors
/// produced by the routing core itself (exhausted regions, end-to-end
/// timeouts, throughput control) use codes at or above 1000.
///
/// Terminal errors from [`Handle::execute()`](crate::Handle::execute()) carry the
/// [`OperationDiagnostics`] collected across all attempts.
#[derive(Debug, Clone)]
pub struct NoSQLError {
    pub code: NoSQLErrorCode,
    pub message: String,
    /// Service sub-status, or 0 if none was given.
    pub sub_status: i32,
    pub(crate) retry_after: Option<Duration>,
    pub(crate) cause: Option<Box<NoSQLError>>,
    pub(crate) diagnostics: Option<Arc<OperationDiagnostics>>,
}

impl std::error::Error for NoSQLError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.cause {
            Some(c) => Some(c.as_ref()),
            None => None,
        }
    }
}

impl std::fmt::Display for NoSQLError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.sub_status != 0 {
            return write!(
                f,
                "code={:?} sub_status={} message=\"{}\"",
                self.code, self.sub_status, self.message
            );
        }
        write!(f, "code={:?} message=\"{}\"", self.code, self.message)
    }
}

/// Broad classification of an error, used by the retry loop to decide
/// between retrying in place, switching regions, or giving up.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum RetryClass {
    /// Network failures, timeouts, 503, stale routing 410, write-forbidden 403.
    Transient,
    /// 429 from the service.
    Throttled,
    /// 404/1002: the replica has not caught up with the session token yet.
    SessionNotAvailable,
    Fatal,
}

impl NoSQLError {
    pub fn new(code: NoSQLErrorCode, msg: &str) -> NoSQLError {
        NoSQLError {
            code,
            message: msg.to_string(),
            sub_status: 0,
            retry_after: None,
            cause: None,
            diagnostics: None,
        }
    }

    /// Create an error from a service status code.
    pub fn from_int(icode: i32, msg: &str) -> NoSQLError {
        if let Ok(code) = NoSQLErrorCode::try_from(icode) {
            return NoSQLError::new(code, msg);
        }
        NoSQLError::new(
            NoSQLErrorCode::UnknownError,
            &format!("Invalid integer error code {}: {}", icode, msg),
        )
    }

    /// Set the service sub-status.
    pub fn with_sub_status(mut self, sub_status: i32) -> Self {
        self.sub_status = sub_status;
        self
    }

    /// Set the server-suggested delay before retrying (used with 429).
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub(crate) fn with_cause(mut self, cause: NoSQLError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub(crate) fn with_diagnostics(mut self, d: Arc<OperationDiagnostics>) -> Self {
        self.diagnostics = Some(d);
        self
    }

    /// The delay suggested by the service before retrying, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    /// The underlying per-region error for routing and deadline failures.
    pub fn cause(&self) -> Option<&NoSQLError> {
        self.cause.as_deref()
    }

    /// Diagnostics for the whole logical operation, if this error was
    /// returned from an executed operation.
    pub fn diagnostics(&self) -> Option<&OperationDiagnostics> {
        self.diagnostics.as_deref()
    }

    /// Number of distinct regions that were sent at least one attempt.
    pub fn attempted_regions(&self) -> usize {
        match &self.diagnostics {
            Some(d) => d.regions_contacted().len(),
            None => 0,
        }
    }

    pub(crate) fn retry_class(&self) -> RetryClass {
        use NoSQLErrorCode::*;
        match self.code {
            NetworkError | RequestTimeout | ServiceUnavailable => RetryClass::Transient,
            Gone if sub_status::is_stale_routing(self.sub_status) => RetryClass::Transient,
            Forbidden if self.sub_status == sub_status::WRITE_FORBIDDEN => RetryClass::Transient,
            NotFound if self.sub_status == sub_status::READ_SESSION_NOT_AVAILABLE => {
                RetryClass::SessionNotAvailable
            }
            TooManyRequests if self.sub_status != sub_status::THROUGHPUT_CONTROL_REJECTED => {
                RetryClass::Throttled
            }
            _ => RetryClass::Fatal,
        }
    }

    // Higher is more useful to a caller trying to understand a failure.
    pub(crate) fn specificity(&self) -> u8 {
        match self.code {
            NoSQLErrorCode::NetworkError => 0,
            NoSQLErrorCode::RequestTimeout | NoSQLErrorCode::Cancelled => 1,
            _ => 2,
        }
    }
}

/// Known service sub-status values.
pub mod sub_status {
    /// 410: the name cache used for routing is stale.
    pub const NAME_CACHE_IS_STALE: i32 = 1000;
    /// 410: the partition key range moved.
    pub const PARTITION_KEY_RANGE_GONE: i32 = 1002;
    /// 410: a partition split is completing.
    pub const COMPLETING_SPLIT: i32 = 1007;
    /// 410: a partition migration is completing.
    pub const COMPLETING_PARTITION_MIGRATION: i32 = 1008;
    /// 404: the replica cannot yet satisfy the session token.
    pub const READ_SESSION_NOT_AVAILABLE: i32 = 1002;
    /// 403: writes are not accepted in this region.
    pub const WRITE_FORBIDDEN: i32 = 3;
    /// 429: rejected locally by throughput control.
    pub const THROUGHPUT_CONTROL_REJECTED: i32 = 10003;

    pub(crate) fn is_stale_routing(s: i32) -> bool {
        matches!(
            s,
            NAME_CACHE_IS_STALE
                | PARTITION_KEY_RANGE_GONE
                | COMPLETING_SPLIT
                | COMPLETING_PARTITION_MIGRATION
        )
    }
}

macro_rules! ia_error {
    ($($t:tt)*) => {{
        let m = format!($($t)*);
        NoSQLError::new(
            crate::error::NoSQLErrorCode::IllegalArgument,
            &format!("{} ({})", m, crate::error::sdk_version()),
        )
    }};
}

pub(crate) use ia_error;

macro_rules! ia_err {
    ($($t:tt)*) => {{
        let m = format!($($t)*);
        Err(NoSQLError::new(
            crate::error::NoSQLErrorCode::IllegalArgument,
            &format!("{} ({})", m, crate::error::sdk_version()),
        ))
    }};
}

pub(crate) use ia_err;

impl From<reqwest::Error> for NoSQLError {
    fn from(e: reqwest::Error) -> Self {
        let mut code = NoSQLErrorCode::NetworkError;
        if e.is_timeout() {
            code = NoSQLErrorCode::RequestTimeout;
        }
        NoSQLError::new(
            code,
            &format!(
                "reqwest error: {} ({})",
                e.to_string(),
                crate::error::sdk_version()
            ),
        )
    }
}

impl From<reqwest::header::InvalidHeaderValue> for NoSQLError {
    fn from(e: reqwest::header::InvalidHeaderValue) -> Self {
        ia_error!("invalid header value: {}", e.to_string())
    }
}

impl From<url::ParseError> for NoSQLError {
    fn from(e: url::ParseError) -> Self {
        ia_error!("error parsing url: {}", e.to_string())
    }
}

impl From<serde_json::Error> for NoSQLError {
    fn from(e: serde_json::Error) -> Self {
        ia_error!("invalid json document: {}", e.to_string())
    }
}

impl From<derive_builder::UninitializedFieldError> for NoSQLError {
    fn from(e: derive_builder::UninitializedFieldError) -> Self {
        ia_error!("missing required field '{}'", e.field_name())
    }
}

// NoSQLErrorCode represents the error code.
//
// Codes below 1000 are service status codes and are reported as-is.
// Codes from 1000 up are generated by the SDK itself.
//
#[derive(Debug, Clone, Copy, Eq, PartialEq, TryFromPrimitive)]
#[repr(i32)]
pub enum NoSQLErrorCode {
    /// The request was malformed.
    BadRequest = 400,

    /// The request was not authenticated.
    Unauthorized = 401,

    /// The caller is not allowed to perform the operation. With sub-status
    /// [`WRITE_FORBIDDEN`](sub_status::WRITE_FORBIDDEN) the region does not
    /// accept writes and another region may be tried.
    Forbidden = 403,

    /// The resource does not exist. With sub-status
    /// [`READ_SESSION_NOT_AVAILABLE`](sub_status::READ_SESSION_NOT_AVAILABLE)
    /// the replica has not caught up with the session token yet.
    NotFound = 404,

    /// The service did not complete the request in time.
    RequestTimeout = 408,

    /// A resource with the same id already exists.
    Conflict = 409,

    /// The target moved; retryable when the sub-status reports stale routing.
    Gone = 410,

    /// A conditional request failed.
    PreconditionFailed = 412,

    /// The request payload is too large.
    RequestEntityTooLarge = 413,

    /// The provisioned throughput was exceeded.
    ///
    /// The service usually returns a suggested delay, see [`NoSQLError::retry_after()`].
    TooManyRequests = 429,

    /// The service hit an internal error.
    InternalServerError = 500,

    /// The service is temporarily unavailable.
    ServiceUnavailable = 503,

    /// The connection to the service failed or was reset.
    NetworkError = 1000,

    /// IllegalArgument error represents the application provided an illegal
    /// argument for the operation or configuration.
    IllegalArgument = 1001,

    /// The handle or a component is in a state that does not allow the call,
    /// for example a closed [`Handle`](crate::Handle).
    IllegalState = 1002,

    /// No eligible region remained, or every attempted region failed.
    /// [`NoSQLError::cause()`] holds the most specific per-region error.
    RoutingExhausted = 1003,

    /// The end-to-end operation timeout elapsed before any attempt succeeded.
    DeadlineExceeded = 1004,

    /// The attempt was cancelled because another attempt completed first.
    Cancelled = 1005,

    /// The throughput control group could not be initialized.
    ThroughputControlInitFailed = 1006,

    /// The request exceeded this client's share of its throughput control group.
    ThroughputLimitExceeded = 1007,

    /// UnknownError represents an unknown error.
    UnknownError = 1099,
}
