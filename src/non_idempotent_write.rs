//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
use crate::error::{ia_err, NoSQLError};
use base64::prelude::{Engine as _, BASE64_URL_SAFE_NO_PAD};
use bytes::Bytes;
use rand::RngCore;
use serde_json::Value;
use std::result::Result;

/// Name of the document property carrying the tracking id.
pub const TRACKING_ID_PROPERTY: &str = "_trackingId";

/// Options allowing writes to be retried after ambiguous failures.
///
/// By default a write that fails with a timeout or a dropped connection is
/// not retried, since it may already have been applied. When enabled, a
/// stable tracking id is attached to the write so the service can recognize
/// a retried write as a duplicate; the write may then be retried in other
/// regions and raced like a read.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NonIdempotentWriteRetryOptions {
    pub(crate) enabled: bool,
    pub(crate) use_tracking_id_property: bool,
}

impl NonIdempotentWriteRetryOptions {
    pub fn new() -> NonIdempotentWriteRetryOptions {
        NonIdempotentWriteRetryOptions::default()
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Also store the tracking id in the document itself, as the
    /// `_trackingId` property. The document body must then be a JSON object.
    pub fn use_tracking_id_property(mut self, use_property: bool) -> Self {
        self.use_tracking_id_property = use_property;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_tracking_id_property_used(&self) -> bool {
        self.use_tracking_id_property
    }
}

// 128 random bits, url-safe base64.
pub(crate) fn new_tracking_id() -> String {
    let mut buf = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut buf);
    BASE64_URL_SAFE_NO_PAD.encode(buf)
}

/// Add the tracking id property to a JSON object document.
pub(crate) fn inject_tracking_id(body: &Bytes, tracking_id: &str) -> Result<Bytes, NoSQLError> {
    let mut doc: Value = serde_json::from_slice(body)?;
    match doc.as_object_mut() {
        Some(obj) => {
            obj.insert(
                TRACKING_ID_PROPERTY.to_string(),
                Value::String(tracking_id.to_string()),
            );
        }
        None => {
            return ia_err!("tracking id property requires a JSON object document");
        }
    }
    Ok(Bytes::from(serde_json::to_vec(&doc)?))
}
