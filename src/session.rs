//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
//! Session tokens and the per-partition token store.
//!
use crate::error::{ia_err, NoSQLError};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fmt::Debug;
use std::result::Result;
use std::str::FromStr;
use tracing::trace;

/// A per-partition progress marker used to satisfy session consistency.
///
/// A token is a vector clock: a topology `version`, a global log sequence
/// number, and one log sequence number per region that accepts writes. Its
/// string form is `version#global_lsn#region=lsn#region=lsn...`, for example
/// `1#100#1=20#2=5`.
///
/// Tokens only ever move forward: see [`SessionToken::merge()`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SessionToken {
    version: u64,
    global_lsn: u64,
    region_progress: BTreeMap<u32, u64>,
}

impl SessionToken {
    pub fn new(version: u64, global_lsn: u64) -> SessionToken {
        SessionToken {
            version,
            global_lsn,
            region_progress: BTreeMap::new(),
        }
    }

    /// Add or replace the progress of one region.
    pub fn region_lsn(mut self, region_id: u32, lsn: u64) -> Self {
        self.region_progress.insert(region_id, lsn);
        self
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn global_lsn(&self) -> u64 {
        self.global_lsn
    }

    /// Get the progress recorded for a region, if any.
    pub fn get_region_lsn(&self, region_id: u32) -> Option<u64> {
        self.region_progress.get(&region_id).copied()
    }

    /// Combine two tokens into one that is at least as recent as both.
    ///
    /// The token with the higher version decides which regions are tracked.
    /// Regions present in both take the larger LSN; the global LSN takes the
    /// larger value. Merging is commutative and idempotent.
    pub fn merge(&self, other: &SessionToken) -> SessionToken {
        let (high, low) = if self.version >= other.version {
            (self, other)
        } else {
            (other, self)
        };
        let mut region_progress = high.region_progress.clone();
        if self.version == other.version {
            for (r, lsn) in &low.region_progress {
                let e = region_progress.entry(*r).or_insert(*lsn);
                *e = (*e).max(*lsn);
            }
        } else {
            for (r, lsn) in region_progress.iter_mut() {
                if let Some(l) = low.region_progress.get(r) {
                    *lsn = (*lsn).max(*l);
                }
            }
        }
        SessionToken {
            version: high.version,
            global_lsn: self.global_lsn.max(other.global_lsn),
            region_progress,
        }
    }

    /// Returns true if this token has seen everything `other` has seen.
    pub fn is_as_recent_as(&self, other: &SessionToken) -> bool {
        self.merge(other) == *self
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.version, self.global_lsn)?;
        for (r, lsn) in &self.region_progress {
            write!(f, "#{}={}", r, lsn)?;
        }
        Ok(())
    }
}

impl FromStr for SessionToken {
    type Err = NoSQLError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split('#');
        let version = match parts.next().map(str::parse::<u64>) {
            Some(Ok(v)) => v,
            _ => return ia_err!("invalid session token '{}': bad version", s),
        };
        let global_lsn = match parts.next().map(str::parse::<u64>) {
            Some(Ok(v)) => v,
            _ => return ia_err!("invalid session token '{}': bad global lsn", s),
        };
        let mut token = SessionToken::new(version, global_lsn);
        for p in parts {
            let Some((r, lsn)) = p.split_once('=') else {
                return ia_err!("invalid session token '{}': bad region entry '{}'", s, p);
            };
            match (r.parse::<u32>(), lsn.parse::<u64>()) {
                (Ok(r), Ok(lsn)) => {
                    token.region_progress.insert(r, lsn);
                }
                _ => {
                    return ia_err!("invalid session token '{}': bad region entry '{}'", s, p);
                }
            }
        }
        Ok(token)
    }
}

/// Storage for the latest known session token of each partition.
///
/// Implementations must make [`merge()`](SessionTokenStore::merge()) atomic:
/// concurrent merges for the same partition must never lose each other's
/// contribution, and a stored token must never move backwards.
pub trait SessionTokenStore: Send + Sync + Debug {
    /// Get the current token for a partition scope.
    fn get(&self, scope: &str) -> Option<SessionToken>;
    /// Merge `token` into the stored token and return the result.
    fn merge(&self, scope: &str, token: &SessionToken) -> SessionToken;
}

/// In-memory [`SessionTokenStore`], the default for a [`Handle`](crate::Handle).
#[derive(Debug, Default)]
pub struct SessionContainer {
    // never held across awaits, so a std Mutex is fine
    tokens: std::sync::Mutex<HashMap<String, SessionToken>>,
}

impl SessionContainer {
    pub fn new() -> SessionContainer {
        SessionContainer::default()
    }
}

impl SessionTokenStore for SessionContainer {
    fn get(&self, scope: &str) -> Option<SessionToken> {
        let guard = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        guard.get(scope).cloned()
    }

    fn merge(&self, scope: &str, token: &SessionToken) -> SessionToken {
        let mut guard = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        let merged = match guard.get(scope) {
            Some(current) => current.merge(token),
            None => token.clone(),
        };
        trace!("session token for {} is now {}", scope, merged);
        guard.insert(scope.to_string(), merged.clone());
        merged
    }
}

/// Build the store key for a resource link and partition key.
///
/// Tokens are tracked per container and partition key, so the link is cut
/// back to its container (`dbs/{db}/colls/{coll}`).
pub(crate) fn session_scope(resource_link: &str, partition_key: Option<&str>) -> String {
    format!(
        "{}/{}",
        container_link(resource_link),
        partition_key.unwrap_or("")
    )
}

/// The `dbs/{db}/colls/{coll}` prefix of a resource link, or the whole link
/// if it does not address something inside a container.
pub(crate) fn container_link(resource_link: &str) -> &str {
    let trimmed = resource_link.trim_matches('/');
    let mut end = 0;
    let mut segments = 0;
    for (i, c) in trimmed.char_indices() {
        if c == '/' {
            segments += 1;
            if segments == 4 {
                end = i;
                break;
            }
        }
    }
    if segments < 4 {
        return trimmed;
    }
    &trimmed[..end]
}
