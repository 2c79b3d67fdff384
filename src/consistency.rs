//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
use crate::error::{ia_err, NoSQLError};
use crate::retry_strategy::OperationType;
use std::fmt;
use std::result::Result;
use std::str::FromStr;

/// ConsistencyLevel is used to provide consistency guarantees for operations.
///
/// Levels are ordered from strongest to weakest:
///
/// 1. Strong: reads always see the latest committed write.
/// 2. BoundedStaleness: reads lag writes by at most a configured interval.
/// 3. Session: a client reads its own writes. This is the usual account default.
/// 4. ConsistentPrefix: reads never see writes out of order.
/// 5. Eventual: no ordering guarantee.
///
/// A client or request may relax the account's default level, but may not
/// ask for a stronger one.
#[derive(Clone, Copy, Default, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[repr(u8)]
pub enum ConsistencyLevel {
    Strong = 0,
    BoundedStaleness = 1,
    #[default]
    Session = 2,
    ConsistentPrefix = 3,
    Eventual = 4,
}

impl ConsistencyLevel {
    /// Returns true if `self` gives stronger guarantees than `other`.
    pub fn is_stronger_than(&self, other: ConsistencyLevel) -> bool {
        (*self as u8) < (other as u8)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConsistencyLevel::Strong => "Strong",
            ConsistencyLevel::BoundedStaleness => "BoundedStaleness",
            ConsistencyLevel::Session => "Session",
            ConsistencyLevel::ConsistentPrefix => "ConsistentPrefix",
            ConsistencyLevel::Eventual => "Eventual",
        }
    }
}

impl fmt::Display for ConsistencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsistencyLevel {
    type Err = NoSQLError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let v: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-' && !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();
        match v.as_str() {
            "strong" => Ok(ConsistencyLevel::Strong),
            "boundedstaleness" => Ok(ConsistencyLevel::BoundedStaleness),
            "session" => Ok(ConsistencyLevel::Session),
            "consistentprefix" => Ok(ConsistencyLevel::ConsistentPrefix),
            "eventual" => Ok(ConsistencyLevel::Eventual),
            _ => ia_err!("invalid consistency level '{}'", s),
        }
    }
}

/// Determine the consistency level for one operation.
///
/// The request override wins over the client override, which wins over the
/// account default. Overrides stronger than the account default are rejected.
pub(crate) fn resolve_consistency(
    account: ConsistencyLevel,
    client: Option<ConsistencyLevel>,
    request: Option<ConsistencyLevel>,
) -> Result<ConsistencyLevel, NoSQLError> {
    let effective = request.or(client).unwrap_or(account);
    if effective.is_stronger_than(account) {
        return ia_err!(
            "consistency level {} is stronger than the account default {}",
            effective,
            account
        );
    }
    Ok(effective)
}

// Session tokens are only sent for reads at Session consistency.
pub(crate) fn uses_session_token(level: ConsistencyLevel, op: OperationType) -> bool {
    level == ConsistencyLevel::Session && op.is_read_only()
}
