//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
use serde_derive::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// A geographic deployment location of the database service.
///
/// Region names are normalized: they are lowercased and all whitespace is
/// removed, so `"West US"`, `"westus"` and `"WestUS"` all name the same region.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Region(String);

impl Region {
    pub fn new(name: &str) -> Region {
        let normalized: String = name
            .chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(|c| c.to_lowercase())
            .collect();
        Region(normalized)
    }

    /// The normalized region name.
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Region {
    fn from(s: &str) -> Self {
        Region::new(s)
    }
}

impl From<String> for Region {
    fn from(s: String) -> Self {
        Region::new(&s)
    }
}

/// A set of regions that must not be contacted for an operation.
///
/// Excluded regions are removed from the preferred region list before any
/// attempt is made. Excluding every preferred region makes the operation fail
/// immediately with [`RoutingExhausted`](crate::NoSQLErrorCode::RoutingExhausted).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExcludedRegions {
    regions: HashSet<Region>,
}

impl ExcludedRegions {
    pub fn new<I, R>(regions: I) -> ExcludedRegions
    where
        I: IntoIterator<Item = R>,
        R: Into<Region>,
    {
        ExcludedRegions {
            regions: regions.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, region: &Region) -> bool {
        self.regions.contains(region)
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }
}

// Parse a comma separated list of region names, dropping empty entries.
pub(crate) fn parse_region_list(s: &str) -> Vec<Region> {
    s.split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(Region::new)
        .collect()
}

// Remove repeated regions, keeping the first occurrence.
pub(crate) fn dedup_regions(regions: &[Region]) -> Vec<Region> {
    let mut seen = HashSet::new();
    regions
        .iter()
        .filter(|r| seen.insert((*r).clone()))
        .cloned()
        .collect()
}
