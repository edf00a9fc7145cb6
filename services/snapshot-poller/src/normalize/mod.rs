//! Snapshot normalization
//!
//! One module per resource type. Each exposes a pure `build_snapshot` over a
//! fixed raw description plus an async `normalize` that performs the
//! per-resource detail calls (tags, location) first.

pub mod bucket;
pub mod log_group;

use chrono::{DateTime, Utc};

use crate::error::NormalizationError;
use crate::models::ResourceSnapshot;

/// Result of normalizing one listed resource
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Snapshot(ResourceSnapshot),
    /// The resource vanished between listing and detail fetch
    NotFound { resource_id: String },
    /// The resource lives in another region and is polled from there
    OtherRegion { resource_id: String, region: String },
}

impl Normalized {
    pub fn into_snapshot(self) -> Option<ResourceSnapshot> {
        match self {
            Normalized::Snapshot(snapshot) => Some(snapshot),
            _ => None,
        }
    }
}

/// Account and region stamped onto every snapshot of a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotScope<'a> {
    pub account_id: &'a str,
    pub region: &'a str,
}

/// Convert a millisecond epoch timestamp to second precision.
///
/// Sub-second precision is dropped, never rounded: `1583020800123` becomes
/// `1583020800`.
pub fn millis_to_datetime(
    resource_id: &str,
    millis: i64,
) -> Result<DateTime<Utc>, NormalizationError> {
    DateTime::from_timestamp(millis.div_euclid(1000), 0).ok_or_else(|| {
        NormalizationError::InvalidTimestamp {
            resource_id: resource_id.to_string(),
            value: millis,
        }
    })
}
