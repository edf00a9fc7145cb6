//! Error taxonomy for a single poll pass
//!
//! Every error here is fatal to the unit it occurs in. Nothing is retried
//! in-process: the scheduler decides whether to resubmit the unit.

use std::fmt;

use thiserror::Error;

use crate::driver::PollState;
use crate::models::{ContinuationToken, ResourceType, ScanUnit};

/// Role assumption failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// The identity service refused the role (trust policy, external ID mismatch)
    #[error("failed to assume role {role_arn}: {message}")]
    AssumeRole { role_arn: String, message: String },

    /// The identity service throttled the request
    #[error("assume role throttled for {role_arn}: {message}")]
    Throttled { role_arn: String, message: String },

    /// The identity service answered without usable credentials
    #[error("assume role for {role_arn} returned no credentials")]
    MissingCredentials { role_arn: String },
}

/// Failures of read-only provider calls (list, describe, get-tags, location)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("{operation} throttled: {message}")]
    Throttled {
        operation: &'static str,
        message: String,
    },

    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    #[error("{operation} failed: {message}")]
    Service {
        operation: &'static str,
        message: String,
    },

    /// A cached client was registered for a different service
    #[error("client for {expected} unavailable")]
    ClientMismatch { expected: &'static str },
}

/// Malformed or unexpectedly shaped provider data
#[derive(Debug, Error)]
pub enum NormalizationError {
    #[error("resource {resource_id}: missing required field {field}")]
    MissingField {
        resource_id: String,
        field: &'static str,
    },

    #[error("resource {resource_id}: timestamp {value} out of range")]
    InvalidTimestamp { resource_id: String, value: i64 },

    /// Tags are a required attribute; a failed tag fetch fails the item
    #[error("resource {resource_id}: tag fetch failed: {source}")]
    TagFetch {
        resource_id: String,
        #[source]
        source: ProviderError,
    },

    #[error("resource {resource_id}: region lookup failed: {source}")]
    RegionLookup {
        resource_id: String,
        #[source]
        source: ProviderError,
    },
}

impl NormalizationError {
    /// Identifier of the offending resource
    pub fn resource_id(&self) -> &str {
        match self {
            NormalizationError::MissingField { resource_id, .. }
            | NormalizationError::InvalidTimestamp { resource_id, .. }
            | NormalizationError::TagFetch { resource_id, .. }
            | NormalizationError::RegionLookup { resource_id, .. } => resource_id,
        }
    }
}

/// Delivery to the ingestion collaborator failed
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("ingestion request failed: {0}")]
    Transport(String),

    #[error("ingestion endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("failed to encode batch: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to write batch: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for IngestError {
    fn from(err: reqwest::Error) -> Self {
        IngestError::Transport(err.to_string())
    }
}

/// Rejected configuration values
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("session duration {0}s is outside the 900s..=43200s AssumeRole allows")]
    SessionDuration(u64),

    #[error("credential refresh margin ({margin}s) must be shorter than the session duration ({duration}s)")]
    MarginTooLarge { margin: u64, duration: u64 },
}

/// Umbrella error for one poll pass
#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Normalization(#[from] NormalizationError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("invalid scan unit: {0}")]
    InvalidUnit(String),
}

/// A failed unit, with enough context for the scheduler to decide on a resubmit
#[derive(Debug)]
pub struct PollFailure {
    pub account_id: String,
    pub region: String,
    pub resource_type: ResourceType,
    pub integration_id: String,
    /// Last page boundary known to be fully processed
    pub resume_token: Option<ContinuationToken>,
    /// State the driver had reached when the error occurred
    pub state: PollState,
    pub error: PollError,
}

impl PollFailure {
    pub(crate) fn new(unit: &ScanUnit, state: PollState, error: PollError) -> Self {
        Self {
            account_id: unit.account_id.clone(),
            region: unit.region.clone(),
            resource_type: unit.resource_type,
            integration_id: unit.integration_id.clone(),
            resume_token: unit.continuation_token.clone(),
            state,
            error,
        }
    }
}

impl fmt::Display for PollFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} poll for account {} in {} failed during {}: {}",
            self.resource_type, self.account_id, self.region, self.state, self.error
        )
    }
}

impl std::error::Error for PollFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization_error_carries_resource_id() {
        let err = NormalizationError::TagFetch {
            resource_id: "arn:aws:logs:us-east-1:123456789012:log-group:app".to_string(),
            source: ProviderError::Timeout {
                operation: "ListTagsLogGroup",
            },
        };

        assert_eq!(
            err.resource_id(),
            "arn:aws:logs:us-east-1:123456789012:log-group:app"
        );
        assert!(err.to_string().contains("ListTagsLogGroup timed out"));
    }

    #[test]
    fn test_poll_error_from_auth() {
        let err: PollError = AuthError::MissingCredentials {
            role_arn: "arn:aws:iam::123456789012:role/Audit".to_string(),
        }
        .into();

        assert!(matches!(err, PollError::Auth(_)));
    }
}
