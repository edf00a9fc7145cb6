//! Poller data model
//!
//! Scan units, account roles, continuation tokens and the canonical
//! resource snapshot handed to ingestion.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::arn::Arn;
use crate::error::PollError;

/// The trust boundary a poll unit assumes into
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRole {
    pub account_id: String,
    pub role_arn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

impl AccountRole {
    pub fn new(account_id: impl Into<String>, role_arn: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            role_arn: role_arn.into(),
            external_id: None,
        }
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }
}

impl fmt::Display for AccountRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.role_arn)
    }
}

/// Provider service a client is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    #[serde(rename = "logs")]
    CloudWatchLogs,
    S3,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::CloudWatchLogs => "logs",
            Service::S3 => "s3",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed registry of supported resource types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    #[serde(rename = "AWS.CloudWatch.LogGroup")]
    CloudWatchLogGroup,
    #[serde(rename = "AWS.S3.Bucket")]
    S3Bucket,
}

impl ResourceType {
    pub const ALL: [ResourceType; 2] = [ResourceType::CloudWatchLogGroup, ResourceType::S3Bucket];

    /// Schema name used on the wire
    pub fn schema(&self) -> &'static str {
        match self {
            ResourceType::CloudWatchLogGroup => "AWS.CloudWatch.LogGroup",
            ResourceType::S3Bucket => "AWS.S3.Bucket",
        }
    }

    /// Service whose client enumerates this type
    pub fn service(&self) -> Service {
        match self {
            ResourceType::CloudWatchLogGroup => Service::CloudWatchLogs,
            ResourceType::S3Bucket => Service::S3,
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.schema())
    }
}

impl FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceType::ALL
            .into_iter()
            .find(|t| t.schema() == s)
            .ok_or_else(|| format!("unsupported resource type: {}", s))
    }
}

/// Opaque provider cursor. Round-trips verbatim through the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContinuationToken(String);

impl ContinuationToken {
    /// Wrap a provider cursor; an empty cursor means "no more pages"
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        if token.is_empty() {
            None
        } else {
            Some(Self(token))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ContinuationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One bounded slice of enumeration work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanUnit {
    pub resource_type: ResourceType,
    pub account_id: String,
    /// Role assumed into the account (the integration's auth source)
    pub role_arn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub region: String,
    pub integration_id: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "non_empty_token"
    )]
    pub continuation_token: Option<ContinuationToken>,
}

/// `""` from the scheduler means the same as an absent token
fn non_empty_token<'de, D>(deserializer: D) -> Result<Option<ContinuationToken>, D::Error>
where
    D: Deserializer<'de>,
{
    let token: Option<String> = Option::deserialize(deserializer)?;
    Ok(token.and_then(ContinuationToken::new))
}

impl ScanUnit {
    /// Validated account role for this unit
    pub fn account_role(&self) -> Result<AccountRole, PollError> {
        let arn: Arn = self
            .role_arn
            .parse()
            .map_err(|e| PollError::InvalidUnit(format!("role ARN: {}", e)))?;

        if arn.account_id != self.account_id {
            return Err(PollError::InvalidUnit(format!(
                "role {} does not belong to account {}",
                self.role_arn, self.account_id
            )));
        }

        if self.region.is_empty() {
            return Err(PollError::InvalidUnit("region is empty".to_string()));
        }

        Ok(AccountRole {
            account_id: self.account_id.clone(),
            role_arn: self.role_arn.clone(),
            external_id: self.external_id.clone(),
        })
    }

    /// The unit re-submitted with a returned token; identity fields unchanged
    pub fn resume(&self, token: ContinuationToken) -> ScanUnit {
        ScanUnit {
            continuation_token: Some(token),
            ..self.clone()
        }
    }
}

/// Resource-specific attributes of a snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResourceAttributes {
    LogGroup(LogGroupAttributes),
    Bucket(BucketAttributes),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogGroupAttributes {
    pub kms_key_id: Option<String>,
    pub metric_filter_count: Option<i32>,
    pub retention_in_days: Option<i32>,
    pub stored_bytes: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BucketAttributes {}

/// Canonical description of one live resource as observed at poll time
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResourceSnapshot {
    pub(crate) resource_id: String,
    pub(crate) resource_type: ResourceType,
    pub(crate) time_created: Option<DateTime<Utc>>,
    pub(crate) account_id: String,
    pub(crate) region: String,
    pub(crate) arn: Option<String>,
    pub(crate) name: Option<String>,
    pub(crate) tags: BTreeMap<String, String>,
    #[serde(flatten)]
    pub(crate) attributes: ResourceAttributes,
}

impl ResourceSnapshot {
    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    pub fn time_created(&self) -> Option<DateTime<Utc>> {
        self.time_created
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn arn(&self) -> Option<&str> {
        self.arn.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn attributes(&self) -> &ResourceAttributes {
        &self.attributes
    }
}

/// Result of a completed unit
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    pub resources: Vec<ResourceSnapshot>,
    /// Present when more work remains for this unit's identity
    pub next_token: Option<ContinuationToken>,
}

impl PollOutcome {
    pub fn is_complete(&self) -> bool {
        self.next_token.is_none()
    }
}
