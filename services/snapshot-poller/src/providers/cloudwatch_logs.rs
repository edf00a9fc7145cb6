//! CloudWatch Logs log groups

use std::collections::BTreeMap;

use async_trait::async_trait;
use aws_sdk_cloudwatchlogs::types::LogGroup;
use tracing::warn;

use super::{classify_sdk_error, error_code};
use crate::error::ProviderError;
use crate::pagination::{ListPages, Page};

/// Log group as returned by DescribeLogGroups
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogGroupDescription {
    pub arn: Option<String>,
    pub log_group_name: Option<String>,
    /// Milliseconds since the epoch
    pub creation_time: Option<i64>,
    pub kms_key_id: Option<String>,
    pub metric_filter_count: Option<i32>,
    pub retention_in_days: Option<i32>,
    pub stored_bytes: Option<i64>,
}

#[allow(deprecated)]
impl From<&LogGroup> for LogGroupDescription {
    fn from(group: &LogGroup) -> Self {
        Self {
            arn: group.arn().map(str::to_string),
            log_group_name: group.log_group_name().map(str::to_string),
            creation_time: group.creation_time(),
            kms_key_id: group.kms_key_id().map(str::to_string),
            metric_filter_count: group.metric_filter_count(),
            retention_in_days: group.retention_in_days(),
            stored_bytes: group.stored_bytes(),
        }
    }
}

#[async_trait]
pub trait LogGroupsApi: Send + Sync {
    /// One page of all log groups in the client's region
    async fn describe_log_groups(
        &self,
        next_token: Option<String>,
    ) -> Result<Page<LogGroupDescription>, ProviderError>;

    /// The log group named exactly `name`, if it exists
    async fn find_log_group(&self, name: &str)
        -> Result<Option<LogGroupDescription>, ProviderError>;

    /// Tags of a log group; `None` if the group no longer exists
    async fn list_tags(
        &self,
        log_group_name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, ProviderError>;
}

/// Adapts a [`LogGroupsApi`] to the generic page source
pub struct LogGroupPages<'a>(pub &'a dyn LogGroupsApi);

#[async_trait]
impl ListPages for LogGroupPages<'_> {
    type Item = LogGroupDescription;

    async fn list_page(&self, token: Option<String>) -> Result<Page<Self::Item>, ProviderError> {
        self.0.describe_log_groups(token).await
    }
}

/// SDK-backed log group API
#[derive(Clone)]
pub struct SdkLogGroups {
    client: aws_sdk_cloudwatchlogs::Client,
}

impl SdkLogGroups {
    pub fn new(client: aws_sdk_cloudwatchlogs::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LogGroupsApi for SdkLogGroups {
    async fn describe_log_groups(
        &self,
        next_token: Option<String>,
    ) -> Result<Page<LogGroupDescription>, ProviderError> {
        let output = self
            .client
            .describe_log_groups()
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| classify_sdk_error("CloudWatchLogs.DescribeLogGroups", e))?;

        Ok(Page::new(
            output.log_groups().iter().map(LogGroupDescription::from).collect(),
            output.next_token().map(str::to_string),
        ))
    }

    async fn find_log_group(
        &self,
        name: &str,
    ) -> Result<Option<LogGroupDescription>, ProviderError> {
        let mut next_token = None;

        // A prefix query may return siblings first; walk until the exact name
        loop {
            let output = self
                .client
                .describe_log_groups()
                .log_group_name_prefix(name)
                .set_next_token(next_token)
                .send()
                .await
                .map_err(|e| classify_sdk_error("CloudWatchLogs.DescribeLogGroups", e))?;

            if let Some(group) = output
                .log_groups()
                .iter()
                .find(|g| g.log_group_name() == Some(name))
            {
                return Ok(Some(LogGroupDescription::from(group)));
            }

            match output.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        warn!(
            resource = %name,
            resource_type = "AWS.CloudWatch.LogGroup",
            "Tried to scan non-existent resource"
        );
        Ok(None)
    }

    #[allow(deprecated)]
    async fn list_tags(
        &self,
        log_group_name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, ProviderError> {
        match self
            .client
            .list_tags_log_group()
            .log_group_name(log_group_name)
            .send()
            .await
        {
            Ok(output) => Ok(Some(
                output
                    .tags()
                    .map(|tags| tags.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                    .unwrap_or_default(),
            )),
            Err(e) if error_code(&e) == Some("ResourceNotFoundException") => Ok(None),
            Err(e) => Err(classify_sdk_error("CloudWatchLogs.ListTagsLogGroup", e)),
        }
    }
}
