use std::collections::BTreeMap;

use tracing::debug;

use super::{millis_to_datetime, Normalized, SnapshotScope};
use crate::arn::Arn;
use crate::error::NormalizationError;
use crate::models::{LogGroupAttributes, ResourceAttributes, ResourceSnapshot, ResourceType};
use crate::providers::{LogGroupDescription, LogGroupsApi};

/// Log group name from an ARN resource of the form `log-group:<name>[:*]`
pub fn log_group_name(arn: &Arn) -> Option<&str> {
    let resource = arn.resource.strip_prefix("log-group:")?;
    resource.split(':').next().filter(|name| !name.is_empty())
}

/// Build a snapshot from a described log group and its tags
pub fn build_snapshot(
    group: &LogGroupDescription,
    scope: SnapshotScope<'_>,
    tags: BTreeMap<String, String>,
) -> Result<ResourceSnapshot, NormalizationError> {
    let resource_id = resource_id(group)?;
    let time_created = group
        .creation_time
        .map(|millis| millis_to_datetime(&resource_id, millis))
        .transpose()?;

    Ok(ResourceSnapshot {
        resource_id: resource_id.clone(),
        resource_type: ResourceType::CloudWatchLogGroup,
        time_created,
        account_id: scope.account_id.to_string(),
        region: scope.region.to_string(),
        arn: Some(resource_id),
        name: group.log_group_name.clone(),
        tags,
        attributes: ResourceAttributes::LogGroup(LogGroupAttributes {
            kms_key_id: group.kms_key_id.clone(),
            metric_filter_count: group.metric_filter_count,
            retention_in_days: group.retention_in_days,
            stored_bytes: group.stored_bytes,
        }),
    })
}

/// Fetch tags for a listed log group and build its snapshot
pub async fn normalize(
    api: &dyn LogGroupsApi,
    group: &LogGroupDescription,
    scope: SnapshotScope<'_>,
) -> Result<Normalized, NormalizationError> {
    let resource_id = resource_id(group)?;
    let name = group
        .log_group_name
        .as_deref()
        .ok_or_else(|| NormalizationError::MissingField {
            resource_id: resource_id.clone(),
            field: "LogGroupName",
        })?;

    let tags = match api.list_tags(name).await {
        Ok(Some(tags)) => tags,
        Ok(None) => {
            debug!(resource_id = %resource_id, "Log group vanished before tag fetch");
            return Ok(Normalized::NotFound { resource_id });
        }
        Err(source) => return Err(NormalizationError::TagFetch { resource_id, source }),
    };

    build_snapshot(group, scope, tags).map(Normalized::Snapshot)
}

fn resource_id(group: &LogGroupDescription) -> Result<String, NormalizationError> {
    group
        .arn
        .clone()
        .ok_or_else(|| NormalizationError::MissingField {
            resource_id: group
                .log_group_name
                .clone()
                .unwrap_or_else(|| "<unnamed log group>".to_string()),
            field: "Arn",
        })
}
