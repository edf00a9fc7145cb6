use std::collections::BTreeMap;

use tracing::debug;

use super::{Normalized, SnapshotScope};
use crate::clients::RegionCache;
use crate::error::NormalizationError;
use crate::models::{BucketAttributes, ResourceAttributes, ResourceSnapshot, ResourceType};
use crate::providers::{BucketDescription, BucketsApi};

pub fn bucket_arn(name: &str) -> String {
    format!("arn:aws:s3:::{}", name)
}

/// Build a snapshot from a listed bucket and its tags
pub fn build_snapshot(
    bucket: &BucketDescription,
    scope: SnapshotScope<'_>,
    tags: BTreeMap<String, String>,
) -> Result<ResourceSnapshot, NormalizationError> {
    let name = bucket_name(bucket)?;
    let arn = bucket_arn(name);

    Ok(ResourceSnapshot {
        resource_id: arn.clone(),
        resource_type: ResourceType::S3Bucket,
        time_created: bucket.creation_date,
        account_id: scope.account_id.to_string(),
        region: scope.region.to_string(),
        arn: Some(arn),
        name: Some(name.to_string()),
        tags,
        attributes: ResourceAttributes::Bucket(BucketAttributes {}),
    })
}

/// Home region of a bucket, cached across units. `None` if the bucket is gone.
pub async fn home_region(
    api: &dyn BucketsApi,
    regions: &RegionCache,
    name: &str,
) -> Result<Option<String>, NormalizationError> {
    regions
        .resolve(name, move || api.bucket_location(name))
        .await
        .map_err(|source| NormalizationError::RegionLookup {
            resource_id: bucket_arn(name),
            source,
        })
}

/// Resolve a listed bucket's region and, when it belongs to `scope`, fetch
/// its tags and build the snapshot
pub async fn normalize(
    api: &dyn BucketsApi,
    regions: &RegionCache,
    bucket: &BucketDescription,
    scope: SnapshotScope<'_>,
) -> Result<Normalized, NormalizationError> {
    let name = bucket_name(bucket)?;
    let resource_id = bucket_arn(name);

    match home_region(api, regions, name).await? {
        None => {
            debug!(resource_id = %resource_id, "Bucket vanished before location lookup");
            Ok(Normalized::NotFound { resource_id })
        }
        Some(region) if region != scope.region => {
            Ok(Normalized::OtherRegion { resource_id, region })
        }
        Some(_) => normalize_in_region(api, bucket, scope).await,
    }
}

/// Fetch tags for a bucket already known to live in `scope.region`
pub async fn normalize_in_region(
    api: &dyn BucketsApi,
    bucket: &BucketDescription,
    scope: SnapshotScope<'_>,
) -> Result<Normalized, NormalizationError> {
    let name = bucket_name(bucket)?;
    let resource_id = bucket_arn(name);

    let tags = match api.bucket_tags(name).await {
        Ok(Some(tags)) => tags,
        Ok(None) => {
            debug!(resource_id = %resource_id, "Bucket vanished before tag fetch");
            return Ok(Normalized::NotFound { resource_id });
        }
        Err(source) => return Err(NormalizationError::TagFetch { resource_id, source }),
    };

    build_snapshot(bucket, scope, tags).map(Normalized::Snapshot)
}

fn bucket_name(bucket: &BucketDescription) -> Result<&str, NormalizationError> {
    bucket
        .name
        .as_deref()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| NormalizationError::MissingField {
            resource_id: "<unnamed bucket>".to_string(),
            field: "Name",
        })
}
