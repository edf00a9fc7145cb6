//! S3 buckets

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{classify_sdk_error, error_code};
use crate::error::ProviderError;
use crate::pagination::{ListPages, Page};

/// Buckets requested per ListBuckets page
const LIST_BUCKETS_PAGE_SIZE: i32 = 1000;

/// Region a bucket lives in when the location constraint is empty
const DEFAULT_BUCKET_REGION: &str = "us-east-1";

/// Bucket as returned by ListBuckets
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BucketDescription {
    pub name: Option<String>,
    pub creation_date: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait BucketsApi: Send + Sync {
    /// One page of the account's buckets
    async fn list_buckets(
        &self,
        continuation_token: Option<String>,
    ) -> Result<Page<BucketDescription>, ProviderError>;

    /// Home region of a bucket; `None` if the bucket no longer exists
    async fn bucket_location(&self, bucket: &str) -> Result<Option<String>, ProviderError>;

    /// Tags of a bucket; `None` if the bucket no longer exists
    async fn bucket_tags(
        &self,
        bucket: &str,
    ) -> Result<Option<BTreeMap<String, String>>, ProviderError>;
}

pub struct BucketPages<'a>(pub &'a dyn BucketsApi);

#[async_trait]
impl ListPages for BucketPages<'_> {
    type Item = BucketDescription;

    async fn list_page(&self, token: Option<String>) -> Result<Page<Self::Item>, ProviderError> {
        self.0.list_buckets(token).await
    }
}

/// Normalize a GetBucketLocation constraint into a region name
pub fn region_from_location_constraint(constraint: Option<&str>) -> String {
    match constraint {
        None | Some("") => DEFAULT_BUCKET_REGION.to_string(),
        Some("EU") => "eu-west-1".to_string(),
        Some(region) => region.to_string(),
    }
}

#[derive(Clone)]
pub struct SdkBuckets {
    client: aws_sdk_s3::Client,
}

impl SdkBuckets {
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BucketsApi for SdkBuckets {
    async fn list_buckets(
        &self,
        continuation_token: Option<String>,
    ) -> Result<Page<BucketDescription>, ProviderError> {
        let output = self
            .client
            .list_buckets()
            .max_buckets(LIST_BUCKETS_PAGE_SIZE)
            .set_continuation_token(continuation_token)
            .send()
            .await
            .map_err(|e| classify_sdk_error("S3.ListBuckets", e))?;

        let buckets = output
            .buckets()
            .iter()
            .map(|b| BucketDescription {
                name: b.name().map(str::to_string),
                creation_date: b
                    .creation_date()
                    .and_then(|d| DateTime::from_timestamp(d.secs(), 0)),
            })
            .collect();

        Ok(Page::new(buckets, output.continuation_token().map(str::to_string)))
    }

    async fn bucket_location(&self, bucket: &str) -> Result<Option<String>, ProviderError> {
        match self.client.get_bucket_location().bucket(bucket).send().await {
            Ok(output) => Ok(Some(region_from_location_constraint(
                output.location_constraint().map(|c| c.as_str()),
            ))),
            Err(e) if error_code(&e) == Some("NoSuchBucket") => Ok(None),
            Err(e) => Err(classify_sdk_error("S3.GetBucketLocation", e)),
        }
    }

    async fn bucket_tags(
        &self,
        bucket: &str,
    ) -> Result<Option<BTreeMap<String, String>>, ProviderError> {
        match self.client.get_bucket_tagging().bucket(bucket).send().await {
            Ok(output) => Ok(Some(
                output
                    .tag_set()
                    .iter()
                    .map(|t| (t.key().to_string(), t.value().to_string()))
                    .collect(),
            )),
            Err(e) if error_code(&e) == Some("NoSuchTagSet") => Ok(Some(BTreeMap::new())),
            Err(e) if error_code(&e) == Some("NoSuchBucket") => Ok(None),
            Err(e) => Err(classify_sdk_error("S3.GetBucketTagging", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_constraint_defaults() {
        assert_eq!(region_from_location_constraint(None), "us-east-1");
        assert_eq!(region_from_location_constraint(Some("")), "us-east-1");
        assert_eq!(region_from_location_constraint(Some("EU")), "eu-west-1");
        assert_eq!(
            region_from_location_constraint(Some("us-west-2")),
            "us-west-2"
        );
    }
}
