//! Per-service client cache and bucket region resolver
//!
//! Both caches are process-wide, bounded, and evict the least recently used
//! entry. Client entries are keyed by the full `(service, region, role)`
//! triple so a client is never reused across trust boundaries, even when two
//! roles would produce identically configured clients.

use std::future::Future;
use std::sync::Arc;

use aws_config::{Region, SdkConfig};
use aws_smithy_types::retry::RetryConfig;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::cache::LruCache;
use crate::credentials::{CredentialProvider, RoleCredentials};
use crate::error::ProviderError;
use crate::models::{AccountRole, Service};
use crate::providers::{BucketsApi, LogGroupsApi, SdkBuckets, SdkLogGroups};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientCacheKey {
    pub service: Service,
    pub region: String,
    pub role: AccountRole,
}

/// A constructed, region-bound service client
#[derive(Clone)]
pub enum ServiceClient {
    CloudWatchLogs(Arc<dyn LogGroupsApi>),
    S3(Arc<dyn BucketsApi>),
}

impl ServiceClient {
    pub fn service(&self) -> Service {
        match self {
            ServiceClient::CloudWatchLogs(_) => Service::CloudWatchLogs,
            ServiceClient::S3(_) => Service::S3,
        }
    }

    pub fn log_groups(&self) -> Result<Arc<dyn LogGroupsApi>, ProviderError> {
        match self {
            ServiceClient::CloudWatchLogs(api) => Ok(Arc::clone(api)),
            _ => Err(ProviderError::ClientMismatch { expected: "logs" }),
        }
    }

    pub fn buckets(&self) -> Result<Arc<dyn BucketsApi>, ProviderError> {
        match self {
            ServiceClient::S3(api) => Ok(Arc::clone(api)),
            _ => Err(ProviderError::ClientMismatch { expected: "s3" }),
        }
    }
}

/// Builds service clients for a role in a region
pub trait ClientFactory: Send + Sync {
    fn build(
        &self,
        service: Service,
        region: &str,
        role: &AccountRole,
    ) -> Result<ServiceClient, ProviderError>;
}

/// Builds AWS SDK clients that sign with the role's cached credentials
pub struct AwsClientFactory {
    base: SdkConfig,
    credentials: Arc<CredentialProvider>,
}

impl AwsClientFactory {
    pub fn new(base: SdkConfig, credentials: Arc<CredentialProvider>) -> Self {
        Self { base, credentials }
    }
}

impl ClientFactory for AwsClientFactory {
    fn build(
        &self,
        service: Service,
        region: &str,
        role: &AccountRole,
    ) -> Result<ServiceClient, ProviderError> {
        let provider = RoleCredentials::new(Arc::clone(&self.credentials), role.clone());
        let region = Region::new(region.to_string());

        // Retries are the scheduler's decision, never the client's
        let client = match service {
            Service::CloudWatchLogs => {
                let config = aws_sdk_cloudwatchlogs::config::Builder::from(&self.base)
                    .region(region)
                    .credentials_provider(provider)
                    .retry_config(RetryConfig::disabled())
                    .build();
                ServiceClient::CloudWatchLogs(Arc::new(SdkLogGroups::new(
                    aws_sdk_cloudwatchlogs::Client::from_conf(config),
                )))
            }
            Service::S3 => {
                let config = aws_sdk_s3::config::Builder::from(&self.base)
                    .region(region)
                    .credentials_provider(provider)
                    .retry_config(RetryConfig::disabled())
                    .build();
                ServiceClient::S3(Arc::new(SdkBuckets::new(aws_sdk_s3::Client::from_conf(
                    config,
                ))))
            }
        };

        Ok(client)
    }
}

#[derive(Clone)]
struct ClientEntry {
    client: ServiceClient,
    inserted_at: DateTime<Utc>,
}

/// LRU cache of service clients
pub struct ClientCache {
    entries: LruCache<ClientCacheKey, ClientEntry>,
    factory: Arc<dyn ClientFactory>,
}

impl ClientCache {
    pub fn new(capacity: usize, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            entries: LruCache::new(capacity),
            factory,
        }
    }

    /// Cached client for `(service, region, role)`, built on a miss
    pub fn get_client(
        &self,
        service: Service,
        region: &str,
        role: &AccountRole,
    ) -> Result<ServiceClient, ProviderError> {
        let key = ClientCacheKey {
            service,
            region: region.to_string(),
            role: role.clone(),
        };

        if let Some(entry) = self.entries.get(&key) {
            return Ok(entry.client);
        }

        debug!(service = %service, region = %region, role = %role, "Building client");
        let client = self.factory.build(service, region, role)?;

        let entry = ClientEntry {
            client: client.clone(),
            inserted_at: Utc::now(),
        };
        if let Some((evicted, _)) = self.entries.insert(key, entry) {
            debug!(
                service = %evicted.service,
                region = %evicted.region,
                role = %evicted.role,
                "Evicted least recently used client"
            );
        }

        Ok(client)
    }

    pub fn contains(&self, key: &ClientCacheKey) -> bool {
        self.entries.contains_key(key)
    }

    /// When the cached client for `key` was built
    pub fn inserted_at(&self, key: &ClientCacheKey) -> Option<DateTime<Utc>> {
        self.entries.peek(key).map(|entry| entry.inserted_at)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }
}

/// LRU cache of resource locator -> home region
pub struct RegionCache {
    entries: LruCache<String, String>,
}

impl RegionCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Region of `locator`, running `lookup` on a miss.
    ///
    /// `Ok(None)` means the resource does not exist; that answer is not cached.
    pub async fn resolve<F, Fut>(
        &self,
        locator: &str,
        lookup: F,
    ) -> Result<Option<String>, ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<String>, ProviderError>>,
    {
        if let Some(region) = self.entries.get(&locator.to_string()) {
            return Ok(Some(region));
        }

        let region = lookup().await?;
        if let Some(region) = &region {
            debug!(locator = %locator, region = %region, "Resolved resource region");
            self.entries.insert(locator.to_string(), region.clone());
        }
        Ok(region)
    }

    pub fn get(&self, locator: &str) -> Option<String> {
        self.entries.peek(&locator.to_string())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{role, FakeFactory};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(service: Service, region: &str, account: &str) -> ClientCacheKey {
        ClientCacheKey {
            service,
            region: region.to_string(),
            role: role(account),
        }
    }

    #[test]
    fn test_client_built_once_per_key() {
        let factory = Arc::new(FakeFactory::default());
        let cache = ClientCache::new(10, factory.clone());

        cache
            .get_client(Service::CloudWatchLogs, "us-west-2", &role("123456789012"))
            .unwrap();
        cache
            .get_client(Service::CloudWatchLogs, "us-west-2", &role("123456789012"))
            .unwrap();

        assert_eq!(factory.builds(), 1);
        assert!(cache
            .inserted_at(&key(Service::CloudWatchLogs, "us-west-2", "123456789012"))
            .is_some());
    }

    #[test]
    fn test_entries_not_shared_across_roles() {
        let factory = Arc::new(FakeFactory::default());
        let cache = ClientCache::new(10, factory.clone());

        cache
            .get_client(Service::S3, "us-east-1", &role("111111111111"))
            .unwrap();
        cache
            .get_client(Service::S3, "us-east-1", &role("222222222222"))
            .unwrap();

        assert_eq!(factory.builds(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_capacity_plus_one_evicts_least_recent() {
        let factory = Arc::new(FakeFactory::default());
        let cache = ClientCache::new(3, factory.clone());
        let account = "123456789012";

        for region in ["us-east-1", "us-east-2", "us-west-1"] {
            cache
                .get_client(Service::CloudWatchLogs, region, &role(account))
                .unwrap();
        }

        // Refresh us-east-1 so us-east-2 becomes the least recent
        cache
            .get_client(Service::CloudWatchLogs, "us-east-1", &role(account))
            .unwrap();
        cache
            .get_client(Service::CloudWatchLogs, "us-west-2", &role(account))
            .unwrap();

        assert_eq!(cache.len(), 3);
        assert!(!cache.contains(&key(Service::CloudWatchLogs, "us-east-2", account)));
        assert!(cache.contains(&key(Service::CloudWatchLogs, "us-east-1", account)));
        assert!(cache.contains(&key(Service::CloudWatchLogs, "us-west-1", account)));
        assert!(cache.contains(&key(Service::CloudWatchLogs, "us-west-2", account)));
        assert_eq!(factory.builds(), 4);
    }

    #[test]
    fn test_build_failure_is_not_cached() {
        let factory = Arc::new(FakeFactory::failing());
        let cache = ClientCache::new(3, factory.clone());

        assert!(cache
            .get_client(Service::S3, "us-east-1", &role("123456789012"))
            .is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_client_variant_accessors() {
        let factory = FakeFactory::default();
        let client = factory
            .build(Service::S3, "us-east-1", &role("123456789012"))
            .unwrap();

        assert_eq!(client.service(), Service::S3);
        assert!(client.buckets().is_ok());
        assert!(matches!(
            client.log_groups(),
            Err(ProviderError::ClientMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_region_lookup_cached() {
        let cache = RegionCache::new(2);
        let counter = AtomicUsize::new(0);
        let lookups = &counter;
        let lookup = move || async move {
            lookups.fetch_add(1, Ordering::SeqCst);
            Ok(Some("us-west-2".to_string()))
        };

        assert_eq!(
            cache.resolve("test-bucket", lookup).await.unwrap().as_deref(),
            Some("us-west-2")
        );
        assert_eq!(
            cache.resolve("test-bucket", lookup).await.unwrap().as_deref(),
            Some("us-west-2")
        );
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_region_missing_bucket_not_cached() {
        let cache = RegionCache::new(2);

        let region = cache
            .resolve("gone", || async { Ok(None) })
            .await
            .unwrap();

        assert_eq!(region, None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_region_cache_evicts_independently() {
        let cache = RegionCache::new(1);

        cache
            .resolve("a", || async { Ok(Some("us-east-1".to_string())) })
            .await
            .unwrap();
        cache
            .resolve("b", || async { Ok(Some("eu-west-1".to_string())) })
            .await
            .unwrap();

        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b").as_deref(), Some("eu-west-1"));
    }
}
