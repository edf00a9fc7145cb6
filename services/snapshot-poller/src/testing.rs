//! In-memory fakes for the poller's seams

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::clients::{ClientFactory, ServiceClient};
use crate::credentials::{CachedCredential, IdentityService};
use crate::error::{AuthError, IngestError, ProviderError};
use crate::ingest::{IngestBatch, Ingestor};
use crate::models::{AccountRole, ResourceSnapshot, ResourceType, ScanUnit, Service};
use crate::normalize::{log_group as log_group_snapshot, SnapshotScope};
use crate::pagination::{ListPages, Page};
use crate::providers::s3::region_from_location_constraint;
use crate::providers::{BucketDescription, BucketsApi, LogGroupDescription, LogGroupsApi};

pub const ACCOUNT_ID: &str = "123456789012";
pub const REGION: &str = "us-west-2";
pub const INTEGRATION_ID: &str = "3e4b1734-e678-4581-b291-4b8a176219e9";

/// 2020-03-01T00:00:00.123Z
const CREATED_MILLIS: i64 = 1_583_020_800_123;

pub fn role(account_id: &str) -> AccountRole {
    AccountRole::new(
        account_id,
        format!("arn:aws:iam::{}:role/SnapshotAuditRole", account_id),
    )
}

pub fn scan_unit(resource_type: ResourceType) -> ScanUnit {
    ScanUnit {
        resource_type,
        account_id: ACCOUNT_ID.to_string(),
        role_arn: role(ACCOUNT_ID).role_arn,
        external_id: None,
        region: REGION.to_string(),
        integration_id: INTEGRATION_ID.to_string(),
        continuation_token: None,
    }
}

pub fn log_group(name: &str) -> LogGroupDescription {
    LogGroupDescription {
        arn: Some(format!(
            "arn:aws:logs:{}:{}:log-group:{}:*",
            REGION, ACCOUNT_ID, name
        )),
        log_group_name: Some(name.to_string()),
        creation_time: Some(CREATED_MILLIS),
        kms_key_id: None,
        metric_filter_count: Some(0),
        retention_in_days: Some(30),
        stored_bytes: Some(1024),
    }
}

pub fn bucket(name: &str) -> BucketDescription {
    BucketDescription {
        name: Some(name.to_string()),
        creation_date: DateTime::from_timestamp(CREATED_MILLIS / 1000, 0),
    }
}

pub fn snapshot(name: &str) -> ResourceSnapshot {
    let scope = SnapshotScope {
        account_id: ACCOUNT_ID,
        region: REGION,
    };
    log_group_snapshot::build_snapshot(&log_group(name), scope, BTreeMap::new())
        .expect("fixture log group is well formed")
}

fn throttled(operation: &'static str) -> ProviderError {
    ProviderError::Throttled {
        operation,
        message: "Rate exceeded".to_string(),
    }
}

/// Slice `items` at an offset token the way a provider cursor would
fn page_at<T: Clone>(
    items: &[T],
    token: Option<String>,
    page_size: usize,
) -> Result<Page<T>, ProviderError> {
    let start = match token {
        Some(token) => token.parse::<usize>().map_err(|_| ProviderError::Service {
            operation: "ListPage",
            message: format!("invalid token {}", token),
        })?,
        None => 0,
    };
    let end = start.saturating_add(page_size).min(items.len());
    let next = (end < items.len()).then(|| end.to_string());

    Ok(Page::new(items[start.min(end)..end].to_vec(), next))
}

/// Identity service issuing credentials with a fixed lifetime
pub struct FakeIdentity {
    lifetime: Duration,
    delay: Option<Duration>,
    failure: Option<String>,
    calls: AtomicUsize,
}

impl FakeIdentity {
    pub fn with_lifetime(lifetime: Duration) -> Self {
        Self {
            lifetime,
            delay: None,
            failure: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::with_lifetime(Duration::from_secs(3600))
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityService for FakeIdentity {
    async fn assume_role(&self, role: &AccountRole) -> Result<CachedCredential, AuthError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(message) = &self.failure {
            return Err(AuthError::AssumeRole {
                role_arn: role.role_arn.clone(),
                message: message.clone(),
            });
        }

        let lifetime = chrono::Duration::from_std(self.lifetime).expect("lifetime fits");
        Ok(CachedCredential {
            role: role.clone(),
            access_key_id: format!("ASIA{}{}", role.account_id, n),
            secret_access_key: format!("secret-{}", n),
            session_token: format!("token-{}", n),
            expires_at: Utc::now() + lifetime,
        })
    }
}

/// Page source yielding `0..total` in pages of `page_size`
pub struct NumberedPages {
    items: Vec<u32>,
    page_size: usize,
    fail_on: Option<usize>,
    calls: AtomicUsize,
}

impl NumberedPages {
    pub fn new(total: u32, page_size: usize) -> Self {
        Self {
            items: (0..total).collect(),
            page_size,
            fail_on: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// The `n`-th fetch (1-based) is throttled
    pub fn failing_on_page(mut self, n: usize) -> Self {
        self.fail_on = Some(n);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ListPages for NumberedPages {
    type Item = u32;

    async fn list_page(&self, token: Option<String>) -> Result<Page<u32>, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on == Some(call) {
            return Err(throttled("ListNumbers"));
        }
        page_at(&self.items, token, self.page_size)
    }
}

/// Log groups held in memory
pub struct FakeLogGroups {
    groups: Vec<LogGroupDescription>,
    page_size: usize,
    tags: HashMap<String, BTreeMap<String, String>>,
    failing_tags: HashSet<String>,
    vanished: HashSet<String>,
    fail_on: Option<usize>,
    describe_calls: AtomicUsize,
    tag_calls: AtomicUsize,
}

impl FakeLogGroups {
    pub fn new(groups: Vec<LogGroupDescription>, page_size: usize) -> Self {
        Self {
            groups,
            page_size,
            tags: HashMap::new(),
            failing_tags: HashSet::new(),
            vanished: HashSet::new(),
            fail_on: None,
            describe_calls: AtomicUsize::new(0),
            tag_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_tags(mut self, name: &str, tags: &[(&str, &str)]) -> Self {
        self.tags.insert(
            name.to_string(),
            tags.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self
    }

    pub fn failing_tags_for(mut self, name: &str) -> Self {
        self.failing_tags.insert(name.to_string());
        self
    }

    /// Listed, but deleted before any detail call
    pub fn vanished(mut self, name: &str) -> Self {
        self.vanished.insert(name.to_string());
        self
    }

    pub fn failing_on_page(mut self, n: usize) -> Self {
        self.fail_on = Some(n);
        self
    }

    pub fn describe_calls(&self) -> usize {
        self.describe_calls.load(Ordering::SeqCst)
    }

    pub fn tag_calls(&self) -> usize {
        self.tag_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogGroupsApi for FakeLogGroups {
    async fn describe_log_groups(
        &self,
        next_token: Option<String>,
    ) -> Result<Page<LogGroupDescription>, ProviderError> {
        let call = self.describe_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on == Some(call) {
            return Err(throttled("CloudWatchLogs.DescribeLogGroups"));
        }
        page_at(&self.groups, next_token, self.page_size)
    }

    async fn find_log_group(
        &self,
        name: &str,
    ) -> Result<Option<LogGroupDescription>, ProviderError> {
        if self.vanished.contains(name) {
            return Ok(None);
        }
        Ok(self
            .groups
            .iter()
            .find(|g| g.log_group_name.as_deref() == Some(name))
            .cloned())
    }

    async fn list_tags(
        &self,
        log_group_name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, ProviderError> {
        self.tag_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_tags.contains(log_group_name) {
            return Err(throttled("CloudWatchLogs.ListTagsLogGroup"));
        }
        if self.vanished.contains(log_group_name) {
            return Ok(None);
        }
        Ok(Some(
            self.tags.get(log_group_name).cloned().unwrap_or_default(),
        ))
    }
}

/// Buckets held in memory, all listed on one page
pub struct FakeBuckets {
    buckets: Vec<BucketDescription>,
    page_size: usize,
    locations: HashMap<String, String>,
    failing_tags: HashSet<String>,
    vanished: HashSet<String>,
    location_calls: AtomicUsize,
    tag_calls: AtomicUsize,
}

impl FakeBuckets {
    pub fn new(buckets: Vec<BucketDescription>) -> Self {
        Self {
            buckets,
            page_size: usize::MAX,
            locations: HashMap::new(),
            failing_tags: HashSet::new(),
            vanished: HashSet::new(),
            location_calls: AtomicUsize::new(0),
            tag_calls: AtomicUsize::new(0),
        }
    }

    /// Serve `ListBuckets` in pages of `page_size` with offset tokens
    pub fn paged(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn located(mut self, name: &str, region: &str) -> Self {
        self.locations.insert(name.to_string(), region.to_string());
        self
    }

    pub fn failing_tags_for(mut self, name: &str) -> Self {
        self.failing_tags.insert(name.to_string());
        self
    }

    pub fn vanished(mut self, name: &str) -> Self {
        self.vanished.insert(name.to_string());
        self
    }

    pub fn location_calls(&self) -> usize {
        self.location_calls.load(Ordering::SeqCst)
    }

    pub fn tag_calls(&self) -> usize {
        self.tag_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BucketsApi for FakeBuckets {
    async fn list_buckets(
        &self,
        continuation_token: Option<String>,
    ) -> Result<Page<BucketDescription>, ProviderError> {
        page_at(&self.buckets, continuation_token, self.page_size)
    }

    async fn bucket_location(&self, bucket: &str) -> Result<Option<String>, ProviderError> {
        self.location_calls.fetch_add(1, Ordering::SeqCst);
        if self.vanished.contains(bucket) {
            return Ok(None);
        }
        Ok(Some(region_from_location_constraint(
            self.locations.get(bucket).map(String::as_str),
        )))
    }

    async fn bucket_tags(
        &self,
        bucket: &str,
    ) -> Result<Option<BTreeMap<String, String>>, ProviderError> {
        self.tag_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_tags.contains(bucket) {
            return Err(throttled("S3.GetBucketTagging"));
        }
        if self.vanished.contains(bucket) {
            return Ok(None);
        }
        Ok(Some(BTreeMap::new()))
    }
}

/// Hands out the same in-memory APIs for every region and role
pub struct FakeFactory {
    log_groups: Arc<FakeLogGroups>,
    buckets: Arc<FakeBuckets>,
    fail: bool,
    builds: AtomicUsize,
}

impl Default for FakeFactory {
    fn default() -> Self {
        Self {
            log_groups: Arc::new(FakeLogGroups::new(Vec::new(), 50)),
            buckets: Arc::new(FakeBuckets::new(Vec::new())),
            fail: false,
            builds: AtomicUsize::new(0),
        }
    }
}

impl FakeFactory {
    pub fn with_log_groups(log_groups: Arc<FakeLogGroups>) -> Self {
        Self {
            log_groups,
            ..Self::default()
        }
    }

    pub fn with_buckets(buckets: Arc<FakeBuckets>) -> Self {
        Self {
            buckets,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl ClientFactory for FakeFactory {
    fn build(
        &self,
        service: Service,
        _region: &str,
        _role: &AccountRole,
    ) -> Result<ServiceClient, ProviderError> {
        if self.fail {
            return Err(ProviderError::Service {
                operation: "BuildClient",
                message: "no endpoint for region".to_string(),
            });
        }

        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(match service {
            Service::CloudWatchLogs => ServiceClient::CloudWatchLogs(self.log_groups.clone()),
            Service::S3 => ServiceClient::S3(self.buckets.clone()),
        })
    }
}

/// Records delivered batches by resource identifier
#[derive(Default)]
pub struct MemoryIngestor {
    batches: Mutex<Vec<Vec<String>>>,
    reject: bool,
}

impl MemoryIngestor {
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }

    pub fn batches(&self) -> usize {
        self.batches.lock().len()
    }

    pub fn delivered(&self) -> Vec<Vec<String>> {
        self.batches.lock().clone()
    }
}

#[async_trait]
impl Ingestor for MemoryIngestor {
    async fn ingest(&self, batch: &IngestBatch<'_>) -> Result<(), IngestError> {
        if self.reject {
            return Err(IngestError::Rejected {
                status: 503,
                body: "ingestion unavailable".to_string(),
            });
        }

        self.batches.lock().push(
            batch
                .resources
                .iter()
                .map(|r| r.resource_id().to_string())
                .collect(),
        );
        Ok(())
    }
}
