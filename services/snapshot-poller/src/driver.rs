//! Poll driver
//!
//! Runs one scan unit through
//! `Init -> CredentialsReady -> ClientReady -> Enumerating -> Normalizing -> Done`.
//! Any failure ends the unit in `Error` and is reported upward with the state
//! reached and the token the unit was submitted with; nothing is retried here.
//!
//! Within a unit everything is sequential. Shared state (credentials and the
//! two caches) is only touched while acquiring credentials and clients.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::arn::Arn;
use crate::clients::{ClientCache, RegionCache, ServiceClient};
use crate::config::PollerConfig;
use crate::credentials::CredentialProvider;
use crate::error::{PollError, PollFailure};
use crate::ingest::{IngestBatch, Ingestor};
use crate::models::{
    AccountRole, ContinuationToken, PollOutcome, ResourceSnapshot, ResourceType, ScanUnit,
};
use crate::normalize::{bucket, log_group, Normalized, SnapshotScope};
use crate::pagination::{enumerate, PageStream};
use crate::providers::cloudwatch_logs::LogGroupPages;
use crate::providers::s3::BucketPages;
use crate::providers::{BucketDescription, BucketsApi};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Init,
    CredentialsReady,
    ClientReady,
    Enumerating,
    Normalizing,
    Done,
    Error,
}

impl PollState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollState::Init => "Init",
            PollState::CredentialsReady => "CredentialsReady",
            PollState::ClientReady => "ClientReady",
            PollState::Enumerating => "Enumerating",
            PollState::Normalizing => "Normalizing",
            PollState::Done => "Done",
            PollState::Error => "Error",
        }
    }
}

impl fmt::Display for PollState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks one unit's progress through the state machine
struct Pass<'a> {
    unit: &'a ScanUnit,
    state: PollState,
}

impl<'a> Pass<'a> {
    fn new(unit: &'a ScanUnit) -> Self {
        Self {
            unit,
            state: PollState::Init,
        }
    }

    fn advance(&mut self, next: PollState) {
        debug!(
            account_id = %self.unit.account_id,
            region = %self.unit.region,
            resource_type = %self.unit.resource_type,
            from = %self.state,
            to = %next,
            "Poll state transition"
        );
        self.state = next;
    }

    fn fail(&self, error: impl Into<PollError>) -> PollFailure {
        let failure = PollFailure::new(self.unit, self.state, error.into());
        warn!(
            account_id = %self.unit.account_id,
            region = %self.unit.region,
            resource_type = %self.unit.resource_type,
            integration_id = %self.unit.integration_id,
            state = %self.state,
            to = %PollState::Error,
            error = %failure.error,
            "Poll failed"
        );
        failure
    }

    fn scope(&self) -> SnapshotScope<'a> {
        let unit: &'a ScanUnit = self.unit;
        SnapshotScope {
            account_id: &unit.account_id,
            region: &unit.region,
        }
    }
}

pub struct PollDriver {
    config: PollerConfig,
    credentials: Arc<CredentialProvider>,
    clients: Arc<ClientCache>,
    regions: Arc<RegionCache>,
    ingestor: Arc<dyn Ingestor>,
}

impl PollDriver {
    pub fn new(
        config: PollerConfig,
        credentials: Arc<CredentialProvider>,
        clients: Arc<ClientCache>,
        regions: Arc<RegionCache>,
        ingestor: Arc<dyn Ingestor>,
    ) -> Self {
        Self {
            config,
            credentials,
            clients,
            regions,
            ingestor,
        }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Enumerate and normalize one unit, then hand the batch to ingestion
    pub async fn poll(&self, unit: &ScanUnit) -> Result<PollOutcome, PollFailure> {
        let mut pass = Pass::new(unit);
        info!(
            account_id = %unit.account_id,
            region = %unit.region,
            resource_type = %unit.resource_type,
            resumed = unit.continuation_token.is_some(),
            "Starting poll"
        );

        let role = self.acquire_credentials(&mut pass).await?;
        let client = self
            .clients
            .get_client(unit.resource_type.service(), &unit.region, &role)
            .map_err(|e| pass.fail(e))?;
        pass.advance(PollState::ClientReady);

        let (resources, next_token) = match unit.resource_type {
            ResourceType::CloudWatchLogGroup => self.poll_log_groups(&mut pass, &client).await?,
            ResourceType::S3Bucket => self.poll_buckets(&mut pass, &client).await?,
        };

        self.finish(&mut pass, resources, next_token).await
    }

    /// Re-scan the single resource named by `resource_arn`.
    ///
    /// A resource that no longer exists yields an empty, complete outcome.
    pub async fn poll_resource(
        &self,
        unit: &ScanUnit,
        resource_arn: &str,
    ) -> Result<PollOutcome, PollFailure> {
        let mut pass = Pass::new(unit);
        info!(
            account_id = %unit.account_id,
            resource_type = %unit.resource_type,
            resource_arn = %resource_arn,
            "Starting single resource poll"
        );

        let arn: Arn = resource_arn
            .parse()
            .map_err(|e| pass.fail(PollError::InvalidUnit(format!("resource ARN: {}", e))))?;
        if !arn.account_id.is_empty() && arn.account_id != unit.account_id {
            return Err(pass.fail(PollError::InvalidUnit(format!(
                "resource {} does not belong to account {}",
                resource_arn, unit.account_id
            ))));
        }

        let role = self.acquire_credentials(&mut pass).await?;

        let resource = match unit.resource_type {
            ResourceType::CloudWatchLogGroup => {
                self.poll_one_log_group(&mut pass, &role, &arn).await?
            }
            ResourceType::S3Bucket => self.poll_one_bucket(&mut pass, &role, &arn).await?,
        };

        self.finish(&mut pass, resource.into_iter().collect(), None)
            .await
    }

    async fn acquire_credentials(&self, pass: &mut Pass<'_>) -> Result<AccountRole, PollFailure> {
        let role = pass.unit.account_role().map_err(|e| pass.fail(e))?;
        self.credentials
            .obtain(&role)
            .await
            .map_err(|e| pass.fail(e))?;
        pass.advance(PollState::CredentialsReady);
        Ok(role)
    }

    async fn poll_log_groups(
        &self,
        pass: &mut Pass<'_>,
        client: &ServiceClient,
    ) -> Result<(Vec<ResourceSnapshot>, Option<ContinuationToken>), PollFailure> {
        let api = client.log_groups().map_err(|e| pass.fail(e))?;

        pass.advance(PollState::Enumerating);
        let listed = enumerate(
            &LogGroupPages(api.as_ref()),
            pass.unit.continuation_token.as_ref(),
            self.config.batch_ceiling,
        )
        .await
        .map_err(|e| pass.fail(e))?;
        debug!(items = listed.items.len(), pages = listed.pages, "Enumerated log groups");

        pass.advance(PollState::Normalizing);
        let mut resources = Vec::with_capacity(listed.items.len());
        for group in &listed.items {
            let normalized = log_group::normalize(api.as_ref(), group, pass.scope())
                .await
                .map_err(|e| pass.fail(e))?;
            keep(&mut resources, normalized);
        }

        Ok((resources, listed.next_token))
    }

    async fn poll_buckets(
        &self,
        pass: &mut Pass<'_>,
        client: &ServiceClient,
    ) -> Result<(Vec<ResourceSnapshot>, Option<ContinuationToken>), PollFailure> {
        let api = client.buckets().map_err(|e| pass.fail(e))?;

        pass.advance(PollState::Enumerating);
        let listed = enumerate(
            &BucketPages(api.as_ref()),
            pass.unit.continuation_token.as_ref(),
            self.config.batch_ceiling,
        )
        .await
        .map_err(|e| pass.fail(e))?;
        debug!(items = listed.items.len(), pages = listed.pages, "Enumerated buckets");

        pass.advance(PollState::Normalizing);
        let mut resources = Vec::with_capacity(listed.items.len());
        for listed_bucket in &listed.items {
            let normalized =
                bucket::normalize(api.as_ref(), &self.regions, listed_bucket, pass.scope())
                    .await
                    .map_err(|e| pass.fail(e))?;
            keep(&mut resources, normalized);
        }

        Ok((resources, listed.next_token))
    }

    async fn poll_one_log_group(
        &self,
        pass: &mut Pass<'_>,
        role: &AccountRole,
        arn: &Arn,
    ) -> Result<Option<ResourceSnapshot>, PollFailure> {
        let unit = pass.unit;
        let name = log_group::log_group_name(arn).ok_or_else(|| {
            pass.fail(PollError::InvalidUnit(format!("{} is not a log group", arn)))
        })?;
        let region = if arn.region.is_empty() {
            unit.region.as_str()
        } else {
            arn.region.as_str()
        };

        let api = self
            .clients
            .get_client(ResourceType::CloudWatchLogGroup.service(), region, role)
            .and_then(|client| client.log_groups())
            .map_err(|e| pass.fail(e))?;
        pass.advance(PollState::ClientReady);

        pass.advance(PollState::Enumerating);
        let group = match api.find_log_group(name).await.map_err(|e| pass.fail(e))? {
            Some(group) => group,
            None => return Ok(None),
        };

        pass.advance(PollState::Normalizing);
        let scope = SnapshotScope {
            account_id: &unit.account_id,
            region,
        };
        let normalized = log_group::normalize(api.as_ref(), &group, scope)
            .await
            .map_err(|e| pass.fail(e))?;

        Ok(normalized.into_snapshot())
    }

    async fn poll_one_bucket(
        &self,
        pass: &mut Pass<'_>,
        role: &AccountRole,
        arn: &Arn,
    ) -> Result<Option<ResourceSnapshot>, PollFailure> {
        let unit = pass.unit;
        let name = arn.resource.as_str();
        if name.contains('/') {
            return Err(pass.fail(PollError::InvalidUnit(format!("{} is not a bucket", arn))));
        }

        let api = self
            .clients
            .get_client(ResourceType::S3Bucket.service(), &unit.region, role)
            .and_then(|client| client.buckets())
            .map_err(|e| pass.fail(e))?;
        pass.advance(PollState::ClientReady);

        pass.advance(PollState::Enumerating);
        let listed = match self.find_bucket(pass, api.as_ref(), name).await? {
            Some(listed) => listed,
            None => return Ok(None),
        };

        pass.advance(PollState::Normalizing);
        let region = match bucket::home_region(api.as_ref(), &self.regions, name)
            .await
            .map_err(|e| pass.fail(e))?
        {
            Some(region) => region,
            None => return Ok(None),
        };

        // Tags must be read through a client in the bucket's own region
        let regional = if region == unit.region {
            api
        } else {
            self.clients
                .get_client(ResourceType::S3Bucket.service(), &region, role)
                .and_then(|client| client.buckets())
                .map_err(|e| pass.fail(e))?
        };

        let scope = SnapshotScope {
            account_id: &unit.account_id,
            region: &region,
        };
        let normalized = bucket::normalize_in_region(regional.as_ref(), &listed, scope)
            .await
            .map_err(|e| pass.fail(e))?;

        Ok(normalized.into_snapshot())
    }

    async fn find_bucket(
        &self,
        pass: &Pass<'_>,
        api: &dyn BucketsApi,
        name: &str,
    ) -> Result<Option<BucketDescription>, PollFailure> {
        let source = BucketPages(api);
        let mut pages = PageStream::resume(&source, None);

        while let Some(page) = pages.next_page().await.map_err(|e| pass.fail(e))? {
            if let Some(found) = page
                .items
                .into_iter()
                .find(|b| b.name.as_deref() == Some(name))
            {
                return Ok(Some(found));
            }
        }

        warn!(
            resource = %name,
            resource_type = %ResourceType::S3Bucket,
            "Tried to scan non-existent resource"
        );
        Ok(None)
    }

    async fn finish(
        &self,
        pass: &mut Pass<'_>,
        resources: Vec<ResourceSnapshot>,
        next_token: Option<ContinuationToken>,
    ) -> Result<PollOutcome, PollFailure> {
        if !resources.is_empty() {
            let batch = IngestBatch::new(pass.unit, &resources);
            self.ingestor
                .ingest(&batch)
                .await
                .map_err(|e| pass.fail(e))?;
        }

        pass.advance(PollState::Done);
        let outcome = PollOutcome {
            resources,
            next_token,
        };
        info!(
            account_id = %pass.unit.account_id,
            region = %pass.unit.region,
            resource_type = %pass.unit.resource_type,
            resources = outcome.resources.len(),
            complete = outcome.is_complete(),
            "Poll complete"
        );
        Ok(outcome)
    }
}

fn keep(resources: &mut Vec<ResourceSnapshot>, normalized: Normalized) {
    match normalized {
        Normalized::Snapshot(snapshot) => resources.push(snapshot),
        Normalized::NotFound { resource_id } => {
            debug!(resource_id = %resource_id, "Skipping vanished resource");
        }
        Normalized::OtherRegion { resource_id, region } => {
            debug!(resource_id = %resource_id, region = %region, "Skipping resource in other region");
        }
    }
}
