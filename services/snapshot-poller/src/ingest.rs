//! Hand-off of completed batches to ingestion
//!
//! Ingestion upserts by resource identifier, so re-delivering a batch after
//! a resumed unit is harmless.

use std::io::Write;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::IngestError;
use crate::models::{ResourceSnapshot, ResourceType, ScanUnit};

const INTEGRATION_TYPE: &str = "aws";

/// Snapshots of one completed unit
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestBatch<'a> {
    pub integration_id: &'a str,
    pub integration_type: &'static str,
    pub resource_type: ResourceType,
    pub account_id: &'a str,
    pub resources: &'a [ResourceSnapshot],
}

impl<'a> IngestBatch<'a> {
    pub fn new(unit: &'a ScanUnit, resources: &'a [ResourceSnapshot]) -> Self {
        Self {
            integration_id: &unit.integration_id,
            integration_type: INTEGRATION_TYPE,
            resource_type: unit.resource_type,
            account_id: &unit.account_id,
            resources,
        }
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[async_trait]
pub trait Ingestor: Send + Sync {
    async fn ingest(&self, batch: &IngestBatch<'_>) -> Result<(), IngestError>;
}

/// POSTs batches as JSON to an ingestion endpoint
pub struct HttpIngestor {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpIngestor {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Ingestor for HttpIngestor {
    async fn ingest(&self, batch: &IngestBatch<'_>) -> Result<(), IngestError> {
        debug!(
            endpoint = %self.endpoint,
            resources = batch.len(),
            "Delivering batch"
        );

        let response = self.client.post(&self.endpoint).json(batch).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(IngestError::Rejected { status, body });
        }

        info!(
            integration_id = %batch.integration_id,
            resource_type = %batch.resource_type,
            resources = batch.len(),
            "Batch delivered"
        );
        Ok(())
    }
}

/// Writes one JSON document per batch to stdout
#[derive(Debug, Default)]
pub struct StdoutIngestor;

#[async_trait]
impl Ingestor for StdoutIngestor {
    async fn ingest(&self, batch: &IngestBatch<'_>) -> Result<(), IngestError> {
        let line = serde_json::to_string(batch)?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", line)?;
        Ok(())
    }
}
