//! Snapshot Poller
//!
//! Enumerates cloud resources across customer accounts and normalizes them
//! into canonical snapshots. Work arrives as bounded scan units; a unit that
//! hits the batch ceiling returns a continuation token so the scheduler can
//! resume it as a fresh unit.

pub mod arn;
pub mod cache;
pub mod clients;
pub mod config;
pub mod credentials;
pub mod driver;
pub mod error;
pub mod ingest;
pub mod models;
pub mod normalize;
pub mod pagination;
pub mod providers;
pub mod server;

#[cfg(test)]
mod testing;

pub use clients::{AwsClientFactory, ClientCache, RegionCache};
pub use config::PollerConfig;
pub use credentials::{CredentialProvider, StsIdentityService};
pub use driver::{PollDriver, PollState};
pub use error::{PollError, PollFailure};
pub use ingest::{HttpIngestor, Ingestor, StdoutIngestor};
pub use models::{ContinuationToken, PollOutcome, ResourceSnapshot, ResourceType, ScanUnit};
