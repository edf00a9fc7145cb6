//! Snapshot Poller
//!
//! `serve` exposes the poll driver to the scheduler over HTTP; `poll` runs a
//! single scan unit and exits. Credentials for the poller itself come from
//! the default AWS provider chain; customer accounts are reached by assuming
//! the role named in each unit.

use std::io::Read;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use snapshot_poller::ingest::{HttpIngestor, Ingestor, StdoutIngestor};
use snapshot_poller::server::{self, PollResponse};
use snapshot_poller::{
    AwsClientFactory, ClientCache, CredentialProvider, PollDriver, PollerConfig, RegionCache,
    ScanUnit, StsIdentityService,
};

/// Snapshot Poller - cross-account cloud resource enumeration
#[derive(Parser, Debug)]
#[command(name = "snapshot-poller", version, about)]
struct Cli {
    #[command(flatten)]
    config: PollerConfig,

    /// Ingestion endpoint receiving completed batches (stdout when unset)
    #[arg(long, env = "INGEST_URL", global = true)]
    ingest_url: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve poll requests from the scheduler
    Serve {
        #[arg(long, env = "POLLER_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
        listen: SocketAddr,
    },

    /// Poll one scan unit and exit
    Poll {
        /// Scan unit JSON file (stdin when omitted)
        #[arg(long)]
        unit: Option<PathBuf>,

        /// Re-scan only this resource
        #[arg(long)]
        resource_arn: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .json()
        .init();

    cli.config
        .validate()
        .context("Invalid poller configuration")?;

    let base = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let identity = Arc::new(StsIdentityService::new(
        &base,
        cli.config.session_duration(),
    ));
    let credentials = Arc::new(CredentialProvider::new(
        identity,
        cli.config.refresh_margin(),
    ));
    let clients = Arc::new(ClientCache::new(
        cli.config.client_cache_capacity,
        Arc::new(AwsClientFactory::new(base, Arc::clone(&credentials))),
    ));
    let regions = Arc::new(RegionCache::new(cli.config.region_cache_capacity));

    let ingestor: Arc<dyn Ingestor> = match &cli.ingest_url {
        Some(url) => Arc::new(HttpIngestor::new(url.clone())),
        None => Arc::new(StdoutIngestor),
    };

    let driver = Arc::new(PollDriver::new(
        cli.config.clone(),
        credentials,
        clients,
        regions,
        ingestor,
    ));

    match cli.command {
        Command::Serve { listen } => {
            if cli.ingest_url.is_none() {
                warn!("INGEST_URL not set; batches will be written to stdout");
            }
            serve(driver, listen).await
        }
        Command::Poll { unit, resource_arn } => {
            poll_once(&driver, unit, resource_arn.as_deref()).await
        }
    }
}

async fn serve(driver: Arc<PollDriver>, addr: SocketAddr) -> Result<()> {
    info!(
        batch_ceiling = driver.config().batch_ceiling,
        "Snapshot poller listening on {}", addr
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, server::router(driver)).await?;

    Ok(())
}

async fn poll_once(
    driver: &PollDriver,
    path: Option<PathBuf>,
    resource_arn: Option<&str>,
) -> Result<()> {
    let raw = match &path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scan unit from {}", path.display()))?,
        None => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("Failed to read scan unit from stdin")?;
            raw
        }
    };
    let unit: ScanUnit = serde_json::from_str(&raw).context("Invalid scan unit")?;

    let result = match resource_arn {
        Some(arn) => driver.poll_resource(&unit, arn).await,
        None => driver.poll(&unit).await,
    };

    let failed = result.is_err();
    if let Ok(outcome) = &result {
        info!(
            resources = outcome.resources.len(),
            next_token = ?outcome.next_token,
            "Scan unit finished"
        );
    }
    println!("{}", serde_json::to_string(&PollResponse::from(result))?);

    if failed {
        anyhow::bail!("Scan unit failed");
    }
    Ok(())
}
