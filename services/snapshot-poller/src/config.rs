//! Poller configuration
//!
//! Every option is a CLI flag that can also be set from the environment.

use std::time::Duration;

use clap::Args;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Items accumulated per unit before a continuation token is issued
pub const DEFAULT_BATCH_CEILING: usize = 100;

pub const DEFAULT_CLIENT_CACHE_CAPACITY: usize = 1000;

pub const DEFAULT_REGION_CACHE_CAPACITY: usize = 1000;

/// Refresh credentials this long before the provider-reported expiry
pub const DEFAULT_REFRESH_MARGIN_SECS: u64 = 300;

pub const DEFAULT_SESSION_DURATION_SECS: u64 = 3600;

/// AssumeRole session bounds; a non-chained role may be granted up to 12h
pub const MIN_SESSION_DURATION_SECS: u64 = 900;
pub const MAX_SESSION_DURATION_SECS: u64 = 43_200;

#[derive(Debug, Clone, PartialEq, Eq, Args, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Stop requesting pages once this many items were gathered
    #[arg(long, env = "POLLER_BATCH_CEILING", default_value_t = DEFAULT_BATCH_CEILING)]
    pub batch_ceiling: usize,

    /// Capacity of the per-(service, region, role) client cache
    #[arg(long, env = "CLIENT_CACHE_CAPACITY", default_value_t = DEFAULT_CLIENT_CACHE_CAPACITY)]
    pub client_cache_capacity: usize,

    /// Capacity of the bucket region lookup cache
    #[arg(long, env = "REGION_CACHE_CAPACITY", default_value_t = DEFAULT_REGION_CACHE_CAPACITY)]
    pub region_cache_capacity: usize,

    /// Seconds before expiry at which cached credentials are refreshed
    #[arg(long, env = "CREDENTIAL_REFRESH_MARGIN_SECS", default_value_t = DEFAULT_REFRESH_MARGIN_SECS)]
    pub credential_refresh_margin_secs: u64,

    /// Requested lifetime of assumed-role sessions
    #[arg(long, env = "ASSUME_ROLE_DURATION_SECS", default_value_t = DEFAULT_SESSION_DURATION_SECS)]
    pub session_duration_secs: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            batch_ceiling: DEFAULT_BATCH_CEILING,
            client_cache_capacity: DEFAULT_CLIENT_CACHE_CAPACITY,
            region_cache_capacity: DEFAULT_REGION_CACHE_CAPACITY,
            credential_refresh_margin_secs: DEFAULT_REFRESH_MARGIN_SECS,
            session_duration_secs: DEFAULT_SESSION_DURATION_SECS,
        }
    }
}

impl PollerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_ceiling == 0 {
            return Err(ConfigError::Zero("batch_ceiling"));
        }
        if self.client_cache_capacity == 0 {
            return Err(ConfigError::Zero("client_cache_capacity"));
        }
        if self.region_cache_capacity == 0 {
            return Err(ConfigError::Zero("region_cache_capacity"));
        }
        if !(MIN_SESSION_DURATION_SECS..=MAX_SESSION_DURATION_SECS)
            .contains(&self.session_duration_secs)
        {
            return Err(ConfigError::SessionDuration(self.session_duration_secs));
        }
        if self.credential_refresh_margin_secs >= self.session_duration_secs {
            return Err(ConfigError::MarginTooLarge {
                margin: self.credential_refresh_margin_secs,
                duration: self.session_duration_secs,
            });
        }
        Ok(())
    }

    pub fn refresh_margin(&self) -> Duration {
        Duration::from_secs(self.credential_refresh_margin_secs)
    }

    pub fn session_duration(&self) -> Duration {
        Duration::from_secs(self.session_duration_secs)
    }
}
