//! Cross-account credentials
//!
//! Exchanges an account's trust role for temporary credentials via STS
//! AssumeRole and caches them per [`AccountRole`]. Concurrent callers for
//! the same role while a refresh is in flight share that single refresh.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_credential_types::provider::{self, error::CredentialsError, future, ProvideCredentials};
use aws_credential_types::Credentials;
use aws_smithy_types::retry::RetryConfig;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{MAX_SESSION_DURATION_SECS, MIN_SESSION_DURATION_SECS};
use crate::error::{AuthError, ProviderError};
use crate::models::AccountRole;
use crate::providers::classify_sdk_error;

/// Temporary credentials for one account role. Never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct CachedCredential {
    pub role: AccountRole,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
}

impl CachedCredential {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl fmt::Debug for CachedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedCredential")
            .field("role", &self.role)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"** redacted **")
            .field("session_token", &"** redacted **")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Identity service that turns a role into credentials
#[async_trait]
pub trait IdentityService: Send + Sync {
    async fn assume_role(&self, role: &AccountRole) -> Result<CachedCredential, AuthError>;
}

/// STS-backed identity service
pub struct StsIdentityService {
    client: aws_sdk_sts::Client,
    session_duration: Duration,
}

impl StsIdentityService {
    /// Build from the process's base AWS configuration. Retries are disabled:
    /// a failed assume-role fails the unit.
    pub fn new(base: &SdkConfig, session_duration: Duration) -> Self {
        let config = aws_sdk_sts::config::Builder::from(base)
            .retry_config(RetryConfig::disabled())
            .build();

        Self {
            client: aws_sdk_sts::Client::from_conf(config),
            session_duration,
        }
    }
}

#[async_trait]
impl IdentityService for StsIdentityService {
    async fn assume_role(&self, role: &AccountRole) -> Result<CachedCredential, AuthError> {
        let session_name = format!("snapshot-poller-{}", Uuid::new_v4().simple());
        let duration = self
            .session_duration
            .as_secs()
            .clamp(MIN_SESSION_DURATION_SECS, MAX_SESSION_DURATION_SECS) as i32;

        let output = self
            .client
            .assume_role()
            .role_arn(&role.role_arn)
            .role_session_name(session_name)
            .set_external_id(role.external_id.clone())
            .duration_seconds(duration)
            .send()
            .await
            .map_err(|err| match classify_sdk_error("AssumeRole", err) {
                ProviderError::Throttled { message, .. } => AuthError::Throttled {
                    role_arn: role.role_arn.clone(),
                    message,
                },
                other => AuthError::AssumeRole {
                    role_arn: role.role_arn.clone(),
                    message: other.to_string(),
                },
            })?;

        let missing = || AuthError::MissingCredentials {
            role_arn: role.role_arn.clone(),
        };
        let creds = output.credentials().ok_or_else(missing)?;
        let expiration = creds.expiration();
        let expires_at = DateTime::from_timestamp(expiration.secs(), expiration.subsec_nanos())
            .ok_or_else(missing)?;

        info!(role = %role, expires_at = %expires_at, "Assumed role");

        Ok(CachedCredential {
            role: role.clone(),
            access_key_id: creds.access_key_id().to_string(),
            secret_access_key: creds.secret_access_key().to_string(),
            session_token: creds.session_token().to_string(),
            expires_at,
        })
    }
}

type Refresh = Shared<BoxFuture<'static, Result<CachedCredential, AuthError>>>;

enum Slot {
    Ready(CachedCredential),
    Refreshing { id: u64, refresh: Refresh },
}

/// Per-role credential cache with coalesced refresh
pub struct CredentialProvider {
    identity: Arc<dyn IdentityService>,
    refresh_margin: chrono::Duration,
    slots: Mutex<HashMap<AccountRole, Slot>>,
    next_refresh: AtomicU64,
}

impl CredentialProvider {
    pub fn new(identity: Arc<dyn IdentityService>, refresh_margin: Duration) -> Self {
        Self {
            identity,
            refresh_margin: chrono::Duration::from_std(refresh_margin)
                .unwrap_or_else(|_| chrono::Duration::zero()),
            slots: Mutex::new(HashMap::new()),
            next_refresh: AtomicU64::new(0),
        }
    }

    /// Cached credentials for `role`, refreshing synchronously when they are
    /// within the refresh margin of expiry.
    pub async fn obtain(&self, role: &AccountRole) -> Result<CachedCredential, AuthError> {
        let (id, refresh) = {
            let mut slots = self.slots.lock();
            match slots.get(role) {
                Some(Slot::Ready(cred)) if self.is_fresh(cred, Utc::now()) => {
                    return Ok(cred.clone());
                }
                Some(Slot::Refreshing { id, refresh }) => {
                    debug!(role = %role, "Joining in-flight credential refresh");
                    (*id, refresh.clone())
                }
                _ => {
                    let id = self.next_refresh.fetch_add(1, Ordering::Relaxed);
                    let identity = Arc::clone(&self.identity);
                    let target = role.clone();
                    let refresh = async move { identity.assume_role(&target).await }
                        .boxed()
                        .shared();

                    debug!(role = %role, "Refreshing credentials");
                    slots.insert(
                        role.clone(),
                        Slot::Refreshing {
                            id,
                            refresh: refresh.clone(),
                        },
                    );
                    (id, refresh)
                }
            }
        };

        let result = refresh.await;
        self.settle(role, id, &result);
        result
    }

    /// Drop the cached credential for `role`
    pub fn evict(&self, role: &AccountRole) {
        if self.slots.lock().remove(role).is_some() {
            debug!(role = %role, "Evicted cached credentials");
        }
    }

    /// Number of roles with a cached or in-flight credential
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    fn is_fresh(&self, cred: &CachedCredential, now: DateTime<Utc>) -> bool {
        now < cred.expires_at - self.refresh_margin
    }

    // Only the refresh that is still registered may settle the slot
    fn settle(&self, role: &AccountRole, id: u64, result: &Result<CachedCredential, AuthError>) {
        let mut slots = self.slots.lock();
        let current = matches!(
            slots.get(role),
            Some(Slot::Refreshing { id: registered, .. }) if *registered == id
        );
        if !current {
            return;
        }

        match result {
            Ok(cred) => {
                slots.insert(role.clone(), Slot::Ready(cred.clone()));
            }
            Err(e) => {
                warn!(role = %role, error = %e, "Credential refresh failed");
                slots.remove(role);
            }
        }
    }
}

/// SDK credentials provider bound to one role.
///
/// Cached service clients sign every request with credentials obtained
/// through the shared [`CredentialProvider`], so they never outlive their keys.
#[derive(Clone)]
pub struct RoleCredentials {
    provider: Arc<CredentialProvider>,
    role: AccountRole,
}

impl RoleCredentials {
    pub fn new(provider: Arc<CredentialProvider>, role: AccountRole) -> Self {
        Self { provider, role }
    }

    async fn load(&self) -> provider::Result {
        let cred = self
            .provider
            .obtain(&self.role)
            .await
            .map_err(CredentialsError::provider_error)?;

        Ok(Credentials::new(
            cred.access_key_id,
            cred.secret_access_key,
            Some(cred.session_token),
            Some(SystemTime::from(cred.expires_at)),
            "snapshot-poller",
        ))
    }
}

impl fmt::Debug for RoleCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoleCredentials")
            .field("role", &self.role)
            .finish()
    }
}

impl ProvideCredentials for RoleCredentials {
    fn provide_credentials<'a>(&'a self) -> future::ProvideCredentials<'a>
    where
        Self: 'a,
    {
        future::ProvideCredentials::new(self.load())
    }
}
