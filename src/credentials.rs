//! The signed-in identity and where it is persisted.
//!
//! [`IdentityCell`] is the single shared copy of the identity. Callers take a
//! [`Lease`] before each authenticated call; when the call reports an expired
//! token they hand the lease's generation back to [`IdentityCell::refresh`].
//! Refreshes are single-flight: the cell's lock is held for the whole
//! refresh, and a caller whose generation is already stale gets the newer
//! tokens without calling the auth service again.
//!
//! ```text
//!  task A: lease(g1) ── call ── expired ── refresh(g1) ─┬─ auth.refresh ── g2
//!  task B: lease(g1) ── call ── expired ── refresh(g1) ─┘ waits ─────────── g2 (reused)
//! ```

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{ClientError, ErrorKind, TransportError};
use crate::state::player::Identity;
use crate::tokio_tools::spawn_named_task;
use crate::transport::{AuthService, CredentialStore};

const LOG_TARGET: &str = "jinrou_sync::credentials";

/// An identity snapshot tagged with the generation it was read at.
#[derive(Debug, Clone)]
pub struct Lease {
    pub identity: Identity,
    pub generation: u64,
}

#[derive(Debug, Default)]
struct Slot {
    identity: Option<Identity>,
    /// Bumped on every change to `identity`
    generation: u64,
}

impl Slot {
    fn replace(&mut self, identity: Option<Identity>) {
        self.identity = identity;
        self.generation += 1;
    }

    fn lease(&self) -> Option<Lease> {
        self.identity.clone().map(|identity| Lease {
            identity,
            generation: self.generation,
        })
    }
}

/// Shared holder of the active identity.
pub struct IdentityCell {
    slot: Mutex<Slot>,
    store: Arc<dyn CredentialStore>,
    auth: Arc<dyn AuthService>,
    refreshes: AtomicU64,
}

impl IdentityCell {
    pub fn new(store: Arc<dyn CredentialStore>, auth: Arc<dyn AuthService>) -> Self {
        Self {
            slot: Mutex::new(Slot::default()),
            store,
            auth,
            refreshes: AtomicU64::new(0),
        }
    }

    /// Load the persisted identity, if any, replacing the in-memory one.
    pub async fn load(&self) -> Result<Option<Identity>, ClientError> {
        let mut slot = self.slot.lock().await;
        let identity = self.store.load().await.map_err(ClientError::storage)?;
        match &identity {
            Some(identity) => info!(
                target: LOG_TARGET,
                player_id = %identity.player_id,
                "loaded stored identity"
            ),
            None => debug!(target: LOG_TARGET, "no stored identity"),
        }
        slot.replace(identity.clone());
        Ok(identity)
    }

    /// Register a new user and make it the active identity.
    pub async fn register(&self, display_name: &str) -> Result<Identity, ClientError> {
        let mut slot = self.slot.lock().await;
        let identity = self.auth.register(display_name).await?;
        self.store
            .save(&identity)
            .await
            .map_err(ClientError::storage)?;
        info!(
            target: LOG_TARGET,
            player_id = %identity.player_id,
            display_name = %identity.display_name,
            "registered new identity"
        );
        slot.replace(Some(identity.clone()));
        Ok(identity)
    }

    /// Forget the identity both in memory and in the store.
    pub async fn sign_out(&self) -> Result<(), ClientError> {
        let mut slot = self.slot.lock().await;
        slot.replace(None);
        self.store.clear().await.map_err(ClientError::storage)?;
        info!(target: LOG_TARGET, "signed out");
        Ok(())
    }

    /// Snapshot of the identity for one authenticated call.
    ///
    /// Waits while a refresh is in flight, so the lease never carries tokens
    /// that are about to be replaced.
    pub async fn lease(&self) -> Result<Lease, ClientError> {
        self.slot.lock().await.lease().ok_or(ClientError::NoIdentity)
    }

    pub async fn current(&self) -> Option<Identity> {
        self.slot.lock().await.identity.clone()
    }

    /// Refresh the token pair that was current at `stale_generation`.
    ///
    /// If another caller already refreshed since then, the newer tokens are
    /// returned as-is. A refresh token the auth service rejects for anything
    /// but a transient reason becomes [`ClientError::Unauthenticated`].
    ///
    /// The exchange runs on its own task: once started it completes and
    /// stores the new pair even if the caller is dropped, since the old
    /// refresh token is already spent.
    pub async fn refresh(self: &Arc<Self>, stale_generation: u64) -> Result<Lease, ClientError> {
        let cell = Arc::clone(self);
        spawn_named_task("identity-refresh", async move {
            cell.refresh_now(stale_generation).await
        })
        .await
        .map_err(|err| ClientError::Unknown(format!("token refresh task failed: {err}")))?
    }

    async fn refresh_now(&self, stale_generation: u64) -> Result<Lease, ClientError> {
        let mut slot = self.slot.lock().await;
        if slot.generation != stale_generation {
            debug!(
                target: LOG_TARGET,
                stale_generation,
                generation = slot.generation,
                "tokens already refreshed"
            );
            return slot.lease().ok_or(ClientError::NoIdentity);
        }

        let mut identity = slot.identity.clone().ok_or(ClientError::NoIdentity)?;
        let tokens = self
            .auth
            .refresh(&identity.refresh_token)
            .await
            .map_err(refresh_failure)?;
        identity.replace_tokens(tokens);
        self.refreshes.fetch_add(1, Ordering::Relaxed);

        // the old refresh token is spent, keep the new pair even if saving fails
        if let Err(err) = self.store.save(&identity).await {
            warn!(
                target: LOG_TARGET,
                error = %format!("{err:#}"),
                "failed to persist refreshed tokens"
            );
        }

        slot.replace(Some(identity));
        info!(
            target: LOG_TARGET,
            generation = slot.generation,
            "refreshed access token"
        );
        slot.lease().ok_or(ClientError::NoIdentity)
    }

    /// Refreshes performed since the cell was created.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for IdentityCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityCell")
            .field("refreshes", &self.refresh_count())
            .finish_non_exhaustive()
    }
}

fn refresh_failure(err: TransportError) -> ClientError {
    match err.kind() {
        ErrorKind::Transient => ClientError::from(err),
        _ => {
            warn!(target: LOG_TARGET, error = %err, "refresh token rejected");
            ClientError::Unauthenticated(err.detail)
        }
    }
}

/// Identity kept in memory only.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    identity: parking_lot::Mutex<Option<Identity>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(identity: Identity) -> Self {
        Self {
            identity: parking_lot::Mutex::new(Some(identity)),
        }
    }

    pub fn snapshot(&self) -> Option<Identity> {
        self.identity.lock().clone()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn load(&self) -> anyhow::Result<Option<Identity>> {
        Ok(self.snapshot())
    }

    async fn save(&self, identity: &Identity) -> anyhow::Result<()> {
        *self.identity.lock() = Some(identity.clone());
        Ok(())
    }

    async fn clear(&self) -> anyhow::Result<()> {
        *self.identity.lock() = None;
        Ok(())
    }
}

/// Identity stored as a JSON document on disk.
#[derive(Debug, Clone)]
pub struct JsonFileCredentialStore {
    path: PathBuf,
}

impl JsonFileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CredentialStore for JsonFileCredentialStore {
    async fn load(&self) -> anyhow::Result<Option<Identity>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read {}", self.path.display()))
            }
        };
        let identity = serde_json::from_str(&raw)
            .with_context(|| format!("malformed identity in {}", self.path.display()))?;
        Ok(Some(identity))
    }

    async fn save(&self, identity: &Identity) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_vec_pretty(identity).context("failed to encode identity")?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }

    async fn clear(&self) -> anyhow::Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == IoErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("failed to remove {}", self.path.display()))
            }
        }
    }
}
