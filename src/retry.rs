//! Token-expiry retry for authenticated calls.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::credentials::{IdentityCell, Lease};
use crate::error::{ClientError, ErrorKind, TransportError};
use crate::state::player::Identity;

const LOG_TARGET: &str = "jinrou_sync::retry";

/// Runs an authenticated call with the current tokens, refreshing and
/// retrying exactly once when the authority reports them expired.
///
/// A second expiry right after a refresh becomes
/// [`ClientError::ReauthenticationRequired`]; every other failure is
/// classified and returned unchanged.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    identity: Arc<IdentityCell>,
}

impl RetryPolicy {
    pub fn new(identity: Arc<IdentityCell>) -> Self {
        Self { identity }
    }

    pub fn identity(&self) -> &Arc<IdentityCell> {
        &self.identity
    }

    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, ClientError>
    where
        F: Fn(Identity) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        self.call_leased(op).await.map(|(value, _)| value)
    }

    /// Like [`call`](Self::call), also returning the identity generation the
    /// successful attempt used. Long-lived calls keep it to request a refresh
    /// later.
    pub async fn call_leased<T, F, Fut>(&self, op: F) -> Result<(T, u64), ClientError>
    where
        F: Fn(Identity) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let lease = self.identity.lease().await?;
        let err = match op(lease.identity).await {
            Ok(value) => return Ok((value, lease.generation)),
            Err(err) if err.kind() == ErrorKind::CredentialsExpired => err,
            Err(err) => return Err(err.into()),
        };

        debug!(target: LOG_TARGET, error = %err, "access token expired, refreshing");
        let fresh = self.identity.refresh(lease.generation).await?;
        attempt_after_refresh(fresh, op).await
    }

    /// A single attempt for a call that follows a refresh made elsewhere,
    /// such as reopening a stream that failed on an expired token. An expiry
    /// here is not refreshed again.
    pub async fn call_leased_after_refresh<T, F, Fut>(&self, op: F) -> Result<(T, u64), ClientError>
    where
        F: Fn(Identity) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let lease = self.identity.lease().await?;
        attempt_after_refresh(lease, op).await
    }
}

async fn attempt_after_refresh<T, F, Fut>(lease: Lease, op: F) -> Result<(T, u64), ClientError>
where
    F: Fn(Identity) -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    match op(lease.identity).await {
        Ok(value) => Ok((value, lease.generation)),
        Err(err) if err.kind() == ErrorKind::CredentialsExpired => {
            warn!(
                target: LOG_TARGET,
                error = %err,
                "token rejected as expired right after refresh"
            );
            Err(ClientError::ReauthenticationRequired(err.detail))
        }
        Err(err) => Err(err.into()),
    }
}
