//! Seams to the outside world.
//!
//! The engine never talks to the network or to device storage itself. It
//! consumes these traits; implementations decide how calls are encoded and
//! where credentials live.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::TransportError;
use crate::state::game::{ChangeEvent, GameConfig, Session, SessionId};
use crate::state::player::{Identity, PlayerId, Role, TokenPair};

/// Ordered change events for one session. Ends when the authority closes
/// the stream; an `Err` item terminates it.
pub type EventStream = BoxStream<'static, Result<ChangeEvent, TransportError>>;

/// Remote game operations. Every call carries the caller's access token.
#[async_trait]
pub trait GameTransport: Send + Sync + 'static {
    async fn create_session(
        &self,
        config: GameConfig,
        token: &str,
    ) -> Result<Session, TransportError>;

    async fn join_session(&self, id: &SessionId, token: &str) -> Result<Session, TransportError>;

    async fn leave_session(&self, id: &SessionId, token: &str) -> Result<Session, TransportError>;

    /// `target` is [`PlayerId::NONE`] to abstain.
    async fn vote(&self, id: &SessionId, target: PlayerId, token: &str)
        -> Result<(), TransportError>;

    /// `target` is [`PlayerId::NONE`] to abstain.
    async fn eliminate(
        &self,
        id: &SessionId,
        target: PlayerId,
        token: &str,
    ) -> Result<(), TransportError>;

    async fn advance_phase(&self, id: &SessionId, token: &str) -> Result<(), TransportError>;

    /// Roles visible to the caller.
    async fn fetch_roles(
        &self,
        id: &SessionId,
        token: &str,
    ) -> Result<HashMap<PlayerId, Role>, TransportError>;

    /// Open the push stream. The first item of every newly opened stream is
    /// a full snapshot.
    async fn observe_state(&self, id: &SessionId, token: &str)
        -> Result<EventStream, TransportError>;
}

impl std::fmt::Debug for dyn GameTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("GameTransport")
    }
}

/// Registration and token refresh.
#[async_trait]
pub trait AuthService: Send + Sync + 'static {
    async fn register(&self, name: &str) -> Result<Identity, TransportError>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, TransportError>;
}

/// Durable storage for the signed-in identity.
#[async_trait]
pub trait CredentialStore: Send + Sync + 'static {
    async fn load(&self) -> anyhow::Result<Option<Identity>>;

    async fn save(&self, identity: &Identity) -> anyhow::Result<()>;

    async fn clear(&self) -> anyhow::Result<()>;
}
