//! Player actions sent to the authority.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::ClientError;
use crate::retry::RetryPolicy;
use crate::state::game::SessionId;
use crate::state::player::PlayerId;
use crate::transport::GameTransport;

const LOG_TARGET: &str = "jinrou_sync::dispatch";

/// Who a vote or elimination is aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Player(PlayerId),
    Abstain,
}

impl Target {
    /// Wire form; abstention is encoded as [`PlayerId::NONE`].
    pub fn player_id(&self) -> PlayerId {
        match self {
            Self::Player(id) => *id,
            Self::Abstain => PlayerId::NONE,
        }
    }
}

impl From<Option<PlayerId>> for Target {
    fn from(id: Option<PlayerId>) -> Self {
        match id {
            Some(id) if !id.is_none() => Self::Player(id),
            _ => Self::Abstain,
        }
    }
}

impl From<PlayerId> for Target {
    fn from(id: PlayerId) -> Self {
        Some(id).into()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Player(id) => write!(f, "player {id}"),
            Self::Abstain => f.write_str("abstain"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Vote(Target),
    Eliminate(Target),
    Advance,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vote(_) => "vote",
            Self::Eliminate(_) => "eliminate",
            Self::Advance => "advance",
        }
    }
}

/// Sends actions for the active session.
///
/// The outcome of an action is never applied locally; it arrives through the
/// session stream like every other change.
#[derive(Debug, Clone)]
pub struct ActionDispatcher {
    transport: Arc<dyn GameTransport>,
    policy: RetryPolicy,
}

impl ActionDispatcher {
    pub fn new(transport: Arc<dyn GameTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    /// Send one action. Resolves to [`ClientError::Cancelled`] if `cancel`
    /// fires first, which happens when the session is left or replaced.
    pub async fn dispatch(
        &self,
        session_id: &SessionId,
        action: Action,
        cancel: &CancellationToken,
    ) -> Result<(), ClientError> {
        let transport = self.transport.clone();
        let call = self.policy.call(|identity| {
            let transport = transport.clone();
            let session_id = session_id.clone();
            async move {
                let token = identity.access_token.as_str();
                match action {
                    Action::Vote(target) => {
                        transport.vote(&session_id, target.player_id(), token).await
                    }
                    Action::Eliminate(target) => {
                        transport
                            .eliminate(&session_id, target.player_id(), token)
                            .await
                    }
                    Action::Advance => transport.advance_phase(&session_id, token).await,
                }
            }
        });

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ClientError::Cancelled),
            result = call => result,
        };

        match &result {
            Ok(()) => info!(
                target: LOG_TARGET,
                session_id = %session_id,
                action = action.as_str(),
                "action accepted"
            ),
            Err(err) if err.is_cancelled() => info!(
                target: LOG_TARGET,
                session_id = %session_id,
                action = action.as_str(),
                "action cancelled"
            ),
            Err(err) => warn!(
                target: LOG_TARGET,
                session_id = %session_id,
                action = action.as_str(),
                error = %err,
                "action failed"
            ),
        }
        result
    }

    pub async fn vote(
        &self,
        session_id: &SessionId,
        target: Target,
        cancel: &CancellationToken,
    ) -> Result<(), ClientError> {
        self.dispatch(session_id, Action::Vote(target), cancel).await
    }

    pub async fn eliminate(
        &self,
        session_id: &SessionId,
        target: Target,
        cancel: &CancellationToken,
    ) -> Result<(), ClientError> {
        self.dispatch(session_id, Action::Eliminate(target), cancel)
            .await
    }

    pub async fn advance(
        &self,
        session_id: &SessionId,
        cancel: &CancellationToken,
    ) -> Result<(), ClientError> {
        self.dispatch(session_id, Action::Advance, cancel).await
    }
}
