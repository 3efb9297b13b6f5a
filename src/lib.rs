//! Jinrou Sync
//!
//! Client-side state synchronization for the Jinrou social-deduction game.
//!
//! # Overview
//!
//! The authoritative game service owns every session. This crate keeps a
//! local, eventually consistent view of the one session the signed-in user
//! takes part in and tells the presentation layer when something visible
//! happened.
//!
//! - **Reconciliation** - [`state::engine::Reconciler`] applies pushed change
//!   events to the cached clock, roster and "my player", and decides which
//!   events produce a [`GameSummary`](state::GameSummary).
//!
//! - **Stream supervision** - [`supervisor::Supervisor`] keeps the push stream
//!   open, reopening it after drops and refreshing expired credentials.
//!
//! - **Credentials** - [`credentials::IdentityCell`] holds the identity and
//!   refreshes tokens single-flight; [`retry::RetryPolicy`] retries a call
//!   once after a refresh.
//!
//! - **Actions** - [`dispatch::ActionDispatcher`] sends votes, eliminations
//!   and phase advances. Their effects only show up through the stream.
//!
//! # Design Principles
//!
//! 1. **The authority is the source of truth** - actions are never applied
//!    locally.
//!
//! 2. **One owner for session state** - the engine task applies events in
//!    arrival order; readers get channels, not locks.
//!
//! 3. **No wire format** - the transport, auth and storage seams are traits.
//!
//! # Example
//!
//! ```rust
//! use jinrou_sync::state::{ChangeEvent, GameConfig, Phase, Player, Reconciler, Reconciliation, Session};
//!
//! let lobby = Session::new("game-1", GameConfig::new(3, 1))
//!     .with_player(Player::new(1u64, "Alice", 1))
//!     .with_player(Player::new(2u64, "Bob", 2));
//!
//! let mut engine = Reconciler::new();
//! assert!(matches!(engine.begin(lobby.clone(), Some(1u64.into())), Reconciliation::Publish(_)));
//!
//! // membership changes update the roster without notifying
//! let full = lobby.with_player(Player::new(3u64, "Carol", 3));
//! let outcome = engine.apply(ChangeEvent::player_joined(3u64, full.clone()));
//! assert_eq!(outcome, Reconciliation::Absorbed);
//! assert_eq!(engine.roster().len(), 3);
//!
//! // the first night waits for the role mapping
//! let night = full.with_clock(Phase::Night, 1);
//! assert!(matches!(engine.apply(ChangeEvent::snapshot(night)), Reconciliation::AwaitRoles(_)));
//! ```

pub mod client;
pub mod config;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod retry;
pub mod state;
pub mod supervisor;
pub mod tokio_tools;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use client::GameClient;
pub use config::ClientConfig;
pub use dispatch::Target;
pub use error::{ClientError, TransportError};
pub use state::*;
pub use transport::{AuthService, CredentialStore, GameTransport};
