//! Session state for the local view of a game.
//!
//! - `player` - players, roles, factions and the signed-in identity
//! - `game` - session clock, change events and summaries
//! - `roster` - ordered player list with role carry-over
//! - `engine` - the reconciler that applies change events
//! - `connection` - health of the session's push stream
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                          Reconciler                            │
//! │                                                                │
//! │  ChangeEvent ──▶ guards ──▶ Session clock ──▶ GameSummary      │
//! │                  (session,     │                 │             │
//! │                   ended,       ▼                 ▼             │
//! │                   stale day)  Roster ──────▶ my player         │
//! │                                 ▲                              │
//! │              role mapping ──────┘  (first night only)          │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing in this module performs I/O; the client drives it from its
//! engine task.

pub mod connection;
pub mod engine;
pub mod game;
pub mod player;
pub mod roster;

// Re-export commonly used types
pub use connection::{SubscriptionStatus, SubscriptionTracker};
pub use engine::{IgnoreReason, PendingSummary, Reconciler, Reconciliation, SessionStatus};
pub use game::{
    ChangeEvent, ChangeKind, GameConfig, GameSummary, InvalidGameConfig, Phase, Session,
    SessionId, MIN_PLAYERS,
};
pub use player::{Faction, Identity, Player, PlayerId, Role, TokenPair};
pub use roster::Roster;
