//! Reconciliation of authoritative change events against the local view.
//!
//! [`Reconciler`] is the synchronous core of the engine. It owns the cached
//! session clock, roster and "my player", applies one [`ChangeEvent`] at a
//! time and decides what, if anything, subscribers should see.
//!
//! # Session state machine
//!
//! ```text
//! ┌───────────┐  begin (create/join)  ┌────────┐  GameEnded  ┌───────┐
//! │ NoSession │──────────────────────▶│ Active │────────────▶│ Ended │
//! └───────────┘                       └────────┘             └───────┘
//!       ▲            reset                 │                      │
//!       └──────────────────────────────────┴──────────────────────┘
//! ```
//!
//! # First night
//!
//! The broadcast snapshot for `(Night, 1)` withholds roles. The reconciler
//! answers such an event with [`Reconciliation::AwaitRoles`]; the caller
//! fetches the role mapping and hands it back through
//! [`Reconciler::resolve_roles`], which is the only way that summary can be
//! produced.

use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use super::game::{ChangeEvent, ChangeKind, GameSummary, Phase, Session, SessionId};
use super::player::{Player, PlayerId, Role};
use super::roster::Roster;

const LOG_TARGET: &str = "jinrou_sync::state::engine";

/// Where the engine is in the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    NoSession,
    Active,
    /// The game is over; a new session must be created or joined
    Ended,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoSession => "no_session",
            Self::Active => "active",
            Self::Ended => "ended",
        }
    }
}

/// Why an event was dropped without touching state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    NoSession,
    /// Event belongs to a different session than the active one
    ForeignSession,
    /// The session already ended
    Ended,
    /// Day counter went backwards
    StaleDay,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSession => write!(f, "no active session"),
            Self::ForeignSession => write!(f, "event for another session"),
            Self::Ended => write!(f, "session already ended"),
            Self::StaleDay => write!(f, "day counter regressed"),
        }
    }
}

/// A first-night summary held back until roles are known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSummary {
    summary: GameSummary,
}

impl PendingSummary {
    pub fn session_id(&self) -> &SessionId {
        &self.summary.session_id
    }
}

/// Outcome of applying one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// State changed, nothing user-visible
    Absorbed,
    /// Event dropped
    Ignored(IgnoreReason),
    /// Notify subscribers with this summary
    Publish(GameSummary),
    /// Fetch roles, then call [`Reconciler::resolve_roles`]
    AwaitRoles(PendingSummary),
}

/// Local view of the active session.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    status: SessionStatus,

    /// Latest authoritative session (clock and config; the roster lives in
    /// `roster`)
    session: Option<Session>,

    roster: Roster,

    local_player_id: Option<PlayerId>,

    my_player: Option<Player>,

    summary: Option<GameSummary>,

    /// Roles revealed for this session
    roles_resolved: bool,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a session from a create/join response.
    ///
    /// The response is absorbed as a full snapshot. If the join completed the
    /// roster, the session may already be on its first night.
    pub fn begin(&mut self, session: Session, local_player_id: Option<PlayerId>) -> Reconciliation {
        *self = Self {
            status: SessionStatus::Active,
            local_player_id,
            ..Self::default()
        };

        self.roster = Roster::from_session(&session);
        self.refresh_my_player();
        let summary = GameSummary::from_session(&session);
        self.session = Some(session);

        self.finish(summary)
    }

    /// Apply one change event.
    pub fn apply(&mut self, event: ChangeEvent) -> Reconciliation {
        let current = match (&self.status, &self.session) {
            (SessionStatus::NoSession, _) | (_, None) => {
                return Reconciliation::Ignored(IgnoreReason::NoSession)
            }
            (SessionStatus::Ended, _) => return Reconciliation::Ignored(IgnoreReason::Ended),
            (SessionStatus::Active, Some(session)) => session,
        };

        if event.session.id != current.id {
            return Reconciliation::Ignored(IgnoreReason::ForeignSession);
        }
        if event.session.day < current.day {
            return Reconciliation::Ignored(IgnoreReason::StaleDay);
        }
        if !current
            .phase
            .is_canonical_step(current.day, event.session.phase, event.session.day)
        {
            // a resubscription snapshot may skip phases that were missed
            debug!(
                target: LOG_TARGET,
                session_id = %current.id,
                from = %current.phase,
                from_day = current.day,
                to = %event.session.phase,
                to_day = event.session.day,
                "non-canonical phase step"
            );
        }

        let ChangeEvent { kind, session, .. } = event;

        match kind {
            ChangeKind::PlayerJoined { player_id } => {
                if let Some(player) = session.player(player_id) {
                    if self.roster.insert_if_absent(player.clone()) {
                        self.roster.sort_by_index();
                    }
                }
                self.session = Some(session);
                self.refresh_my_player();
                Reconciliation::Absorbed
            }
            ChangeKind::PlayerLeft { player_id } => {
                self.roster.remove(player_id);
                self.session = Some(session);
                self.refresh_my_player();
                Reconciliation::Absorbed
            }
            ChangeKind::PlayerEliminated { player_id } => {
                self.roster.replace_from(&session);
                let eliminated = self.roster.eliminate(player_id).cloned();
                self.refresh_my_player();

                let mut summary = GameSummary::from_session(&session);
                if let Some(player) = eliminated {
                    summary = summary.with_eliminated(player);
                }
                self.session = Some(session);
                self.finish(summary)
            }
            ChangeKind::GameEnded { winning_faction } => {
                self.roster.replace_from(&session);
                self.refresh_my_player();
                self.status = SessionStatus::Ended;

                let mut summary = GameSummary::from_session(&session);
                if let Some(me) = &self.my_player {
                    summary = summary.with_winner(winning_faction, me.faction);
                }
                self.session = Some(session);
                self.finish(summary)
            }
            ChangeKind::Snapshot => {
                self.roster.replace_from(&session);
                self.refresh_my_player();
                let summary = GameSummary::from_session(&session);
                self.session = Some(session);
                self.finish(summary)
            }
        }
    }

    /// Merge the revealed role mapping and release the held-back summary.
    ///
    /// Players the authority does not reveal are presented as
    /// [`Role::Ordinary`]. Returns `None` if the session changed since the
    /// summary was held back.
    pub fn resolve_roles(
        &mut self,
        pending: PendingSummary,
        roles: &HashMap<PlayerId, Role>,
    ) -> Option<GameSummary> {
        if self.session_id() != Some(pending.session_id()) {
            return None;
        }

        self.roster.merge_roles(roles, Role::Ordinary);
        self.roles_resolved = true;
        self.refresh_my_player();

        let summary = pending.summary;
        self.summary = Some(summary.clone());
        Some(summary)
    }

    /// Drop the session and return to `NoSession`.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn finish(&mut self, summary: GameSummary) -> Reconciliation {
        if summary.phase == Phase::Night && summary.day == 1 && !self.roles_resolved {
            return Reconciliation::AwaitRoles(PendingSummary { summary });
        }
        self.summary = Some(summary.clone());
        Reconciliation::Publish(summary)
    }

    fn refresh_my_player(&mut self) {
        self.my_player = self
            .local_player_id
            .and_then(|id| self.roster.get(id).cloned());
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session.as_ref().map(|s| &s.id)
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn my_player(&self) -> Option<&Player> {
        self.my_player.as_ref()
    }

    pub fn local_player_id(&self) -> Option<PlayerId> {
        self.local_player_id
    }

    /// Latest published summary.
    pub fn summary(&self) -> Option<&GameSummary> {
        self.summary.as_ref()
    }

    pub fn roles_resolved(&self) -> bool {
        self.roles_resolved
    }
}
