//! Session state as published by the authority.
//!
//! Tracks the session config, phase/day clock and roster, plus the change
//! events the authority pushes and the summary derived from them.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::player::{Faction, Player, PlayerId};

/// Minimum players per session.
pub const MIN_PLAYERS: u32 = 3;

/// Authority-assigned session identifier (a six digit code).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Session parameters chosen by the creator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GameConfig {
    pub player_count: u32,
    pub special_role_count: u32,
}

/// A [`GameConfig`] the authority would reject.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidGameConfig {
    #[error("at least 3 players are required, got {0}")]
    TooFewPlayers(u32),
    #[error("at least one special role is required")]
    NoSpecialRole,
    #[error("{special} special roles need more than twice as many players, got {players}")]
    TooManySpecialRoles { special: u32, players: u32 },
}

impl GameConfig {
    pub fn new(player_count: u32, special_role_count: u32) -> Self {
        Self {
            player_count,
            special_role_count,
        }
    }

    /// Check the config against the authority's session rules.
    pub fn validate(&self) -> Result<(), InvalidGameConfig> {
        if self.player_count < MIN_PLAYERS {
            return Err(InvalidGameConfig::TooFewPlayers(self.player_count));
        }
        if self.special_role_count == 0 {
            return Err(InvalidGameConfig::NoSpecialRole);
        }
        if 2 * self.special_role_count >= self.player_count {
            return Err(InvalidGameConfig::TooManySpecialRoles {
                special: self.special_role_count,
                players: self.player_count,
            });
        }
        Ok(())
    }
}

/// Session phase.
///
/// ```text
/// Start ──▶ Night(1) ──▶ Noon(1) ──▶ Night(2) ──▶ Noon(2) ──▶ …
///              │            │           │            │
///              └────────────┴─────┬─────┴────────────┘
///                                 ▼
///                                End
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Phase {
    /// Waiting for the roster to fill
    #[default]
    Start,
    Night,
    Noon,
    End,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Night => "night",
            Self::Noon => "noon",
            Self::End => "end",
        }
    }

    /// Check if the phase is terminal (the game is over).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::End)
    }

    /// Check whether `(next, next_day)` is the canonical successor of
    /// `(self, day)`. Staying in place counts as canonical.
    pub fn is_canonical_step(&self, day: u32, next: Phase, next_day: u32) -> bool {
        use Phase::*;

        if *self == next && day == next_day {
            return true;
        }

        match (self, next) {
            (Start, Night) => next_day == 1,
            (Night, Noon) => next_day == day,
            (Noon, Night) => next_day == day + 1,
            (Night, End) | (Noon, End) => next_day == day,
            _ => false,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full session state as the authority committed it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,

    pub config: GameConfig,

    pub phase: Phase,

    pub day: u32,

    /// Players indexed by id
    pub roster: HashMap<PlayerId, Player>,
}

impl Session {
    pub fn new(id: impl Into<SessionId>, config: GameConfig) -> Self {
        Self {
            id: id.into(),
            config,
            phase: Phase::Start,
            day: 0,
            roster: HashMap::new(),
        }
    }

    pub fn with_clock(mut self, phase: Phase, day: u32) -> Self {
        self.phase = phase;
        self.day = day;
        self
    }

    pub fn with_player(mut self, player: Player) -> Self {
        self.roster.insert(player.id, player);
        self
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.roster.get(&id)
    }

    /// Players sorted by seat index.
    pub fn players_by_index(&self) -> Vec<Player> {
        let mut players: Vec<Player> = self.roster.values().cloned().collect();
        players.sort_by_key(|p| p.index);
        players
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// What caused a [`ChangeEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    PlayerJoined { player_id: PlayerId },
    PlayerLeft { player_id: PlayerId },
    PlayerEliminated { player_id: PlayerId },
    GameEnded { winning_faction: Faction },
    /// Phase, day or roster changed with no structurally special cause
    Snapshot,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlayerJoined { .. } => "player_joined",
            Self::PlayerLeft { .. } => "player_left",
            Self::PlayerEliminated { .. } => "player_eliminated",
            Self::GameEnded { .. } => "game_ended",
            Self::Snapshot => "snapshot",
        }
    }
}

/// One authoritative transition: the post-change session, the phase it
/// moved from, and the cause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub session: Session,
    pub previous_phase: Phase,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, session: Session, previous_phase: Phase) -> Self {
        Self {
            kind,
            session,
            previous_phase,
        }
    }

    /// A plain snapshot whose previous phase equals its current one.
    pub fn snapshot(session: Session) -> Self {
        let previous_phase = session.phase;
        Self::new(ChangeKind::Snapshot, session, previous_phase)
    }

    pub fn player_joined(player_id: impl Into<PlayerId>, session: Session) -> Self {
        let previous_phase = session.phase;
        Self::new(
            ChangeKind::PlayerJoined {
                player_id: player_id.into(),
            },
            session,
            previous_phase,
        )
    }

    pub fn player_left(player_id: impl Into<PlayerId>, session: Session) -> Self {
        let previous_phase = session.phase;
        Self::new(
            ChangeKind::PlayerLeft {
                player_id: player_id.into(),
            },
            session,
            previous_phase,
        )
    }

    pub fn player_eliminated(
        player_id: impl Into<PlayerId>,
        session: Session,
        previous_phase: Phase,
    ) -> Self {
        Self::new(
            ChangeKind::PlayerEliminated {
                player_id: player_id.into(),
            },
            session,
            previous_phase,
        )
    }

    pub fn game_ended(winning_faction: Faction, session: Session, previous_phase: Phase) -> Self {
        Self::new(
            ChangeKind::GameEnded { winning_faction },
            session,
            previous_phase,
        )
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session.id
    }
}

/// UI-facing projection of the session, replaced on every user-visible
/// transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GameSummary {
    pub session_id: SessionId,
    pub config: GameConfig,
    pub phase: Phase,
    pub day: u32,
    /// Player eliminated by the transition that produced this summary
    pub eliminated_player: Option<Player>,
    pub winning_faction: Option<Faction>,
    /// Whether the local player is on the winning side, once known
    pub local_won: Option<bool>,
}

impl GameSummary {
    pub fn from_session(session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
            config: session.config,
            phase: session.phase,
            day: session.day,
            eliminated_player: None,
            winning_faction: None,
            local_won: None,
        }
    }

    pub fn with_eliminated(mut self, player: Player) -> Self {
        self.eliminated_player = Some(player);
        self
    }

    /// Record the winner, judged against the local player's faction.
    pub fn with_winner(mut self, winning_faction: Faction, local_faction: Faction) -> Self {
        self.winning_faction = Some(winning_faction);
        self.local_won = Some(winning_faction == local_faction);
        self
    }

    /// Check if the phase or day moved relative to `(phase, day)`.
    pub fn moved_from(&self, phase: Phase, day: u32) -> bool {
        self.phase != phase || self.day != day
    }

    pub fn is_final(&self) -> bool {
        self.phase.is_terminal() || self.winning_faction.is_some()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "session_id": self.session_id.as_str(),
            "player_count": self.config.player_count,
            "special_role_count": self.config.special_role_count,
            "phase": self.phase.as_str(),
            "day": self.day,
            "eliminated_player": self.eliminated_player.as_ref().map(|p| p.to_json()),
            "winning_faction": self.winning_faction.map(|f| f.as_str()),
            "local_won": self.local_won
        })
    }
}
