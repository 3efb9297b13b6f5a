//! Players, roles and the signed-in identity.
//!
//! A player's role is hidden until the authority reveals it on the first
//! night. Until then every player carries [`Role::Unknown`] and
//! [`Faction::Neutral`].
//!
//! ```text
//!   Role::Unknown  ──▶ Faction::Neutral
//!   Role::Ordinary ──▶ Faction::Ordinary
//!   Role::Special  ──▶ Faction::Special
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Authority-assigned player identifier.
///
/// `0` is never assigned to a real player; it is the sentinel used for
/// "no player" (abstaining from a vote or a night elimination).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub u64);

impl PlayerId {
    /// The "no player" sentinel.
    pub const NONE: PlayerId = PlayerId(0);

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }
}

impl From<u64> for PlayerId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role dealt to a player at the start of the first night.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Role {
    /// Not yet revealed to this client
    #[default]
    Unknown,
    /// Villager
    Ordinary,
    /// The hidden adversarial role
    Special,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Ordinary => "ordinary",
            Self::Special => "special",
        }
    }

    /// Win-condition grouping this role belongs to.
    pub fn faction(&self) -> Faction {
        match self {
            Self::Unknown => Faction::Neutral,
            Self::Ordinary => Faction::Ordinary,
            Self::Special => Faction::Special,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Faction a player wins or loses with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Faction {
    #[default]
    Neutral,
    Ordinary,
    Special,
}

impl Faction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Neutral => "neutral",
            Self::Ordinary => "ordinary",
            Self::Special => "special",
        }
    }
}

impl fmt::Display for Faction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A player as seen by this client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,

    pub name: String,

    /// Seat number, 1-based, unique within a session
    pub index: u32,

    pub is_eliminated: bool,

    pub role: Role,

    pub faction: Faction,
}

impl Player {
    /// Create a player whose role is still hidden.
    pub fn new(id: impl Into<PlayerId>, name: impl Into<String>, index: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            index,
            is_eliminated: false,
            role: Role::Unknown,
            faction: Faction::Neutral,
        }
    }

    /// Assign a role, deriving the faction from it.
    pub fn with_role(mut self, role: Role) -> Self {
        self.assign_role(role);
        self
    }

    pub fn assign_role(&mut self, role: Role) {
        self.role = role;
        self.faction = role.faction();
    }

    pub fn eliminate(&mut self) {
        self.is_eliminated = true;
    }

    pub fn is_alive(&self) -> bool {
        !self.is_eliminated
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id.0,
            "name": self.name,
            "index": self.index,
            "is_eliminated": self.is_eliminated,
            "role": self.role.as_str(),
            "faction": self.faction.as_str()
        })
    }
}

/// Access and refresh token returned by the auth service.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair").finish_non_exhaustive()
    }
}

/// The signed-in user.
///
/// Exactly one identity is active at a time. Its token pair is replaced in
/// place whenever a refresh succeeds.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub player_id: PlayerId,

    pub display_name: String,

    pub access_token: String,

    pub refresh_token: String,

    /// Last successful token refresh
    #[serde(default)]
    pub refreshed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Identity {
    pub fn new(
        player_id: impl Into<PlayerId>,
        display_name: impl Into<String>,
        tokens: TokenPair,
    ) -> Self {
        Self {
            player_id: player_id.into(),
            display_name: display_name.into(),
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            refreshed_at: None,
        }
    }

    /// Replace the token pair after a successful refresh.
    pub fn replace_tokens(&mut self, tokens: TokenPair) {
        self.access_token = tokens.access_token;
        self.refresh_token = tokens.refresh_token;
        self.refreshed_at = Some(chrono::Utc::now());
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // tokens stay out of logs
        f.debug_struct("Identity")
            .field("player_id", &self.player_id)
            .field("display_name", &self.display_name)
            .field("refreshed_at", &self.refreshed_at)
            .finish_non_exhaustive()
    }
}
