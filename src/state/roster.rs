//! Local roster of the active session.
//!
//! The roster is the client's cached list of players. It is rebuilt from
//! each authoritative snapshot, patched by join/leave/elimination events,
//! and enriched with roles once they are revealed.

use std::collections::HashMap;

use super::game::Session;
use super::player::{Player, PlayerId, Role};

/// Players of the active session, in presentation order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    players: Vec<Player>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a roster from a session, sorted by seat index.
    pub fn from_session(session: &Session) -> Self {
        Self {
            players: session.players_by_index(),
        }
    }

    /// Insert a player unless one with the same id is already present.
    ///
    /// Returns `true` if the player was added.
    pub fn insert_if_absent(&mut self, player: Player) -> bool {
        if self.contains(player.id) {
            return false;
        }
        self.players.push(player);
        true
    }

    /// Remove a player by id.
    pub fn remove(&mut self, id: PlayerId) -> Option<Player> {
        let pos = self.players.iter().position(|p| p.id == id)?;
        Some(self.players.remove(pos))
    }

    /// Mark a player eliminated, returning the updated player.
    pub fn eliminate(&mut self, id: PlayerId) -> Option<&Player> {
        let player = self.players.iter_mut().find(|p| p.id == id)?;
        player.eliminate();
        Some(player)
    }

    /// Replace the roster with the session's, keeping roles this client
    /// already resolved for players the session reports as `Unknown`.
    pub fn replace_from(&mut self, session: &Session) {
        let known: HashMap<PlayerId, Role> = self
            .players
            .iter()
            .filter(|p| p.role.is_known())
            .map(|p| (p.id, p.role))
            .collect();

        let mut players = session.players_by_index();
        for player in &mut players {
            if player.role.is_known() {
                continue;
            }
            if let Some(role) = known.get(&player.id) {
                player.assign_role(*role);
            }
        }
        self.players = players;
    }

    /// Merge revealed roles into the roster and re-sort by seat index.
    ///
    /// Players absent from `roles` are assigned `fallback`.
    pub fn merge_roles(&mut self, roles: &HashMap<PlayerId, Role>, fallback: Role) {
        for player in &mut self.players {
            let role = roles.get(&player.id).copied().unwrap_or(fallback);
            player.assign_role(role);
        }
        self.sort_by_index();
    }

    pub fn sort_by_index(&mut self) {
        self.players.sort_by_key(|p| p.index);
    }

    pub fn get(&self, id: PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.players.iter().any(|p| p.id == id)
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    /// Check if every player's role has been revealed.
    pub fn roles_resolved(&self) -> bool {
        !self.players.is_empty() && self.players.iter().all(|p| p.role.is_known())
    }

    pub fn alive_count(&self) -> usize {
        self.players.iter().filter(|p| p.is_alive()).count()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn to_vec(&self) -> Vec<Player> {
        self.players.clone()
    }
}
