//! Session and identity issuance. Deliberately minimal: durable session
//! storage, authentication, and session cleanup are external collaborators
//! per scope (§1) — this module only mints the opaque ids the façade and the
//! engine trade in, and remembers what a session asked for at creation.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerId(pub Uuid);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemId(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl PlayerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PlayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl ItemId {
    pub fn new(item_id: impl Into<String>) -> Self {
        Self(item_id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `SessionId` is 1:1 with `PlayerId` in this in-memory model — there is no
/// durable session store, so a session handle and the player it names share
/// the same id space.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub player_id: PlayerId,
    /// The balance the caller asked to start with. Honored best-effort: the
    /// engine's per-item workers seed a player's account lazily, from the
    /// engine-wide `Config::starting_balance`, the first time that player
    /// touches that item — a session's requested balance is not wired into
    /// that path, since doing so would mean every worker consulting a
    /// session registry it otherwise has no reason to know about. Recorded
    /// here so a caller can still read back what was asked for.
    pub requested_initial_balance: f64,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, SessionInfo>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_session(&self, initial_balance: f64) -> (SessionId, PlayerId) {
        let player_id = PlayerId::new();
        let session_id = SessionId(player_id.0);
        self.sessions.write().insert(
            session_id,
            SessionInfo {
                player_id,
                requested_initial_balance: initial_balance,
            },
        );
        (session_id, player_id)
    }

    pub fn player_for(&self, session_id: SessionId) -> Option<PlayerId> {
        self.sessions.read().get(&session_id).map(|s| s.player_id)
    }

    pub fn info(&self, session_id: SessionId) -> Option<SessionInfo> {
        self.sessions.read().get(&session_id).cloned()
    }

    pub fn end_session(&self, session_id: SessionId) {
        self.sessions.write().remove(&session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_session_issues_a_fresh_player_each_time() {
        let registry = SessionRegistry::new();
        let (s1, p1) = registry.create_session(1000.0);
        let (s2, p2) = registry.create_session(2000.0);
        assert_ne!(s1, s2);
        assert_ne!(p1, p2);
    }

    #[test]
    fn player_for_resolves_an_active_session() {
        let registry = SessionRegistry::new();
        let (session_id, player_id) = registry.create_session(500.0);
        assert_eq!(registry.player_for(session_id), Some(player_id));
    }

    #[test]
    fn ended_session_no_longer_resolves() {
        let registry = SessionRegistry::new();
        let (session_id, _) = registry.create_session(500.0);
        registry.end_session(session_id);
        assert_eq!(registry.player_for(session_id), None);
    }
}
