//! Global player-name and session registry (§4.3, §9): name reservation
//! used to reject duplicate connections and enforce the user limit, plus a
//! name -> session lookup used by modchannel fan-out and moderation.
//!
//! Grounded on `players.go`.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use lazy_static::lazy_static;

use crate::client::ClientSession;

lazy_static! {
    static ref NAMES: DashSet<String> = DashSet::new();
    static ref SESSIONS: DashMap<String, Arc<ClientSession>> = DashMap::new();
}

/// Reserves a player name; returns `false` if it's already taken.
pub fn try_register(name: &str) -> bool {
    NAMES.insert(name.to_string())
}

pub fn unregister(name: &str) {
    NAMES.remove(name);
    SESSIONS.remove(name);
}

pub fn count() -> usize {
    NAMES.len()
}

/// Makes a session reachable by player name. Called once the client has
/// both a name and is past authentication, not at raw name reservation
/// time.
pub fn attach(cc: Arc<ClientSession>) {
    let name = cc.name();
    SESSIONS.insert(name, cc);
}

pub fn find(name: &str) -> Option<Arc<ClientSession>> {
    SESSIONS.get(name).map(|e| e.clone())
}

pub fn clients() -> Vec<Arc<ClientSession>> {
    SESSIONS.iter().map(|e| e.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_name_rejected_until_unregistered() {
        assert!(try_register("players_test_alice"));
        assert!(!try_register("players_test_alice"));
        unregister("players_test_alice");
        assert!(try_register("players_test_alice"));
        unregister("players_test_alice");
    }

    #[test]
    fn count_reflects_registrations() {
        let before = count();
        assert!(try_register("players_test_bob"));
        assert_eq!(count(), before + 1);
        unregister("players_test_bob");
        assert_eq!(count(), before);
    }
}
