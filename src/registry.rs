//! Connection Registry
//!
//! Maps each online user to the transport connection currently speaking for
//! them. A newer registration for the same user silently displaces the older
//! one; the displaced connection is left open.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use uuid::Uuid;

/// Server-assigned handle for one transport connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `userId → ConnectionId` map.
///
/// Holds no lock of its own; the hub serializes every call through its state lock.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    users: HashMap<String, ConnectionId>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the mapping, returning the previous connection if any.
    ///
    /// A repeated register from the same connection returns that connection.
    pub fn register(&mut self, user_id: &str, connection_id: ConnectionId) -> Option<ConnectionId> {
        self.users.insert(user_id.to_string(), connection_id)
    }

    /// Remove every user bound to `connection_id`, returning the removed user ids
    pub fn unregister(&mut self, connection_id: ConnectionId) -> Vec<String> {
        let removed: Vec<String> = self
            .users
            .iter()
            .filter(|(_, conn)| **conn == connection_id)
            .map(|(user_id, _)| user_id.clone())
            .collect();
        for user_id in &removed {
            self.users.remove(user_id);
        }
        removed
    }

    pub fn resolve(&self, user_id: &str) -> Option<ConnectionId> {
        self.users.get(user_id).copied()
    }

    /// All registered user ids, sorted
    pub fn snapshot(&self) -> BTreeSet<String> {
        self.users.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_resolve() {
        let mut registry = ConnectionRegistry::new();
        let c1 = ConnectionId::new();

        assert_eq!(registry.register("u1", c1), None);
        assert_eq!(registry.resolve("u1"), Some(c1));
        assert_eq!(registry.resolve("u2"), None);
    }

    #[test]
    fn test_reregistration_replaces_mapping() {
        let mut registry = ConnectionRegistry::new();
        let old = ConnectionId::new();
        let new = ConnectionId::new();

        registry.register("u1", old);
        assert_eq!(registry.register("u1", new), Some(old));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve("u1"), Some(new));
    }

    #[test]
    fn test_same_connection_registered_twice_returns_itself() {
        let mut registry = ConnectionRegistry::new();
        let c1 = ConnectionId::new();

        registry.register("u1", c1);
        assert_eq!(registry.register("u1", c1), Some(c1));
        assert_eq!(registry.resolve("u1"), Some(c1));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister_removes_every_user_on_connection() {
        let mut registry = ConnectionRegistry::new();
        let shared = ConnectionId::new();
        let other = ConnectionId::new();

        registry.register("u1", shared);
        registry.register("u2", shared);
        registry.register("u3", other);

        let mut removed = registry.unregister(shared);
        removed.sort();
        assert_eq!(removed, vec!["u1".to_string(), "u2".to_string()]);
        assert_eq!(registry.snapshot().into_iter().collect::<Vec<_>>(), vec!["u3"]);
    }

    #[test]
    fn test_unregister_unknown_connection_is_noop() {
        let mut registry = ConnectionRegistry::new();
        registry.register("u1", ConnectionId::new());

        assert!(registry.unregister(ConnectionId::new()).is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_stale_connection_close_keeps_newer_mapping() {
        let mut registry = ConnectionRegistry::new();
        let old = ConnectionId::new();
        let new = ConnectionId::new();

        registry.register("u1", old);
        registry.register("u1", new);

        assert!(registry.unregister(old).is_empty());
        assert_eq!(registry.resolve("u1"), Some(new));
    }

    #[test]
    fn test_snapshot_counts_registrations_minus_unregistrations() {
        let mut registry = ConnectionRegistry::new();
        let conns: Vec<ConnectionId> = (0..5).map(|_| ConnectionId::new()).collect();
        for (i, conn) in conns.iter().enumerate() {
            registry.register(&format!("u{}", i), *conn);
        }

        registry.unregister(conns[1]);
        registry.unregister(conns[3]);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert!(snapshot.contains("u0"));
        assert!(!snapshot.contains("u1"));
    }

    #[test]
    fn test_resolve_tracks_latest_register_across_sequence() {
        let mut registry = ConnectionRegistry::new();
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        let c = ConnectionId::new();

        registry.register("u1", a);
        registry.register("u1", b);
        registry.unregister(a);
        assert_eq!(registry.resolve("u1"), Some(b));

        registry.unregister(b);
        assert_eq!(registry.resolve("u1"), None);

        registry.register("u1", c);
        assert_eq!(registry.resolve("u1"), Some(c));
    }

    #[test]
    fn test_connection_id_display_is_uuid() {
        let display = ConnectionId::new().to_string();
        assert_eq!(display.len(), 36);
    }
}
