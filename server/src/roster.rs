//! Connected-user tracking for the sidebar engine
//!
//! The roster is the engine's view of who is online and where they are:
//! - Join inserts a user, quit removes them
//! - Location changes update the stored user in place
//! - The refresh tick and initialization iterate it
//!
//! It is safe to share between the tick task and event callbacks arriving
//! from other threads.

use dashmap::DashMap;
use log::info;
use shared::{SessionUser, UserId};

/// Tracks every connected user and their current location
#[derive(Debug, Default)]
pub struct Roster {
    users: DashMap<UserId, SessionUser>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connected user
    ///
    /// Returns false if the user was already present, in which case the stored
    /// entry is replaced with the newer data.
    pub fn add_user(&self, user: SessionUser) -> bool {
        let id = user.id.clone();
        let name = user.name.clone();
        let is_new = self.users.insert(id.clone(), user).is_none();
        if is_new {
            info!("User {} ({}) joined", name, id);
        }
        is_new
    }

    /// Removes a user, returning their last known state
    pub fn remove_user(&self, user_id: &UserId) -> Option<SessionUser> {
        let removed = self.users.remove(user_id).map(|(_, user)| user);
        if let Some(user) = &removed {
            info!("User {} ({}) left", user.name, user.id);
        }
        removed
    }

    /// Moves a user to a new location
    ///
    /// Returns the updated user, or None if they are not connected.
    pub fn set_location(&self, user_id: &UserId, location: &str) -> Option<SessionUser> {
        let mut user = self.users.get_mut(user_id)?;
        user.location = location.to_string();
        Some(user.clone())
    }

    pub fn get(&self, user_id: &UserId) -> Option<SessionUser> {
        self.users.get(user_id).map(|user| user.clone())
    }

    pub fn contains(&self, user_id: &UserId) -> bool {
        self.users.contains_key(user_id)
    }

    /// Snapshot of all connected users, ordered by id
    pub fn users(&self) -> Vec<SessionUser> {
        let mut users: Vec<SessionUser> = self.users.iter().map(|e| e.value().clone()).collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        users
    }

    /// Number of users in the given location
    pub fn count_in(&self, location: &str) -> usize {
        self.users
            .iter()
            .filter(|e| e.value().location == location)
            .count()
    }

    /// Returns the number of currently connected users
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Returns true if nobody is connected
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steve() -> SessionUser {
        SessionUser::new("uuid-1", "Steve", "world")
    }

    fn alex() -> SessionUser {
        SessionUser::new("uuid-2", "Alex", "world_nether")
    }

    #[test]
    fn test_roster_creation() {
        let roster = Roster::new();
        assert!(roster.is_empty());
        assert_eq!(roster.len(), 0);
    }

    #[test]
    fn test_add_user() {
        let roster = Roster::new();
        assert!(roster.add_user(steve()));
        assert!(roster.contains(&UserId::new("uuid-1")));
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn test_add_user_twice_replaces() {
        let roster = Roster::new();
        roster.add_user(steve());

        let mut moved = steve();
        moved.location = "world_nether".to_string();
        assert!(!roster.add_user(moved));

        assert_eq!(roster.len(), 1);
        assert_eq!(
            roster.get(&UserId::new("uuid-1")).unwrap().location,
            "world_nether"
        );
    }

    #[test]
    fn test_remove_user() {
        let roster = Roster::new();
        roster.add_user(steve());

        let removed = roster.remove_user(&UserId::new("uuid-1")).unwrap();
        assert_eq!(removed.name, "Steve");
        assert!(roster.is_empty());
    }

    #[test]
    fn test_remove_nonexistent_user() {
        let roster = Roster::new();
        assert!(roster.remove_user(&UserId::new("ghost")).is_none());
    }

    #[test]
    fn test_set_location() {
        let roster = Roster::new();
        roster.add_user(steve());

        let updated = roster
            .set_location(&UserId::new("uuid-1"), "world_event")
            .unwrap();
        assert_eq!(updated.location, "world_event");
        assert_eq!(roster.count_in("world_event"), 1);
        assert_eq!(roster.count_in("world"), 0);

        assert!(roster.set_location(&UserId::new("ghost"), "world").is_none());
    }

    #[test]
    fn test_users_sorted_by_id() {
        let roster = Roster::new();
        roster.add_user(alex());
        roster.add_user(steve());

        let users = roster.users();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].name, "Steve");
        assert_eq!(users[1].name, "Alex");
    }
}
