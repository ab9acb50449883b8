//! Types shared between the sidebar engine and whatever host embeds it.
//!
//! Nothing in here knows about ticks or surfaces: it is the data the engine
//! reads (configuration, persisted preferences) and the pure text helpers it
//! applies to every rendered line.

pub mod config;
pub mod markup;
pub mod preference;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use config::{ConfigError, ConfigSource, JsonConfigFile, MemoryConfig, SidebarConfig};
pub use markup::{translate_markup, truncate_entry, CODE_CHAR, MAX_ENTRY_LEN, RESET_MARKER};
pub use preference::{
    FilePreferenceStore, MemoryPreferenceStore, PreferenceRecord, PreferenceStore, StoreError,
};

/// Host ticks per second. Intervals in the configuration are counted in ticks.
pub const TICKS_PER_SECOND: u64 = 20;
/// Length of one host tick in milliseconds.
pub const TICK_MILLIS: u64 = 1000 / TICKS_PER_SECOND;
/// Ticks to wait after a join before the sidebar is built.
pub const JOIN_GRACE_TICKS: u64 = 10;

/// Opaque, stable identity of a user across sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A connected user as seen by the engine: who they are and where they stand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub id: UserId,
    pub name: String,
    /// Identifier of the world/location the user is currently in.
    pub location: String,
}

impl SessionUser {
    pub fn new(id: impl Into<UserId>, name: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            location: location.into(),
        }
    }
}

/// Converts a tick count into wall-clock time.
pub fn ticks_to_duration(ticks: u64) -> std::time::Duration {
    std::time::Duration::from_millis(ticks * TICK_MILLIS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_user_creation() {
        let user = SessionUser::new("uuid-1", "Steve", "world");
        assert_eq!(user.id, UserId::new("uuid-1"));
        assert_eq!(user.name, "Steve");
        assert_eq!(user.location, "world");
    }

    #[test]
    fn test_user_id_display() {
        assert_eq!(UserId::from("abc").to_string(), "abc");
        assert_eq!(UserId::new("abc").as_str(), "abc");
    }

    #[test]
    fn test_ticks_to_duration() {
        assert_eq!(ticks_to_duration(20).as_millis(), 1000);
        assert_eq!(ticks_to_duration(JOIN_GRACE_TICKS).as_millis(), 500);
        assert_eq!(ticks_to_duration(0).as_millis(), 0);
    }
}
