//! Persisted per-user sidebar preference.
//!
//! The engine only needs three primitives (query by user, insert, update by
//! record id) and builds its upsert on top of them, so any keyed table can
//! back it.

use crate::UserId;
use bincode::{deserialize, serialize};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("preference store IO failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("preference encoding failed: {0}")]
    Encode(#[from] bincode::Error),
    #[error("no preference record with id {0}")]
    MissingRecord(u64),
    #[error("preference store unavailable: {0}")]
    Unavailable(String),
}

/// One row of the preference table. At most one exists per user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferenceRecord {
    pub id: u64,
    pub user_id: UserId,
    pub enabled: bool,
}

pub trait PreferenceStore: Send + Sync {
    fn find_by_user(&self, user_id: &UserId) -> Result<Option<PreferenceRecord>, StoreError>;

    fn insert(&self, user_id: &UserId, enabled: bool) -> Result<PreferenceRecord, StoreError>;

    fn update_enabled(&self, id: u64, enabled: bool) -> Result<(), StoreError>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct PreferenceTable {
    next_id: u64,
    records: Vec<PreferenceRecord>,
}

impl PreferenceTable {
    fn find(&self, user_id: &UserId) -> Option<PreferenceRecord> {
        self.records.iter().find(|r| &r.user_id == user_id).cloned()
    }

    fn insert(&mut self, user_id: &UserId, enabled: bool) -> PreferenceRecord {
        self.next_id += 1;
        let record = PreferenceRecord {
            id: self.next_id,
            user_id: user_id.clone(),
            enabled,
        };
        self.records.push(record.clone());
        record
    }

    fn update(&mut self, id: u64, enabled: bool) -> Result<(), StoreError> {
        let record = self
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(StoreError::MissingRecord(id))?;
        record.enabled = enabled;
        Ok(())
    }
}

fn lock(table: &Mutex<PreferenceTable>) -> Result<MutexGuard<'_, PreferenceTable>, StoreError> {
    table
        .lock()
        .map_err(|_| StoreError::Unavailable("preference table lock poisoned".to_string()))
}

/// Volatile store, lost on restart.
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    table: Mutex<PreferenceTable>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        let table = match self.table.lock() {
            Ok(table) => table,
            Err(poisoned) => poisoned.into_inner(),
        };
        table.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn find_by_user(&self, user_id: &UserId) -> Result<Option<PreferenceRecord>, StoreError> {
        Ok(lock(&self.table)?.find(user_id))
    }

    fn insert(&self, user_id: &UserId, enabled: bool) -> Result<PreferenceRecord, StoreError> {
        Ok(lock(&self.table)?.insert(user_id, enabled))
    }

    fn update_enabled(&self, id: u64, enabled: bool) -> Result<(), StoreError> {
        lock(&self.table)?.update(id, enabled)
    }
}

/// Store backed by a bincode-encoded file, rewritten after every change.
#[derive(Debug)]
pub struct FilePreferenceStore {
    path: PathBuf,
    table: Mutex<PreferenceTable>,
}

impl FilePreferenceStore {
    /// Opens the table at `path`, starting empty if the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let table = if path.exists() {
            let bytes = fs::read(&path)?;
            let table: PreferenceTable = deserialize(&bytes)?;
            info!(
                "Loaded {} sidebar preferences from {}",
                table.records.len(),
                path.display()
            );
            table
        } else {
            PreferenceTable::default()
        };

        Ok(Self {
            path,
            table: Mutex::new(table),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, table: &PreferenceTable) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let data = serialize(table)?;
        fs::write(&self.path, data)?;
        debug!("Flushed {} preferences", table.records.len());
        Ok(())
    }
}

impl PreferenceStore for FilePreferenceStore {
    fn find_by_user(&self, user_id: &UserId) -> Result<Option<PreferenceRecord>, StoreError> {
        Ok(lock(&self.table)?.find(user_id))
    }

    fn insert(&self, user_id: &UserId, enabled: bool) -> Result<PreferenceRecord, StoreError> {
        let mut table = lock(&self.table)?;
        let mut next = table.clone();
        let record = next.insert(user_id, enabled);
        self.flush(&next)?;
        *table = next;
        Ok(record)
    }

    fn update_enabled(&self, id: u64, enabled: bool) -> Result<(), StoreError> {
        let mut table = lock(&self.table)?;
        let mut next = table.clone();
        next.update(id, enabled)?;
        self.flush(&next)?;
        *table = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_insert_and_find() {
        let store = MemoryPreferenceStore::new();
        let user = UserId::new("u1");

        assert!(store.find_by_user(&user).unwrap().is_none());
        assert!(store.is_empty());

        let record = store.insert(&user, false).unwrap();
        assert_eq!(record.id, 1);
        assert!(!record.enabled);

        let found = store.find_by_user(&user).unwrap().unwrap();
        assert_eq!(found, record);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_memory_store_update() {
        let store = MemoryPreferenceStore::new();
        let user = UserId::new("u1");
        let record = store.insert(&user, true).unwrap();

        store.update_enabled(record.id, false).unwrap();
        assert!(!store.find_by_user(&user).unwrap().unwrap().enabled);
    }

    #[test]
    fn test_update_unknown_record() {
        let store = MemoryPreferenceStore::new();
        assert!(matches!(
            store.update_enabled(42, true),
            Err(StoreError::MissingRecord(42))
        ));
    }

    #[test]
    fn test_ids_are_unique_per_record() {
        let store = MemoryPreferenceStore::new();
        let a = store.insert(&UserId::new("a"), true).unwrap();
        let b = store.insert(&UserId::new("b"), true).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.bin");
        let user = UserId::new("persisted");

        {
            let store = FilePreferenceStore::open(&path).unwrap();
            let record = store.insert(&user, true).unwrap();
            store.update_enabled(record.id, false).unwrap();
        }

        let reopened = FilePreferenceStore::open(&path).unwrap();
        let record = reopened.find_by_user(&user).unwrap().unwrap();
        assert!(!record.enabled);

        // Ids keep counting after a reopen.
        let next = reopened.insert(&UserId::new("other"), true).unwrap();
        assert_eq!(next.id, record.id + 1);
    }

    #[test]
    fn test_file_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.bin");
        fs::write(&path, [0xffu8; 3]).unwrap();

        assert!(FilePreferenceStore::open(&path).is_err());
    }

    #[test]
    fn test_file_store_failed_flush_leaves_table_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        let store = FilePreferenceStore::open(sub.join("prefs.bin")).unwrap();
        let kept = UserId::new("kept");
        let record = store.insert(&kept, true).unwrap();

        // Turn the data directory into a plain file so every write fails.
        fs::remove_dir_all(&sub).unwrap();
        fs::write(&sub, b"not a directory").unwrap();

        let lost = UserId::new("lost");
        assert!(store.insert(&lost, false).is_err());
        assert!(store.find_by_user(&lost).unwrap().is_none());

        assert!(store.update_enabled(record.id, false).is_err());
        assert!(store.find_by_user(&kept).unwrap().unwrap().enabled);
    }

    #[test]
    fn test_memory_store_len_survives_poisoned_lock() {
        let store = std::sync::Arc::new(MemoryPreferenceStore::new());
        store.insert(&UserId::new("u1"), true).unwrap();

        let poisoner = std::sync::Arc::clone(&store);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.table.lock().unwrap();
            panic!("poison the preference table");
        })
        .join();

        assert!(store.table.is_poisoned());
        assert_eq!(store.len(), 1);
        assert!(!store.is_empty());
    }
}
