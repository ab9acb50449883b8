//! Display surfaces: the per-user scoreboard a client renders.
//!
//! A surface carries one objective (title + display slot) and a set of
//! uniquely keyed entries, each with a numeric rank. Higher ranks render
//! nearer the top. The engine owns surfaces exclusively; the host only needs
//! to know which one a user is looking at.

use shared::UserId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Name under which the sidebar objective is registered.
pub const OBJECTIVE_NAME: &str = "sidebar";

pub type SurfaceId = u64;

#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("entry rejected: {0}")]
    EntryRejected(String),
    #[error("title rejected: {0}")]
    TitleRejected(String),
    #[error("objective {0} already registered")]
    DuplicateObjective(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplaySlot {
    Sidebar,
    PlayerList,
    BelowName,
}

pub trait Surface: Send + Sync {
    fn id(&self) -> SurfaceId;

    fn register_objective(
        &mut self,
        name: &str,
        title: &str,
        slot: DisplaySlot,
    ) -> Result<(), SurfaceError>;

    fn set_title(&mut self, title: &str) -> Result<(), SurfaceError>;

    /// Keys of every entry currently holding a score.
    fn entries(&self) -> Vec<String>;

    fn reset_scores(&mut self, entry: &str);

    /// Creates the entry if needed and sets its rank.
    fn set_rank(&mut self, entry: &str, rank: i32) -> Result<(), SurfaceError>;
}

/// Allocates surfaces and decides what each user sees.
pub trait SurfaceHost: Send + Sync {
    fn create_surface(&self, user: &UserId) -> Box<dyn Surface>;

    /// Makes `surface` the user's active display.
    fn show(&self, user: &UserId, surface: &dyn Surface);

    /// Puts the user back on the neutral default display.
    fn show_default(&self, user: &UserId);
}

/// Observable state of a [`MemorySurface`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoardSnapshot {
    pub id: SurfaceId,
    pub objective: Option<String>,
    pub slot: Option<DisplaySlot>,
    pub title: String,
    /// Entries ordered top to bottom (highest rank first).
    pub entries: Vec<(String, i32)>,
    /// Number of write operations applied so far.
    pub mutations: usize,
}

#[derive(Debug, Default)]
struct Board {
    objective: Option<String>,
    slot: Option<DisplaySlot>,
    title: String,
    scores: HashMap<String, i32>,
    mutations: usize,
}

type SharedBoard = Arc<Mutex<Board>>;

fn board(shared: &SharedBoard) -> MutexGuard<'_, Board> {
    match shared.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Headless surface whose state can be read back through its [`MemoryHost`].
pub struct MemorySurface {
    id: SurfaceId,
    board: SharedBoard,
    reject: Arc<Mutex<Option<String>>>,
}

impl Surface for MemorySurface {
    fn id(&self) -> SurfaceId {
        self.id
    }

    fn register_objective(
        &mut self,
        name: &str,
        title: &str,
        slot: DisplaySlot,
    ) -> Result<(), SurfaceError> {
        let mut board = board(&self.board);
        if board.objective.is_some() {
            return Err(SurfaceError::DuplicateObjective(name.to_string()));
        }
        board.objective = Some(name.to_string());
        board.slot = Some(slot);
        board.title = title.to_string();
        board.mutations += 1;
        Ok(())
    }

    fn set_title(&mut self, title: &str) -> Result<(), SurfaceError> {
        let mut board = board(&self.board);
        board.title = title.to_string();
        board.mutations += 1;
        Ok(())
    }

    fn entries(&self) -> Vec<String> {
        board(&self.board).scores.keys().cloned().collect()
    }

    fn reset_scores(&mut self, entry: &str) {
        let mut board = board(&self.board);
        if board.scores.remove(entry).is_some() {
            board.mutations += 1;
        }
    }

    fn set_rank(&mut self, entry: &str, rank: i32) -> Result<(), SurfaceError> {
        let rejected = match self.reject.lock() {
            Ok(reject) => reject.as_deref().is_some_and(|needle| entry.contains(needle)),
            Err(_) => false,
        };
        if rejected {
            return Err(SurfaceError::EntryRejected(entry.to_string()));
        }

        let mut board = board(&self.board);
        board.scores.insert(entry.to_string(), rank);
        board.mutations += 1;
        Ok(())
    }
}

/// In-memory [`SurfaceHost`] for headless servers and tests.
#[derive(Default)]
pub struct MemoryHost {
    next_id: AtomicU64,
    boards: Mutex<HashMap<SurfaceId, SharedBoard>>,
    active: Mutex<HashMap<UserId, SurfaceId>>,
    reject: Arc<Mutex<Option<String>>>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every surface refuse entries containing `needle`.
    pub fn reject_entries_containing(&self, needle: impl Into<String>) {
        if let Ok(mut reject) = self.reject.lock() {
            *reject = Some(needle.into());
        }
    }

    /// Total surfaces ever created.
    pub fn created(&self) -> usize {
        self.next_id.load(Ordering::SeqCst) as usize
    }

    /// Surface the user is looking at, `None` for the default display.
    pub fn active_surface(&self, user: &UserId) -> Option<SurfaceId> {
        self.active.lock().ok()?.get(user).copied()
    }

    pub fn snapshot(&self, id: SurfaceId) -> Option<BoardSnapshot> {
        let shared = self.boards.lock().ok()?.get(&id).cloned()?;
        let board = board(&shared);

        let mut entries: Vec<(String, i32)> = board
            .scores
            .iter()
            .map(|(entry, rank)| (entry.clone(), *rank))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        Some(BoardSnapshot {
            id,
            objective: board.objective.clone(),
            slot: board.slot,
            title: board.title.clone(),
            entries,
            mutations: board.mutations,
        })
    }

    /// Snapshot of the surface the user currently sees.
    pub fn active_snapshot(&self, user: &UserId) -> Option<BoardSnapshot> {
        self.snapshot(self.active_surface(user)?)
    }
}

impl SurfaceHost for MemoryHost {
    fn create_surface(&self, _user: &UserId) -> Box<dyn Surface> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let shared = SharedBoard::default();
        if let Ok(mut boards) = self.boards.lock() {
            boards.insert(id, Arc::clone(&shared));
        }

        Box::new(MemorySurface {
            id,
            board: shared,
            reject: Arc::clone(&self.reject),
        })
    }

    fn show(&self, user: &UserId, surface: &dyn Surface) {
        if let Ok(mut active) = self.active.lock() {
            active.insert(user.clone(), surface.id());
        }
    }

    fn show_default(&self, user: &UserId) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(user);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_surface_ranks() {
        let host = MemoryHost::new();
        let user = UserId::new("u1");
        let mut surface = host.create_surface(&user);

        surface
            .register_objective(OBJECTIVE_NAME, "Title", DisplaySlot::Sidebar)
            .unwrap();
        surface.set_rank("B", 1).unwrap();
        surface.set_rank("A", 2).unwrap();

        let snapshot = host.snapshot(surface.id()).unwrap();
        assert_eq!(snapshot.objective.as_deref(), Some(OBJECTIVE_NAME));
        assert_eq!(snapshot.slot, Some(DisplaySlot::Sidebar));
        assert_eq!(
            snapshot.entries,
            vec![("A".to_string(), 2), ("B".to_string(), 1)]
        );
        assert_eq!(snapshot.mutations, 3);
    }

    #[test]
    fn test_duplicate_objective_rejected() {
        let host = MemoryHost::new();
        let mut surface = host.create_surface(&UserId::new("u1"));
        surface
            .register_objective(OBJECTIVE_NAME, "a", DisplaySlot::Sidebar)
            .unwrap();
        assert!(surface
            .register_objective(OBJECTIVE_NAME, "b", DisplaySlot::Sidebar)
            .is_err());
    }

    #[test]
    fn test_reset_scores() {
        let host = MemoryHost::new();
        let mut surface = host.create_surface(&UserId::new("u1"));
        surface.set_rank("A", 1).unwrap();
        surface.reset_scores("A");
        surface.reset_scores("missing");

        assert!(surface.entries().is_empty());
        assert_eq!(host.snapshot(surface.id()).unwrap().mutations, 2);
    }

    #[test]
    fn test_rejected_entries() {
        let host = MemoryHost::new();
        host.reject_entries_containing("bad");
        let mut surface = host.create_surface(&UserId::new("u1"));

        assert!(surface.set_rank("a bad line", 1).is_err());
        assert!(surface.set_rank("fine", 1).is_ok());
        assert_eq!(surface.entries(), vec!["fine".to_string()]);
    }

    #[test]
    fn test_show_and_default() {
        let host = MemoryHost::new();
        let user = UserId::new("u1");
        let surface = host.create_surface(&user);

        assert_eq!(host.active_surface(&user), None);
        host.show(&user, surface.as_ref());
        assert_eq!(host.active_surface(&user), Some(surface.id()));
        host.show_default(&user);
        assert_eq!(host.active_surface(&user), None);
        assert_eq!(host.created(), 1);
    }
}
