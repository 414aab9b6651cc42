//! GTags databases: reader/writer lock state and deferred single-file updates

mod registry;

pub use registry::DatabaseRegistry;

use crate::config::DbConfig;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

/// Files GTags writes into an index root. `GTAGS` alone marks a database.
pub const MARKER_FILES: [&str; 3] = ["GTAGS", "GRTAGS", "GPATH"];

const WRITER: usize = 1 << (usize::BITS - 1);

/// Lock mode requested for a database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Read,
    Write,
}

impl LockMode {
    pub fn writer(writer: bool) -> Self {
        if writer {
            Self::Write
        } else {
            Self::Read
        }
    }
}

/// Snapshot of a database's lock counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockState {
    pub readers: usize,
    pub writer: bool,
}

/// One on-disk GTags index and its lock.
///
/// Lock state lives in a single atomic word: the top bit is the writer flag,
/// the rest is the reader count. Acquisition never blocks.
#[derive(Debug)]
pub struct Database {
    path: PathBuf,
    state: AtomicUsize,
    pending_updates: Mutex<VecDeque<PathBuf>>,
    config: RwLock<DbConfig>,
}

impl Database {
    pub(crate) fn new(path: PathBuf, config: DbConfig) -> Self {
        Self {
            path,
            state: AtomicUsize::new(0),
            pending_updates: Mutex::new(VecDeque::new()),
            config: RwLock::new(config),
        }
    }

    /// Canonical index root
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Try to take the lock without waiting.
    ///
    /// A writer needs the database completely free; a reader only needs the
    /// writer flag clear. On failure nothing changes.
    pub fn try_lock(&self, mode: LockMode) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let next = match mode {
                LockMode::Write if current == 0 => WRITER,
                LockMode::Read if current & WRITER == 0 && current + 1 < WRITER => current + 1,
                _ => return false,
            };
            match self
                .state
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Drop one lock: the writer if held, otherwise one reader (floor zero).
    ///
    /// Returns true when the database is now completely free.
    pub fn unlock(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let next = if current & WRITER != 0 {
                0
            } else {
                current.saturating_sub(1)
            };
            match self
                .state
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next == 0,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn is_locked(&self) -> bool {
        self.state.load(Ordering::Acquire) != 0
    }

    pub fn lock_state(&self) -> LockState {
        let raw = self.state.load(Ordering::Acquire);
        LockState {
            readers: raw & !WRITER,
            writer: raw & WRITER != 0,
        }
    }

    /// Queue a single-file re-index. Already queued paths are ignored.
    ///
    /// Returns true if the file was added.
    pub fn schedule_update(&self, file: &Path) -> bool {
        let mut queue = self
            .pending_updates
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if queue.iter().any(|queued| queued == file) {
            return false;
        }
        queue.push_back(file.to_path_buf());
        true
    }

    /// Pop the oldest queued update and take the writer lock for it.
    ///
    /// Returns `None` if the queue is empty or the database is not free.
    /// On `Some`, the caller owns the writer lock and must run the update.
    pub fn take_scheduled_update(&self) -> Option<PathBuf> {
        let mut queue = self
            .pending_updates
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if queue.is_empty() || !self.try_lock(LockMode::Write) {
            return None;
        }
        queue.pop_front()
    }

    /// Put back an update taken by `take_scheduled_update` that never ran,
    /// keeping it first in line
    pub fn requeue_update(&self, file: PathBuf) {
        let mut queue = self
            .pending_updates
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if !queue.contains(&file) {
            queue.push_front(file);
        }
    }

    pub fn pending_updates(&self) -> Vec<PathBuf> {
        self.pending_updates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Snapshot of the database config
    pub fn config(&self) -> DbConfig {
        self.config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_config(&self, config: DbConfig) {
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;
    }

    /// Persist the current config next to the index
    pub fn save_config(&self) -> crate::Result<()> {
        self.config().save_to_folder(&self.path)
    }
}

/// True if `folder` holds a GTags index
pub fn exists_in_folder(folder: &Path) -> bool {
    folder.join(MARKER_FILES[0]).is_file()
}

/// Remove the index marker files from `folder`.
///
/// Missing files are not an error; the first other failure is returned.
pub(crate) fn delete_markers(folder: &Path) -> std::io::Result<()> {
    for marker in MARKER_FILES {
        match fs::remove_file(folder.join(marker)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
