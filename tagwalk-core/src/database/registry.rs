//! Directory of known databases keyed by canonical root path

use super::{delete_markers, exists_in_folder, Database, LockMode};
use crate::config::DbConfig;
use crate::TagwalkError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Owns every [`Database`] the application has touched.
///
/// At most one entry exists per canonical root. The registry is an ordinary
/// value: construct one per application (or per test) and share it by `Arc`.
#[derive(Debug, Default)]
pub struct DatabaseRegistry {
    databases: Mutex<HashMap<PathBuf, Arc<Database>>>,
    default_config: DbConfig,
}

impl DatabaseRegistry {
    /// `default_config` applies to databases without their own config file
    pub fn new(default_config: DbConfig) -> Self {
        Self {
            databases: Mutex::new(HashMap::new()),
            default_config,
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<PathBuf, Arc<Database>>> {
        self.databases.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Look up or create the entry for an already canonical root
    fn entry(&self, root: PathBuf) -> Arc<Database> {
        let mut table = self.table();
        if let Some(db) = table.get(&root) {
            return Arc::clone(db);
        }

        let config = match DbConfig::load_from_folder(&root) {
            Ok(Some(config)) => config,
            Ok(None) => self.default_config.clone(),
            Err(e) => {
                tracing::warn!(root = %root.display(), error = %e, "ignoring unreadable database config");
                self.default_config.clone()
            }
        };

        tracing::debug!(root = %root.display(), "registering database");
        let db = Arc::new(Database::new(root.clone(), config));
        table.insert(root, Arc::clone(&db));
        db
    }

    /// Register `root` as a database and lock it.
    ///
    /// The folder does not need to contain an index yet (used before
    /// creating one). Fails with `DatabaseBusy` if the lock is taken.
    pub fn register(&self, root: &Path, mode: LockMode) -> crate::Result<Arc<Database>> {
        let db = self.entry(canonical(root));
        if db.try_lock(mode) {
            Ok(db)
        } else {
            Err(TagwalkError::DatabaseBusy(db.path().to_path_buf()))
        }
    }

    /// Walk the ancestors of `file` until one holds index markers
    pub fn find_root(file: &Path) -> Option<PathBuf> {
        let file = canonical(file);
        let start = if file.is_dir() {
            file.as_path()
        } else {
            file.parent()?
        };
        start
            .ancestors()
            .find(|dir| exists_in_folder(dir))
            .map(Path::to_path_buf)
    }

    /// Resolve the database owning `file` without locking it
    pub fn lookup(&self, file: &Path) -> crate::Result<Arc<Database>> {
        let root =
            Self::find_root(file).ok_or_else(|| TagwalkError::DatabaseNotFound(file.to_path_buf()))?;
        Ok(self.entry(root))
    }

    /// Resolve the database owning `file` and lock it
    pub fn acquire(&self, file: &Path, mode: LockMode) -> crate::Result<Arc<Database>> {
        let db = self.lookup(file)?;
        if db.try_lock(mode) {
            Ok(db)
        } else {
            Err(TagwalkError::DatabaseBusy(db.path().to_path_buf()))
        }
    }

    /// Release one lock on `db`. Returns true when it is now free.
    pub fn release(&self, db: &Database) -> bool {
        let free = db.unlock();
        tracing::trace!(root = %db.path().display(), free, "database lock released");
        free
    }

    /// Release the caller's lock and drop the database entirely.
    ///
    /// Removes the index marker files. Refused with `DatabaseBusy` while
    /// anyone else still holds a lock; the caller's lock is released either way.
    pub fn unregister(&self, db: &Database) -> crate::Result<()> {
        if !db.unlock() {
            return Err(TagwalkError::DatabaseBusy(db.path().to_path_buf()));
        }

        self.table().remove(db.path());
        tracing::debug!(root = %db.path().display(), "unregistered database");
        delete_markers(db.path()).map_err(|e| {
            tracing::warn!(root = %db.path().display(), error = %e, "failed to delete index files");
            TagwalkError::Io(e)
        })
    }

    /// Delete the index under `root`. Refused unless the database is free.
    pub fn delete(&self, root: &Path) -> crate::Result<()> {
        let root = canonical(root);
        if !exists_in_folder(&root) {
            return Err(TagwalkError::DatabaseNotFound(root));
        }
        let db = self.register(&root, LockMode::Write)?;
        self.unregister(&db)
    }

    /// Queue a single-file update on the database owning `file`
    pub fn schedule_update(&self, file: &Path) -> crate::Result<Arc<Database>> {
        let file = canonical(file);
        let db = self.lookup(&file)?;
        if db.schedule_update(&file) {
            tracing::debug!(file = %file.display(), root = %db.path().display(), "update scheduled");
        }
        Ok(db)
    }

    /// Registered database for an index root, if any
    pub fn get(&self, root: &Path) -> Option<Arc<Database>> {
        self.table().get(&canonical(root)).cloned()
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }

    pub fn default_config(&self) -> &DbConfig {
        &self.default_config
    }
}

/// Canonical form of `path`, falling back to an absolute path when the
/// filesystem cannot resolve it
fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn make_index(dir: &Path) {
        for marker in super::super::MARKER_FILES {
            fs::write(dir.join(marker), b"").unwrap();
        }
    }

    #[test]
    fn test_register_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DatabaseRegistry::default();

        let a = registry.register(dir.path(), LockMode::Read).unwrap();
        let b = registry.register(dir.path(), LockMode::Read).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);

        // Same root spelled differently
        let dotted = dir.path().join(".");
        let c = registry.register(&dotted, LockMode::Read).unwrap();
        assert!(Arc::ptr_eq(&a, &c));
        assert_eq!(registry.len(), 1);
        assert_eq!(a.lock_state().readers, 3);
    }

    #[test]
    fn test_register_busy() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DatabaseRegistry::default();
        let _db = registry.register(dir.path(), LockMode::Write).unwrap();
        let err = registry.register(dir.path(), LockMode::Read).unwrap_err();
        assert!(err.is_busy());
    }

    #[test]
    fn test_find_root_walks_ancestors() {
        let dir = tempfile::tempdir().unwrap();
        make_index(dir.path());
        let nested = dir.path().join("src").join("deep");
        fs::create_dir_all(&nested).unwrap();
        let file = nested.join("main.c");
        fs::write(&file, b"int main;").unwrap();

        let root = DatabaseRegistry::find_root(&file).unwrap();
        assert_eq!(root, fs::canonicalize(dir.path()).unwrap());
    }

    #[test]
    fn test_acquire_without_index_fails() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("orphan.c");
        fs::write(&file, b"").unwrap();

        let registry = DatabaseRegistry::default();
        let err = registry.acquire(&file, LockMode::Read).unwrap_err();
        assert!(matches!(err, TagwalkError::DatabaseNotFound(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        make_index(dir.path());
        let file = dir.path().join("a.c");
        fs::write(&file, b"").unwrap();

        let registry = DatabaseRegistry::default();
        let db = registry.acquire(&file, LockMode::Write).unwrap();
        assert!(registry.acquire(&file, LockMode::Read).unwrap_err().is_busy());
        assert!(registry.release(&db));
        assert!(registry.acquire(&file, LockMode::Read).is_ok());
    }

    #[test]
    fn test_unregister_refused_while_locked() {
        let dir = tempfile::tempdir().unwrap();
        make_index(dir.path());
        let registry = DatabaseRegistry::default();

        let db = registry.register(dir.path(), LockMode::Read).unwrap();
        let _other = registry.register(dir.path(), LockMode::Read).unwrap();
        assert!(registry.unregister(&db).unwrap_err().is_busy());
        assert_eq!(registry.len(), 1);
        assert!(exists_in_folder(dir.path()));

        registry.unregister(&db).unwrap();
        assert!(registry.is_empty());
        assert!(!exists_in_folder(dir.path()));
    }

    #[test]
    fn test_delete_requires_free_database() {
        let dir = tempfile::tempdir().unwrap();
        make_index(dir.path());
        let registry = DatabaseRegistry::default();

        let db = registry.register(dir.path(), LockMode::Read).unwrap();
        assert!(registry.delete(dir.path()).unwrap_err().is_busy());
        assert!(exists_in_folder(dir.path()));

        registry.release(&db);
        registry.delete(dir.path()).unwrap();
        assert!(!exists_in_folder(dir.path()));
        assert!(registry.get(dir.path()).is_none());
    }

    #[test]
    fn test_schedule_update_resolves_owner() {
        let dir = tempfile::tempdir().unwrap();
        make_index(dir.path());
        let file = dir.path().join("a.c");
        fs::write(&file, b"").unwrap();

        let registry = DatabaseRegistry::default();
        let db = registry.schedule_update(&file).unwrap();
        registry.schedule_update(&file).unwrap();
        assert_eq!(db.pending_updates(), vec![fs::canonicalize(&file).unwrap()]);
    }

    #[test]
    fn test_entry_loads_folder_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = DbConfig {
            use_lib_db: true,
            ..DbConfig::default()
        };
        config.save_to_folder(dir.path()).unwrap();

        let registry = DatabaseRegistry::default();
        let db = registry.register(dir.path(), LockMode::Read).unwrap();
        assert!(db.config().use_lib_db);
    }
}
