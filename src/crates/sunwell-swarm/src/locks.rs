//! Per-file advisory locks
//!
//! Writes are serialized with exclusive flocks held on dedicated lock files
//! under `.sunwell/locks/files/`, never on the artifacts themselves, so
//! reads stay unimpeded. Lock files are named by a flat encoding of the
//! path (`src/a.py` → `src_a.py.lock`).
//!
//! Ownership is holding the flock. A crashed holder's flock vanishes with
//! its process, leaving only the lock file behind; reclaim requires both an
//! old mtime and a successful live-probe (non-blocking try-acquire), and
//! the stale file is unlinked while the probe flock is still held.
//!
//! Release never unlinks: unlocking and then removing the path would open
//! a window in which one worker locks the surviving inode while another
//! creates and locks a fresh file under the same name, giving two
//! simultaneous "exclusive" holders. Lock files persist across releases;
//! only the reclaim path deletes them, and every successful acquisition
//! re-checks that its fd still names the path's inode.
//!
//! `acquire_all` takes locks in sorted path order, which makes deadlock
//! between workers impossible; on any failure it releases everything
//! already taken, in reverse order.

use crate::error::{Result, SwarmError};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info};

const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// A held exclusive lock; releasing happens on drop
#[derive(Debug)]
pub struct HeldLock {
    /// The guarded (artifact) path
    pub path: String,
    file: Option<File>,
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = file.unlock();
        }
        debug!(path = %self.path, "file lock released");
    }
}

/// Manager for one project's file-lock directory
#[derive(Debug, Clone)]
pub struct FileLockManager {
    locks_dir: PathBuf,
    stale_threshold: Duration,
}

impl FileLockManager {
    pub fn new(locks_dir: PathBuf, stale_threshold: Duration) -> Self {
        Self {
            locks_dir,
            stale_threshold,
        }
    }

    fn lock_file_for(&self, path: &str) -> PathBuf {
        self.locks_dir.join(format!("{}.lock", flat_encode(path)))
    }

    /// Non-blocking acquire; `None` when another holder has the flock
    pub fn try_acquire(&self, path: &str) -> Result<Option<HeldLock>> {
        std::fs::create_dir_all(&self.locks_dir)?;
        let lock_file = self.lock_file_for(path);

        self.reclaim_if_stale(path, &lock_file)?;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&lock_file)?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                // A concurrent reclaim may have unlinked this inode between
                // our open and the flock; locking an unlinked inode guards
                // nothing, because the path now names a fresh file. Treat
                // it as contention and let the caller retry.
                if !names_same_inode(&file, &lock_file) {
                    let _ = file.unlock();
                    return Ok(None);
                }
                // Record the holder and refresh mtime for stale detection.
                let mut f = &file;
                let _ = writeln!(f, "{}", std::process::id());
                Ok(Some(HeldLock {
                    path: path.to_string(),
                    file: Some(file),
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(SwarmError::Io(e)),
        }
    }

    /// Blocking acquire with a timeout
    pub async fn acquire(&self, path: &str, timeout: Duration) -> Result<HeldLock> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(lock) = self.try_acquire(path)? {
                debug!(path = %path, "file lock acquired");
                return Ok(lock);
            }
            if Instant::now() >= deadline {
                return Err(SwarmError::LockTimeout {
                    path: path.to_string(),
                    seconds: timeout.as_secs(),
                });
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    /// Probe whether another holder currently has the lock
    pub fn is_locked(&self, path: &str) -> bool {
        let lock_file = self.lock_file_for(path);
        if !lock_file.exists() {
            return false;
        }
        let Ok(file) = OpenOptions::new().read(true).write(true).open(&lock_file) else {
            return false;
        };
        match file.try_lock_exclusive() {
            Ok(()) => {
                let _ = file.unlock();
                false
            }
            Err(_) => true,
        }
    }

    /// Acquire a set of paths in sorted order (deadlock-free); on any
    /// failure, everything already held is released in reverse order.
    pub async fn acquire_all(&self, paths: &[String], timeout: Duration) -> Result<Vec<HeldLock>> {
        let mut sorted: Vec<&String> = paths.iter().collect();
        sorted.sort();
        sorted.dedup();

        let mut held: Vec<HeldLock> = Vec::with_capacity(sorted.len());
        for path in sorted {
            match self.acquire(path, timeout).await {
                Ok(lock) => held.push(lock),
                Err(e) => {
                    while let Some(lock) = held.pop() {
                        drop(lock);
                    }
                    return Err(e);
                }
            }
        }
        Ok(held)
    }

    /// Delete a lock file that is old enough AND has no live holder
    fn reclaim_if_stale(&self, path: &str, lock_file: &PathBuf) -> Result<()> {
        let Ok(metadata) = std::fs::metadata(lock_file) else {
            return Ok(());
        };
        let age = metadata
            .modified()
            .ok()
            .and_then(|mtime| SystemTime::now().duration_since(mtime).ok())
            .unwrap_or(Duration::ZERO);
        if age < self.stale_threshold {
            return Ok(());
        }

        // Old mtime alone is not enough: a live holder keeps its flock.
        let Ok(probe) = OpenOptions::new().read(true).write(true).open(lock_file) else {
            return Ok(());
        };
        if probe.try_lock_exclusive().is_ok() {
            // Unlink while the probe flock is still held, so the path
            // disappears atomically with respect to the confirmed-dead
            // lock. Unlocking first would let a racer lock this inode a
            // moment before the name vanishes from under it.
            if names_same_inode(&probe, lock_file) {
                std::fs::remove_file(lock_file)?;
                info!(path = %path, age_secs = age.as_secs(), "LOCK_STALE_RECLAIMED");
            }
            let _ = probe.unlock();
        }
        Ok(())
    }
}

/// Does the open file still own the directory entry at `path`?
///
/// False once the entry was unlinked or replaced by a fresh inode.
fn names_same_inode(file: &File, path: &Path) -> bool {
    let Ok(held) = file.metadata() else {
        return false;
    };
    let Ok(named) = std::fs::metadata(path) else {
        return false;
    };
    held.ino() == named.ino() && held.dev() == named.dev()
}

/// Flat-encode a path for use as a lock file name
fn flat_encode(path: &str) -> String {
    path.replace(['/', '\\'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn manager(dir: &std::path::Path) -> FileLockManager {
        FileLockManager::new(dir.join("locks"), Duration::from_secs(60))
    }

    #[test]
    fn test_flat_encode() {
        assert_eq!(flat_encode("src/a.py"), "src_a.py");
        assert_eq!(flat_encode("a.py"), "a.py");
    }

    #[tokio::test]
    async fn test_exclusive_within_process() {
        // One holder at a time.
        let dir = tempfile::tempdir().unwrap();
        let locks = manager(dir.path());

        let first = locks.try_acquire("src/a.py").unwrap();
        assert!(first.is_some());
        // Same-process flock re-entry would succeed on the same fd but we
        // open a new fd; on most unixes flock is per-open-file, so a second
        // open contends.
        assert!(locks.is_locked("src/a.py"));

        drop(first);
        assert!(!locks.is_locked("src/a.py"));
        // The lock file persists across releases (only stale reclaim ever
        // unlinks it); re-acquisition locks the same inode.
        assert!(dir.path().join("locks/src_a.py.lock").exists());
        assert!(locks.try_acquire("src/a.py").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_acquire_waits_then_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let locks = manager(dir.path());
        let _held = locks.try_acquire("b.py").unwrap().unwrap();

        let err = locks.acquire("b.py", Duration::from_millis(250)).await;
        assert!(matches!(err, Err(SwarmError::LockTimeout { .. })));
    }

    #[tokio::test]
    async fn test_stale_lock_reclaimed() {
        // A lock file past the stale threshold with no live holder is
        // deleted and acquisition proceeds. Threshold zero stands in for a
        // five-minute-old file.
        let dir = tempfile::tempdir().unwrap();
        let locks_dir = dir.path().join("locks");
        std::fs::create_dir_all(&locks_dir).unwrap();
        let stale_file = locks_dir.join("auth.py.lock");
        std::fs::write(&stale_file, "12345\n").unwrap();

        let locks = FileLockManager::new(locks_dir.clone(), Duration::ZERO);
        let held = locks.acquire("auth.py", Duration::from_secs(1)).await.unwrap();
        assert_eq!(held.path, "auth.py");
    }

    #[tokio::test]
    async fn test_live_holder_never_reclaimed() {
        // Even with a zero threshold, a held flock defeats reclamation.
        let dir = tempfile::tempdir().unwrap();
        let locks = FileLockManager::new(dir.path().join("locks"), Duration::ZERO);
        let _held = locks.try_acquire("live.py").unwrap().unwrap();

        let err = locks.acquire("live.py", Duration::from_millis(200)).await;
        assert!(matches!(err, Err(SwarmError::LockTimeout { .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stale_reclaim_never_double_grants() {
        // Regression for the release/reclaim unlink race: with a zero
        // threshold every acquisition attempt runs the reclaim probe, so
        // contenders continuously race try_acquire against a concurrent
        // probe/unlink. At no instant may two of them hold the lock.
        use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let locks_dir = dir.path().join("locks");
        std::fs::create_dir_all(&locks_dir).unwrap();
        // Seed a crashed holder's leftover: a lock file with no flock.
        std::fs::write(locks_dir.join("auth.py.lock"), "12345\n").unwrap();

        let locks = FileLockManager::new(locks_dir, Duration::ZERO);
        let holders = Arc::new(AtomicUsize::new(0));
        let violated = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let locks = locks.clone();
            let holders = holders.clone();
            let violated = violated.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..8 {
                    let held = locks
                        .acquire("auth.py", Duration::from_secs(10))
                        .await
                        .unwrap();
                    if holders.fetch_add(1, Ordering::SeqCst) != 0 {
                        violated.store(true, Ordering::SeqCst);
                    }
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    holders.fetch_sub(1, Ordering::SeqCst);
                    drop(held);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(
            !violated.load(std::sync::atomic::Ordering::SeqCst),
            "two workers held the same file lock simultaneously"
        );
    }

    #[tokio::test]
    async fn test_acquire_all_sorted_and_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let locks = manager(dir.path());

        // Hold one path in the middle of the sort order.
        let _blocker = locks.try_acquire("m.py").unwrap().unwrap();

        let paths = vec!["z.py".to_string(), "a.py".to_string(), "m.py".to_string()];
        let err = locks
            .acquire_all(&paths, Duration::from_millis(200))
            .await;
        assert!(err.is_err());
        // Rollback released a.py (acquired before the failure on m.py).
        assert!(!locks.is_locked("a.py"));
        assert!(!locks.is_locked("z.py"));

        drop(_blocker);
        let held = locks
            .acquire_all(&paths, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(held.len(), 3);
        // Sorted order by path.
        let order: Vec<&str> = held.iter().map(|l| l.path.as_str()).collect();
        assert_eq!(order, vec!["a.py", "m.py", "z.py"]);
    }
}
