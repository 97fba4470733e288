//! Cross-process LLM concurrency governor
//!
//! A global semaphore implemented as a file-locked counter: acquire takes
//! the flock, reads the count, writes count+1, and releases the flock;
//! release is the inverse. The ceiling enforces `max_concurrent_llm_calls`
//! across every worker process on the host.

use crate::error::{Result, SwarmError};
use fs2::FileExt;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::debug;

const RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Handle to the shared counter
#[derive(Debug, Clone)]
pub struct ResourceGovernor {
    counter_path: PathBuf,
    lock_path: PathBuf,
    ceiling: usize,
}

/// A held model-call slot; released on drop
#[derive(Debug)]
pub struct LlmPermit {
    governor: ResourceGovernor,
    released: bool,
}

impl Drop for LlmPermit {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.governor.adjust(-1) {
                tracing::warn!(error = %e, "failed to release llm permit");
            }
            self.released = true;
        }
    }
}

impl ResourceGovernor {
    pub fn new(counter_path: PathBuf, lock_path: PathBuf, ceiling: usize) -> Self {
        Self {
            counter_path,
            lock_path,
            ceiling,
        }
    }

    /// Atomic read-modify-write of the counter under the flock.
    ///
    /// Returns the value after the adjustment. With `delta = 0` this is a
    /// pure read.
    fn adjust(&self, delta: i64) -> Result<i64> {
        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&self.lock_path)?;
        lock_file.lock_exclusive()?;

        let result = (|| -> Result<i64> {
            let mut file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .open(&self.counter_path)?;
            let mut raw = String::new();
            file.read_to_string(&mut raw)?;
            let current: i64 = raw.trim().parse().unwrap_or(0);
            let next = (current + delta).max(0);
            if delta != 0 {
                file.set_len(0)?;
                file.seek(SeekFrom::Start(0))?;
                write!(file, "{}", next)?;
            }
            Ok(next)
        })();

        let _ = lock_file.unlock();
        result
    }

    /// Non-blocking slot acquisition
    pub fn try_acquire(&self) -> Result<Option<LlmPermit>> {
        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&self.lock_path)?;
        lock_file.lock_exclusive()?;

        let result = (|| -> Result<Option<LlmPermit>> {
            let mut file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .open(&self.counter_path)?;
            let mut raw = String::new();
            file.read_to_string(&mut raw)?;
            let current: i64 = raw.trim().parse().unwrap_or(0);
            if current >= self.ceiling as i64 {
                return Ok(None);
            }
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            write!(file, "{}", current + 1)?;
            debug!(in_use = current + 1, ceiling = self.ceiling, "llm slot acquired");
            Ok(Some(LlmPermit {
                governor: self.clone(),
                released: false,
            }))
        })();

        let _ = lock_file.unlock();
        result
    }

    /// Wait for a slot up to the timeout
    pub async fn acquire(&self, timeout: Duration) -> Result<LlmPermit> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(permit) = self.try_acquire()? {
                return Ok(permit);
            }
            if Instant::now() >= deadline {
                return Err(SwarmError::LockTimeout {
                    path: self.counter_path.display().to_string(),
                    seconds: timeout.as_secs(),
                });
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    /// Current in-use count
    pub fn in_use(&self) -> Result<i64> {
        self.adjust(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn governor(dir: &std::path::Path, ceiling: usize) -> ResourceGovernor {
        ResourceGovernor::new(
            dir.join("llm_semaphore"),
            dir.join("llm_semaphore.lock"),
            ceiling,
        )
    }

    #[test]
    fn test_ceiling_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let governor = governor(dir.path(), 2);

        let first = governor.try_acquire().unwrap();
        let second = governor.try_acquire().unwrap();
        assert!(first.is_some());
        assert!(second.is_some());
        assert!(governor.try_acquire().unwrap().is_none());
        assert_eq!(governor.in_use().unwrap(), 2);

        drop(first);
        assert_eq!(governor.in_use().unwrap(), 1);
        assert!(governor.try_acquire().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let dir = tempfile::tempdir().unwrap();
        let governor = governor(dir.path(), 1);
        let held = governor.try_acquire().unwrap().unwrap();

        let contender = governor.clone();
        let waiter = tokio::spawn(async move {
            contender.acquire(Duration::from_secs(2)).await
        });
        tokio::time::sleep(Duration::from_millis(120)).await;
        drop(held);

        let permit = waiter.await.unwrap();
        assert!(permit.is_ok());
    }

    #[test]
    fn test_counter_never_negative() {
        let dir = tempfile::tempdir().unwrap();
        let governor = governor(dir.path(), 4);
        // Releasing with a zeroed counter clamps at zero.
        governor.adjust(-1).unwrap();
        assert_eq!(governor.in_use().unwrap(), 0);
    }
}
