//! Advisory file lock with a bounded wait.
//!
//! Scoped to one lock file (one per key's metadata). Cooperative only: it
//! serializes writers that go through [`KeyLock`], nothing else.

use super::error::{StorageError, StorageResult};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const RETRY_INTERVAL: Duration = Duration::from_millis(25);

/// Held exclusive lock; released on drop.
#[derive(Debug)]
pub struct KeyLock {
    file: File,
    path: PathBuf,
}

impl KeyLock {
    /// Acquire an exclusive lock on `path`, polling until `timeout` elapses.
    pub fn acquire(path: &Path, timeout: Duration) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        // No representable deadline means waiting without one.
        let deadline = Instant::now().checked_add(timeout);
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                    })
                }
                Err(e) if is_contended(&e) => {
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        tracing::warn!(
                            path = %path.display(),
                            ?timeout,
                            "lock acquisition timed out"
                        );
                        return Err(StorageError::LockTimeout {
                            path: path.to_path_buf(),
                            timeout,
                        });
                    }
                    std::thread::sleep(RETRY_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn is_contended(e: &std::io::Error) -> bool {
    e.kind() == ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

impl Drop for KeyLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::debug!(path = %self.path.display(), error = %e, "unlock failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_holder_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("k.lock");

        let _held = KeyLock::acquire(&path, Duration::from_secs(1)).unwrap();
        let started = Instant::now();
        let err = KeyLock::acquire(&path, Duration::from_millis(100)).unwrap_err();

        assert!(matches!(err, StorageError::LockTimeout { .. }));
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("k.lock");

        drop(KeyLock::acquire(&path, Duration::from_secs(1)).unwrap());
        let again = KeyLock::acquire(&path, Duration::from_millis(50));
        assert!(again.is_ok());
    }

    #[test]
    fn different_files_do_not_contend() {
        let dir = tempfile::tempdir().unwrap();
        let _a = KeyLock::acquire(&dir.path().join("a.lock"), Duration::ZERO).unwrap();
        let b = KeyLock::acquire(&dir.path().join("b.lock"), Duration::ZERO);
        assert!(b.is_ok());
    }
}
