//! Per-partition exclusive locks.
//!
//! One lock exists per (partition directory, architecture). Threads of one
//! process queue on an in-memory lock first; the winner then takes an
//! advisory lock on `.APKINDEX.lock` inside the partition, which keeps other
//! engines and other processes out. Guards release on drop, so every exit
//! path of an engine operation (including a panic) hands the partition to the
//! next waiter.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use apkrepo_schema::Arch;
use fs4::FileExt;

use crate::error::{IndexError, IndexResult};

/// Lock file kept inside every partition that was ever locked.
pub const LOCK_FILE_NAME: &str = ".APKINDEX.lock";

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
struct PartitionLock {
    held: Mutex<bool>,
    released: Condvar,
}

impl PartitionLock {
    fn release(&self) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        *held = false;
        self.released.notify_one();
    }
}

/// Hands out one lock per (partition, architecture) pair.
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: Mutex<HashMap<(PathBuf, Arch), Arc<PartitionLock>>>,
}

/// Exclusive hold on a partition; released when dropped.
#[derive(Debug)]
pub struct PartitionGuard {
    lock: Arc<PartitionLock>,
    file: File,
    partition: PathBuf,
    arch: Arch,
}

impl PartitionGuard {
    /// The partition directory this guard protects.
    pub fn partition(&self) -> &Path {
        &self.partition
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }
}

impl Drop for PartitionGuard {
    fn drop(&mut self) {
        // Closing the file would release it too; unlock first so a waiter
        // woken below never finds the file still taken by us.
        let _ = FileExt::unlock(&self.file);
        self.lock.release();
    }
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the partition is free and take it, creating the partition
    /// directory if needed.
    ///
    /// With `wait` set, give up after that long.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::LockTimeout`] if `wait` elapsed first and
    /// [`IndexError::Io`] if the lock file cannot be opened or locked.
    pub fn acquire(
        &self,
        partition: &Path,
        arch: Arch,
        wait: Option<Duration>,
    ) -> IndexResult<PartitionGuard> {
        let started = Instant::now();
        let partition = std::path::absolute(partition).unwrap_or_else(|_| partition.to_path_buf());
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry((partition.clone(), arch)).or_default())
        };

        let held = lock.held.lock().unwrap_or_else(PoisonError::into_inner);
        let mut held = match wait {
            None => lock
                .released
                .wait_while(held, |held| *held)
                .unwrap_or_else(PoisonError::into_inner),
            Some(limit) => {
                let (held, result) = lock
                    .released
                    .wait_timeout_while(held, limit, |held| *held)
                    .unwrap_or_else(PoisonError::into_inner);
                if result.timed_out() && *held {
                    return Err(IndexError::LockTimeout {
                        partition,
                        waited: limit,
                    });
                }
                held
            }
        };
        *held = true;
        drop(held);

        match lock_file(&partition, wait.map(|limit| (started, limit))) {
            Ok(file) => Ok(PartitionGuard {
                lock,
                file,
                partition,
                arch,
            }),
            Err(e) => {
                lock.release();
                Err(e)
            }
        }
    }
}

/// Open the partition's lock file and lock it exclusively, polling until
/// `deadline` when one is given.
fn lock_file(partition: &Path, deadline: Option<(Instant, Duration)>) -> IndexResult<File> {
    fs::create_dir_all(partition)
        .map_err(|e| IndexError::io(format!("create {}", partition.display()), e))?;
    let path = partition.join(LOCK_FILE_NAME);
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(&path)
        .map_err(|e| IndexError::io(format!("open {}", path.display()), e))?;

    let Some((started, limit)) = deadline else {
        FileExt::lock_exclusive(&file)
            .map_err(|e| IndexError::io(format!("lock {}", path.display()), e))?;
        return Ok(file);
    };

    loop {
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => return Ok(file),
            Err(err) if is_contended(&err) => {
                let elapsed = started.elapsed();
                if elapsed >= limit {
                    return Err(IndexError::LockTimeout {
                        partition: partition.to_path_buf(),
                        waited: limit,
                    });
                }
                thread::sleep(POLL_INTERVAL.min(limit - elapsed));
            }
            Err(err) => return Err(IndexError::io(format!("lock {}", path.display()), err)),
        }
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    match err.kind() {
        ErrorKind::WouldBlock => true,
        _ => cfg!(windows) && matches!(err.raw_os_error(), Some(32 | 33)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    #[test]
    fn test_same_partition_is_exclusive() {
        let repo = tempdir().unwrap();
        let partition = repo.path().join("x86_64");
        let registry = Arc::new(LockRegistry::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let partition = partition.clone();
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                thread::spawn(move || {
                    let _guard = registry.acquire(&partition, Arch::X86_64, None).unwrap();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(5));
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(partition.join(LOCK_FILE_NAME).is_file());
    }

    #[test]
    fn test_separate_registries_exclude_each_other() {
        let repo = tempdir().unwrap();
        let partition = repo.path().join("x86_64");
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let partition = partition.clone();
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                thread::spawn(move || {
                    let registry = LockRegistry::new();
                    let _guard = registry.acquire(&partition, Arch::X86_64, None).unwrap();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(10));
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_bounded_wait_times_out() {
        let repo = tempdir().unwrap();
        let partition = repo.path().join("aarch64");
        let registry = LockRegistry::new();
        let _held = registry.acquire(&partition, Arch::Aarch64, None).unwrap();

        let started = Instant::now();
        let err = registry
            .acquire(&partition, Arch::Aarch64, Some(Duration::from_millis(50)))
            .unwrap_err();
        assert!(matches!(err, IndexError::LockTimeout { .. }));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_bounded_wait_on_file_held_elsewhere() {
        let repo = tempdir().unwrap();
        let partition = repo.path().join("mips64");
        let held = LockRegistry::new()
            .acquire(&partition, Arch::Mips64, None)
            .unwrap();

        let other = LockRegistry::new();
        let started = Instant::now();
        let err = other
            .acquire(&partition, Arch::Mips64, Some(Duration::from_millis(50)))
            .unwrap_err();
        assert!(matches!(err, IndexError::LockTimeout { .. }), "{err}");
        assert!(started.elapsed() >= Duration::from_millis(50));

        drop(held);
        other
            .acquire(&partition, Arch::Mips64, Some(Duration::from_millis(100)))
            .unwrap();
    }

    #[test]
    fn test_other_partitions_are_independent() {
        let repo = tempdir().unwrap();
        let registry = LockRegistry::new();
        let _a = registry
            .acquire(&repo.path().join("x86"), Arch::X86, None)
            .unwrap();
        let _b = registry
            .acquire(&repo.path().join("armhf"), Arch::Armhf, Some(Duration::ZERO))
            .unwrap();
        let _c = registry
            .acquire(&repo.path().join("other/x86"), Arch::X86, Some(Duration::ZERO))
            .unwrap();
    }

    #[test]
    fn test_guard_released_on_drop_and_panic() {
        let repo = tempdir().unwrap();
        let partition = repo.path().join("s390x");
        let registry = Arc::new(LockRegistry::new());
        drop(registry.acquire(&partition, Arch::S390x, None).unwrap());

        let r = Arc::clone(&registry);
        let p = partition.clone();
        let result = thread::spawn(move || {
            let _guard = r.acquire(&p, Arch::S390x, None).unwrap();
            panic!("tool crashed");
        })
        .join();
        assert!(result.is_err());

        registry
            .acquire(&partition, Arch::S390x, Some(Duration::from_millis(100)))
            .unwrap();
    }
}
