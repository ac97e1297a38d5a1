//! `DatasetLease` and `SubsetLease` (§4.6).
//!
//! `fs2::FileExt` already provides the "preferred primitive with portable
//! fallback" the spec asks for: it calls `flock` on Unix and `LockFileEx`
//! on Windows, so a second hand-rolled path-based locker would only
//! reintroduce the PID-file races that `flock` exists to avoid. Lock
//! files and their directories are fsynced once, on first creation,
//! mirroring the durability layer's directory-fsync-on-creation pattern.

use fs2::FileExt;
use rowvault_core::error::Error;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// A held lease. The lock releases when this guard drops.
pub struct LeaseGuard {
    file: File,
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn ensure_lock_file(path: &Path) -> Result<File, Error> {
    if let Some(dir) = path.parent() {
        let existed = dir.exists();
        std::fs::create_dir_all(dir)?;
        if !existed {
            let d = File::open(dir)?;
            d.sync_all()?;
        }
    }
    OpenOptions::new()
        .create(true)
        .write(true)
        .open(path)
        .map_err(Error::Io)
}

fn acquire_blocking(path: &Path) -> Result<LeaseGuard, Error> {
    let file = ensure_lock_file(path)?;
    FileExt::lock_exclusive(&file)
        .map_err(|e| Error::LockAcquisitionFailed(format!("{}: {e}", path.display())))?;
    Ok(LeaseGuard { file })
}

fn acquire_nonblocking(path: &Path) -> Result<Option<LeaseGuard>, Error> {
    let file = ensure_lock_file(path)?;
    match FileExt::try_lock_exclusive(&file) {
        Ok(()) => Ok(Some(LeaseGuard { file })),
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
        Err(e) => Err(Error::LockAcquisitionFailed(format!(
            "{}: {e}",
            path.display()
        ))),
    }
}

/// `{ds_root}/locks/dataset.lock`: held during global maintenance
/// (soft-delete GC, fsck, directory prune).
pub struct DatasetLease {
    path: PathBuf,
}

impl DatasetLease {
    pub fn new(ds_root: &Path) -> Self {
        DatasetLease {
            path: ds_root.join("locks").join("dataset.lock"),
        }
    }

    /// Block until the lease is acquired.
    pub fn acquire(&self) -> Result<LeaseGuard, Error> {
        acquire_blocking(&self.path)
    }

    /// Attempt to acquire without blocking; `Ok(None)` means it's held
    /// elsewhere.
    pub fn try_acquire(&self) -> Result<Option<LeaseGuard>, Error> {
        acquire_nonblocking(&self.path)
    }
}

/// `{ds_root}/locks/subsets/{subset_uuid}.lock`: held around `publish()`
/// to serialize sealing for one subset; many subsets publish in parallel.
pub struct SubsetLease {
    path: PathBuf,
}

impl SubsetLease {
    pub fn new(ds_root: &Path, subset_uuid: &str) -> Self {
        SubsetLease {
            path: ds_root
                .join("locks")
                .join("subsets")
                .join(format!("{subset_uuid}.lock")),
        }
    }

    pub fn acquire(&self) -> Result<LeaseGuard, Error> {
        acquire_blocking(&self.path)
    }

    pub fn try_acquire(&self) -> Result<Option<LeaseGuard>, Error> {
        acquire_nonblocking(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn dataset_lease_blocks_concurrent_holders() {
        let dir = tempdir().unwrap();
        let lease = DatasetLease::new(dir.path());
        let guard = lease.acquire().unwrap();
        assert!(lease.try_acquire().unwrap().is_none());
        drop(guard);
        assert!(lease.try_acquire().unwrap().is_some());
    }

    #[test]
    fn subset_leases_for_different_subsets_are_independent() {
        let dir = tempdir().unwrap();
        let lease_a = SubsetLease::new(dir.path(), "subset-a");
        let lease_b = SubsetLease::new(dir.path(), "subset-b");
        let _guard_a = lease_a.acquire().unwrap();
        assert!(lease_b.try_acquire().unwrap().is_some());
    }

    #[test]
    fn lock_file_and_directory_are_created_on_first_acquire() {
        let dir = tempdir().unwrap();
        let lease = SubsetLease::new(dir.path(), "su1");
        let _guard = lease.acquire().unwrap();
        assert!(dir.path().join("locks").join("subsets").join("su1.lock").exists());
    }
}
