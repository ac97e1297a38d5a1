//! The atomic seal (§4.4): dedup lookup, directory fan-out, write-fsync-
//! rename-fsync-dir, and catalog registration; plus `fsck_dataset` orphan
//! recovery (§5, §8 Scenario C).
//!
//! Grounded in the durability layer's `SnapshotWriter::create_snapshot`
//! (write to `.tmp`, `sync_all`, `rename`, fsync parent dir) generalized
//! from a single fixed snapshot path to the content-addressed, hash-fanned
//! part layout this spec requires.

use crate::container::{self, PartAttrs};
use crate::scheme::StorageScheme;
use rowvault_catalog::dataset_db::DatasetDb;
use rowvault_catalog::types::PartRecord;
use rowvault_core::error::{Context, Error};
use rowvault_core::limits::DEFAULT_TMP_CLEANUP_AGE_SECS;
use rowvault_schema::canonical::FieldSpec;
use rowvault_schema::RowBatch;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// Summary of an `fsck_dataset` orphan scan (§5, §8).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FsckReport {
    pub scanned: usize,
    pub inserted: usize,
    pub skipped: usize,
}

/// Summary of a `gc_deleted` maintenance pass (§3 Lifecycle, §4.6).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    pub parts_removed: usize,
    pub dirs_pruned: usize,
    pub subsets_collapsed: usize,
}

/// Seals part files under `{ds_root}` according to `scheme`.
pub struct PartStore {
    ds_root: PathBuf,
    scheme: StorageScheme,
}

impl PartStore {
    pub fn new(ds_root: PathBuf, scheme: StorageScheme) -> Self {
        PartStore { ds_root, scheme }
    }

    /// `publish` (§4.4): compute the content hash, take the dedup fast
    /// path if a matching part already exists, else seal a new part file
    /// and register it. Returns `(part_uuid, relpath)`.
    pub fn publish(
        &self,
        db: &mut DatasetDb,
        dataset_uuid: &str,
        subset_uuid: &str,
        fields: &[FieldSpec],
        batch: &RowBatch,
        scheme_version: i64,
    ) -> Result<(String, String), Error> {
        if batch.is_empty() {
            return Err(Error::EmptyIngest);
        }
        let ctx = || {
            Context::new("publish")
                .with_dataset(dataset_uuid)
                .with_subset(subset_uuid)
        };

        let content_hash = rowvault_hashing::content_hash(fields, batch);
        if let Some(existing_uuid) = db
            .find_part_by_content_hash(subset_uuid, &content_hash)
            .map_err(|e| e.with_context(ctx()))?
        {
            let relpath = self.scheme.part_relpath(subset_uuid, &existing_uuid);
            return Ok((existing_uuid, relpath));
        }

        let part_uuid = Uuid::new_v4().to_string();
        let relpath = self.scheme.part_relpath(subset_uuid, &part_uuid);
        let final_path = self.ds_root.join(&relpath);
        let tmp_path = self.ds_root.join(format!("{relpath}.tmp"));
        let dir = final_path
            .parent()
            .expect("relpath always has a parent")
            .to_path_buf();

        self.create_dirs_fsync(&dir)
            .map_err(|e| e.with_context(ctx().with_relpath(relpath.clone())))?;
        let _ = self.cleanup_stale_tmp(&dir);

        let created_at = rowvault_core::time::now_micros();
        let attrs = PartAttrs {
            part_uuid: part_uuid.clone(),
            subset_uuid: subset_uuid.to_string(),
            dataset_uuid: dataset_uuid.to_string(),
            created_at_epoch: created_at,
            n_rows: batch.n_rows() as i64,
            scheme_version,
            content_hash: content_hash.clone(),
        };
        let bytes = container::encode(&attrs, fields, batch)
            .map_err(|e| e.with_context(ctx().with_relpath(relpath.clone())))?;

        if let Err(e) = Self::write_fsync_rename_fsync_dir(&tmp_path, &final_path, &bytes) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e.with_context(ctx().with_relpath(relpath.clone())));
        }

        let part = PartRecord {
            part_uuid: part_uuid.clone(),
            subset_uuid: subset_uuid.to_string(),
            created_at_epoch: created_at,
            n_rows: batch.n_rows() as i64,
            scheme_version,
            marked_for_deletion: false,
            file_relpath: relpath.clone(),
            content_hash,
        };
        match db.insert_part(&part) {
            Ok(()) => Ok((part_uuid, relpath)),
            Err(e) if e.is_dedup_winner() => {
                let _ = std::fs::remove_file(&final_path);
                if let Error::PartAlreadyExists { part_uuid: winner } = &e {
                    let winner_relpath = self.scheme.part_relpath(subset_uuid, winner);
                    Ok((winner.clone(), winner_relpath))
                } else {
                    unreachable!("is_dedup_winner only holds for PartAlreadyExists")
                }
            }
            Err(e) => {
                let _ = std::fs::remove_file(&final_path);
                Err(e.with_context(
                    ctx().with_relpath(relpath).with_part(part_uuid),
                ))
            }
        }
    }

    /// Step 6-7 of §4.4: write to `tmp_path`, fsync the file, rename into
    /// place, then fsync the containing directory.
    fn write_fsync_rename_fsync_dir(
        tmp_path: &Path,
        final_path: &Path,
        bytes: &[u8],
    ) -> Result<(), Error> {
        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(tmp_path, final_path)?;

        let dir = File::open(final_path.parent().expect("final_path has a parent"))?;
        dir.sync_all()?;
        Ok(())
    }

    /// Create every missing ancestor of `dir` and fsync each one that was
    /// freshly created, innermost last (§4.4 step 4).
    fn create_dirs_fsync(&self, dir: &Path) -> Result<(), Error> {
        let mut missing = Vec::new();
        let mut cur = dir;
        while !cur.exists() {
            missing.push(cur.to_path_buf());
            match cur.parent() {
                Some(p) => cur = p,
                None => break,
            }
        }
        std::fs::create_dir_all(dir)?;
        for created in missing.into_iter().rev() {
            let f = File::open(&created)?;
            f.sync_all()?;
        }
        Ok(())
    }

    /// Remove stale `*.h5.tmp` files older than
    /// [`DEFAULT_TMP_CLEANUP_AGE_SECS`] from `dir` (§4.4 step 4, §5).
    fn cleanup_stale_tmp(&self, dir: &Path) -> std::io::Result<usize> {
        let cutoff = SystemTime::now()
            .checked_sub(Duration::from_secs(DEFAULT_TMP_CLEANUP_AGE_SECS as u64))
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut n = 0;
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.ends_with(".h5.tmp") {
                continue;
            }
            if let Ok(meta) = entry.metadata() {
                if let Ok(modified) = meta.modified() {
                    if modified < cutoff {
                        let _ = std::fs::remove_file(entry.path());
                        n += 1;
                    }
                }
            }
        }
        Ok(n)
    }

    /// Scan `subsets/` under `{ds_root}` for `*.h5` files the catalog
    /// doesn't know about, and register the ones whose attributes and
    /// recomputed content hash are internally consistent (§5, §8).
    pub fn fsck_dataset(&self, db: &mut DatasetDb) -> Result<FsckReport, Error> {
        let subsets_dir = self.ds_root.join("subsets");
        let mut report = FsckReport::default();
        if !subsets_dir.exists() {
            return Ok(report);
        }

        let mut stack = vec![subsets_dir];
        while let Some(dir) = stack.pop() {
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                    continue;
                }
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                if !name.ends_with(".h5") {
                    continue;
                }
                report.scanned += 1;
                let relpath = path
                    .strip_prefix(&self.ds_root)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .replace('\\', "/");
                if db.relpath_registered(&relpath)? {
                    continue;
                }
                if !self.try_register_orphan(db, &path, &relpath)? {
                    report.skipped += 1;
                } else {
                    report.inserted += 1;
                }
            }
        }
        Ok(report)
    }

    /// Hard-delete one soft-deleted part (§3 Lifecycle): unlink its file
    /// (tolerating it already being gone, e.g. a retried GC pass), then
    /// remove its catalog row and decrement the subset's `total_rows`,
    /// collapsing the subset if that drains it to zero live rows.
    /// Returns `false` if the part's catalog row was already gone.
    pub fn hard_delete_part(&self, db: &mut DatasetDb, part_uuid: &str) -> Result<bool, Error> {
        let part = match db.delete_part_row(part_uuid)? {
            Some(part) => part,
            None => return Ok(false),
        };
        let path = self.ds_root.join(&part.file_relpath);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io(e)),
        }
        db.collapse_subset_if_drained(&part.subset_uuid)?;
        Ok(true)
    }

    /// Soft-delete GC (§3 Lifecycle, §4.6): hard-delete every part marked
    /// for deletion, prune directories left empty by that, then collapse
    /// any soft-deleted subset whose live row count has since reached
    /// zero. Intended to run under a `DatasetLease`, held by the caller.
    pub fn gc_deleted(&self, db: &mut DatasetDb) -> Result<GcReport, Error> {
        let mut report = GcReport::default();
        for part in db.list_soft_deleted_parts()? {
            if self.hard_delete_part(db, &part.part_uuid)? {
                report.parts_removed += 1;
            }
        }
        report.dirs_pruned = Self::prune_empty_dirs(&self.ds_root.join("subsets"))?;
        for subset in db.list_soft_deleted_subsets()? {
            if db.collapse_subset_if_drained(&subset.subset_uuid)? {
                report.subsets_collapsed += 1;
            }
        }
        Ok(report)
    }

    /// Recursively remove directories left empty under `dir` (not `dir`
    /// itself), innermost first (§3 Lifecycle "prunes empty directories").
    fn prune_empty_dirs(dir: &Path) -> Result<usize, Error> {
        if !dir.exists() {
            return Ok(0);
        }
        let mut pruned = 0;
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            pruned += Self::prune_empty_dirs(&path)?;
            if std::fs::read_dir(&path)?.next().is_none() {
                std::fs::remove_dir(&path)?;
                pruned += 1;
            }
        }
        Ok(pruned)
    }

    fn try_register_orphan(
        &self,
        db: &mut DatasetDb,
        path: &Path,
        relpath: &str,
    ) -> Result<bool, Error> {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(_) => return Ok(false),
        };
        let (attrs, fields, batch) = match container::decode(&bytes) {
            Ok(v) => v,
            Err(_) => return Ok(false),
        };
        if db.get_subset(&attrs.subset_uuid)?.is_none() {
            return Ok(false);
        }
        let recomputed = rowvault_hashing::content_hash(&fields, &batch);
        if recomputed != attrs.content_hash {
            return Ok(false);
        }
        let part = PartRecord {
            part_uuid: attrs.part_uuid,
            subset_uuid: attrs.subset_uuid,
            created_at_epoch: attrs.created_at_epoch,
            n_rows: attrs.n_rows,
            scheme_version: attrs.scheme_version,
            marked_for_deletion: false,
            file_relpath: relpath.to_string(),
            content_hash: attrs.content_hash,
        };
        match db.insert_part(&part) {
            Ok(()) => Ok(true),
            Err(_) => Ok(false),
        }
    }
}
