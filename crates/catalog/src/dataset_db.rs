//! The per-dataset DB: `meta`, `subsets`, `parts`, `staging_rows` (§4.5).
//!
//! One `DatasetDb` wraps `datasets/{dataset_uuid}/dataset.db`. Key columns
//! on `subsets` are added lazily, the first time a key name is seen, via
//! `ensure_key_columns` — `spec.md` §3 describes the key schema as
//! declared once the canonical dtype locks, and this mirrors that: we do
//! not pre-create every possible key column up front.

use crate::pragmas::{apply_required_pragmas, Durability};
use crate::retry::with_immediate_txn;
use crate::types::{PartRecord, StagingRowRecord, SubsetRecord};
use rowvault_core::error::Error;
use rowvault_core::value::{SqlType, SqlValue};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use uuid::Uuid;

const DDL: &str = "
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS subsets (
    subset_uuid TEXT PRIMARY KEY,
    created_at_epoch INTEGER NOT NULL,
    marked_for_deletion INTEGER NOT NULL DEFAULT 0,
    total_rows INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_subsets_live
    ON subsets(subset_uuid) WHERE marked_for_deletion = 0;
CREATE TABLE IF NOT EXISTS parts (
    part_uuid TEXT PRIMARY KEY,
    subset_uuid TEXT NOT NULL REFERENCES subsets(subset_uuid) ON DELETE CASCADE,
    created_at_epoch INTEGER NOT NULL,
    n_rows INTEGER NOT NULL,
    scheme_version INTEGER NOT NULL,
    file_relpath TEXT NOT NULL,
    marked_for_deletion INTEGER NOT NULL DEFAULT 0,
    content_hash TEXT NOT NULL,
    UNIQUE(subset_uuid, content_hash)
);
CREATE INDEX IF NOT EXISTS idx_parts_subset
    ON parts(subset_uuid) WHERE marked_for_deletion = 0;
CREATE TABLE IF NOT EXISTS staging_rows (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    subset_uuid TEXT NOT NULL,
    n_rows INTEGER NOT NULL,
    created_at_epoch INTEGER NOT NULL,
    payload BLOB NOT NULL,
    claimed_by TEXT,
    claimed_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_staging_unclaimed
    ON staging_rows(subset_uuid) WHERE claimed_by IS NULL;
CREATE INDEX IF NOT EXISTS idx_staging_claimed_by ON staging_rows(claimed_by);
CREATE INDEX IF NOT EXISTS idx_staging_claimed_at ON staging_rows(claimed_at);
CREATE INDEX IF NOT EXISTS idx_staging_subset_id ON staging_rows(subset_uuid, id);
";

/// A planner-level predicate set over `subsets` (§4.9): equality on
/// already-storage-shaped columns (raw for non-REAL keys, `_s`/`_q` for
/// REAL equality), inclusive ranges on raw REAL columns, and a
/// NaN-is-this-column check (`col != col`) for REAL columns where the
/// caller wants exactly the NaN subsets.
#[derive(Debug, Clone, Default)]
pub struct SubsetFilter {
    pub equality: Vec<(String, SqlValue)>,
    pub real_ranges: Vec<(String, f64, f64)>,
    pub nan_columns: Vec<String>,
    pub time_range: Option<(i64, i64)>,
}

/// Handle to `datasets/{dataset_uuid}/dataset.db`.
pub struct DatasetDb {
    conn: Connection,
}

impl DatasetDb {
    /// Open (creating if absent) a dataset's per-dataset DB, applying the
    /// required PRAGMAs and DDL.
    pub fn open(path: &Path) -> Result<Self, Error> {
        let conn = Connection::open(path).map_err(|e| Error::Catalog(e.to_string()))?;
        apply_required_pragmas(&conn, Durability::Full)?;
        conn.execute_batch(DDL)
            .map_err(|e| Error::Catalog(e.to_string()))?;
        Ok(DatasetDb { conn })
    }

    /// Add any key columns from `key_schema` that don't already exist on
    /// `subsets`. Idempotent; safe to call on every `ensure_dataset`.
    pub fn ensure_key_columns(
        &mut self,
        key_schema: &BTreeMap<String, SqlType>,
    ) -> Result<(), Error> {
        let existing: BTreeSet<String> = {
            let mut stmt = self
                .conn
                .prepare("PRAGMA table_info(subsets)")
                .map_err(|e| Error::Catalog(e.to_string()))?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(1))
                .map_err(|e| Error::Catalog(e.to_string()))?;
            names
                .collect::<rusqlite::Result<BTreeSet<_>>>()
                .map_err(|e| Error::Catalog(e.to_string()))?
        };
        for (name, sql_type) in key_schema {
            if existing.contains(name) {
                continue;
            }
            rowvault_core::naming::validate_name(name)?;
            let decl = match sql_type {
                SqlType::Integer => "INTEGER",
                SqlType::Real => "REAL",
                SqlType::Boolean => "BOOLEAN",
                SqlType::Text => "TEXT",
            };
            let sql = format!("ALTER TABLE subsets ADD COLUMN {name} {decl}");
            self.conn
                .execute(&sql, [])
                .map_err(|e| Error::Catalog(e.to_string()))?;
        }
        Ok(())
    }

    /// Look up a subset's row in `subsets` by its `equality_predicates`
    /// (the `_s`/`_q` expanded key columns from `rowvault-identity`), or
    /// insert a new row with `subset_uuid` if none matches (§4.2, §4.5).
    pub fn ensure_subset(
        &mut self,
        subset_uuid: &Uuid,
        key_columns: &BTreeMap<String, SqlValue>,
    ) -> Result<SubsetRecord, Error> {
        if let Some(existing) = self.get_subset(&subset_uuid.to_string())? {
            if existing.marked_for_deletion {
                with_immediate_txn(&mut self.conn, |tx| {
                    tx.execute(
                        "UPDATE subsets SET marked_for_deletion = 0 WHERE subset_uuid = ?1",
                        params![existing.subset_uuid],
                    )?;
                    Ok(())
                })?;
                return Ok(SubsetRecord {
                    marked_for_deletion: false,
                    ..existing
                });
            }
            return Ok(existing);
        }
        let created_at = rowvault_core::time::now_micros();
        let subset_uuid_str = subset_uuid.to_string();
        let mut cols = vec!["subset_uuid".to_string(), "created_at_epoch".to_string()];
        let mut placeholders = vec!["?1".to_string(), "?2".to_string()];
        let mut values: Vec<Box<dyn rusqlite::ToSql>> =
            vec![Box::new(subset_uuid_str.clone()), Box::new(created_at)];
        for (name, value) in key_columns {
            cols.push(name.clone());
            placeholders.push(format!("?{}", values.len() + 1));
            values.push(sql_value_to_sql(value));
        }
        let sql = format!(
            "INSERT INTO subsets({}) VALUES ({})",
            cols.join(", "),
            placeholders.join(", ")
        );
        let params: Vec<&dyn rusqlite::ToSql> = values.iter().map(|b| b.as_ref()).collect();
        with_immediate_txn(&mut self.conn, |tx| {
            tx.execute(&sql, params.as_slice())?;
            Ok(())
        })?;
        Ok(SubsetRecord {
            subset_uuid: subset_uuid_str,
            created_at_epoch: created_at,
            marked_for_deletion: false,
            total_rows: 0,
        })
    }

    pub fn get_subset(&self, subset_uuid: &str) -> Result<Option<SubsetRecord>, Error> {
        self.conn
            .query_row(
                "SELECT subset_uuid, created_at_epoch, marked_for_deletion, total_rows
                 FROM subsets WHERE subset_uuid = ?1",
                params![subset_uuid],
                row_to_subset,
            )
            .optional()
            .map_err(|e| Error::Catalog(e.to_string()))
    }

    pub fn list_live_subsets(&self) -> Result<Vec<SubsetRecord>, Error> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT subset_uuid, created_at_epoch, marked_for_deletion, total_rows
                 FROM subsets WHERE marked_for_deletion = 0 ORDER BY created_at_epoch, subset_uuid",
            )
            .map_err(|e| Error::Catalog(e.to_string()))?;
        let rows = stmt
            .query_map([], row_to_subset)
            .map_err(|e| Error::Catalog(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Catalog(e.to_string()))
    }

    /// Select live subsets matching `filter` (§4.9 "Select subsets").
    /// Column names in `filter` are validated against the dataset/field
    /// name charset before interpolation, since SQLite cannot bind
    /// identifiers as parameters; values are always bound.
    pub fn select_subsets(&self, filter: &SubsetFilter) -> Result<Vec<SubsetRecord>, Error> {
        let mut clauses = vec!["marked_for_deletion = 0".to_string()];
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        for (column, value) in &filter.equality {
            rowvault_core::naming::validate_name(column)?;
            values.push(sql_value_to_sql(value));
            clauses.push(format!("{column} = ?{}", values.len()));
        }
        for (column, lo, hi) in &filter.real_ranges {
            rowvault_core::naming::validate_name(column)?;
            values.push(Box::new(*lo));
            let lo_idx = values.len();
            values.push(Box::new(*hi));
            let hi_idx = values.len();
            clauses.push(format!(
                "({column} = {column} AND {column} BETWEEN ?{lo_idx} AND ?{hi_idx})"
            ));
        }
        for column in &filter.nan_columns {
            rowvault_core::naming::validate_name(column)?;
            clauses.push(format!("{column} != {column}"));
        }
        if let Some((lo, hi)) = filter.time_range {
            values.push(Box::new(lo));
            let lo_idx = values.len();
            values.push(Box::new(hi));
            let hi_idx = values.len();
            clauses.push(format!("created_at_epoch BETWEEN ?{lo_idx} AND ?{hi_idx}"));
        }

        let sql = format!(
            "SELECT subset_uuid, created_at_epoch, marked_for_deletion, total_rows
             FROM subsets WHERE {} ORDER BY created_at_epoch, subset_uuid",
            clauses.join(" AND ")
        );
        let params: Vec<&dyn rusqlite::ToSql> = values.iter().map(|b| b.as_ref()).collect();
        let mut stmt = self.conn.prepare(&sql).map_err(|e| Error::Catalog(e.to_string()))?;
        let rows = stmt
            .query_map(params.as_slice(), row_to_subset)
            .map_err(|e| Error::Catalog(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Catalog(e.to_string()))
    }

    /// Soft-delete a subset: it disappears from `list_live_subsets`/
    /// `select_subsets` immediately, but its row (and any still-live
    /// parts) survive until a later `collapse_subset_if_drained` once its
    /// live row count reaches zero (§3 Lifecycle).
    pub fn mark_subset_deleted(&mut self, subset_uuid: &str) -> Result<(), Error> {
        with_immediate_txn(&mut self.conn, |tx| {
            tx.execute(
                "UPDATE subsets SET marked_for_deletion = 1 WHERE subset_uuid = ?1",
                params![subset_uuid],
            )?;
            Ok(())
        })
    }

    /// Soft-delete a single part: hidden from `list_live_parts`/
    /// `select_parts` immediately; its file and catalog row are only
    /// removed by a later `delete_part_row` (§3 Lifecycle).
    pub fn mark_part_deleted(&mut self, part_uuid: &str) -> Result<(), Error> {
        with_immediate_txn(&mut self.conn, |tx| {
            tx.execute(
                "UPDATE parts SET marked_for_deletion = 1 WHERE part_uuid = ?1",
                params![part_uuid],
            )?;
            Ok(())
        })
    }

    pub fn get_part(&self, part_uuid: &str) -> Result<Option<PartRecord>, Error> {
        self.conn
            .query_row(
                "SELECT part_uuid, subset_uuid, created_at_epoch, n_rows, scheme_version,
                        file_relpath, marked_for_deletion, content_hash
                 FROM parts WHERE part_uuid = ?1",
                params![part_uuid],
                row_to_part,
            )
            .optional()
            .map_err(|e| Error::Catalog(e.to_string()))
    }

    pub fn list_soft_deleted_parts(&self) -> Result<Vec<PartRecord>, Error> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT part_uuid, subset_uuid, created_at_epoch, n_rows, scheme_version,
                        file_relpath, marked_for_deletion, content_hash
                 FROM parts WHERE marked_for_deletion = 1
                 ORDER BY subset_uuid, created_at_epoch, part_uuid",
            )
            .map_err(|e| Error::Catalog(e.to_string()))?;
        let rows = stmt
            .query_map([], row_to_part)
            .map_err(|e| Error::Catalog(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Catalog(e.to_string()))
    }

    pub fn list_soft_deleted_subsets(&self) -> Result<Vec<SubsetRecord>, Error> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT subset_uuid, created_at_epoch, marked_for_deletion, total_rows
                 FROM subsets WHERE marked_for_deletion = 1 ORDER BY created_at_epoch, subset_uuid",
            )
            .map_err(|e| Error::Catalog(e.to_string()))?;
        let rows = stmt
            .query_map([], row_to_subset)
            .map_err(|e| Error::Catalog(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Catalog(e.to_string()))
    }

    /// Hard-delete `part_uuid`'s catalog row and decrement its subset's
    /// `total_rows` by the part's `n_rows`, in one transaction (§3
    /// Lifecycle "hard deletion ... updates row counts"). Returns the
    /// removed row, so the caller can unlink its file, or `None` if it
    /// was already gone.
    pub fn delete_part_row(&mut self, part_uuid: &str) -> Result<Option<PartRecord>, Error> {
        let part = match self.get_part(part_uuid)? {
            Some(part) => part,
            None => return Ok(None),
        };
        let subset_uuid = part.subset_uuid.clone();
        let n_rows = part.n_rows;
        with_immediate_txn(&mut self.conn, |tx| {
            tx.execute("DELETE FROM parts WHERE part_uuid = ?1", params![part_uuid])?;
            tx.execute(
                "UPDATE subsets SET total_rows = MAX(total_rows - ?1, 0) WHERE subset_uuid = ?2",
                params![n_rows, subset_uuid],
            )?;
            Ok(())
        })?;
        Ok(Some(part))
    }

    /// Hard-delete `subset_uuid`'s row if it is soft-deleted and its live
    /// row count has reached zero (§3 Lifecycle "collapses subsets whose
    /// live row count reaches zero"). `parts.subset_uuid` is `ON DELETE
    /// CASCADE`, so any stray part rows go with it. No-op — and returns
    /// `false` — if the subset is gone, still live, or still holds rows.
    pub fn collapse_subset_if_drained(&mut self, subset_uuid: &str) -> Result<bool, Error> {
        let subset = match self.get_subset(subset_uuid)? {
            Some(subset) => subset,
            None => return Ok(false),
        };
        if !subset.marked_for_deletion || subset.total_rows > 0 {
            return Ok(false);
        }
        with_immediate_txn(&mut self.conn, |tx| {
            tx.execute(
                "DELETE FROM subsets WHERE subset_uuid = ?1",
                params![subset_uuid],
            )?;
            Ok(())
        })?;
        Ok(true)
    }

    /// Insert a part row, enforcing the `(subset_uuid, content_hash)` dedup
    /// index (§4.4, §8). Returns `Error::PartAlreadyExists` if a part with
    /// the same content hash already exists in this subset, and bumps
    /// `subsets.total_rows` by `n_rows` on success.
    pub fn insert_part(&mut self, part: &PartRecord) -> Result<(), Error> {
        if let Some(existing_uuid) = self.find_part_by_content_hash(
            &part.subset_uuid,
            &part.content_hash,
        )? {
            return Err(Error::PartAlreadyExists {
                part_uuid: existing_uuid,
            });
        }
        let n_rows = part.n_rows;
        let subset_uuid = part.subset_uuid.clone();
        let part = part.clone();
        with_immediate_txn(&mut self.conn, |tx| {
            tx.execute(
                "INSERT INTO parts(part_uuid, subset_uuid, created_at_epoch, n_rows,
                                    scheme_version, file_relpath, marked_for_deletion, content_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
                params![
                    part.part_uuid,
                    part.subset_uuid,
                    part.created_at_epoch,
                    part.n_rows,
                    part.scheme_version,
                    part.file_relpath,
                    part.content_hash,
                ],
            )?;
            tx.execute(
                "UPDATE subsets SET total_rows = total_rows + ?1 WHERE subset_uuid = ?2",
                params![n_rows, subset_uuid],
            )?;
            Ok(())
        })
    }

    pub fn find_part_by_content_hash(
        &self,
        subset_uuid: &str,
        content_hash: &str,
    ) -> Result<Option<String>, Error> {
        self.conn
            .query_row(
                "SELECT part_uuid FROM parts WHERE subset_uuid = ?1 AND content_hash = ?2",
                params![subset_uuid, content_hash],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Catalog(e.to_string()))
    }

    /// True if `relpath` already has a `parts` row (live or soft-deleted) —
    /// used by `fsck_dataset` to tell registered files from orphans.
    pub fn relpath_registered(&self, relpath: &str) -> Result<bool, Error> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM parts WHERE file_relpath = ?1",
                params![relpath],
                |row| row.get(0),
            )
            .map_err(|e| Error::Catalog(e.to_string()))?;
        Ok(count > 0)
    }

    pub fn list_live_parts(&self, subset_uuid: &str) -> Result<Vec<PartRecord>, Error> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT part_uuid, subset_uuid, created_at_epoch, n_rows, scheme_version,
                        file_relpath, marked_for_deletion, content_hash
                 FROM parts WHERE subset_uuid = ?1 AND marked_for_deletion = 0
                 ORDER BY created_at_epoch, part_uuid",
            )
            .map_err(|e| Error::Catalog(e.to_string()))?;
        let rows = stmt
            .query_map(params![subset_uuid], row_to_part)
            .map_err(|e| Error::Catalog(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Catalog(e.to_string()))
    }

    /// Select live parts across `subset_uuids`, optionally restricted to
    /// a `created_at_epoch` range, ordered deterministically by
    /// `(subset_uuid, created_at_epoch, part_uuid)` (§4.9 "Select parts").
    pub fn select_parts(
        &self,
        subset_uuids: &[String],
        time_range: Option<(i64, i64)>,
    ) -> Result<Vec<PartRecord>, Error> {
        if subset_uuids.is_empty() {
            return Ok(Vec::new());
        }
        let mut clauses = vec!["marked_for_deletion = 0".to_string()];
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        let placeholders: Vec<String> = subset_uuids
            .iter()
            .map(|uuid| {
                values.push(Box::new(uuid.clone()));
                format!("?{}", values.len())
            })
            .collect();
        clauses.push(format!("subset_uuid IN ({})", placeholders.join(", ")));

        if let Some((lo, hi)) = time_range {
            values.push(Box::new(lo));
            let lo_idx = values.len();
            values.push(Box::new(hi));
            let hi_idx = values.len();
            clauses.push(format!("created_at_epoch BETWEEN ?{lo_idx} AND ?{hi_idx}"));
        }

        let sql = format!(
            "SELECT part_uuid, subset_uuid, created_at_epoch, n_rows, scheme_version,
                    file_relpath, marked_for_deletion, content_hash
             FROM parts WHERE {}
             ORDER BY subset_uuid, created_at_epoch, part_uuid",
            clauses.join(" AND ")
        );
        let params: Vec<&dyn rusqlite::ToSql> = values.iter().map(|b| b.as_ref()).collect();
        let mut stmt = self.conn.prepare(&sql).map_err(|e| Error::Catalog(e.to_string()))?;
        let rows = stmt
            .query_map(params.as_slice(), row_to_part)
            .map_err(|e| Error::Catalog(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Catalog(e.to_string()))
    }

    /// Enqueue a staging payload for crash-safe ingest (§4.7, §4.8).
    pub fn enqueue_staging_row(
        &mut self,
        subset_uuid: &str,
        n_rows: i64,
        payload: &[u8],
    ) -> Result<i64, Error> {
        let created_at = rowvault_core::time::now_micros();
        with_immediate_txn(&mut self.conn, |tx| {
            tx.execute(
                "INSERT INTO staging_rows(subset_uuid, n_rows, created_at_epoch, payload)
                 VALUES (?1, ?2, ?3, ?4)",
                params![subset_uuid, n_rows, created_at, payload],
            )?;
            Ok(tx.last_insert_rowid())
        })
    }

    /// Read up to `scan_limit` unclaimed staging rows for `subset_uuid`,
    /// oldest `id` first, without claiming them. The stager builds its
    /// prefix decision from this, then calls [`Self::claim_ids`] (§4.7).
    pub fn peek_unclaimed(
        &self,
        subset_uuid: &str,
        scan_limit: i64,
    ) -> Result<Vec<StagingRowRecord>, Error> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, subset_uuid, n_rows, created_at_epoch, payload, claimed_by, claimed_at
                 FROM staging_rows
                 WHERE subset_uuid = ?1 AND claimed_by IS NULL
                 ORDER BY id LIMIT ?2",
            )
            .map_err(|e| Error::Catalog(e.to_string()))?;
        let rows = stmt
            .query_map(params![subset_uuid, scan_limit], row_to_staging)
            .map_err(|e| Error::Catalog(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Catalog(e.to_string()))
    }

    /// Tag `ids` with `claim_token`/now in one immediate transaction.
    pub fn claim_ids(&mut self, ids: &[i64], claim_token: &str) -> Result<(), Error> {
        if ids.is_empty() {
            return Ok(());
        }
        let claimed_at = rowvault_core::time::now_micros();
        with_immediate_txn(&mut self.conn, |tx| {
            for id in ids {
                tx.execute(
                    "UPDATE staging_rows SET claimed_by = ?1, claimed_at = ?2 WHERE id = ?3",
                    params![claim_token, claimed_at, id],
                )?;
            }
            Ok(())
        })
    }

    pub fn get_staging_row(&self, id: i64) -> Result<Option<StagingRowRecord>, Error> {
        self.conn
            .query_row(
                "SELECT id, subset_uuid, n_rows, created_at_epoch, payload, claimed_by, claimed_at
                 FROM staging_rows WHERE id = ?1",
                params![id],
                row_to_staging,
            )
            .optional()
            .map_err(|e| Error::Catalog(e.to_string()))
    }

    /// Release a claim without deleting the rows, so another writer may
    /// retry them (used on compaction failure).
    pub fn unclaim(&mut self, ids: &[i64]) -> Result<(), Error> {
        with_immediate_txn(&mut self.conn, |tx| {
            for id in ids {
                tx.execute(
                    "UPDATE staging_rows SET claimed_by = NULL, claimed_at = NULL WHERE id = ?1",
                    params![id],
                )?;
            }
            Ok(())
        })
    }

    /// Delete staging rows once their claimed batch has been durably
    /// compacted into a sealed part.
    pub fn delete_claimed(&mut self, ids: &[i64]) -> Result<(), Error> {
        with_immediate_txn(&mut self.conn, |tx| {
            for id in ids {
                tx.execute("DELETE FROM staging_rows WHERE id = ?1", params![id])?;
            }
            Ok(())
        })
    }

    /// Clear every claim tagged with `claim_token` — used on compaction
    /// failure to return a whole batch to the unclaimed pool (§4.7).
    pub fn unclaim_by_token(&mut self, claim_token: &str) -> Result<(), Error> {
        with_immediate_txn(&mut self.conn, |tx| {
            tx.execute(
                "UPDATE staging_rows SET claimed_by = NULL, claimed_at = NULL WHERE claimed_by = ?1",
                params![claim_token],
            )?;
            Ok(())
        })
    }

    /// Delete every staging row tagged with `claim_token`, after its batch
    /// has been durably compacted into a sealed part (§4.7).
    pub fn delete_claimed_by_token(&mut self, claim_token: &str) -> Result<(), Error> {
        with_immediate_txn(&mut self.conn, |tx| {
            tx.execute(
                "DELETE FROM staging_rows WHERE claimed_by = ?1",
                params![claim_token],
            )?;
            Ok(())
        })
    }

    /// Clear claims older than `max_age_micros` so a crashed compactor's
    /// claim does not permanently strand staging rows (§4.7, §8).
    pub fn reclaim_stale(&mut self, max_age_micros: i64) -> Result<usize, Error> {
        let cutoff = rowvault_core::time::now_micros() - max_age_micros;
        with_immediate_txn(&mut self.conn, |tx| {
            let n = tx.execute(
                "UPDATE staging_rows SET claimed_by = NULL, claimed_at = NULL
                 WHERE claimed_by IS NOT NULL AND claimed_at < ?1",
                params![cutoff],
            )?;
            Ok(n)
        })
    }

    /// Total `n_rows` across `subset_uuid`'s unclaimed staging rows — lets
    /// a crash-safe writer tell "a full part's worth has accumulated"
    /// apart from "there's only a partial tail left" without guessing from
    /// `select_and_claim_prefix`'s return value (§4.7, §4.8).
    pub fn unclaimed_row_count(&self, subset_uuid: &str) -> Result<i64, Error> {
        self.conn
            .query_row(
                "SELECT COALESCE(SUM(n_rows), 0) FROM staging_rows
                 WHERE subset_uuid = ?1 AND claimed_by IS NULL",
                params![subset_uuid],
                |row| row.get(0),
            )
            .map_err(|e| Error::Catalog(e.to_string()))
    }

    /// Subsets with unclaimed staging rows, ordered by their oldest
    /// unclaimed row's `id` ascending so a compactor drains the
    /// longest-waiting subset first (§4.7's `hot_subsets`).
    pub fn hot_subsets(&self, limit: i64) -> Result<Vec<(String, i64)>, Error> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT subset_uuid, MIN(id) AS oldest_id FROM staging_rows
                 WHERE claimed_by IS NULL
                 GROUP BY subset_uuid ORDER BY oldest_id ASC LIMIT ?1",
            )
            .map_err(|e| Error::Catalog(e.to_string()))?;
        let rows = stmt
            .query_map(params![limit], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(|e| Error::Catalog(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Catalog(e.to_string()))
    }

    /// `PRAGMA wal_checkpoint(TRUNCATE)`: reclaim WAL space after a batch
    /// of compaction work (§4.5).
    pub fn checkpoint(&self) -> Result<(), Error> {
        self.conn
            .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
            .map_err(|e| Error::Catalog(e.to_string()))
    }
}

fn sql_value_to_sql(value: &SqlValue) -> Box<dyn rusqlite::ToSql> {
    match value {
        SqlValue::Int(v) => Box::new(*v),
        SqlValue::Real(v) => Box::new(*v),
        SqlValue::Bool(v) => Box::new(*v),
        SqlValue::Text(v) => Box::new(v.clone()),
    }
}

fn row_to_subset(row: &rusqlite::Row<'_>) -> rusqlite::Result<SubsetRecord> {
    Ok(SubsetRecord {
        subset_uuid: row.get(0)?,
        created_at_epoch: row.get(1)?,
        marked_for_deletion: row.get::<_, i64>(2)? != 0,
        total_rows: row.get(3)?,
    })
}

fn row_to_part(row: &rusqlite::Row<'_>) -> rusqlite::Result<PartRecord> {
    Ok(PartRecord {
        part_uuid: row.get(0)?,
        subset_uuid: row.get(1)?,
        created_at_epoch: row.get(2)?,
        n_rows: row.get(3)?,
        scheme_version: row.get(4)?,
        file_relpath: row.get(5)?,
        marked_for_deletion: row.get::<_, i64>(6)? != 0,
        content_hash: row.get(7)?,
    })
}

fn row_to_staging(row: &rusqlite::Row<'_>) -> rusqlite::Result<StagingRowRecord> {
    Ok(StagingRowRecord {
        id: row.get(0)?,
        subset_uuid: row.get(1)?,
        n_rows: row.get(2)?,
        created_at_epoch: row.get(3)?,
        payload: row.get(4)?,
        claimed_by: row.get(5)?,
        claimed_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_db() -> (tempfile::TempDir, DatasetDb) {
        let dir = tempdir().unwrap();
        let db = DatasetDb::open(&dir.path().join("dataset.db")).unwrap();
        (dir, db)
    }

    #[test]
    fn ensure_key_columns_is_idempotent() {
        let (_dir, mut db) = open_db();
        let mut schema = BTreeMap::new();
        schema.insert("site".to_string(), SqlType::Text);
        schema.insert("lat".to_string(), SqlType::Real);
        db.ensure_key_columns(&schema).unwrap();
        db.ensure_key_columns(&schema).unwrap();
    }

    #[test]
    fn ensure_subset_is_idempotent_by_uuid() {
        let (_dir, mut db) = open_db();
        let uuid = Uuid::new_v4();
        let a = db.ensure_subset(&uuid, &BTreeMap::new()).unwrap();
        let b = db.ensure_subset(&uuid, &BTreeMap::new()).unwrap();
        assert_eq!(a.subset_uuid, b.subset_uuid);
        assert_eq!(db.list_live_subsets().unwrap().len(), 1);
    }

    #[test]
    fn ensure_subset_unmarks_a_previously_soft_deleted_subset() {
        let (_dir, mut db) = open_db();
        let uuid = Uuid::new_v4();
        db.ensure_subset(&uuid, &BTreeMap::new()).unwrap();
        db.mark_subset_deleted(&uuid.to_string()).unwrap();
        assert!(db.list_live_subsets().unwrap().is_empty());

        let reused = db.ensure_subset(&uuid, &BTreeMap::new()).unwrap();
        assert!(!reused.marked_for_deletion);
        assert_eq!(db.list_live_subsets().unwrap().len(), 1);
    }

    #[test]
    fn delete_part_row_decrements_total_rows_and_collapses_drained_subset() {
        let (_dir, mut db) = open_db();
        let subset = Uuid::new_v4();
        db.ensure_subset(&subset, &BTreeMap::new()).unwrap();
        let part = PartRecord {
            part_uuid: Uuid::new_v4().to_string(),
            subset_uuid: subset.to_string(),
            created_at_epoch: 0,
            n_rows: 10,
            scheme_version: 1,
            file_relpath: "x.h5".into(),
            marked_for_deletion: false,
            content_hash: "hash".into(),
        };
        db.insert_part(&part).unwrap();
        db.mark_subset_deleted(&subset.to_string()).unwrap();
        db.mark_part_deleted(&part.part_uuid).unwrap();
        assert_eq!(db.list_soft_deleted_parts().unwrap().len(), 1);

        let removed = db.delete_part_row(&part.part_uuid).unwrap().unwrap();
        assert_eq!(removed.part_uuid, part.part_uuid);
        assert_eq!(db.get_subset(&subset.to_string()).unwrap().unwrap().total_rows, 0);

        assert!(db.collapse_subset_if_drained(&subset.to_string()).unwrap());
        assert!(db.get_subset(&subset.to_string()).unwrap().is_none());
    }

    #[test]
    fn collapse_subset_if_drained_is_a_noop_for_live_subsets_with_rows() {
        let (_dir, mut db) = open_db();
        let subset = Uuid::new_v4();
        db.ensure_subset(&subset, &BTreeMap::new()).unwrap();
        assert!(!db.collapse_subset_if_drained(&subset.to_string()).unwrap());

        db.mark_subset_deleted(&subset.to_string()).unwrap();
        let part = PartRecord {
            part_uuid: Uuid::new_v4().to_string(),
            subset_uuid: subset.to_string(),
            created_at_epoch: 0,
            n_rows: 3,
            scheme_version: 1,
            file_relpath: "y.h5".into(),
            marked_for_deletion: false,
            content_hash: "hash2".into(),
        };
        db.insert_part(&part).unwrap();
        assert!(!db.collapse_subset_if_drained(&subset.to_string()).unwrap());
        assert!(db.get_subset(&subset.to_string()).unwrap().is_some());
    }

    #[test]
    fn select_subsets_filters_by_equality_and_real_range() {
        let (_dir, mut db) = open_db();
        let mut schema = BTreeMap::new();
        schema.insert("site".to_string(), SqlType::Text);
        schema.insert("lat".to_string(), SqlType::Real);
        db.ensure_key_columns(&schema).unwrap();

        let mut cols_a = BTreeMap::new();
        cols_a.insert("site".to_string(), SqlValue::Text("A".into()));
        cols_a.insert("lat".to_string(), SqlValue::Real(12.5));
        cols_a.insert("lat_s".to_string(), SqlValue::Int(0));
        cols_a.insert("lat_q".to_string(), SqlValue::Int(12));
        db.ensure_subset(&Uuid::new_v4(), &cols_a).unwrap();

        let mut cols_b = BTreeMap::new();
        cols_b.insert("site".to_string(), SqlValue::Text("B".into()));
        cols_b.insert("lat".to_string(), SqlValue::Real(99.0));
        cols_b.insert("lat_s".to_string(), SqlValue::Int(0));
        cols_b.insert("lat_q".to_string(), SqlValue::Int(99));
        db.ensure_subset(&Uuid::new_v4(), &cols_b).unwrap();

        let filter = SubsetFilter {
            equality: vec![("site".to_string(), SqlValue::Text("A".into()))],
            ..Default::default()
        };
        let hits = db.select_subsets(&filter).unwrap();
        assert_eq!(hits.len(), 1);

        let range_filter = SubsetFilter {
            real_ranges: vec![("lat".to_string(), 0.0, 50.0)],
            ..Default::default()
        };
        let range_hits = db.select_subsets(&range_filter).unwrap();
        assert_eq!(range_hits.len(), 1);
    }

    #[test]
    fn select_parts_orders_by_subset_then_epoch_then_part_uuid() {
        let (_dir, mut db) = open_db();
        let subset = Uuid::new_v4();
        db.ensure_subset(&subset, &BTreeMap::new()).unwrap();
        for (epoch, suffix) in [(30, "c"), (10, "a"), (20, "b")] {
            db.insert_part(&PartRecord {
                part_uuid: format!("part-{suffix}"),
                subset_uuid: subset.to_string(),
                created_at_epoch: epoch,
                n_rows: 1,
                scheme_version: 1,
                file_relpath: format!("{suffix}.h5"),
                marked_for_deletion: false,
                content_hash: format!("hash-{suffix}"),
            })
            .unwrap();
        }
        let parts = db.select_parts(&[subset.to_string()], None).unwrap();
        let order: Vec<&str> = parts.iter().map(|p| p.part_uuid.as_str()).collect();
        assert_eq!(order, vec!["part-a", "part-b", "part-c"]);
    }

    #[test]
    fn insert_part_rejects_duplicate_content_hash_in_same_subset() {
        let (_dir, mut db) = open_db();
        let subset = Uuid::new_v4();
        db.ensure_subset(&subset, &BTreeMap::new()).unwrap();
        let part = PartRecord {
            part_uuid: Uuid::new_v4().to_string(),
            subset_uuid: subset.to_string(),
            created_at_epoch: 0,
            n_rows: 10,
            scheme_version: 1,
            file_relpath: "x".into(),
            marked_for_deletion: false,
            content_hash: "deadbeef".into(),
        };
        db.insert_part(&part).unwrap();
        let mut dup = part.clone();
        dup.part_uuid = Uuid::new_v4().to_string();
        let err = db.insert_part(&dup).unwrap_err();
        assert!(err.is_dedup_winner());

        let refreshed = db.get_subset(&subset.to_string()).unwrap().unwrap();
        assert_eq!(refreshed.total_rows, 10);
    }

    #[test]
    fn staging_row_claim_and_delete_cycle() {
        let (_dir, mut db) = open_db();
        let subset = Uuid::new_v4().to_string();
        db.enqueue_staging_row(&subset, 5, b"payload-a").unwrap();
        db.enqueue_staging_row(&subset, 5, b"payload-b").unwrap();

        let peeked = db.peek_unclaimed(&subset, 10).unwrap();
        assert_eq!(peeked.len(), 2);
        let ids: Vec<i64> = peeked.iter().map(|r| r.id).collect();
        db.claim_ids(&ids, "writer-1").unwrap();
        assert!(db.peek_unclaimed(&subset, 10).unwrap().is_empty());

        db.delete_claimed(&ids).unwrap();
        assert!(db.get_staging_row(ids[0]).unwrap().is_none());
    }

    #[test]
    fn reclaim_stale_releases_old_claims() {
        let (_dir, mut db) = open_db();
        let subset = Uuid::new_v4().to_string();
        db.enqueue_staging_row(&subset, 1, b"payload").unwrap();
        let ids: Vec<i64> = db
            .peek_unclaimed(&subset, 10)
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        db.claim_ids(&ids, "writer-1").unwrap();
        let released = db.reclaim_stale(-1).unwrap();
        assert_eq!(released, 1);
        let claimed_again = db.peek_unclaimed(&subset, 10).unwrap();
        assert_eq!(claimed_again.len(), 1);
    }

    #[test]
    fn hot_subsets_orders_by_oldest_unclaimed_id() {
        let (_dir, mut db) = open_db();
        let subset_a = Uuid::new_v4().to_string();
        let subset_b = Uuid::new_v4().to_string();
        db.enqueue_staging_row(&subset_a, 1, b"a-1").unwrap();
        db.enqueue_staging_row(&subset_b, 1, b"b-1").unwrap();
        db.enqueue_staging_row(&subset_b, 1, b"b-2").unwrap();

        let hot = db.hot_subsets(10).unwrap();
        assert_eq!(hot[0].0, subset_a);
        assert_eq!(hot[1].0, subset_b);
    }
}
