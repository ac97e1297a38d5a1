//! The top-level catalog DB: `meta` and `datasets` tables (§4.5, §6).

use crate::pragmas::{apply_required_pragmas, Durability};
use crate::retry::with_immediate_txn;
use crate::types::DatasetRecord;
use rowvault_core::error::Error;
use rowvault_core::naming::validate_name;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use uuid::Uuid;

const DDL: &str = "
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS datasets (
    dataset_uuid TEXT PRIMARY KEY,
    alias TEXT NOT NULL UNIQUE,
    created_at_epoch INTEGER NOT NULL,
    schema_json TEXT NOT NULL,
    storage_scheme_json TEXT NOT NULL
);
";

/// Handle to `{root}/catalog.db`.
pub struct CatalogDb {
    conn: Connection,
}

impl CatalogDb {
    /// Open (creating if absent) the catalog DB at `path`, applying the
    /// required PRAGMAs and DDL, and seeding `meta.database_uuid` on
    /// first open.
    pub fn open(path: &Path) -> Result<Self, Error> {
        let conn = Connection::open(path).map_err(|e| Error::Catalog(e.to_string()))?;
        apply_required_pragmas(&conn, Durability::Normal)?;
        conn.execute_batch(DDL)
            .map_err(|e| Error::Catalog(e.to_string()))?;

        let existing: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'database_uuid'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Catalog(e.to_string()))?;
        if existing.is_none() {
            let db_uuid = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO meta(key, value) VALUES ('database_uuid', ?1)",
                params![db_uuid],
            )
            .map_err(|e| Error::Catalog(e.to_string()))?;
            conn.execute(
                "INSERT INTO meta(key, value) VALUES ('created_at_epoch', ?1)",
                params![rowvault_core::time::now_micros()],
            )
            .map_err(|e| Error::Catalog(e.to_string()))?;
        }
        Ok(CatalogDb { conn })
    }

    pub fn database_uuid(&self) -> Result<String, Error> {
        self.conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'database_uuid'",
                [],
                |row| row.get(0),
            )
            .map_err(|e| Error::Catalog(e.to_string()))
    }

    /// Create a dataset if `alias` is new, or return the existing record
    /// (idempotent `ensure_dataset`, §3 Lifecycle).
    pub fn ensure_dataset(
        &mut self,
        alias: &str,
        schema_json: &str,
        storage_scheme_json: &str,
    ) -> Result<DatasetRecord, Error> {
        validate_name(alias)?;
        if let Some(existing) = self.get_dataset_by_alias(alias)? {
            return Ok(existing);
        }
        let dataset_uuid = Uuid::new_v4().to_string();
        let created_at = rowvault_core::time::now_micros();
        with_immediate_txn(&mut self.conn, |tx| {
            tx.execute(
                "INSERT INTO datasets(dataset_uuid, alias, created_at_epoch, schema_json, storage_scheme_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![dataset_uuid, alias, created_at, schema_json, storage_scheme_json],
            )?;
            Ok(())
        })?;
        Ok(DatasetRecord {
            dataset_uuid,
            alias: alias.to_string(),
            created_at_epoch: created_at,
            schema_json: schema_json.to_string(),
            storage_scheme_json: storage_scheme_json.to_string(),
        })
    }

    /// Persist a dataset's `schema_json`, e.g. once the canonical dtype
    /// locks on first ingest or widens on a later one (§4.1, §6).
    pub fn update_schema_json(&mut self, dataset_uuid: &str, schema_json: &str) -> Result<(), Error> {
        with_immediate_txn(&mut self.conn, |tx| {
            tx.execute(
                "UPDATE datasets SET schema_json = ?1 WHERE dataset_uuid = ?2",
                params![schema_json, dataset_uuid],
            )?;
            Ok(())
        })
    }

    pub fn get_dataset_by_alias(&self, alias: &str) -> Result<Option<DatasetRecord>, Error> {
        self.conn
            .query_row(
                "SELECT dataset_uuid, alias, created_at_epoch, schema_json, storage_scheme_json
                 FROM datasets WHERE alias = ?1",
                params![alias],
                row_to_dataset,
            )
            .optional()
            .map_err(|e| Error::Catalog(e.to_string()))
    }

    pub fn get_dataset(&self, dataset_uuid: &str) -> Result<Option<DatasetRecord>, Error> {
        self.conn
            .query_row(
                "SELECT dataset_uuid, alias, created_at_epoch, schema_json, storage_scheme_json
                 FROM datasets WHERE dataset_uuid = ?1",
                params![dataset_uuid],
                row_to_dataset,
            )
            .optional()
            .map_err(|e| Error::Catalog(e.to_string()))
    }

    pub fn list_datasets(&self) -> Result<Vec<DatasetRecord>, Error> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT dataset_uuid, alias, created_at_epoch, schema_json, storage_scheme_json
                 FROM datasets ORDER BY alias",
            )
            .map_err(|e| Error::Catalog(e.to_string()))?;
        let rows = stmt
            .query_map([], row_to_dataset)
            .map_err(|e| Error::Catalog(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Catalog(e.to_string()))
    }
}

fn row_to_dataset(row: &rusqlite::Row<'_>) -> rusqlite::Result<DatasetRecord> {
    Ok(DatasetRecord {
        dataset_uuid: row.get(0)?,
        alias: row.get(1)?,
        created_at_epoch: row.get(2)?,
        schema_json: row.get(3)?,
        storage_scheme_json: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn ensure_dataset_is_idempotent_by_alias() {
        let dir = tempdir().unwrap();
        let mut db = CatalogDb::open(&dir.path().join("catalog.db")).unwrap();
        let a = db.ensure_dataset("sensors", "{}", "{}").unwrap();
        let b = db.ensure_dataset("sensors", "{}", "{}").unwrap();
        assert_eq!(a.dataset_uuid, b.dataset_uuid);
    }

    #[test]
    fn rejects_invalid_alias_charset() {
        let dir = tempdir().unwrap();
        let mut db = CatalogDb::open(&dir.path().join("catalog.db")).unwrap();
        assert!(db.ensure_dataset("bad alias!", "{}", "{}").is_err());
    }

    #[test]
    fn update_schema_json_persists_for_later_opens() {
        let dir = tempdir().unwrap();
        let mut db = CatalogDb::open(&dir.path().join("catalog.db")).unwrap();
        let record = db.ensure_dataset("sensors", "{}", "{}").unwrap();
        db.update_schema_json(&record.dataset_uuid, "{\"locked\":true}")
            .unwrap();
        let reloaded = db.get_dataset(&record.dataset_uuid).unwrap().unwrap();
        assert_eq!(reloaded.schema_json, "{\"locked\":true}");
    }

    #[test]
    fn database_uuid_is_stable_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.db");
        let uuid1 = CatalogDb::open(&path).unwrap().database_uuid().unwrap();
        let uuid2 = CatalogDb::open(&path).unwrap().database_uuid().unwrap();
        assert_eq!(uuid1, uuid2);
    }
}
