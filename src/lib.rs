//! # rowvault
//!
//! A crash-safe, content-addressed tabular data manager: datasets are
//! partitioned into subsets by a deterministic key identity, subsets are
//! append-only sequences of immutable parts, and every part is sealed with
//! a write/fsync/rename/fsync-dir discipline so a crash never leaves a
//! half-written file where a reader could see it.
//!
//! ```no_run
//! use rowvault::{DatasetOptions, Rowvault};
//! use rowvault_core::value::SqlType;
//! use std::collections::BTreeMap;
//!
//! fn main() -> rowvault::Result<()> {
//!     let mut db = Rowvault::open("./data")?;
//!     let mut key_schema = BTreeMap::new();
//!     key_schema.insert("site".to_string(), SqlType::Text);
//!     let options = DatasetOptions::new(key_schema, vec!["site".to_string()], 10_000)?;
//!     let mut dataset = db.ensure_dataset("sensors", options)?;
//!     dataset.flush()?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! [`Rowvault`] owns the root catalog (`{root}/catalog.db`, one row per
//! dataset alias). [`ensure_dataset`](Rowvault::ensure_dataset) opens or
//! creates a dataset and returns a [`Dataset`] handle wired to its own
//! `dataset.db`, part store, and both ingest pipelines. Everything below
//! this crate — schema locking, identity derivation, atomic sealing, the
//! staging queue, the planner — lives in the `rowvault-*` crates this
//! facade composes; only the surface needed to use the library end to end
//! is re-exported here.

mod dataset;
mod options;

pub use dataset::Dataset;
pub use options::DatasetOptions;

pub use rowvault_core::error::{Error, Result};
pub use rowvault_core::value::{SqlType, SqlValue};
pub use rowvault_engine::{Cmp, JaggedPredicate, ReadQuery, ReadResult};
pub use rowvault_partstore::store::{FsckReport, GcReport};
pub use rowvault_partstore::StorageScheme;
pub use rowvault_schema::canonical::{FieldSpec, IncomingFieldKind, IncomingFieldSpec};
pub use rowvault_schema::{JaggedSpec, RowBatch};

use rowvault_catalog::catalog_db::CatalogDb;
use rowvault_catalog::dataset_db::DatasetDb;
use rowvault_engine::config::DatasetSchema;
use rowvault_partstore::PartStore;
use std::path::PathBuf;

/// Root handle: one `{root}/catalog.db` shared by every dataset alias
/// opened beneath `root` (§3 Lifecycle, §4.5).
pub struct Rowvault {
    root: PathBuf,
    catalog: CatalogDb,
}

impl Rowvault {
    /// Open (creating if absent) the catalog rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let catalog = CatalogDb::open(&root.join("catalog.db"))?;
        Ok(Rowvault { root, catalog })
    }

    /// Create `alias` if it doesn't exist yet, or open the existing
    /// dataset — `options` is only consulted on first creation; a
    /// reopen always restores the persisted schema JSON instead (§3).
    pub fn ensure_dataset(&mut self, alias: &str, options: DatasetOptions) -> Result<Dataset> {
        let schema = options.into_schema();
        let storage_scheme_json = serde_json::to_string(&schema.1)
            .map_err(|e| Error::Catalog(e.to_string()))?;
        let record = self
            .catalog
            .ensure_dataset(alias, &schema.0.to_json()?, &storage_scheme_json)?;

        let persisted_schema = DatasetSchema::from_json(&record.schema_json)?;
        let persisted_scheme: StorageScheme = serde_json::from_str(&record.storage_scheme_json)
            .map_err(|e| Error::Catalog(e.to_string()))?;

        let ds_root = self.root.join("datasets").join(&record.dataset_uuid);
        std::fs::create_dir_all(&ds_root)?;
        let mut db = DatasetDb::open(&ds_root.join("dataset.db"))?;
        let key_schema = persisted_schema.key_schema()?;
        db.ensure_key_columns(&rowvault_identity::storage_key_types(&key_schema))?;

        let store = PartStore::new(ds_root.clone(), persisted_scheme.clone());
        let catalog = CatalogDb::open(&self.root.join("catalog.db"))?;

        Ok(Dataset::open(
            ds_root,
            record.dataset_uuid,
            persisted_schema,
            key_schema,
            persisted_scheme.version,
            db,
            store,
            catalog,
        ))
    }

    /// Scan an existing dataset's `subsets/` tree for part files the
    /// catalog has no row for, and register the consistent ones (§5, §8
    /// Scenario C).
    pub fn fsck_dataset(&mut self, alias: &str) -> Result<FsckReport> {
        let record = self
            .catalog
            .get_dataset_by_alias(alias)?
            .ok_or_else(|| Error::DatasetNotFound(alias.to_string()))?;
        let persisted_scheme: StorageScheme = serde_json::from_str(&record.storage_scheme_json)
            .map_err(|e| Error::Catalog(e.to_string()))?;
        let ds_root = self.root.join("datasets").join(&record.dataset_uuid);
        let mut db = DatasetDb::open(&ds_root.join("dataset.db"))?;
        let store = PartStore::new(ds_root, persisted_scheme);
        store.fsck_dataset(&mut db)
    }

    /// Run soft-delete GC for `alias` without holding the dataset open:
    /// hard-delete soft-deleted parts' files, prune directories that
    /// leaves empty, and collapse drained soft-deleted subsets (§3
    /// Lifecycle, §4.6). Equivalent to `ensure_dataset(alias, ..).gc()`
    /// but doesn't require the caller to already hold a `Dataset`.
    pub fn gc_dataset(&mut self, alias: &str) -> Result<GcReport> {
        let record = self
            .catalog
            .get_dataset_by_alias(alias)?
            .ok_or_else(|| Error::DatasetNotFound(alias.to_string()))?;
        let persisted_scheme: StorageScheme = serde_json::from_str(&record.storage_scheme_json)
            .map_err(|e| Error::Catalog(e.to_string()))?;
        let ds_root = self.root.join("datasets").join(&record.dataset_uuid);
        let mut db = DatasetDb::open(&ds_root.join("dataset.db"))?;
        let store = PartStore::new(ds_root.clone(), persisted_scheme);
        let lease = rowvault_concurrency::DatasetLease::new(&ds_root);
        let _guard = lease.acquire()?;
        store.gc_deleted(&mut db)
    }

    pub fn list_datasets(&self) -> Result<Vec<String>> {
        Ok(self
            .catalog
            .list_datasets()?
            .into_iter()
            .map(|d| d.alias)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowvault_schema::canonical::{FieldKind, IncomingFieldKind};
    use rowvault_schema::data::ColumnData;
    use std::collections::BTreeMap;

    fn batch(values: Vec<i64>) -> RowBatch {
        RowBatch {
            columns: vec![("reading".to_string(), ColumnData::Int64(values))],
            meta: BTreeMap::new(),
        }
    }

    fn options() -> DatasetOptions {
        let mut key_schema = BTreeMap::new();
        key_schema.insert("site".to_string(), SqlType::Text);
        DatasetOptions::new(key_schema, vec!["site".to_string()], 2).unwrap()
    }

    fn subset_keys(site: &str) -> BTreeMap<String, SqlValue> {
        let mut keys = BTreeMap::new();
        keys.insert("site".to_string(), SqlValue::Text(site.to_string()));
        keys
    }

    fn incoming() -> Vec<IncomingFieldSpec> {
        vec![IncomingFieldSpec {
            name: "reading".into(),
            kind: IncomingFieldKind::I64,
            shape: vec![],
        }]
    }

    #[test]
    fn ensure_dataset_is_idempotent_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Rowvault::open(dir.path()).unwrap();
        let a = db.ensure_dataset("sensors", options()).unwrap();
        drop(a);
        let _b = db.ensure_dataset("sensors", options()).unwrap();
        assert_eq!(db.list_datasets().unwrap(), vec!["sensors".to_string()]);
    }

    #[test]
    fn buffered_add_then_flush_round_trips_through_read() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Rowvault::open(dir.path()).unwrap();
        let mut dataset = db.ensure_dataset("sensors", options()).unwrap();

        dataset
            .add(&subset_keys("A"), &incoming(), batch(vec![1]), false)
            .unwrap();
        dataset.flush().unwrap();

        let mut query = ReadQuery::default();
        query
            .equality
            .insert("site".to_string(), SqlValue::Text("A".into()));
        let result = dataset.read(&query).unwrap();
        assert_eq!(result.batch.n_rows(), 1);
    }

    #[test]
    fn crash_safe_add_stages_before_sealing_a_full_part() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Rowvault::open(dir.path()).unwrap();
        let mut dataset = db.ensure_dataset("sensors", options()).unwrap();

        dataset
            .add(&subset_keys("A"), &incoming(), batch(vec![1]), true)
            .unwrap();
        let mut query = ReadQuery::default();
        query
            .equality
            .insert("site".to_string(), SqlValue::Text("A".into()));
        assert!(dataset.read(&query).unwrap().batch.is_empty());

        dataset
            .add(&subset_keys("A"), &incoming(), batch(vec![2]), true)
            .unwrap();
        assert_eq!(dataset.read(&query).unwrap().batch.n_rows(), 2);
    }

    #[test]
    fn reopening_a_dataset_restores_its_locked_canonical_dtype() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut db = Rowvault::open(dir.path()).unwrap();
            let mut dataset = db.ensure_dataset("sensors", options()).unwrap();
            dataset
                .add(&subset_keys("A"), &incoming(), batch(vec![1]), false)
                .unwrap();
            dataset.flush().unwrap();
        }
        let mut db = Rowvault::open(dir.path()).unwrap();
        let dataset = db.ensure_dataset("sensors", options()).unwrap();
        assert!(dataset.canonical_fields().unwrap().iter().any(|f| {
            f.name == "reading" && f.kind == FieldKind::Int64
        }));
    }

    #[test]
    fn delete_subset_hides_rows_and_gc_reclaims_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Rowvault::open(dir.path()).unwrap();
        let mut dataset = db.ensure_dataset("sensors", options()).unwrap();

        dataset
            .add(&subset_keys("A"), &incoming(), batch(vec![1]), false)
            .unwrap();
        dataset.flush().unwrap();

        let mut query = ReadQuery::default();
        query
            .equality
            .insert("site".to_string(), SqlValue::Text("A".into()));
        let before = dataset.read(&query).unwrap();
        assert_eq!(before.batch.n_rows(), 1);
        let part_uuid = before.part_row_bounds[0].0.clone();

        dataset.delete_subset(&subset_keys("A")).unwrap();
        assert!(dataset.read(&query).unwrap().batch.is_empty());

        let report = dataset.gc().unwrap();
        assert_eq!(report.subsets_collapsed, 0);
        assert_eq!(report.parts_removed, 0);

        dataset.delete_part(&part_uuid).unwrap();
        let report = dataset.gc().unwrap();
        assert_eq!(report.parts_removed, 1);
        assert_eq!(report.subsets_collapsed, 1);
    }

    #[test]
    fn readding_to_a_soft_deleted_subset_unmarks_it() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Rowvault::open(dir.path()).unwrap();
        let mut dataset = db.ensure_dataset("sensors", options()).unwrap();

        dataset
            .add(&subset_keys("A"), &incoming(), batch(vec![1]), false)
            .unwrap();
        dataset.flush().unwrap();
        dataset.delete_subset(&subset_keys("A")).unwrap();

        dataset
            .add(&subset_keys("A"), &incoming(), batch(vec![2]), false)
            .unwrap();
        dataset.flush().unwrap();

        let mut query = ReadQuery::default();
        query
            .equality
            .insert("site".to_string(), SqlValue::Text("A".into()));
        assert_eq!(dataset.read(&query).unwrap().batch.n_rows(), 2);
    }

    #[test]
    fn fsck_dataset_reports_nothing_for_a_healthy_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Rowvault::open(dir.path()).unwrap();
        let mut dataset = db.ensure_dataset("sensors", options()).unwrap();
        dataset
            .add(&subset_keys("A"), &incoming(), batch(vec![1]), false)
            .unwrap();
        dataset.flush().unwrap();

        let report = db.fsck_dataset("sensors").unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.inserted, 0);
    }
}
