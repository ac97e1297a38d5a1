//! [`Dataset`]: a single dataset's full write/read surface, wiring the
//! canonical dtype, key schema, catalog, part store, and both ingest
//! pipelines together behind one handle (§3, §4).

use rowvault_catalog::catalog_db::CatalogDb;
use rowvault_catalog::dataset_db::DatasetDb;
use rowvault_concurrency::DatasetLease;
use rowvault_core::error::{Error, Result};
use rowvault_core::value::SqlValue;
use rowvault_engine::config::DatasetSchema;
use rowvault_engine::pipeline::{BufferedPipeline, CrashSafePipeline};
use rowvault_engine::planner::{Planner, ReadQuery, ReadResult};
use rowvault_partstore::store::{FsckReport, GcReport};
use rowvault_partstore::PartStore;
use rowvault_schema::canonical::{CanonicalDtype, FieldSpec, IncomingFieldSpec};
use rowvault_schema::{KeySchema, RowBatch};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// An open dataset: one `dataset.db`, one `subsets/` tree under
/// `ds_root`, and the in-memory canonical dtype that locks from the
/// first ingested batch (§3 Lifecycle).
pub struct Dataset {
    ds_root: PathBuf,
    dataset_uuid: String,
    schema: DatasetSchema,
    key_schema: KeySchema,
    scheme_version: i64,
    canonical: CanonicalDtype,
    db: DatasetDb,
    store: PartStore,
    catalog: CatalogDb,
    buffered: BufferedPipeline,
    crash_safe: CrashSafePipeline,
}

impl Dataset {
    /// Assemble a `Dataset` handle from its already-opened parts. `schema`
    /// is the persisted schema JSON as of this open — if `dtype_descr` is
    /// already `Some`, the canonical dtype is restored locked rather than
    /// waiting for a first batch (§3, §6).
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn open(
        ds_root: PathBuf,
        dataset_uuid: String,
        schema: DatasetSchema,
        key_schema: KeySchema,
        scheme_version: i64,
        db: DatasetDb,
        store: PartStore,
        catalog: CatalogDb,
    ) -> Dataset {
        let canonical = match &schema.dtype_descr {
            Some(fields) => CanonicalDtype::from_locked(fields.clone(), schema.max_unicode_cap),
            None => CanonicalDtype::new(schema.max_unicode_cap),
        };
        let buffered = BufferedPipeline::new(ds_root.clone(), schema.part_config.part_rows);
        let crash_safe = CrashSafePipeline::new(ds_root.clone(), schema.part_config.part_rows);
        Dataset {
            ds_root,
            dataset_uuid,
            schema,
            key_schema,
            scheme_version,
            canonical,
            db,
            store,
            catalog,
            buffered,
            crash_safe,
        }
    }

    /// The locked canonical dtype's fields, or `None` if nothing has been
    /// ingested yet.
    pub fn canonical_fields(&self) -> Option<&[FieldSpec]> {
        self.canonical.fields()
    }

    /// Append `batch` to the subset identified by `subset_keys`, routing
    /// through the crash-safe staging path or the faster buffered path
    /// depending on `crash_safe` (§4.7, §4.8).
    ///
    /// Locks the canonical dtype on the very first call across the
    /// dataset's lifetime, or widens a Unicode field in place if
    /// `incoming_fields` needs more width than is currently locked — both
    /// cases persist the updated schema JSON before any row is written.
    pub fn add(
        &mut self,
        subset_keys: &BTreeMap<String, SqlValue>,
        incoming_fields: &[IncomingFieldSpec],
        batch: RowBatch,
        crash_safe: bool,
    ) -> Result<()> {
        if batch.is_empty() {
            return Err(Error::EmptyIngest);
        }
        let was_locked = self.canonical.is_locked();
        let fields: Vec<FieldSpec> = if was_locked {
            let widened = self.canonical.ensure_compatible(incoming_fields)?;
            let fields = self.canonical.fields().unwrap().to_vec();
            if widened {
                self.persist_schema(&fields)?;
            }
            fields
        } else {
            let fields = self.canonical.lock_from_first_batch(incoming_fields)?.to_vec();
            self.persist_schema(&fields)?;
            fields
        };
        batch.validate_against(&fields)?;

        let identity_tuple =
            rowvault_identity::identity_tuple(&self.key_schema, subset_keys, &self.schema.quantization)?;
        let subset_uuid = rowvault_identity::subset_uuid(&identity_tuple);
        let key_columns =
            rowvault_identity::storage_values(&self.key_schema, subset_keys, &self.schema.quantization)?;
        self.db.ensure_subset(&subset_uuid, &key_columns)?;
        let subset_uuid = subset_uuid.to_string();

        if crash_safe {
            self.crash_safe.add(
                &mut self.db,
                &self.store,
                &self.dataset_uuid,
                &subset_uuid,
                &fields,
                &batch,
                self.scheme_version,
            )
        } else {
            self.buffered.add(
                &mut self.db,
                &self.store,
                &self.dataset_uuid,
                &subset_uuid,
                &fields,
                &batch,
                self.scheme_version,
            )
        }
    }

    /// Seal every pipeline's remaining buffered/staged rows as tail
    /// parts, of whatever size they happen to be (§4.8 `flush`). A
    /// no-op if nothing has ever been ingested — there is no locked
    /// dtype to seal against.
    pub fn flush(&mut self) -> Result<()> {
        let fields = match self.canonical.fields() {
            Some(fields) => fields.to_vec(),
            None => return Ok(()),
        };
        self.buffered
            .flush(&mut self.db, &self.store, &self.dataset_uuid, &fields, self.scheme_version)?;
        self.crash_safe
            .flush(&mut self.db, &self.store, &self.dataset_uuid, &fields, self.scheme_version)?;
        Ok(())
    }

    /// Plan and materialize `query` against this dataset's live subsets
    /// and parts (§4.9).
    pub fn read(&self, query: &ReadQuery) -> Result<ReadResult> {
        let planner = Planner::new(
            &self.ds_root,
            &self.key_schema,
            &self.schema.quantization,
            &self.schema.jagged,
        );
        planner.materialize(&self.db, query)
    }

    /// Scan this dataset's `subsets/` tree for part files the catalog has
    /// no row for, registering the consistent ones (§5, §8 Scenario C).
    pub fn fsck(&mut self) -> Result<FsckReport> {
        self.store.fsck_dataset(&mut self.db)
    }

    /// Soft-delete the subset identified by `subset_keys` (§3 Lifecycle):
    /// it disappears from `read` immediately, but its row and any still-
    /// live parts survive until a later `gc`. Re-adding to the same keys
    /// un-marks it (see `add`/`DatasetDb::ensure_subset`).
    pub fn delete_subset(&mut self, subset_keys: &BTreeMap<String, SqlValue>) -> Result<()> {
        let identity_tuple =
            rowvault_identity::identity_tuple(&self.key_schema, subset_keys, &self.schema.quantization)?;
        let subset_uuid = rowvault_identity::subset_uuid(&identity_tuple);
        self.db.mark_subset_deleted(&subset_uuid.to_string())
    }

    /// Soft-delete a single part by its UUID (§3 Lifecycle); hidden from
    /// `read` immediately, its file removed only by a later `gc`.
    pub fn delete_part(&mut self, part_uuid: &str) -> Result<()> {
        self.db.mark_part_deleted(part_uuid)
    }

    /// Hard-delete every soft-deleted part's file, prune directories that
    /// leaves empty, and collapse any soft-deleted subset whose live row
    /// count has reached zero (§3 Lifecycle, §4.6). Held under a
    /// `DatasetLease` since it mutates the tree other writers read from.
    pub fn gc(&mut self) -> Result<GcReport> {
        let lease = DatasetLease::new(&self.ds_root);
        let _guard = lease.acquire()?;
        self.store.gc_deleted(&mut self.db)
    }

    fn persist_schema(&mut self, fields: &[FieldSpec]) -> Result<()> {
        self.schema.dtype_descr = Some(fields.to_vec());
        let schema_json = self.schema.to_json()?;
        self.catalog.update_schema_json(&self.dataset_uuid, &schema_json)
    }
}
