//! The buffered, non-crash-safe ingest path (§4.8): rows accumulate in
//! memory per subset and seal straight into parts once a subset crosses
//! `part_rows`, without ever touching the staging queue. Faster than the
//! crash-safe path since there is no staging write, at the cost of losing
//! whatever hasn't reached `part_rows` yet on a crash.

use dashmap::DashMap;
use rowvault_catalog::dataset_db::DatasetDb;
use rowvault_concurrency::SubsetLease;
use rowvault_core::error::Error;
use rowvault_partstore::PartStore;
use rowvault_schema::canonical::FieldSpec;
use rowvault_schema::RowBatch;
use std::path::PathBuf;

use crate::rowbatch_ops::take_prefix;

/// Per-subset in-memory buffers, sealed into parts once full.
pub struct BufferedPipeline {
    ds_root: PathBuf,
    part_rows: i64,
    buffers: DashMap<String, RowBatch>,
}

impl BufferedPipeline {
    pub fn new(ds_root: PathBuf, part_rows: i64) -> Self {
        BufferedPipeline {
            ds_root,
            part_rows,
            buffers: DashMap::new(),
        }
    }

    /// Append `batch` to `subset_uuid`'s buffer, sealing every full
    /// `part_rows` prefix that accumulates as a result (§4.8).
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &self,
        db: &mut DatasetDb,
        store: &PartStore,
        dataset_uuid: &str,
        subset_uuid: &str,
        fields: &[FieldSpec],
        batch: &RowBatch,
        scheme_version: i64,
    ) -> Result<(), Error> {
        {
            let mut entry = self.buffers.entry(subset_uuid.to_string()).or_default();
            entry.extend(batch)?;
        }
        self.seal_full_prefixes(db, store, dataset_uuid, subset_uuid, fields, scheme_version)
    }

    fn seal_full_prefixes(
        &self,
        db: &mut DatasetDb,
        store: &PartStore,
        dataset_uuid: &str,
        subset_uuid: &str,
        fields: &[FieldSpec],
        scheme_version: i64,
    ) -> Result<(), Error> {
        loop {
            let ready = self
                .buffers
                .get(subset_uuid)
                .map(|b| b.n_rows() as i64 >= self.part_rows)
                .unwrap_or(false);
            if !ready {
                return Ok(());
            }
            let lease = SubsetLease::new(&self.ds_root, subset_uuid);
            let _guard = lease.acquire()?;
            let prefix = {
                let mut entry = match self.buffers.get_mut(subset_uuid) {
                    Some(e) => e,
                    None => return Ok(()),
                };
                if entry.n_rows() as i64 < self.part_rows {
                    continue;
                }
                take_prefix(&mut entry, self.part_rows as usize)
            };
            store.publish(
                db,
                dataset_uuid,
                subset_uuid,
                fields,
                &prefix,
                scheme_version,
            )?;
        }
    }

    /// Seal every subset's remaining buffered rows as a tail part, of
    /// whatever size they happen to be (§4.8 `flush`). Drains every
    /// buffer; subsets with nothing buffered are left untouched.
    #[allow(clippy::too_many_arguments)]
    pub fn flush(
        &self,
        db: &mut DatasetDb,
        store: &PartStore,
        dataset_uuid: &str,
        fields: &[FieldSpec],
        scheme_version: i64,
    ) -> Result<(), Error> {
        let subset_uuids: Vec<String> = self.buffers.iter().map(|e| e.key().clone()).collect();
        for subset_uuid in subset_uuids {
            self.seal_full_prefixes(db, store, dataset_uuid, &subset_uuid, fields, scheme_version)?;

            let lease = SubsetLease::new(&self.ds_root, &subset_uuid);
            let _guard = lease.acquire()?;
            let tail = match self.buffers.get_mut(&subset_uuid) {
                Some(mut entry) if !entry.is_empty() => std::mem::take(&mut *entry),
                _ => continue,
            };
            store.publish(db, dataset_uuid, &subset_uuid, fields, &tail, scheme_version)?;
        }
        Ok(())
    }
}
