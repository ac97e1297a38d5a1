//! The staging-queue, crash-safe ingest path (§4.7, §4.8): every batch is
//! durably enqueued before anything is sealed, so a crash between enqueue
//! and seal just leaves the rows unclaimed for the next compactor to pick
//! up — nothing is lost, and nothing is double-counted (claims are
//! released, never left half-applied).

use rowvault_catalog::dataset_db::DatasetDb;
use rowvault_concurrency::SubsetLease;
use rowvault_core::error::Error;
use rowvault_partstore::PartStore;
use rowvault_schema::canonical::FieldSpec;
use rowvault_schema::RowBatch;
use std::path::PathBuf;

/// Staging-backed pipeline: `add` enqueues then opportunistically
/// compacts; `flush` drains every hot subset, including partial tails.
pub struct CrashSafePipeline {
    ds_root: PathBuf,
    part_rows: i64,
}

impl CrashSafePipeline {
    pub fn new(ds_root: PathBuf, part_rows: i64) -> Self {
        CrashSafePipeline { ds_root, part_rows }
    }

    /// Enqueue `batch` for `subset_uuid`, then seal as many full parts as
    /// have now accumulated (§4.7 `enqueue` + opportunistic compaction).
    /// Never seals a part smaller than `part_rows` here — a lone small
    /// batch just waits in staging until more arrives or `flush()` drains
    /// it as a tail.
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
        rowvault_stager::enqueue(db, subset_uuid, batch)?;
        while db.unclaimed_row_count(subset_uuid)? >= self.part_rows {
            let sealed =
                self.claim_and_seal(db, store, dataset_uuid, subset_uuid, fields, scheme_version)?;
            if !sealed {
                break;
            }
        }
        Ok(())
    }

    /// Claim one prefix and seal it into a part, unclaiming on failure so
    /// the rows remain eligible for a future attempt (§4.7). Returns
    /// `false` if there was nothing unclaimed left to claim.
    fn claim_and_seal(
        &self,
        db: &mut DatasetDb,
        store: &PartStore,
        dataset_uuid: &str,
        subset_uuid: &str,
        fields: &[FieldSpec],
        scheme_version: i64,
    ) -> Result<bool, Error> {
        let lease = SubsetLease::new(&self.ds_root, subset_uuid);
        let _guard = lease.acquire()?;

        let claimed = match rowvault_stager::select_and_claim_prefix(db, subset_uuid, self.part_rows)? {
            Some(c) => c,
            None => return Ok(false),
        };

        match store.publish(db, dataset_uuid, subset_uuid, fields, &claimed.batch, scheme_version) {
            Ok(_) => {
                rowvault_stager::delete_claimed(db, &claimed.claim_token)?;
                Ok(true)
            }
            Err(e) => {
                rowvault_stager::unclaim(db, &claimed.claim_token)?;
                Err(e)
            }
        }
    }

    /// Drain every subset with unclaimed staging rows, sealing full parts
    /// and, once a subset runs dry, whatever partial tail remains
    /// (§4.7 `hot_subsets` + repeated `select_and_claim_prefix`, §4.8
    /// `flush`). Sweeps in rounds up to [`DEFAULT_HOT_SWEEP_LIMIT`]
    /// subsets at a time until a round finds nothing left to do.
    #[allow(clippy::too_many_arguments)]
    pub fn flush(
        &self,
        db: &mut DatasetDb,
        store: &PartStore,
        dataset_uuid: &str,
        fields: &[FieldSpec],
        scheme_version: i64,
    ) -> Result<(), Error> {
        loop {
            let hot = rowvault_stager::hot_subsets(
                db,
                rowvault_core::limits::DEFAULT_HOT_SWEEP_LIMIT,
            )?;
            if hot.is_empty() {
                return Ok(());
            }
            for (subset_uuid, _oldest_id) in hot {
                while self.claim_and_seal(
                    db,
                    store,
                    dataset_uuid,
                    &subset_uuid,
                    fields,
                    scheme_version,
                )? {}
            }
        }
    }
}
