//! The staging queue (§4.7): crash-safe row buffering ahead of
//! compaction. Every write that isn't durable enough to seal immediately
//! lands here first, tagged with a fresh claim token when a compactor
//! picks it up, and is only deleted once its rows are durably sealed
//! into a part.
//!
//! Built on [`rowvault_catalog::dataset_db::DatasetDb`]'s row-level
//! primitives (`peek_unclaimed`, `claim_ids`); this crate adds the
//! prefix-sum claiming policy and the batch codec the catalog layer
//! deliberately stays ignorant of.

use rowvault_catalog::dataset_db::DatasetDb;
use rowvault_catalog::types::StagingRowRecord;
use rowvault_core::error::Error;
use rowvault_core::limits::{CLAIM_SCAN_MULTIPLE, DEFAULT_STALE_CLAIM_AGE_SECS};
use rowvault_partstore::{decode_batch, encode_batch};
use rowvault_schema::RowBatch;
use uuid::Uuid;

/// One claimed prefix: the merged batch ready for sealing, plus the
/// staging row ids it came from (needed to unclaim/delete afterward).
#[derive(Debug)]
pub struct ClaimedPrefix {
    pub claim_token: String,
    pub ids: Vec<i64>,
    pub batch: RowBatch,
}

/// Enqueue one row batch for `subset_uuid` in an immediate transaction
/// (§4.7 `enqueue`).
pub fn enqueue(db: &mut DatasetDb, subset_uuid: &str, batch: &RowBatch) -> Result<i64, Error> {
    let n_rows = batch.n_rows() as i64;
    let payload = encode_batch(batch)?;
    db.enqueue_staging_row(subset_uuid, n_rows, &payload)
}

/// Claim the longest prefix of `subset_uuid`'s unclaimed staging rows
/// whose total `n_rows` does not exceed `part_rows`, always claiming at
/// least one row to guarantee forward progress (§4.7
/// `select_and_claim_prefix`). Rows with `n_rows <= 0` are dropped from
/// the candidate window and deleted as a side effect. Returns `None` if
/// there is nothing unclaimed to claim.
pub fn select_and_claim_prefix(
    db: &mut DatasetDb,
    subset_uuid: &str,
    part_rows: i64,
) -> Result<Option<ClaimedPrefix>, Error> {
    let scan_limit = CLAIM_SCAN_MULTIPLE * part_rows.max(1);
    let candidates = db.peek_unclaimed(subset_uuid, scan_limit)?;
    if candidates.is_empty() {
        return Ok(None);
    }

    let (empty_ids, live): (Vec<i64>, Vec<StagingRowRecord>) = {
        let mut empty_ids = Vec::new();
        let mut live = Vec::new();
        for row in candidates {
            if row.n_rows <= 0 {
                empty_ids.push(row.id);
            } else {
                live.push(row);
            }
        }
        (empty_ids, live)
    };
    if !empty_ids.is_empty() {
        db.delete_claimed(&empty_ids)?;
    }
    if live.is_empty() {
        return Ok(None);
    }

    let mut prefix: Vec<StagingRowRecord> = Vec::new();
    let mut total = 0i64;
    for row in live {
        if !prefix.is_empty() && total + row.n_rows > part_rows {
            break;
        }
        total += row.n_rows;
        prefix.push(row);
    }

    let claim_token = Uuid::new_v4().to_string();
    let ids: Vec<i64> = prefix.iter().map(|r| r.id).collect();
    db.claim_ids(&ids, &claim_token)?;

    let mut batch = RowBatch::default();
    for row in &prefix {
        let piece = decode_batch(&row.payload)?;
        batch.extend(&piece)?;
    }

    Ok(Some(ClaimedPrefix {
        claim_token,
        ids,
        batch,
    }))
}

/// Return a claimed prefix to the unclaimed pool after a failed
/// compaction attempt (§4.7 `unclaim`).
pub fn unclaim(db: &mut DatasetDb, claim_token: &str) -> Result<(), Error> {
    db.unclaim_by_token(claim_token)
}

/// Delete a claimed prefix's staging rows once its batch is durably
/// sealed into a part (§4.7 `delete_claimed`).
pub fn delete_claimed(db: &mut DatasetDb, claim_token: &str) -> Result<(), Error> {
    db.delete_claimed_by_token(claim_token)
}

/// Release claims left behind by a crashed compactor (§4.7
/// `reclaim_stale`, default age from [`DEFAULT_STALE_CLAIM_AGE_SECS`]).
pub fn reclaim_stale(db: &mut DatasetDb, age_secs: i64) -> Result<usize, Error> {
    db.reclaim_stale(age_secs * 1_000_000)
}

pub fn reclaim_stale_default(db: &mut DatasetDb) -> Result<usize, Error> {
    reclaim_stale(db, DEFAULT_STALE_CLAIM_AGE_SECS)
}

/// Checkpoint the WAL (`PRAGMA wal_checkpoint(TRUNCATE)`), optionally
/// called after a batch of compaction work (§4.7 `checkpoint`).
pub fn checkpoint(db: &DatasetDb) -> Result<(), Error> {
    db.checkpoint()
}

/// Subsets with at least one unclaimed staging row, ordered by their
/// oldest unclaimed id (§4.7 `hot_subsets`).
pub fn hot_subsets(db: &DatasetDb, limit: i64) -> Result<Vec<(String, i64)>, Error> {
    db.hot_subsets(limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowvault_schema::data::ColumnData;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn open_db() -> (tempfile::TempDir, DatasetDb) {
        let dir = tempdir().unwrap();
        let db = DatasetDb::open(&dir.path().join("dataset.db")).unwrap();
        (dir, db)
    }

    fn batch_of(n: i64) -> RowBatch {
        RowBatch {
            columns: vec![(
                "x".to_string(),
                ColumnData::Int64((0..n).collect()),
            )],
            meta: BTreeMap::new(),
        }
    }

    #[test]
    fn claims_longest_prefix_within_part_rows() {
        let (_dir, mut db) = open_db();
        let subset = Uuid::new_v4().to_string();
        enqueue(&mut db, &subset, &batch_of(3)).unwrap();
        enqueue(&mut db, &subset, &batch_of(3)).unwrap();
        enqueue(&mut db, &subset, &batch_of(3)).unwrap();

        let claimed = select_and_claim_prefix(&mut db, &subset, 5)
            .unwrap()
            .unwrap();
        assert_eq!(claimed.batch.n_rows(), 3);
        assert_eq!(claimed.ids.len(), 1);

        // Second call only sees the still-unclaimed rows.
        let claimed2 = select_and_claim_prefix(&mut db, &subset, 100)
            .unwrap()
            .unwrap();
        assert_eq!(claimed2.batch.n_rows(), 6);
        assert_eq!(claimed2.ids.len(), 2);
    }

    #[test]
    fn always_claims_at_least_one_row_even_if_oversized() {
        let (_dir, mut db) = open_db();
        let subset = Uuid::new_v4().to_string();
        enqueue(&mut db, &subset, &batch_of(50)).unwrap();

        let claimed = select_and_claim_prefix(&mut db, &subset, 10)
            .unwrap()
            .unwrap();
        assert_eq!(claimed.batch.n_rows(), 50);
    }

    #[test]
    fn drops_non_positive_n_rows_entries_as_a_side_effect() {
        let (_dir, mut db) = open_db();
        let subset = Uuid::new_v4().to_string();
        db.enqueue_staging_row(&subset, 0, b"").unwrap();
        enqueue(&mut db, &subset, &batch_of(2)).unwrap();

        let claimed = select_and_claim_prefix(&mut db, &subset, 10)
            .unwrap()
            .unwrap();
        assert_eq!(claimed.batch.n_rows(), 2);
        assert_eq!(claimed.ids.len(), 1);
    }

    #[test]
    fn unclaim_returns_rows_to_the_unclaimed_pool() {
        let (_dir, mut db) = open_db();
        let subset = Uuid::new_v4().to_string();
        enqueue(&mut db, &subset, &batch_of(2)).unwrap();
        let claimed = select_and_claim_prefix(&mut db, &subset, 10)
            .unwrap()
            .unwrap();
        unclaim(&mut db, &claimed.claim_token).unwrap();
        let reclaimed = select_and_claim_prefix(&mut db, &subset, 10)
            .unwrap()
            .unwrap();
        assert_eq!(reclaimed.batch.n_rows(), 2);
    }

    #[test]
    fn delete_claimed_removes_rows_after_publish() {
        let (_dir, mut db) = open_db();
        let subset = Uuid::new_v4().to_string();
        enqueue(&mut db, &subset, &batch_of(2)).unwrap();
        let claimed = select_and_claim_prefix(&mut db, &subset, 10)
            .unwrap()
            .unwrap();
        delete_claimed(&mut db, &claimed.claim_token).unwrap();
        assert!(select_and_claim_prefix(&mut db, &subset, 10)
            .unwrap()
            .is_none());
    }

    #[test]
    fn hot_subsets_reports_oldest_first_and_respects_limit() {
        let (_dir, mut db) = open_db();
        let subset_a = Uuid::new_v4().to_string();
        let subset_b = Uuid::new_v4().to_string();
        enqueue(&mut db, &subset_a, &batch_of(1)).unwrap();
        enqueue(&mut db, &subset_b, &batch_of(1)).unwrap();

        let hot = hot_subsets(&db, 1).unwrap();
        assert_eq!(hot.len(), 1);
        assert_eq!(hot[0].0, subset_a);
    }
}
