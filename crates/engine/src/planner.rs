//! Readback planner (§4.9): rewrite a query's equality predicates into
//! the `subsets` table's storage-shaped columns, select subsets then
//! parts in deterministic order, and materialize rows with resilience to
//! a part file missing from disk rather than failing the whole read.

use rowvault_catalog::dataset_db::{DatasetDb, SubsetFilter};
use rowvault_catalog::types::PartRecord;
use rowvault_core::error::Error;
use rowvault_core::value::SqlValue;
use rowvault_identity::equality_predicate_for_key;
use rowvault_partstore::container;
use rowvault_schema::data::{ColumnData, MetaArray};
use rowvault_schema::{JaggedSpec, KeySchema, RowBatch};
use std::collections::BTreeMap;
use std::path::Path;

/// Comparison for a [`JaggedPredicate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Cmp {
    fn holds(self, lhs: u32, rhs: u32) -> bool {
        match self {
            Cmp::Eq => lhs == rhs,
            Cmp::Lt => lhs < rhs,
            Cmp::Le => lhs <= rhs,
            Cmp::Gt => lhs > rhs,
            Cmp::Ge => lhs >= rhs,
        }
    }
}

/// A row-level predicate on a jagged field's varying length/shape — the
/// part of a query that can't be answered from `subsets` alone, since
/// jagged shape varies row by row within a part (§4.9). For a
/// multi-dimension-varying field the predicate compares against the
/// row's largest varying dimension.
#[derive(Debug, Clone)]
pub struct JaggedPredicate {
    pub field: String,
    pub cmp: Cmp,
    pub value: u32,
}

/// A read query against one dataset (§4.9).
#[derive(Debug, Clone, Default)]
pub struct ReadQuery {
    pub equality: BTreeMap<String, SqlValue>,
    pub real_ranges: Vec<(String, f64, f64)>,
    pub nan_columns: Vec<String>,
    pub subset_time_range: Option<(i64, i64)>,
    pub part_time_range: Option<(i64, i64)>,
    pub jagged: Vec<JaggedPredicate>,
}

/// The outcome of [`Planner::materialize`]: merged rows plus bookkeeping
/// to map a row back to the subset/part it came from, and which expected
/// files were missing on disk (§4.9, §8 Scenario D).
#[derive(Debug, Default)]
pub struct ReadResult {
    pub batch: RowBatch,
    /// Cumulative row count in `batch` after each subset, selection order.
    pub subset_bounds: Vec<(String, usize)>,
    /// Cumulative row count in `batch` after each part, selection order.
    pub part_bounds: Vec<(String, usize)>,
    /// `(part_uuid, start, end)` row ranges within `batch`, one per part
    /// that contributed at least one row.
    pub part_row_bounds: Vec<(String, usize, usize)>,
    /// Relpaths of parts the catalog listed but whose file was absent.
    pub missing_files: Vec<String>,
}

pub struct Planner<'a> {
    ds_root: &'a Path,
    key_schema: &'a KeySchema,
    quantization: &'a BTreeMap<String, f64>,
    jagged: &'a JaggedSpec,
}

impl<'a> Planner<'a> {
    pub fn new(
        ds_root: &'a Path,
        key_schema: &'a KeySchema,
        quantization: &'a BTreeMap<String, f64>,
        jagged: &'a JaggedSpec,
    ) -> Self {
        Planner {
            ds_root,
            key_schema,
            quantization,
            jagged,
        }
    }

    /// Rewrite `query.equality` into the `subsets` table's storage-shaped
    /// predicate (REAL keys expand to `_s`/`_q`); ranges, NaN, and time
    /// predicates are already storage-shaped (§4.2, §4.9). Unlike
    /// `rowvault_identity::equality_predicates`, a query need not name
    /// every declared key.
    pub fn build_subset_filter(&self, query: &ReadQuery) -> Result<SubsetFilter, Error> {
        let mut equality = Vec::new();
        for (key, value) in &query.equality {
            for (column, predicate_value) in
                equality_predicate_for_key(self.key_schema, self.quantization, key, value)?
            {
                equality.push((column, predicate_value));
            }
        }
        Ok(SubsetFilter {
            equality,
            real_ranges: query.real_ranges.clone(),
            nan_columns: query.nan_columns.clone(),
            time_range: query.subset_time_range,
        })
    }

    /// Select live subsets then live parts across them, in the
    /// deterministic `(subset_uuid, created_at_epoch, part_uuid)` order
    /// (§4.9 "Select subsets" + "Select parts").
    pub fn select_parts(&self, db: &DatasetDb, query: &ReadQuery) -> Result<Vec<PartRecord>, Error> {
        let filter = self.build_subset_filter(query)?;
        let subsets = db.select_subsets(&filter)?;
        let subset_uuids: Vec<String> = subsets.into_iter().map(|s| s.subset_uuid).collect();
        db.select_parts(&subset_uuids, query.part_time_range)
    }

    /// Read and merge every selected part's rows, applying any jagged
    /// row-level predicates as a post-filter, and reporting files missing
    /// from disk instead of failing the whole read (§4.9, §8 Scenario D).
    pub fn materialize(&self, db: &DatasetDb, query: &ReadQuery) -> Result<ReadResult, Error> {
        let parts = self.select_parts(db, query)?;

        let mut result = ReadResult::default();
        let mut merged = RowBatch::default();
        let mut subset_running: BTreeMap<String, usize> = BTreeMap::new();
        let mut subset_order: Vec<String> = Vec::new();

        for part in &parts {
            let path = self.ds_root.join(&part.file_relpath);
            let bytes = match std::fs::read(&path) {
                Ok(b) => b,
                Err(_) => {
                    result.missing_files.push(part.file_relpath.clone());
                    continue;
                }
            };
            let (_attrs, _fields, batch) = container::decode(&bytes)?;
            let filtered = self.apply_jagged_predicates(batch, &query.jagged)?;
            if filtered.is_empty() {
                continue;
            }

            let start = merged.n_rows();
            merged.extend(&filtered)?;
            let end = merged.n_rows();
            result
                .part_row_bounds
                .push((part.part_uuid.clone(), start, end));
            result.part_bounds.push((part.part_uuid.clone(), end));

            if !subset_running.contains_key(&part.subset_uuid) {
                subset_order.push(part.subset_uuid.clone());
            }
            subset_running.insert(part.subset_uuid.clone(), end);
        }

        result.subset_bounds = subset_order
            .into_iter()
            .map(|s| {
                let bound = subset_running[&s];
                (s, bound)
            })
            .collect();
        result.batch = merged;
        Ok(result)
    }

    fn apply_jagged_predicates(
        &self,
        batch: RowBatch,
        predicates: &[JaggedPredicate],
    ) -> Result<RowBatch, Error> {
        if predicates.is_empty() {
            return Ok(batch);
        }
        let n = batch.n_rows();
        let mut keep = vec![true; n];
        for pred in predicates {
            if !self.jagged.is_jagged(&pred.field) {
                continue;
            }
            let meta_name = match self.jagged.meta_names_for(&pred.field).into_iter().next() {
                Some(name) => name,
                None => continue,
            };
            let meta = match batch.meta.get(&meta_name) {
                Some(m) => m,
                None => continue,
            };
            for (row, slot) in keep.iter_mut().enumerate() {
                if !*slot {
                    continue;
                }
                let value = match meta {
                    MetaArray::Len(v) => v[row],
                    MetaArray::Shape(v) => v[row].iter().copied().max().unwrap_or(0),
                };
                if !pred.cmp.holds(value, pred.value) {
                    *slot = false;
                }
            }
        }
        Ok(mask_rows(batch, &keep))
    }
}

fn mask_rows(batch: RowBatch, keep: &[bool]) -> RowBatch {
    let columns = batch
        .columns
        .into_iter()
        .map(|(name, col)| (name, mask_column(col, keep)))
        .collect();
    let meta = batch
        .meta
        .into_iter()
        .map(|(name, m)| (name, mask_meta(m, keep)))
        .collect();
    RowBatch { columns, meta }
}

fn mask_column(col: ColumnData, keep: &[bool]) -> ColumnData {
    match col {
        ColumnData::Int64(v) => ColumnData::Int64(select(v, keep)),
        ColumnData::Float64(v) => ColumnData::Float64(select(v, keep)),
        ColumnData::Bool(v) => ColumnData::Bool(select(v, keep)),
        ColumnData::Unicode(v) => ColumnData::Unicode(select(v, keep)),
    }
}

fn mask_meta(meta: MetaArray, keep: &[bool]) -> MetaArray {
    match meta {
        MetaArray::Len(v) => MetaArray::Len(select(v, keep)),
        MetaArray::Shape(v) => MetaArray::Shape(select(v, keep)),
    }
}

fn select<T>(v: Vec<T>, keep: &[bool]) -> Vec<T> {
    v.into_iter()
        .zip(keep.iter())
        .filter_map(|(x, &k)| if k { Some(x) } else { None })
        .collect()
}
