//! Row-level slicing helpers the schema crate itself has no need for —
//! `extend` concatenates, but the buffered pipeline also needs to peel
//! an exact-size prefix off a growing buffer (§4.8).

use rowvault_schema::data::{ColumnData, MetaArray};
use rowvault_schema::RowBatch;
use std::collections::BTreeMap;

/// Remove and return the first `n` rows of `batch` in place, preserving
/// column/meta order. Panics if `n > batch.n_rows()` — callers only ever
/// take a prefix they have already measured.
pub fn take_prefix(batch: &mut RowBatch, n: usize) -> RowBatch {
    assert!(n <= batch.n_rows(), "take_prefix: n exceeds batch length");
    let mut columns = Vec::with_capacity(batch.columns.len());
    for (name, col) in &mut batch.columns {
        columns.push((name.clone(), split_column(col, n)));
    }
    let mut meta = BTreeMap::new();
    for (name, m) in &mut batch.meta {
        meta.insert(name.clone(), split_meta(m, n));
    }
    RowBatch { columns, meta }
}

fn split_column(col: &mut ColumnData, n: usize) -> ColumnData {
    match col {
        ColumnData::Int64(v) => ColumnData::Int64(v.drain(..n).collect()),
        ColumnData::Float64(v) => ColumnData::Float64(v.drain(..n).collect()),
        ColumnData::Bool(v) => ColumnData::Bool(v.drain(..n).collect()),
        ColumnData::Unicode(v) => ColumnData::Unicode(v.drain(..n).collect()),
    }
}

fn split_meta(meta: &mut MetaArray, n: usize) -> MetaArray {
    match meta {
        MetaArray::Len(v) => MetaArray::Len(v.drain(..n).collect()),
        MetaArray::Shape(v) => MetaArray::Shape(v.drain(..n).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_prefix_splits_columns_and_leaves_the_remainder() {
        let mut batch = RowBatch {
            columns: vec![("x".to_string(), ColumnData::Int64(vec![1, 2, 3, 4]))],
            meta: BTreeMap::new(),
        };
        let head = take_prefix(&mut batch, 2);
        assert_eq!(head.columns[0].1, ColumnData::Int64(vec![1, 2]));
        assert_eq!(batch.columns[0].1, ColumnData::Int64(vec![3, 4]));
    }
}
