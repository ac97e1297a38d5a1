//! In-memory row batches: column-major storage for the canonical dtype
//! plus jagged meta arrays (§3, §4.3).

use crate::canonical::{FieldKind, FieldSpec};
use rowvault_core::error::Error;
use std::collections::BTreeMap;

/// One field's column data, row-major for multi-dimensional fields.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Int64(Vec<i64>),
    Float64(Vec<f64>),
    Bool(Vec<bool>),
    Unicode(Vec<String>),
}

impl ColumnData {
    pub fn kind(&self) -> FieldKind {
        match self {
            ColumnData::Int64(_) => FieldKind::Int64,
            ColumnData::Float64(_) => FieldKind::Float64,
            ColumnData::Bool(_) => FieldKind::Bool,
            ColumnData::Unicode(v) => {
                let max_len = v.iter().map(|s| s.chars().count()).max().unwrap_or(0);
                FieldKind::Unicode(max_len as u16)
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Int64(v) => v.len(),
            ColumnData::Float64(v) => v.len(),
            ColumnData::Bool(v) => v.len(),
            ColumnData::Unicode(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append `other`'s elements to this column in place.
    pub fn extend(&mut self, other: &ColumnData) -> Result<(), Error> {
        match (self, other) {
            (ColumnData::Int64(a), ColumnData::Int64(b)) => a.extend_from_slice(b),
            (ColumnData::Float64(a), ColumnData::Float64(b)) => a.extend_from_slice(b),
            (ColumnData::Bool(a), ColumnData::Bool(b)) => a.extend_from_slice(b),
            (ColumnData::Unicode(a), ColumnData::Unicode(b)) => a.extend_from_slice(b),
            _ => return Err(Error::MergeInvariant("column kind mismatch during merge".into())),
        }
        Ok(())
    }
}

/// Jagged companion meta array: per-row length or per-row shape.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaArray {
    Len(Vec<u32>),
    Shape(Vec<Vec<u32>>),
}

impl MetaArray {
    pub fn len(&self) -> usize {
        match self {
            MetaArray::Len(v) => v.len(),
            MetaArray::Shape(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Compact integer width: `u16` if every value fits, else `u32` (§6).
    pub fn uses_u16(&self) -> bool {
        match self {
            MetaArray::Len(v) => v.iter().all(|&x| x <= u16::MAX as u32),
            MetaArray::Shape(v) => v.iter().flatten().all(|&x| x <= u16::MAX as u32),
        }
    }

    pub fn extend(&mut self, other: &MetaArray) -> Result<(), Error> {
        match (self, other) {
            (MetaArray::Len(a), MetaArray::Len(b)) => a.extend_from_slice(b),
            (MetaArray::Shape(a), MetaArray::Shape(b)) => a.extend_from_slice(b),
            _ => return Err(Error::MergeInvariant("meta kind mismatch during merge".into())),
        }
        Ok(())
    }
}

/// A batch of rows for the canonical dtype, plus any jagged meta columns.
#[derive(Debug, Clone, Default)]
pub struct RowBatch {
    pub columns: Vec<(String, ColumnData)>,
    pub meta: BTreeMap<String, MetaArray>,
}

impl RowBatch {
    pub fn n_rows(&self) -> usize {
        self.columns.first().map(|(_, c)| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows() == 0
    }

    /// Validate that every column's length matches `n_rows` and that
    /// columns appear in canonical field order.
    pub fn validate_against(&self, fields: &[FieldSpec]) -> Result<(), Error> {
        if self.columns.len() != fields.len() {
            return Err(Error::DataExceedsCanonical {
                field: "<batch>".into(),
            });
        }
        let n = self.n_rows();
        for ((name, col), field) in self.columns.iter().zip(fields.iter()) {
            if name != &field.name {
                return Err(Error::DtypeMismatch(format!(
                    "column order mismatch: got {name:?}, expected {:?}",
                    field.name
                )));
            }
            if col.len() != n {
                return Err(Error::MergeInvariant(format!(
                    "column {name:?} has {} rows, expected {n}",
                    col.len()
                )));
            }
        }
        Ok(())
    }

    /// Merge `other` into `self` in place (used by staging compaction to
    /// concatenate claimed rows in FIFO order).
    pub fn extend(&mut self, other: &RowBatch) -> Result<(), Error> {
        if self.columns.is_empty() {
            *self = other.clone();
            return Ok(());
        }
        if self.columns.len() != other.columns.len() {
            return Err(Error::MergeInvariant("batch field count mismatch".into()));
        }
        for ((name, col), (other_name, other_col)) in
            self.columns.iter_mut().zip(other.columns.iter())
        {
            if name != other_name {
                return Err(Error::MergeInvariant(format!(
                    "field order mismatch during merge: {name:?} vs {other_name:?}"
                )));
            }
            col.extend(other_col)?;
        }
        for (name, meta) in &other.meta {
            self.meta
                .entry(name.clone())
                .or_insert_with(|| match meta {
                    MetaArray::Len(_) => MetaArray::Len(vec![]),
                    MetaArray::Shape(_) => MetaArray::Shape(vec![]),
                })
                .extend(meta)?;
        }
        Ok(())
    }
}
