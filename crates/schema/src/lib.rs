//! Schema & Canonical (§4.1)
//!
//! Owns the dataset's key schema and canonical row dtype: locking on first
//! batch, compatibility checks with Unicode widening, and jagged-spec
//! validation.

pub mod canonical;
pub mod data;
pub mod jagged;
pub mod key_schema;

pub use canonical::{CanonicalDtype, FieldKind, FieldSpec, IncomingFieldKind, IncomingFieldSpec};
pub use data::{ColumnData, MetaArray, RowBatch};
pub use jagged::JaggedSpec;
pub use key_schema::KeySchema;
