//! Error taxonomy for rowvault
//!
//! Mirrors the kinds enumerated in the spec's error taxonomy (§7): schema,
//! identity, storage, pipeline, hardening, and lookup failures. Every
//! variant that can be raised mid-operation carries a [`Context`] so callers
//! can log `dataset_uuid`/`subset_uuid`/`part_uuid`/`relpath`/`operation`
//! without re-deriving them.

use std::io;
use thiserror::Error;

/// Result type alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Structured context attached to an error: the fields the spec requires
/// implementers to attach (§7) when known at the error site.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    pub dataset_uuid: Option<String>,
    pub subset_uuid: Option<String>,
    pub part_uuid: Option<String>,
    pub relpath: Option<String>,
    pub operation: Option<&'static str>,
}

impl Context {
    pub fn new(operation: &'static str) -> Self {
        Context {
            operation: Some(operation),
            ..Default::default()
        }
    }

    pub fn with_dataset(mut self, dataset_uuid: impl Into<String>) -> Self {
        self.dataset_uuid = Some(dataset_uuid.into());
        self
    }

    pub fn with_subset(mut self, subset_uuid: impl Into<String>) -> Self {
        self.subset_uuid = Some(subset_uuid.into());
        self
    }

    pub fn with_part(mut self, part_uuid: impl Into<String>) -> Self {
        self.part_uuid = Some(part_uuid.into());
        self
    }

    pub fn with_relpath(mut self, relpath: impl Into<String>) -> Self {
        self.relpath = Some(relpath.into());
        self
    }
}

impl std::fmt::Display for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[op={}", self.operation.unwrap_or("?"))?;
        if let Some(v) = &self.dataset_uuid {
            write!(f, " dataset={v}")?;
        }
        if let Some(v) = &self.subset_uuid {
            write!(f, " subset={v}")?;
        }
        if let Some(v) = &self.part_uuid {
            write!(f, " part={v}")?;
        }
        if let Some(v) = &self.relpath {
            write!(f, " relpath={v}")?;
        }
        write!(f, "]")
    }
}

/// Unified error type for rowvault operations.
#[derive(Debug, Error)]
pub enum Error {
    // -- Schema / dtype (§7) --
    #[error("invalid field name {name:?}: only [A-Za-z0-9_]+ is allowed")]
    InvalidFieldName { name: String },

    #[error("dtype mismatch: {0}")]
    DtypeMismatch(String),

    #[error("canonical dtype not locked for dataset {0}")]
    CanonicalNotLocked(String),

    #[error("Unicode widening required beyond cap {cap} for field {field:?} (needs {needed})")]
    UnicodeWideningRequired {
        field: String,
        cap: usize,
        needed: usize,
    },

    #[error("jagged spec error: {0}")]
    JaggedSpecError(String),

    #[error("data exceeds canonical shape for field {field:?}")]
    DataExceedsCanonical { field: String },

    #[error("padding overflow for field {field:?}")]
    PaddingOverflow { field: String },

    // -- Identity / keys (§7) --
    #[error("invalid key value for {key:?}: {reason}")]
    InvalidKeyValue { key: String, reason: String },

    #[error("missing quantization scale for REAL key {0:?}")]
    QuantizationMissing(String),

    #[error("invalid specials code: {0}")]
    InvalidSpecialsCode(u8),

    #[error("deterministic UUID derivation failed: {0}")]
    DeterministicUuidFailure(String),

    #[error("key schema mismatch: {0}")]
    KeySchemaMismatch(String),

    // -- Storage (§7) --
    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("part write error: {0}")]
    PartWrite(String),

    #[error("atomic replace failed: {0}")]
    AtomicReplaceFailed(String),

    #[error("fsync failed: {0}")]
    FsyncFailed(String),

    #[error("content hash mismatch: expected {expected}, computed {computed}")]
    ContentHashMismatch { expected: String, computed: String },

    #[error("part already exists (dedup winner): part_uuid={part_uuid}")]
    PartAlreadyExists { part_uuid: String },

    #[error("sqlite loader missing required compile option: {0}")]
    SqliteLoaderIncompatible(String),

    // -- Pipeline (§7) --
    #[error("ingest buffer overflow for subset {0}")]
    BufferOverflow(String),

    #[error("flush already in progress for subset {0}")]
    FlushInProgress(String),

    #[error("planner rewrite failure: {0}")]
    PlannerRewriteFailure(String),

    #[error("merge invariant violated: {0}")]
    MergeInvariant(String),

    #[error("empty ingest rejected: n_rows must be > 0")]
    EmptyIngest,

    // -- Hardening (§7) --
    #[error("lock acquisition failed: {0}")]
    LockAcquisitionFailed(String),

    #[error("permissions/ownership mismatch: {0}")]
    PermissionsMismatch(String),

    // -- Lookup (§7) --
    #[error("dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("subset not found: {0}")]
    SubsetNotFound(String),

    #[error("part not found: {0}")]
    PartNotFound(String),

    // -- Cross-cutting --
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{context}: {source}")]
    WithContext {
        context: Context,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Attach context to an error, wrapping it if not already wrapped.
    pub fn with_context(self, ctx: Context) -> Error {
        Error::WithContext {
            context: ctx,
            source: Box::new(self),
        }
    }

    /// True for errors that represent the dedup fast path rather than a
    /// genuine failure; callers may choose to treat this as success.
    pub fn is_dedup_winner(&self) -> bool {
        matches!(self, Error::PartAlreadyExists { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_display_includes_all_set_fields() {
        let ctx = Context::new("publish")
            .with_dataset("ds1")
            .with_subset("su1")
            .with_part("pu1")
            .with_relpath("a/b.part");
        let s = ctx.to_string();
        assert!(s.contains("op=publish"));
        assert!(s.contains("dataset=ds1"));
        assert!(s.contains("subset=su1"));
        assert!(s.contains("part=pu1"));
        assert!(s.contains("relpath=a/b.part"));
    }

    #[test]
    fn with_context_wraps_and_preserves_source_message() {
        let err = Error::EmptyIngest.with_context(Context::new("add"));
        assert!(err.to_string().contains("empty ingest rejected"));
    }

    #[test]
    fn part_already_exists_is_reported_as_dedup_winner() {
        let err = Error::PartAlreadyExists {
            part_uuid: "x".into(),
        };
        assert!(err.is_dedup_winner());
        assert!(!Error::EmptyIngest.is_dedup_winner());
    }
}
