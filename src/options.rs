//! [`DatasetOptions`]: the arguments `ensure_dataset` only consults on
//! first creation of a dataset alias (§3 Lifecycle, §6 "Schema JSON").

use rowvault_core::error::{Error, Result};
use rowvault_core::value::SqlType;
use rowvault_engine::config::{DatasetSchema, PartConfig};
use rowvault_partstore::StorageScheme;
use rowvault_schema::{JaggedSpec, KeySchema};
use std::collections::BTreeMap;

/// Declares a dataset's key schema, part sizing, and storage fan-out.
/// The canonical row dtype itself is not part of this — it locks from
/// whatever fields the first ingested batch carries (§4.1).
pub struct DatasetOptions {
    pub key_schema: BTreeMap<String, SqlType>,
    pub key_order: Vec<String>,
    pub part_rows: i64,
    pub compression: Option<String>,
    pub compression_opts: Option<i64>,
    pub quantization: BTreeMap<String, f64>,
    pub jagged: JaggedSpec,
    pub max_unicode_cap: usize,
    pub storage_scheme: StorageScheme,
}

impl DatasetOptions {
    /// Construct with defaults: no compression, no REAL quantization
    /// overrides, no jagged fields, the default Unicode cap, and a
    /// `sha256`, depth-2/seglen-2 storage fan-out (§4.4).
    pub fn new(
        key_schema: BTreeMap<String, SqlType>,
        key_order: Vec<String>,
        part_rows: i64,
    ) -> Result<Self> {
        // Validated eagerly so a malformed key schema fails at
        // `ensure_dataset` time rather than surfacing later as an
        // `InvalidKeyValue` on the first `add`.
        KeySchema::new(key_schema.clone(), key_order.clone())?;
        if part_rows <= 0 {
            return Err(Error::DtypeMismatch("part_rows must be > 0".into()));
        }
        Ok(DatasetOptions {
            key_schema,
            key_order,
            part_rows,
            compression: None,
            compression_opts: None,
            quantization: BTreeMap::new(),
            jagged: JaggedSpec::default(),
            max_unicode_cap: 0,
            storage_scheme: StorageScheme::new(1, "sha256", 2, 2)?,
        })
    }

    pub fn with_quantization(mut self, quantization: BTreeMap<String, f64>) -> Self {
        self.quantization = quantization;
        self
    }

    pub fn with_jagged(mut self, jagged: JaggedSpec) -> Self {
        self.jagged = jagged;
        self
    }

    pub fn with_max_unicode_cap(mut self, cap: usize) -> Self {
        self.max_unicode_cap = cap;
        self
    }

    pub fn with_storage_scheme(mut self, scheme: StorageScheme) -> Self {
        self.storage_scheme = scheme;
        self
    }

    pub(crate) fn into_schema(self) -> (DatasetSchema, StorageScheme) {
        let schema = DatasetSchema {
            key_schema: self.key_schema,
            key_order: self.key_order,
            dtype_descr: None,
            part_config: PartConfig {
                part_rows: self.part_rows,
                compression: self.compression,
                compression_opts: self.compression_opts,
            },
            quantization: self.quantization,
            jagged: self.jagged,
            max_unicode_cap: self.max_unicode_cap,
        };
        (schema, self.storage_scheme)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_a_key_order_that_does_not_match_key_schema() {
        let mut schema = BTreeMap::new();
        schema.insert("site".to_string(), SqlType::Text);
        let err = DatasetOptions::new(schema, vec!["other".to_string()], 10).unwrap_err();
        assert!(matches!(err, Error::KeySchemaMismatch(_)));
    }

    #[test]
    fn rejects_non_positive_part_rows() {
        let mut schema = BTreeMap::new();
        schema.insert("site".to_string(), SqlType::Text);
        let err = DatasetOptions::new(schema, vec!["site".to_string()], 0).unwrap_err();
        assert!(matches!(err, Error::DtypeMismatch(_)));
    }
}
