//! Dataset schema JSON (§6): the shape persisted to the catalog's
//! `datasets.schema_json` and mirrored into the per-dataset `meta` table.

use rowvault_core::error::Error;
use rowvault_core::value::SqlType;
use rowvault_schema::canonical::FieldSpec;
use rowvault_schema::{JaggedSpec, KeySchema};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `part_config` (§6): part sizing and on-disk compression knobs. This
/// stack's container format (§"Part file format" in `SPEC_FULL.md`) has
/// no compression codec of its own, so `compression`/`compression_opts`
/// are carried through for schema-JSON fidelity but otherwise unused.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PartConfig {
    pub part_rows: i64,
    pub compression: Option<String>,
    pub compression_opts: Option<i64>,
}

/// The full schema document for one dataset (§6 "Schema JSON").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSchema {
    pub key_schema: BTreeMap<String, SqlType>,
    pub key_order: Vec<String>,
    /// `None` until the first ingested batch locks the canonical dtype.
    pub dtype_descr: Option<Vec<FieldSpec>>,
    pub part_config: PartConfig,
    pub quantization: BTreeMap<String, f64>,
    pub jagged: JaggedSpec,
    /// `0` means "use the crate default" (`DEFAULT_MAX_UNICODE`); carried
    /// here so the Unicode widening cap survives a process restart.
    #[serde(default)]
    pub max_unicode_cap: usize,
}

impl DatasetSchema {
    pub fn key_schema(&self) -> Result<KeySchema, Error> {
        KeySchema::new(self.key_schema.clone(), self.key_order.clone())
    }

    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string(self).map_err(|e| Error::Catalog(e.to_string()))
    }

    pub fn from_json(s: &str) -> Result<Self, Error> {
        serde_json::from_str(s).map_err(|e| Error::Catalog(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowvault_core::value::SqlType;

    #[test]
    fn round_trips_through_json() {
        let mut key_schema = BTreeMap::new();
        key_schema.insert("site".to_string(), SqlType::Text);
        let schema = DatasetSchema {
            key_schema,
            key_order: vec!["site".to_string()],
            dtype_descr: None,
            part_config: PartConfig {
                part_rows: 10_000,
                compression: None,
                compression_opts: None,
            },
            quantization: BTreeMap::new(),
            jagged: JaggedSpec::default(),
            max_unicode_cap: 256,
        };
        let json = schema.to_json().unwrap();
        let back = DatasetSchema::from_json(&json).unwrap();
        assert_eq!(back.key_order, schema.key_order);
        assert_eq!(back.part_config, schema.part_config);
    }
}
