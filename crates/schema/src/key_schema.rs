//! Key schema: declared key order and SQL types (§3, §4.5)

use rowvault_core::error::Error;
use rowvault_core::naming::validate_name;
use rowvault_core::value::SqlType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Names reserved by the per-dataset `subsets` table (§4.5); a dataset's
/// key schema may not declare a key with any of these names.
pub const RESERVED_COLUMN_NAMES: &[&str] = &[
    "subset_uuid",
    "created_at_epoch",
    "created_at_utc",
    "marked_for_deletion",
    "total_rows",
    "buffer_rows",
];

/// The declared key schema and key order for a dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeySchema {
    key_schema: BTreeMap<String, SqlType>,
    key_order: Vec<String>,
}

impl KeySchema {
    pub fn new(
        key_schema: BTreeMap<String, SqlType>,
        key_order: Vec<String>,
    ) -> Result<Self, Error> {
        let declared: std::collections::BTreeSet<_> = key_schema.keys().cloned().collect();
        let ordered: std::collections::BTreeSet<_> = key_order.iter().cloned().collect();
        if declared != ordered {
            return Err(Error::KeySchemaMismatch(
                "key_order must list exactly the keys in key_schema".into(),
            ));
        }
        for name in &key_order {
            validate_name(name)?;
            if RESERVED_COLUMN_NAMES.contains(&name.as_str()) {
                return Err(Error::KeySchemaMismatch(format!(
                    "key name {name:?} is reserved"
                )));
            }
        }
        Ok(KeySchema {
            key_schema,
            key_order,
        })
    }

    pub fn key_order(&self) -> &[String] {
        &self.key_order
    }

    pub fn sql_type(&self, key: &str) -> Option<SqlType> {
        self.key_schema.get(key).copied()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.key_schema.contains_key(key)
    }
}
