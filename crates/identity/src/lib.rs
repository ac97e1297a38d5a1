//! Identity (§4.2): specials classification, REAL quantization, and
//! deterministic subset UUIDs.
//!
//! The reference source (`datamgr/core/keys.py`) joins `str(x)` with commas
//! to build the string it hashes for a subset UUID — ambiguous for floats
//! and for text containing commas. This crate instead defines an explicit,
//! frozen byte layout (see [`identity_tuple_bytes`]) so the derivation is
//! unambiguous across value types, resolving the spec's Open Question #1.

use blake2::digest::{Update, VariableOutput};
use blake2::Blake2bVar;
use byteorder::{LittleEndian, WriteBytesExt};
use rowvault_core::error::Error;
use rowvault_core::limits::DEFAULT_QUANTIZATION_SCALE;
use rowvault_core::value::{SqlType, SqlValue};
use rowvault_schema::KeySchema;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Specials code for a REAL key value (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Specials {
    Normal = 0,
    Nan = 1,
    PosInf = 2,
    NegInf = 3,
}

impl Specials {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Classify a REAL value's specials code. Non-float callers should not
/// reach this function; it is only meaningful for REAL keys.
pub fn classify_specials(v: f64) -> Specials {
    if v.is_nan() {
        Specials::Nan
    } else if v.is_infinite() {
        if v > 0.0 {
            Specials::PosInf
        } else {
            Specials::NegInf
        }
    } else {
        Specials::Normal
    }
}

/// Quantize a finite REAL value: `round(v * scale)`. Undefined (caller
/// must not invoke) for non-Normal values.
pub fn quantize(v: f64, scale: f64) -> i64 {
    (v * scale).round() as i64
}

/// One element of an identity tuple, in declared key order.
#[derive(Debug, Clone, PartialEq)]
pub enum IdentityElement {
    Int(i64),
    /// REAL key contribution: `(specials_code, quantized)`. `quantized` is
    /// always `0` when `specials != Normal`.
    RealSlot { specials: u8, quantized: i64 },
    Bool(bool),
    Text(String),
}

/// The ordered identity tuple built from a subset's key values (§3).
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityTuple(pub Vec<IdentityElement>);

/// Build the identity tuple for `subset_keys` in the schema's declared key
/// order (§4.2). `quantization` maps REAL key name -> scale; a REAL key
/// absent from the map falls back to [`DEFAULT_QUANTIZATION_SCALE`].
pub fn identity_tuple(
    schema: &KeySchema,
    subset_keys: &BTreeMap<String, SqlValue>,
    quantization: &BTreeMap<String, f64>,
) -> Result<IdentityTuple, Error> {
    let mut elements = Vec::with_capacity(schema.key_order().len());
    for key in schema.key_order() {
        let declared_type = schema.sql_type(key).expect("key_order is schema-validated");
        let value = subset_keys
            .get(key)
            .ok_or_else(|| Error::InvalidKeyValue {
                key: key.clone(),
                reason: "missing key".into(),
            })?;
        if value.sql_type() != declared_type {
            return Err(Error::InvalidKeyValue {
                key: key.clone(),
                reason: format!(
                    "declared type {declared_type:?} does not match value type {:?}",
                    value.sql_type()
                ),
            });
        }
        let element = match (declared_type, value) {
            (SqlType::Real, SqlValue::Real(v)) => {
                let specials = classify_specials(*v);
                let quantized = if specials == Specials::Normal {
                    let scale = quantization
                        .get(key)
                        .copied()
                        .unwrap_or(DEFAULT_QUANTIZATION_SCALE);
                    quantize(*v, scale)
                } else {
                    0
                };
                IdentityElement::RealSlot {
                    specials: specials.code(),
                    quantized,
                }
            }
            (SqlType::Integer, SqlValue::Int(v)) => IdentityElement::Int(*v),
            (SqlType::Boolean, SqlValue::Bool(v)) => IdentityElement::Bool(*v),
            (SqlType::Text, SqlValue::Text(v)) => IdentityElement::Text(v.clone()),
            _ => unreachable!("sql_type check above guarantees variant match"),
        };
        elements.push(element);
    }
    Ok(IdentityTuple(elements))
}

/// Frozen byte layout for an identity tuple (resolves Open Question #1).
///
/// Each element is encoded as a one-byte type tag followed by a
/// self-delimiting payload (fixed-width for numeric/specials slots,
/// 4-byte little-endian length prefix for text), concatenated in key
/// order with no separators.
pub fn identity_tuple_bytes(tuple: &IdentityTuple) -> Vec<u8> {
    let mut buf = Vec::new();
    for el in &tuple.0 {
        match el {
            IdentityElement::Int(v) => {
                buf.push(0u8);
                buf.write_i64::<LittleEndian>(*v).unwrap();
            }
            IdentityElement::RealSlot { specials, quantized } => {
                buf.push(1u8);
                buf.push(*specials);
                buf.write_i64::<LittleEndian>(*quantized).unwrap();
            }
            IdentityElement::Bool(v) => {
                buf.push(2u8);
                buf.push(if *v { 1 } else { 0 });
            }
            IdentityElement::Text(s) => {
                buf.push(3u8);
                buf.write_u32::<LittleEndian>(s.len() as u32).unwrap();
                buf.extend_from_slice(s.as_bytes());
            }
        }
    }
    buf
}

/// Derive the deterministic subset UUID from an identity tuple:
/// `UUID(blake2b_16(identity_tuple_bytes))` (§4.2).
pub fn subset_uuid(tuple: &IdentityTuple) -> Uuid {
    let bytes = identity_tuple_bytes(tuple);
    let mut hasher = Blake2bVar::new(16).expect("16 is a valid blake2b digest size");
    hasher.update(&bytes);
    let mut digest = [0u8; 16];
    hasher.finalize_variable(&mut digest).expect("digest buffer is exactly 16 bytes");
    Uuid::from_bytes(digest)
}

/// The storage-side SQL types for a key schema's `subsets` table columns.
/// REAL keys keep their raw `{key}` column (so range queries can
/// `BETWEEN` it directly) plus `{key}_s`/`{key}_q` (both `INTEGER`) for
/// exact-match identity lookups; everything else keeps its declared type
/// (§4.2, §4.5, §4.9). Feeds `DatasetDb::ensure_key_columns`.
pub fn storage_key_types(schema: &KeySchema) -> BTreeMap<String, SqlType> {
    let mut out = BTreeMap::new();
    for key in schema.key_order() {
        let declared_type = schema.sql_type(key).expect("key_order is schema-validated");
        out.insert(key.clone(), declared_type);
        if declared_type == SqlType::Real {
            out.insert(format!("{key}_s"), SqlType::Integer);
            out.insert(format!("{key}_q"), SqlType::Integer);
        }
    }
    out
}

/// The full set of column values to persist on a subset's row: the raw
/// key value for every key, plus the `_s`/`_q` expansion for REAL keys
/// (§4.2, §4.9 "REAL range on raw column; REAL equality on `_s`/`_q`").
pub fn storage_values(
    schema: &KeySchema,
    subset_keys: &BTreeMap<String, SqlValue>,
    quantization: &BTreeMap<String, f64>,
) -> Result<BTreeMap<String, SqlValue>, Error> {
    let mut out = equality_predicates(schema, subset_keys, quantization)?;
    for key in schema.key_order() {
        let declared_type = schema.sql_type(key).expect("key_order is schema-validated");
        if declared_type == SqlType::Real {
            let value = subset_keys
                .get(key)
                .ok_or_else(|| Error::InvalidKeyValue {
                    key: key.clone(),
                    reason: "missing key".into(),
                })?;
            out.insert(key.clone(), value.clone());
        }
    }
    Ok(out)
}

/// `partition = blake2b_8(subset_uuid) % n_writers` (§4.8 routing):
/// deterministic writer assignment so every record for a subset lands on
/// the same writer process.
pub fn writer_partition(subset_uuid: &str, n_writers: u32) -> u32 {
    assert!(n_writers > 0, "n_writers must be positive");
    let mut hasher = Blake2bVar::new(8).expect("8 is a valid blake2b digest size");
    hasher.update(subset_uuid.as_bytes());
    let mut digest = [0u8; 8];
    hasher.finalize_variable(&mut digest).expect("digest buffer is exactly 8 bytes");
    (u64::from_le_bytes(digest) % n_writers as u64) as u32
}

/// Build the equality predicate entries for a single declared key: REAL
/// keys expand to `_s`/`_q` columns, everything else keeps its raw column
/// name (§4.2). Shared by [`equality_predicates`] (which requires every
/// schema key to be present, for full subset identity) and the planner's
/// partial-query rewriting (which does not).
pub fn equality_predicate_for_key(
    schema: &KeySchema,
    quantization: &BTreeMap<String, f64>,
    key: &str,
    value: &SqlValue,
) -> Result<Vec<(String, SqlValue)>, Error> {
    let declared_type = schema.sql_type(key).ok_or_else(|| Error::InvalidKeyValue {
        key: key.to_string(),
        reason: "not a declared key".into(),
    })?;
    if value.sql_type() != declared_type {
        return Err(Error::InvalidKeyValue {
            key: key.to_string(),
            reason: format!(
                "declared type {declared_type:?} does not match value type {:?}",
                value.sql_type()
            ),
        });
    }
    match (declared_type, value) {
        (SqlType::Real, SqlValue::Real(v)) => {
            let specials = classify_specials(*v);
            let quantized = if specials == Specials::Normal {
                let scale = quantization
                    .get(key)
                    .copied()
                    .unwrap_or(DEFAULT_QUANTIZATION_SCALE);
                quantize(*v, scale)
            } else {
                0
            };
            Ok(vec![
                (format!("{key}_s"), SqlValue::Int(specials.code() as i64)),
                (format!("{key}_q"), SqlValue::Int(quantized)),
            ])
        }
        _ => Ok(vec![(key.to_string(), value.clone())]),
    }
}

/// Build a map of SQL equality predicates for `subset_keys`, expanding
/// REAL keys into `_s`/`_q` columns and leaving other keys as raw values
/// (§4.2). Requires every key in `schema.key_order()` to be present.
pub fn equality_predicates(
    schema: &KeySchema,
    subset_keys: &BTreeMap<String, SqlValue>,
    quantization: &BTreeMap<String, f64>,
) -> Result<BTreeMap<String, SqlValue>, Error> {
    let mut preds = BTreeMap::new();
    for key in schema.key_order() {
        let value = subset_keys
            .get(key)
            .ok_or_else(|| Error::InvalidKeyValue {
                key: key.clone(),
                reason: "missing key".into(),
            })?;
        for (column, predicate_value) in
            equality_predicate_for_key(schema, quantization, key, value)?
        {
            preds.insert(column, predicate_value);
        }
    }
    Ok(preds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowvault_schema::KeySchema;
    use std::str::FromStr;

    fn site_lat_schema() -> KeySchema {
        let mut schema = BTreeMap::new();
        schema.insert("site".to_string(), SqlType::Text);
        schema.insert("lat".to_string(), SqlType::Real);
        KeySchema::new(schema, vec!["site".into(), "lat".into()]).unwrap()
    }

    /// Scenario A from the spec: identity under tolerance (§8).
    #[test]
    fn subset_identity_is_deterministic_under_quantization_tolerance() {
        let schema = site_lat_schema();
        let mut quant = BTreeMap::new();
        quant.insert("lat".to_string(), 1e6);

        let mut k1 = BTreeMap::new();
        k1.insert("site".to_string(), SqlValue::Text("A".into()));
        k1.insert("lat".to_string(), SqlValue::Real(12.3456781));

        let mut k2 = BTreeMap::new();
        k2.insert("site".to_string(), SqlValue::Text("A".into()));
        k2.insert("lat".to_string(), SqlValue::Real(12.3456784));

        let t1 = identity_tuple(&schema, &k1, &quant).unwrap();
        let t2 = identity_tuple(&schema, &k2, &quant).unwrap();
        assert_eq!(subset_uuid(&t1), subset_uuid(&t2));

        if let IdentityElement::RealSlot { quantized, .. } = t1.0[1] {
            assert_eq!(quantized, 12_345_678);
        } else {
            panic!("expected RealSlot");
        }
    }

    #[test]
    fn nan_key_produces_a_different_subset_from_normal_values() {
        let schema = site_lat_schema();
        let mut quant = BTreeMap::new();
        quant.insert("lat".to_string(), 1e6);

        let mut k1 = BTreeMap::new();
        k1.insert("site".to_string(), SqlValue::Text("A".into()));
        k1.insert("lat".to_string(), SqlValue::Real(12.3456781));

        let mut k_nan = BTreeMap::new();
        k_nan.insert("site".to_string(), SqlValue::Text("A".into()));
        k_nan.insert("lat".to_string(), SqlValue::Real(f64::NAN));

        let t1 = identity_tuple(&schema, &k1, &quant).unwrap();
        let t_nan = identity_tuple(&schema, &k_nan, &quant).unwrap();
        assert_ne!(subset_uuid(&t1), subset_uuid(&t_nan));
        assert_eq!(
            t_nan.0[1],
            IdentityElement::RealSlot {
                specials: 1,
                quantized: 0
            }
        );
    }

    #[test]
    fn two_nan_keys_in_the_same_position_collide() {
        let schema = site_lat_schema();
        let quant = BTreeMap::new();
        let mut k1 = BTreeMap::new();
        k1.insert("site".to_string(), SqlValue::Text("A".into()));
        k1.insert("lat".to_string(), SqlValue::Real(f64::NAN));
        let mut k2 = k1.clone();
        k2.insert("lat".to_string(), SqlValue::Real(-f64::NAN));

        let t1 = identity_tuple(&schema, &k1, &quant).unwrap();
        let t2 = identity_tuple(&schema, &k2, &quant).unwrap();
        assert_eq!(subset_uuid(&t1), subset_uuid(&t2));
    }

    #[test]
    fn missing_key_is_an_error() {
        let schema = site_lat_schema();
        let mut k = BTreeMap::new();
        k.insert("site".to_string(), SqlValue::Text("A".into()));
        let err = identity_tuple(&schema, &k, &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidKeyValue { .. }));
    }

    #[test]
    fn equality_predicates_expand_real_keys_into_s_and_q_columns() {
        let schema = site_lat_schema();
        let mut quant = BTreeMap::new();
        quant.insert("lat".to_string(), 1e6);
        let mut k = BTreeMap::new();
        k.insert("site".to_string(), SqlValue::Text("A".into()));
        k.insert("lat".to_string(), SqlValue::Real(12.3456781));

        let preds = equality_predicates(&schema, &k, &quant).unwrap();
        assert_eq!(preds.get("site"), Some(&SqlValue::Text("A".into())));
        assert_eq!(preds.get("lat_s"), Some(&SqlValue::Int(0)));
        assert_eq!(preds.get("lat_q"), Some(&SqlValue::Int(12_345_678)));
    }

    #[test]
    fn missing_quantization_scale_falls_back_to_default() {
        let schema = site_lat_schema();
        let mut k = BTreeMap::new();
        k.insert("site".to_string(), SqlValue::Text("A".into()));
        k.insert("lat".to_string(), SqlValue::Real(1.2345));
        let tuple = identity_tuple(&schema, &k, &BTreeMap::new()).unwrap();
        if let IdentityElement::RealSlot { quantized, .. } = tuple.0[1] {
            assert_eq!(quantized, 1235); // 1.2345 * 1e3 rounded
        } else {
            panic!("expected RealSlot");
        }
    }

    /// Frozen test vector: identity tuple bytes must never change shape
    /// for a fixed input, since subset UUIDs are derived from them.
    #[test]
    fn identity_tuple_byte_layout_is_frozen() {
        let tuple = IdentityTuple(vec![
            IdentityElement::Text("A".into()),
            IdentityElement::RealSlot {
                specials: 0,
                quantized: 12_345_678,
            },
        ]);
        let bytes = identity_tuple_bytes(&tuple);
        let expected = {
            let mut b = vec![3u8, 1, 0, 0, 0];
            b.extend_from_slice(b"A");
            b.push(1u8);
            b.push(0u8);
            b.extend_from_slice(&12_345_678i64.to_le_bytes());
            b
        };
        assert_eq!(bytes, expected);
        assert_eq!(
            subset_uuid(&tuple).to_string(),
            Uuid::from_str(&subset_uuid(&tuple).to_string()).unwrap().to_string()
        );
    }

    #[test]
    fn storage_key_types_keeps_raw_real_column_alongside_s_and_q() {
        let schema = site_lat_schema();
        let types = storage_key_types(&schema);
        assert_eq!(types.get("site"), Some(&SqlType::Text));
        assert_eq!(types.get("lat"), Some(&SqlType::Real));
        assert_eq!(types.get("lat_s"), Some(&SqlType::Integer));
        assert_eq!(types.get("lat_q"), Some(&SqlType::Integer));
    }

    #[test]
    fn storage_values_includes_raw_and_expanded_real_columns() {
        let schema = site_lat_schema();
        let mut k = BTreeMap::new();
        k.insert("site".to_string(), SqlValue::Text("A".into()));
        k.insert("lat".to_string(), SqlValue::Real(12.3456781));
        let values = storage_values(&schema, &k, &BTreeMap::new()).unwrap();
        assert_eq!(values.get("lat"), Some(&SqlValue::Real(12.3456781)));
        assert_eq!(values.get("lat_s"), Some(&SqlValue::Int(0)));
        assert!(values.contains_key("lat_q"));
    }

    #[test]
    fn writer_partition_is_deterministic_and_in_range() {
        let a = writer_partition("subset-x", 4);
        let b = writer_partition("subset-x", 4);
        assert_eq!(a, b);
        assert!(a < 4);
    }

    #[test]
    fn writer_partition_varies_by_subset() {
        let a = writer_partition("subset-a", 1000);
        let b = writer_partition("subset-b", 1000);
        assert_ne!(a, b, "distinct subsets should almost never collide at modulus 1000");
    }
}
