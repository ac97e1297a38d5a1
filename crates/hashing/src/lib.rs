//! Hashing (§4.3): canonical byte encoding of rows + jagged meta, the
//! part content hash, and the AAD contract for future encryption.
//!
//! Endianness is frozen at little-endian throughout; this module must
//! never be changed to depend on host byte order.

use blake2::digest::{Update, VariableOutput};
use blake2::Blake2bVar;
use rowvault_core::limits::MAX_HASH_CHUNK_BYTES;
use rowvault_schema::canonical::FieldKind;
use rowvault_schema::data::{ColumnData, MetaArray};
use rowvault_schema::{FieldSpec, RowBatch};
use std::collections::BTreeMap;
use unicode_normalization::UnicodeNormalization;

fn blake2b16(bytes: &[u8]) -> [u8; 16] {
    let mut hasher = Blake2bVar::new(16).expect("16 is a valid blake2b digest size");
    hasher.update(bytes);
    let mut out = [0u8; 16];
    hasher.finalize_variable(&mut out).expect("output buffer is exactly 16 bytes");
    out
}

fn hex16(bytes: [u8; 16]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// The schema signature fed into the content hash: `[(name, tag, shape)]`
/// in declared order, JSON-encoded with compact separators. Unicode width
/// is excluded (tag is always `"U"`) so widening never changes a part's
/// content hash (§4.3).
pub fn schema_signature_for_hash(fields: &[FieldSpec]) -> Vec<u8> {
    let items: Vec<serde_json::Value> = fields
        .iter()
        .map(|f| {
            serde_json::json!([f.name, f.kind.hash_tag(), f.shape])
        })
        .collect();
    serde_json::to_vec(&serde_json::Value::Array(items)).expect("schema signature is valid JSON")
}

fn row_itemsize(fields: &[FieldSpec]) -> usize {
    fields
        .iter()
        .map(|f| {
            let shape_product: usize = f.shape.iter().product::<usize>().max(1);
            let base = match f.kind {
                FieldKind::Int64 | FieldKind::Float64 => 8,
                FieldKind::Bool => 1,
                FieldKind::Unicode(w) => w as usize * 4,
            };
            base * shape_product
        })
        .sum::<usize>()
        .max(1)
}

fn update_from_column(hasher: &mut Blake2bVar, col: &ColumnData) {
    match col {
        ColumnData::Int64(v) => {
            for x in v {
                hasher.update(&x.to_le_bytes());
            }
        }
        ColumnData::Float64(v) => {
            for x in v {
                hasher.update(&x.to_le_bytes());
            }
        }
        ColumnData::Bool(v) => {
            for x in v {
                hasher.update(&[if *x { 1u8 } else { 0u8 }]);
            }
        }
        ColumnData::Unicode(v) => {
            for s in v {
                let normalized: String = s.nfc().collect();
                let bytes = normalized.as_bytes();
                hasher.update(&(bytes.len() as u32).to_le_bytes());
                hasher.update(bytes);
            }
        }
    }
}

/// Update `hasher` with `batch`'s rows in row-chunks of at most
/// [`MAX_HASH_CHUNK_BYTES`], schema signature first, then per-chunk,
/// per-field bytes in declared order (§4.3.2).
pub fn update_hasher_from_rows(hasher: &mut Blake2bVar, fields: &[FieldSpec], batch: &RowBatch) {
    hasher.update(&schema_signature_for_hash(fields));
    let itemsize = row_itemsize(fields);
    let chunk_rows = (MAX_HASH_CHUNK_BYTES / itemsize).max(1);
    let n = batch.n_rows();
    let mut start = 0;
    while start < n {
        let end = (start + chunk_rows).min(n);
        for (_, col) in &batch.columns {
            let slice = slice_column(col, start, end);
            update_from_column(hasher, &slice);
        }
        start = end;
    }
}

fn slice_column(col: &ColumnData, start: usize, end: usize) -> ColumnData {
    match col {
        ColumnData::Int64(v) => ColumnData::Int64(v[start..end].to_vec()),
        ColumnData::Float64(v) => ColumnData::Float64(v[start..end].to_vec()),
        ColumnData::Bool(v) => ColumnData::Bool(v[start..end].to_vec()),
        ColumnData::Unicode(v) => ColumnData::Unicode(v[start..end].to_vec()),
    }
}

/// Update `hasher` with jagged meta arrays, iterated in ASCII-sorted key
/// order: `name bytes + NUL + raw contiguous bytes of the meta array`
/// (§4.3.3).
pub fn update_hasher_from_meta(hasher: &mut Blake2bVar, meta: &BTreeMap<String, MetaArray>) {
    for (name, arr) in meta {
        hasher.update(name.as_bytes());
        hasher.update(&[0u8]);
        match arr {
            MetaArray::Len(v) => {
                for x in v {
                    hasher.update(&x.to_le_bytes());
                }
            }
            MetaArray::Shape(rows) => {
                for row in rows {
                    for x in row {
                        hasher.update(&x.to_le_bytes());
                    }
                }
            }
        }
    }
}

/// Compute the part content hash: blake2b-16 hex over schema signature,
/// row bytes (chunked), then sorted jagged meta (§4.3).
pub fn content_hash(fields: &[FieldSpec], batch: &RowBatch) -> String {
    let mut hasher = Blake2bVar::new(16).expect("16 is a valid blake2b digest size");
    update_hasher_from_rows(&mut hasher, fields, batch);
    update_hasher_from_meta(&mut hasher, &batch.meta);
    let mut out = [0u8; 16];
    hasher.finalize_variable(&mut out).expect("output buffer is exactly 16 bytes");
    hex16(out)
}

/// Stable blake2b-16 hex digest of a dataset's quantization map, sorted
/// by key (§3, Supplemented Features).
pub fn quantization_digest(qmap: &BTreeMap<String, f64>) -> String {
    let payload = serde_json::to_vec(qmap).expect("quantization map is valid JSON");
    hex16(blake2b16(&payload))
}

/// Stable blake2b-16 hex digest of the canonical dtype JSON, distinct from
/// the per-part schema signature (which excludes Unicode width). Used as
/// `schema_fp` in [`build_aad`].
pub fn schema_fingerprint(fields: &[FieldSpec]) -> String {
    let payload = serde_json::to_vec(fields).expect("canonical dtype is valid JSON");
    hex16(blake2b16(&payload))
}

/// A human-readable, stable key string for logs/diagnostics only — never
/// used for identity or SQL lookups (Supplemented Features).
pub fn stable_subset_key(subset_keys: &BTreeMap<String, String>) -> String {
    serde_json::to_string(subset_keys).expect("subset key map is valid JSON")
}

/// Additional Authenticated Data contract for future AEAD encryption
/// providers (§4.3). The core never ciphers; it only guarantees this
/// byte layout.
pub fn build_aad(
    dataset_uuid: &str,
    subset_uuid: &str,
    part_uuid: &str,
    schema_fp: &str,
    scheme_version: i64,
    quantization_digest_hex: &str,
    content_hash_hex: &str,
) -> Vec<u8> {
    let obj = serde_json::json!({
        "ds": dataset_uuid,
        "su": subset_uuid,
        "pu": part_uuid,
        "sf": schema_fp,
        "sv": scheme_version,
        "qd": quantization_digest_hex,
        "ch": content_hash_hex,
    });
    serde_json::to_vec(&obj).expect("AAD object is valid JSON")
}
