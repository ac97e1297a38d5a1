//! Binary part-file container (§6 "Part file format").
//!
//! `spec.md` describes the reference container as HDF5; no HDF5 binding
//! exists anywhere in this stack, so parts are written instead as a single
//! self-describing binary file modeled on the durability layer's
//! header+sections+CRC32 snapshot framing: a length-prefixed JSON attrs
//! block, a length-prefixed JSON schema block, one section per canonical
//! field, one section per jagged meta array, and a CRC32 footer covering
//! everything that precedes it. Unicode columns are stored as fixed-width
//! UTF-32 code points, NUL-padded to the field's declared width, matching
//! the spec's "length-sufficient fixed-width byte strings" requirement
//! while staying a plain Rust-native encoding.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rowvault_core::error::Error;
use rowvault_schema::canonical::FieldSpec;
use rowvault_schema::data::{ColumnData, MetaArray};
use rowvault_schema::RowBatch;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

pub const MAGIC: &[u8; 4] = b"RVP1";
pub const FORMAT_VERSION: u32 = 1;

/// The required root attributes of a part file (§6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PartAttrs {
    pub part_uuid: String,
    pub subset_uuid: String,
    pub dataset_uuid: String,
    pub created_at_epoch: i64,
    pub n_rows: i64,
    pub scheme_version: i64,
    pub content_hash: String,
}

/// Encode `attrs`/`fields`/`batch` into the on-disk container bytes.
pub fn encode(attrs: &PartAttrs, fields: &[FieldSpec], batch: &RowBatch) -> Result<Vec<u8>, Error> {
    let mut body = Vec::new();
    body.write_all(MAGIC).map_err(Error::Io)?;
    body.write_u32::<LittleEndian>(FORMAT_VERSION)
        .map_err(Error::Io)?;

    let attrs_json = serde_json::to_vec(attrs).map_err(|e| Error::PartWrite(e.to_string()))?;
    body.write_u32::<LittleEndian>(attrs_json.len() as u32)
        .map_err(Error::Io)?;
    body.write_all(&attrs_json).map_err(Error::Io)?;

    let schema_json = serde_json::to_vec(fields).map_err(|e| Error::PartWrite(e.to_string()))?;
    body.write_u32::<LittleEndian>(schema_json.len() as u32)
        .map_err(Error::Io)?;
    body.write_all(&schema_json).map_err(Error::Io)?;

    body.write_u32::<LittleEndian>(batch.columns.len() as u32)
        .map_err(Error::Io)?;
    for (name, col) in &batch.columns {
        write_column(&mut body, name, col)?;
    }

    body.write_u32::<LittleEndian>(batch.meta.len() as u32)
        .map_err(Error::Io)?;
    for (name, meta) in &batch.meta {
        write_meta(&mut body, name, meta)?;
    }

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&body);
    let crc = hasher.finalize();
    body.write_u32::<LittleEndian>(crc).map_err(Error::Io)?;
    Ok(body)
}

/// Decode a container previously produced by [`encode`], verifying the
/// magic, format version, and CRC32 footer.
pub fn decode(bytes: &[u8]) -> Result<(PartAttrs, Vec<FieldSpec>, RowBatch), Error> {
    if bytes.len() < 12 {
        return Err(Error::PartWrite("part file too short".into()));
    }
    let (body, footer) = bytes.split_at(bytes.len() - 4);
    let stored_crc = (&footer[..])
        .read_u32::<LittleEndian>()
        .map_err(Error::Io)?;
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(body);
    let computed_crc = hasher.finalize();
    if computed_crc != stored_crc {
        return Err(Error::ContentHashMismatch {
            expected: format!("crc32:{stored_crc:08x}"),
            computed: format!("crc32:{computed_crc:08x}"),
        });
    }

    let mut cur = Cursor::new(body);
    let mut magic = [0u8; 4];
    cur.read_exact(&mut magic).map_err(Error::Io)?;
    if &magic != MAGIC {
        return Err(Error::PartWrite("bad part file magic".into()));
    }
    let version = cur.read_u32::<LittleEndian>().map_err(Error::Io)?;
    if version != FORMAT_VERSION {
        return Err(Error::PartWrite(format!(
            "unsupported part format version {version}"
        )));
    }

    let attrs_len = cur.read_u32::<LittleEndian>().map_err(Error::Io)? as usize;
    let mut attrs_buf = vec![0u8; attrs_len];
    cur.read_exact(&mut attrs_buf).map_err(Error::Io)?;
    let attrs: PartAttrs =
        serde_json::from_slice(&attrs_buf).map_err(|e| Error::PartWrite(e.to_string()))?;

    let schema_len = cur.read_u32::<LittleEndian>().map_err(Error::Io)? as usize;
    let mut schema_buf = vec![0u8; schema_len];
    cur.read_exact(&mut schema_buf).map_err(Error::Io)?;
    let fields: Vec<FieldSpec> =
        serde_json::from_slice(&schema_buf).map_err(|e| Error::PartWrite(e.to_string()))?;

    let n_columns = cur.read_u32::<LittleEndian>().map_err(Error::Io)?;
    let mut columns = Vec::with_capacity(n_columns as usize);
    for _ in 0..n_columns {
        let name = read_name(&mut cur)?;
        let col = read_column(&mut cur)?;
        columns.push((name, col));
    }

    let n_meta = cur.read_u32::<LittleEndian>().map_err(Error::Io)?;
    let mut meta = BTreeMap::new();
    for _ in 0..n_meta {
        let name = read_name(&mut cur)?;
        let m = read_meta(&mut cur)?;
        meta.insert(name, m);
    }

    Ok((attrs, fields, RowBatch { columns, meta }))
}

/// Encode a bare [`RowBatch`] (columns + meta, no attrs/schema) for
/// transport contexts that already know the schema out of band — the
/// staging queue stores one of these per enqueued batch.
pub fn encode_batch(batch: &RowBatch) -> Result<Vec<u8>, Error> {
    let mut body = Vec::new();
    body.write_u32::<LittleEndian>(batch.columns.len() as u32)
        .map_err(Error::Io)?;
    for (name, col) in &batch.columns {
        write_column(&mut body, name, col)?;
    }
    body.write_u32::<LittleEndian>(batch.meta.len() as u32)
        .map_err(Error::Io)?;
    for (name, meta) in &batch.meta {
        write_meta(&mut body, name, meta)?;
    }
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&body);
    body.write_u32::<LittleEndian>(hasher.finalize())
        .map_err(Error::Io)?;
    Ok(body)
}

/// Decode a batch written by [`encode_batch`].
pub fn decode_batch(bytes: &[u8]) -> Result<RowBatch, Error> {
    if bytes.len() < 8 {
        return Err(Error::PartWrite("staging payload too short".into()));
    }
    let (body, footer) = bytes.split_at(bytes.len() - 4);
    let stored_crc = (&footer[..]).read_u32::<LittleEndian>().map_err(Error::Io)?;
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(body);
    if hasher.finalize() != stored_crc {
        return Err(Error::ContentHashMismatch {
            expected: format!("crc32:{stored_crc:08x}"),
            computed: "mismatch".into(),
        });
    }
    let mut cur = Cursor::new(body);
    let n_columns = cur.read_u32::<LittleEndian>().map_err(Error::Io)?;
    let mut columns = Vec::with_capacity(n_columns as usize);
    for _ in 0..n_columns {
        let name = read_name(&mut cur)?;
        let col = read_column(&mut cur)?;
        columns.push((name, col));
    }
    let n_meta = cur.read_u32::<LittleEndian>().map_err(Error::Io)?;
    let mut meta = BTreeMap::new();
    for _ in 0..n_meta {
        let name = read_name(&mut cur)?;
        let m = read_meta(&mut cur)?;
        meta.insert(name, m);
    }
    Ok(RowBatch { columns, meta })
}

fn write_name(out: &mut Vec<u8>, name: &str) -> Result<(), Error> {
    out.write_u16::<LittleEndian>(name.len() as u16)
        .map_err(Error::Io)?;
    out.write_all(name.as_bytes()).map_err(Error::Io)?;
    Ok(())
}

fn read_name<R: Read>(r: &mut R) -> Result<String, Error> {
    let len = r.read_u16::<LittleEndian>().map_err(Error::Io)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).map_err(Error::Io)?;
    String::from_utf8(buf).map_err(|e| Error::PartWrite(e.to_string()))
}

fn write_column(out: &mut Vec<u8>, name: &str, col: &ColumnData) -> Result<(), Error> {
    write_name(out, name)?;
    match col {
        ColumnData::Int64(v) => {
            out.write_u8(0).map_err(Error::Io)?;
            out.write_u32::<LittleEndian>(v.len() as u32)
                .map_err(Error::Io)?;
            for x in v {
                out.write_i64::<LittleEndian>(*x).map_err(Error::Io)?;
            }
        }
        ColumnData::Float64(v) => {
            out.write_u8(1).map_err(Error::Io)?;
            out.write_u32::<LittleEndian>(v.len() as u32)
                .map_err(Error::Io)?;
            for x in v {
                out.write_f64::<LittleEndian>(*x).map_err(Error::Io)?;
            }
        }
        ColumnData::Bool(v) => {
            out.write_u8(2).map_err(Error::Io)?;
            out.write_u32::<LittleEndian>(v.len() as u32)
                .map_err(Error::Io)?;
            for x in v {
                out.write_u8(if *x { 1 } else { 0 }).map_err(Error::Io)?;
            }
        }
        ColumnData::Unicode(v) => {
            let width = v
                .iter()
                .map(|s| s.chars().count())
                .max()
                .unwrap_or(0)
                .max(1);
            out.write_u8(3).map_err(Error::Io)?;
            out.write_u32::<LittleEndian>(width as u32)
                .map_err(Error::Io)?;
            out.write_u32::<LittleEndian>(v.len() as u32)
                .map_err(Error::Io)?;
            for s in v {
                let mut chars: Vec<u32> = s.chars().map(|c| c as u32).collect();
                chars.resize(width, 0);
                for c in chars {
                    out.write_u32::<LittleEndian>(c).map_err(Error::Io)?;
                }
            }
        }
    }
    Ok(())
}

fn read_column<R: Read>(r: &mut R) -> Result<ColumnData, Error> {
    let tag = r.read_u8().map_err(Error::Io)?;
    match tag {
        0 => {
            let n = r.read_u32::<LittleEndian>().map_err(Error::Io)? as usize;
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(r.read_i64::<LittleEndian>().map_err(Error::Io)?);
            }
            Ok(ColumnData::Int64(v))
        }
        1 => {
            let n = r.read_u32::<LittleEndian>().map_err(Error::Io)? as usize;
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(r.read_f64::<LittleEndian>().map_err(Error::Io)?);
            }
            Ok(ColumnData::Float64(v))
        }
        2 => {
            let n = r.read_u32::<LittleEndian>().map_err(Error::Io)? as usize;
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(r.read_u8().map_err(Error::Io)? != 0);
            }
            Ok(ColumnData::Bool(v))
        }
        3 => {
            let width = r.read_u32::<LittleEndian>().map_err(Error::Io)? as usize;
            let n = r.read_u32::<LittleEndian>().map_err(Error::Io)? as usize;
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                let mut chars = Vec::with_capacity(width);
                for _ in 0..width {
                    chars.push(r.read_u32::<LittleEndian>().map_err(Error::Io)?);
                }
                let s: String = chars
                    .into_iter()
                    .take_while(|&c| c != 0)
                    .filter_map(char::from_u32)
                    .collect();
                v.push(s);
            }
            Ok(ColumnData::Unicode(v))
        }
        other => Err(Error::PartWrite(format!("unknown column tag {other}"))),
    }
}

fn write_meta(out: &mut Vec<u8>, name: &str, meta: &MetaArray) -> Result<(), Error> {
    write_name(out, name)?;
    let narrow = meta.uses_u16();
    match meta {
        MetaArray::Len(v) => {
            out.write_u8(0).map_err(Error::Io)?;
            out.write_u8(if narrow { 0 } else { 1 }).map_err(Error::Io)?;
            out.write_u32::<LittleEndian>(v.len() as u32)
                .map_err(Error::Io)?;
            for x in v {
                write_u32_compact(out, *x, narrow)?;
            }
        }
        MetaArray::Shape(rows) => {
            out.write_u8(1).map_err(Error::Io)?;
            out.write_u8(if narrow { 0 } else { 1 }).map_err(Error::Io)?;
            let ndims = rows.first().map(|r| r.len()).unwrap_or(0);
            out.write_u32::<LittleEndian>(rows.len() as u32)
                .map_err(Error::Io)?;
            out.write_u32::<LittleEndian>(ndims as u32)
                .map_err(Error::Io)?;
            for row in rows {
                for x in row {
                    write_u32_compact(out, *x, narrow)?;
                }
            }
        }
    }
    Ok(())
}

fn write_u32_compact(out: &mut Vec<u8>, x: u32, narrow: bool) -> Result<(), Error> {
    if narrow {
        out.write_u16::<LittleEndian>(x as u16).map_err(Error::Io)?;
    } else {
        out.write_u32::<LittleEndian>(x).map_err(Error::Io)?;
    }
    Ok(())
}

fn read_u32_compact<R: Read>(r: &mut R, narrow: bool) -> Result<u32, Error> {
    if narrow {
        Ok(r.read_u16::<LittleEndian>().map_err(Error::Io)? as u32)
    } else {
        r.read_u32::<LittleEndian>().map_err(Error::Io)
    }
}

fn read_meta<R: Read>(r: &mut R) -> Result<MetaArray, Error> {
    let kind = r.read_u8().map_err(Error::Io)?;
    let narrow = r.read_u8().map_err(Error::Io)? == 0;
    match kind {
        0 => {
            let n = r.read_u32::<LittleEndian>().map_err(Error::Io)? as usize;
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(read_u32_compact(r, narrow)?);
            }
            Ok(MetaArray::Len(v))
        }
        1 => {
            let n_rows = r.read_u32::<LittleEndian>().map_err(Error::Io)? as usize;
            let ndims = r.read_u32::<LittleEndian>().map_err(Error::Io)? as usize;
            let mut rows = Vec::with_capacity(n_rows);
            for _ in 0..n_rows {
                let mut row = Vec::with_capacity(ndims);
                for _ in 0..ndims {
                    row.push(read_u32_compact(r, narrow)?);
                }
                rows.push(row);
            }
            Ok(MetaArray::Shape(rows))
        }
        other => Err(Error::PartWrite(format!("unknown meta tag {other}"))),
    }
}
