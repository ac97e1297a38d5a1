//! Storage scheme: hash-sliced directory fan-out for part relpaths
//! (§4.4, §6 "Storage scheme JSON").
//!
//! Only `hash: "sha256"` is implemented. The spec allows `sha1`/`md5` as
//! alternatives, but neither crate appears anywhere in the example pack;
//! rather than pull in an ungrounded dependency, this narrows the
//! supported set to the one hash family the pack's teacher already uses
//! elsewhere (`sha2`), and rejects other values at construction time.

use rowvault_core::error::Error;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// `{ "version": int, "hash": "sha256", "depth": int>=0, "seglen": int>0 when depth>0 }`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageScheme {
    pub version: i64,
    pub hash: String,
    pub depth: usize,
    pub seglen: usize,
}

impl StorageScheme {
    pub fn new(
        version: i64,
        hash: impl Into<String>,
        depth: usize,
        seglen: usize,
    ) -> Result<Self, Error> {
        let hash = hash.into();
        if hash != "sha256" {
            return Err(Error::PartWrite(format!(
                "unsupported storage scheme hash {hash:?} (only sha256 is implemented)"
            )));
        }
        if depth > 0 && seglen == 0 {
            return Err(Error::PartWrite(
                "seglen must be > 0 when depth > 0".into(),
            ));
        }
        let hex_len = Sha256::output_size() * 2;
        if depth * seglen > hex_len {
            return Err(Error::PartWrite(format!(
                "depth*seglen ({}) exceeds hash hex length ({hex_len})",
                depth * seglen
            )));
        }
        Ok(StorageScheme {
            version,
            hash,
            depth,
            seglen,
        })
    }

    fn hex_digest(&self, subset_uuid: &str, part_uuid: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(subset_uuid.as_bytes());
        hasher.update(part_uuid.as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    /// `subsets/{subset_uuid}/parts/v{ver}/[<hex slice>/…]/{part_uuid}.h5`
    pub fn part_relpath(&self, subset_uuid: &str, part_uuid: &str) -> String {
        let mut segments = vec![
            "subsets".to_string(),
            subset_uuid.to_string(),
            "parts".to_string(),
            format!("v{}", self.version),
        ];
        if self.depth > 0 {
            let hex = self.hex_digest(subset_uuid, part_uuid);
            for i in 0..self.depth {
                let start = i * self.seglen;
                segments.push(hex[start..start + self.seglen].to_string());
            }
        }
        segments.push(format!("{part_uuid}.h5"));
        segments.join("/")
    }
}
