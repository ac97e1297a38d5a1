//! Row types shared across catalog DB and per-dataset DB queries.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub dataset_uuid: String,
    pub alias: String,
    pub created_at_epoch: i64,
    pub schema_json: String,
    pub storage_scheme_json: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubsetRecord {
    pub subset_uuid: String,
    pub created_at_epoch: i64,
    pub marked_for_deletion: bool,
    pub total_rows: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartRecord {
    pub part_uuid: String,
    pub subset_uuid: String,
    pub created_at_epoch: i64,
    pub n_rows: i64,
    pub scheme_version: i64,
    pub file_relpath: String,
    pub marked_for_deletion: bool,
    pub content_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagingRowRecord {
    pub id: i64,
    pub subset_uuid: String,
    pub n_rows: i64,
    pub created_at_epoch: i64,
    pub payload: Vec<u8>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<i64>,
}
