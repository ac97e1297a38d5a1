//! Catalog (§4.5): the catalog DB (datasets) and per-dataset DB
//! (subsets, parts, staging), with immediate-mode transaction discipline
//! and the dedup index that sealing depends on.

pub mod catalog_db;
pub mod dataset_db;
pub mod pragmas;
pub mod retry;
pub mod types;

pub use catalog_db::CatalogDb;
pub use dataset_db::{DatasetDb, SubsetFilter};
pub use types::{DatasetRecord, PartRecord, StagingRowRecord, SubsetRecord};
