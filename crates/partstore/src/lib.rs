//! PartStore (§4.4): the atomic seal path — write-fsync-rename-fsync-dir
//! into a content-addressed part file, dedup against the catalog, and
//! orphan recovery via `fsck_dataset`.

pub mod container;
pub mod scheme;
pub mod store;

pub use container::{decode_batch, encode_batch, PartAttrs};
pub use scheme::StorageScheme;
pub use store::{FsckReport, GcReport, PartStore};
