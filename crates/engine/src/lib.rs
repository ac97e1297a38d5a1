//! The ingest/readback engine (§4.7, §4.8, §4.9): dataset schema
//! persistence, the two ingest pipelines, multi-writer routing, and the
//! query planner, wired together by the root facade crate.

pub mod config;
pub mod pipeline;
pub mod planner;
pub mod routing;
pub mod rowbatch_ops;

pub use config::{DatasetSchema, PartConfig};
pub use pipeline::{BufferedPipeline, CrashSafePipeline};
pub use planner::{Cmp, JaggedPredicate, Planner, ReadQuery, ReadResult};
pub use routing::owns_subset;
