//! Foundational types shared across the rowvault workspace
//!
//! This crate defines the types every other crate in the workspace builds
//! on:
//! - [`SqlValue`] / [`SqlType`]: the tagged sum for key values and their
//!   declared SQL types (§3, §9)
//! - [`error::Error`]: the unified error taxonomy (§7)
//! - [`naming`]: dataset/field/alias name charset validation (§6)
//! - [`time`]: time-input normalization to microseconds since epoch (§6)
//! - [`limits`]: default scales, caps, and part-size thresholds (§6, §9)

pub mod error;
pub mod limits;
pub mod naming;
pub mod time;
pub mod value;

pub use error::{Context, Error, Result};
pub use value::{SqlType, SqlValue};
