//! Leases (§4.6): exclusive advisory file locks that serialize dataset
//! maintenance and per-subset sealing across cooperating processes.

pub mod lease;

pub use lease::{DatasetLease, LeaseGuard, SubsetLease};
