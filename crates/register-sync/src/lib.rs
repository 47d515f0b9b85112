//! # register-sync
//!
//! Keeps external systems (ledger, search index, public links) in step with
//! the register's records.
//!
//! - [`Worker`] is the contract one external system implements.
//! - [`registry::build_workers`] turns configuration into the active set.
//! - [`Afterhandler`] fans record mutations out to the workers and drives the
//!   bulk reindex of a key, using [`ReindexTracker`] to keep one reindex per
//!   key at a time.

pub mod afterhandler;
pub mod registry;
pub mod tracker;
pub mod worker;
pub mod workers;

mod error;

pub use afterhandler::{Afterhandler, AfterhandlerConfig};
pub use error::{SyncError, WorkerError};
pub use registry::{build_workers, WorkersConfig};
pub use tracker::ReindexTracker;
pub use worker::{ReindexOptions, Worker};
pub use workers::queue::Delivery;
