//! # register-store
//!
//! Relational storage for the register service, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle wrapping a
//! `rusqlite::Connection` with typed CRUD helpers for keys, records and the
//! afterhandler sync log. Async callers share it as a [`SharedDatabase`].

pub mod afterhandlers;
pub mod database;
pub mod keys;
pub mod migrations;
pub mod models;
pub mod records;

mod error;

pub use database::{Database, SharedDatabase};
pub use error::{Result, StoreError};
pub use models::*;
