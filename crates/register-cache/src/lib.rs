//! # register-cache
//!
//! Cache-aside layer. A [`Cache`] wraps an optional [`CacheBackend`]; with no
//! backend, or with an unreachable one, every read falls through to the
//! producer.

pub mod backend;
pub mod cache;
pub mod key;

mod error;

pub use backend::{CacheBackend, MemoryBackend};
pub use cache::{Cache, CacheConfig, Cached};
pub use error::CacheError;
pub use key::{create_key, KeyPart};
