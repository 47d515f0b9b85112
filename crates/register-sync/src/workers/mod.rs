//! Concrete workers, one per external system.
//!
//! Each worker is a thin HTTP client in front of its system plus a
//! [`WorkerQueue`](queue::WorkerQueue) that delivers committed mutations in
//! commit order.

pub mod blockchain;
pub mod elastic;
pub mod plink;
pub mod queue;

mod http;

pub use blockchain::{BlockchainConfig, BlockchainWorker};
pub use elastic::{ElasticConfig, ElasticWorker};
pub use plink::{PlinkConfig, PlinkWorker};
