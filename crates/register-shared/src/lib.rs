// Primitives shared by every register crate: the payload encryption engine,
// constants and the small identity types passed between layers.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod types;

pub use crypto::Encryption;
pub use error::CryptoError;
pub use types::{AfterhandlerType, KeyId, RecordOperation};
