/// Symmetric key size in bytes (ChaCha20-Poly1305 and XChaCha20-Poly1305)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Default IV length in bytes (ChaCha20-Poly1305)
pub const DEFAULT_IV_LENGTH: usize = 12;

/// Extended IV length in bytes (XChaCha20-Poly1305)
pub const EXTENDED_IV_LENGTH: usize = 24;

/// Poly1305 authentication tag size in bytes
pub const AUTH_TAG_LENGTH: usize = 16;

/// Separator between the three segments of a packed payload
pub const PACKED_SEPARATOR: char = ':';

/// Default page size for reindex and encryption batch walks
pub const DEFAULT_BATCH_SIZE: u32 = 100;

/// Grace period between worker reset and the first reindex page (seconds)
pub const DEFAULT_REINDEX_SETTLE_SECS: u64 = 5;

/// Safety expiry of a reindex status flag (seconds, 24h)
pub const REINDEX_STATUS_TTL_SECS: u64 = 24 * 60 * 60;

/// Advisory value stored while a key is being reindexed
pub const REINDEX_STATUS_STARTED: &str = "started";

/// Informational sync note written while a reindex is in flight
pub const REINDEX_STARTED_NOTE: &str = "Reindex started";

/// Default cache entry TTL (seconds)
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// Default upper bound on a single cache backend call (milliseconds)
pub const DEFAULT_CACHE_TIMEOUT_MS: u64 = 500;

/// Default HTTP API port
pub const DEFAULT_HTTP_PORT: u16 = 8080;
