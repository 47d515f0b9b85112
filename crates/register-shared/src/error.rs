use thiserror::Error;

/// Errors produced by the payload encryption engine.
///
/// The three decrypt-side variants are kept apart so callers can tell a
/// malformed input from a genuine tamper attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The tag segment decoded to something other than 16 bytes.
    #[error("Invalid authentication tag length. Expected 16 bytes.")]
    InvalidTagLength { got: usize },

    /// Tag verification failed: tampered ciphertext, wrong key or wrong IV.
    #[error("Authentication failed: payload could not be verified")]
    AuthenticationFailed,

    /// The packed string is not `iv:tag:ciphertext` in base64.
    #[error("Malformed encrypted payload: {0}")]
    Format(String),

    #[error("Invalid key length: expected {expected} bytes, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("Unsupported IV length: {0} (expected 12 or 24)")]
    InvalidIvLength(usize),

    #[error("Encryption failed")]
    EncryptionFailed,
}

impl CryptoError {
    /// `true` for errors caused by the caller's input rather than by tampering.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidTagLength { .. } | Self::Format(_))
    }
}
