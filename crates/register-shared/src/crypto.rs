//! Record payload encryption.
//!
//! Payloads are sealed with ChaCha20-Poly1305 (12-byte IV) or
//! XChaCha20-Poly1305 (24-byte IV) and packed as
//! `base64(iv):base64(tag):base64(ciphertext)`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    ChaCha20Poly1305, Key, Nonce, Tag, XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::constants::{
    AUTH_TAG_LENGTH, DEFAULT_IV_LENGTH, EXTENDED_IV_LENGTH, PACKED_SEPARATOR, SYMMETRIC_KEY_SIZE,
};
use crate::error::CryptoError;

pub type SymmetricKey = [u8; SYMMETRIC_KEY_SIZE];

pub fn generate_symmetric_key() -> SymmetricKey {
    let mut key = [0u8; SYMMETRIC_KEY_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

/// Authenticated encryption of string payloads with one configured key.
///
/// Built once by the composition root and shared behind an `Arc`. A fresh
/// cipher object is created per call, so the engine holds no mutable state.
#[derive(Clone)]
pub struct Encryption {
    key: SymmetricKey,
    iv_length: usize,
}

impl std::fmt::Debug for Encryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encryption")
            .field("iv_length", &self.iv_length)
            .finish_non_exhaustive()
    }
}

impl Encryption {
    /// Build an engine from raw key bytes and an IV length (12 or 24).
    pub fn new(key: &[u8], iv_length: usize) -> Result<Self, CryptoError> {
        if key.len() != SYMMETRIC_KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: SYMMETRIC_KEY_SIZE,
                got: key.len(),
            });
        }
        if iv_length != DEFAULT_IV_LENGTH && iv_length != EXTENDED_IV_LENGTH {
            return Err(CryptoError::InvalidIvLength(iv_length));
        }

        let mut fixed = [0u8; SYMMETRIC_KEY_SIZE];
        fixed.copy_from_slice(key);
        Ok(Self {
            key: fixed,
            iv_length,
        })
    }

    /// Build an engine from a 64-character hex key.
    pub fn from_hex(hex_key: &str, iv_length: usize) -> Result<Self, CryptoError> {
        let bytes = hex::decode(hex_key.trim()).map_err(|_| CryptoError::InvalidKeyLength {
            expected: SYMMETRIC_KEY_SIZE,
            got: hex_key.trim().len() / 2,
        })?;
        Self::new(&bytes, iv_length)
    }

    pub fn iv_length(&self) -> usize {
        self.iv_length
    }

    /// Encrypt `plaintext` under a fresh random IV.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let mut iv = vec![0u8; self.iv_length];
        rand::rngs::OsRng.fill_bytes(&mut iv);

        let mut buffer = plaintext.as_bytes().to_vec();
        let tag = self.seal(&iv, &mut buffer)?;

        Ok(format!(
            "{}{sep}{}{sep}{}",
            BASE64.encode(&iv),
            BASE64.encode(tag),
            BASE64.encode(&buffer),
            sep = PACKED_SEPARATOR
        ))
    }

    /// Decrypt a packed payload produced by [`Encryption::encrypt`].
    ///
    /// The tag length is validated before any cipher is constructed.
    pub fn decrypt(&self, packed: &str) -> Result<String, CryptoError> {
        let (iv, tag, mut buffer) = unpack(packed)?;

        if tag.len() != AUTH_TAG_LENGTH {
            return Err(CryptoError::InvalidTagLength { got: tag.len() });
        }
        if iv.len() != self.iv_length {
            return Err(CryptoError::AuthenticationFailed);
        }

        self.open(&iv, &tag, &mut buffer)?;

        String::from_utf8(buffer)
            .map_err(|_| CryptoError::Format("decrypted payload is not valid UTF-8".into()))
    }

    fn seal(&self, iv: &[u8], buffer: &mut [u8]) -> Result<Tag, CryptoError> {
        let key = Key::from_slice(&self.key);
        match self.iv_length {
            DEFAULT_IV_LENGTH => ChaCha20Poly1305::new(key)
                .encrypt_in_place_detached(Nonce::from_slice(iv), b"", buffer),
            _ => XChaCha20Poly1305::new(key)
                .encrypt_in_place_detached(XNonce::from_slice(iv), b"", buffer),
        }
        .map_err(|_| CryptoError::EncryptionFailed)
    }

    fn open(&self, iv: &[u8], tag: &[u8], buffer: &mut [u8]) -> Result<(), CryptoError> {
        let key = Key::from_slice(&self.key);
        let tag = Tag::from_slice(tag);
        match self.iv_length {
            DEFAULT_IV_LENGTH => ChaCha20Poly1305::new(key).decrypt_in_place_detached(
                Nonce::from_slice(iv),
                b"",
                buffer,
                tag,
            ),
            _ => XChaCha20Poly1305::new(key).decrypt_in_place_detached(
                XNonce::from_slice(iv),
                b"",
                buffer,
                tag,
            ),
        }
        .map_err(|_| CryptoError::AuthenticationFailed)
    }
}

/// Split on the first two separators; the remainder is the ciphertext field.
fn unpack(packed: &str) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>), CryptoError> {
    let mut parts = packed.splitn(3, PACKED_SEPARATOR);
    let (Some(iv), Some(tag), Some(ciphertext)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(CryptoError::Format(
            "expected three ':'-separated segments".into(),
        ));
    };

    let decode = |segment: &str, name: &str| {
        BASE64
            .decode(segment)
            .map_err(|_| CryptoError::Format(format!("{name} segment is not valid base64")))
    };

    Ok((decode(iv, "iv")?, decode(tag, "tag")?, decode(ciphertext, "ciphertext")?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Encryption {
        Encryption::new(&generate_symmetric_key(), DEFAULT_IV_LENGTH).unwrap()
    }

    fn repack_with_tag(packed: &str, tag: &[u8]) -> String {
        let parts: Vec<&str> = packed.splitn(3, ':').collect();
        format!("{}:{}:{}", parts[0], BASE64.encode(tag), parts[2])
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let engine = engine();
        for plaintext in ["", "hello", "{\"name\":\"Ivan\",\"age\":42}", "юнікод ✓"] {
            let packed = engine.encrypt(plaintext).unwrap();
            assert_eq!(engine.decrypt(&packed).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_extended_iv_roundtrip() {
        let engine = Encryption::new(&generate_symmetric_key(), EXTENDED_IV_LENGTH).unwrap();
        let packed = engine.encrypt("payload").unwrap();
        let iv = BASE64.decode(packed.split(':').next().unwrap()).unwrap();
        assert_eq!(iv.len(), EXTENDED_IV_LENGTH);
        assert_eq!(engine.decrypt(&packed).unwrap(), "payload");
    }

    #[test]
    fn test_same_plaintext_differs_per_call() {
        let engine = engine();
        let a = engine.encrypt("same input").unwrap();
        let b = engine.encrypt("same input").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_packed_format_has_three_segments() {
        let packed = engine().encrypt("abc").unwrap();
        let parts: Vec<&str> = packed.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(BASE64.decode(parts[0]).unwrap().len(), DEFAULT_IV_LENGTH);
        assert_eq!(BASE64.decode(parts[1]).unwrap().len(), AUTH_TAG_LENGTH);
        assert_eq!(BASE64.decode(parts[2]).unwrap().len(), 3);
    }

    #[test]
    fn test_bad_tag_lengths_rejected_before_decryption() {
        let engine = engine();
        let packed = engine.encrypt("secret").unwrap();
        for len in [0usize, 8, 15, 17, 24] {
            let tampered = repack_with_tag(&packed, &vec![0u8; len]);
            let err = engine.decrypt(&tampered).unwrap_err();
            assert_eq!(err, CryptoError::InvalidTagLength { got: len });
            assert_eq!(
                err.to_string(),
                "Invalid authentication tag length. Expected 16 bytes."
            );
        }
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let engine = engine();
        let plaintext = "Important data";
        let packed = engine.encrypt(plaintext).unwrap();
        let parts: Vec<&str> = packed.splitn(3, ':').collect();
        let ciphertext = BASE64.decode(parts[2]).unwrap();

        for i in 0..ciphertext.len() {
            let mut flipped = ciphertext.clone();
            flipped[i] ^= 0x01;
            let tampered = format!("{}:{}:{}", parts[0], parts[1], BASE64.encode(&flipped));
            assert_eq!(
                engine.decrypt(&tampered).unwrap_err(),
                CryptoError::AuthenticationFailed
            );
        }
    }

    #[test]
    fn test_tampered_tag_fails() {
        let engine = engine();
        let packed = engine.encrypt("data").unwrap();
        let parts: Vec<&str> = packed.splitn(3, ':').collect();
        let mut tag = BASE64.decode(parts[1]).unwrap();
        tag[0] ^= 0xFF;
        let tampered = repack_with_tag(&packed, &tag);
        assert_eq!(
            engine.decrypt(&tampered).unwrap_err(),
            CryptoError::AuthenticationFailed
        );
    }

    #[test]
    fn test_wrong_key_fails() {
        let packed = engine().encrypt("Secret message").unwrap();
        assert_eq!(
            engine().decrypt(&packed).unwrap_err(),
            CryptoError::AuthenticationFailed
        );
    }

    #[test]
    fn test_malformed_payloads_are_format_errors() {
        let engine = engine();
        for packed in ["", "abc", "a:b", "!!!:AAAAAAAAAAAAAAAAAAAAAA==:AAAA"] {
            assert!(
                matches!(engine.decrypt(packed), Err(CryptoError::Format(_))),
                "expected format error for {packed:?}"
            );
        }
    }

    #[test]
    fn test_error_message_does_not_leak_plaintext() {
        let engine = engine();
        let packed = engine.encrypt("top-secret-value").unwrap();
        let err = Encryption::new(&generate_symmetric_key(), DEFAULT_IV_LENGTH)
            .unwrap()
            .decrypt(&packed)
            .unwrap_err();
        assert!(!err.to_string().contains("top-secret-value"));
    }

    #[test]
    fn test_invalid_configuration_rejected() {
        assert!(matches!(
            Encryption::new(&[0u8; 16], DEFAULT_IV_LENGTH),
            Err(CryptoError::InvalidKeyLength { expected: 32, got: 16 })
        ));
        assert_eq!(
            Encryption::new(&[0u8; 32], 16).unwrap_err(),
            CryptoError::InvalidIvLength(16)
        );
        assert!(Encryption::from_hex(&"ab".repeat(32), DEFAULT_IV_LENGTH).is_ok());
        assert!(Encryption::from_hex("zz", DEFAULT_IV_LENGTH).is_err());
    }

    #[test]
    fn test_debug_hides_key() {
        let engine = Encryption::new(&[0xAB; 32], DEFAULT_IV_LENGTH).unwrap();
        let debug = format!("{engine:?}");
        assert!(!debug.contains("171"));
        assert!(debug.contains("iv_length"));
    }
}
