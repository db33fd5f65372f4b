//! The process-wide master key (KEK) and per-record data keys (DEKs).

use rand::RngCore;
use tracing::warn;

use crate::error::MalformedError;

use super::{envelope, mac};

/// Size of a generated data-encryption key in bytes (AES-256).
const DEK_SIZE: usize = 32;

/// The key-encryption key: wraps DEKs and produces equality tags.
///
/// Accepts 16- or 32-byte master keys. Any other length (including 24 bytes,
/// for which the `aes-gcm` crate exposes no cipher) falls back to a random
/// 256-bit runtime key; secret data written in that mode is unreadable after
/// a restart, which is intended development behavior.
pub struct Kek {
    bytes: Vec<u8>,
    ephemeral: bool,
}

impl Kek {
    /// Build from the configured master key, falling back to an ephemeral
    /// runtime key when the input is absent or badly sized.
    pub fn from_master_key(master: Option<Vec<u8>>) -> Self {
        match master {
            Some(bytes) if matches!(bytes.len(), 16 | 32) => Self {
                bytes,
                ephemeral: false,
            },
            other => {
                warn!(
                    provided_len = other.as_ref().map(Vec::len),
                    "master key missing or badly sized, using ephemeral runtime key"
                );
                let mut bytes = vec![0u8; DEK_SIZE];
                rand::rng().fill_bytes(&mut bytes);
                Self {
                    bytes,
                    ephemeral: true,
                }
            }
        }
    }

    /// Whether the runtime fell back to an ephemeral key.
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    /// Generate a fresh random DEK.
    pub fn generate_dek() -> Vec<u8> {
        let mut dek = vec![0u8; DEK_SIZE];
        rand::rng().fill_bytes(&mut dek);
        dek
    }

    /// Wrap a DEK under this KEK into an envelope string.
    pub fn wrap_dek(&self, dek: &[u8]) -> Result<String, MalformedError> {
        envelope::seal(&self.bytes, dek)
    }

    /// Unwrap an envelope string back into DEK bytes.
    pub fn unwrap_dek(&self, wrapped: &str) -> Result<Vec<u8>, MalformedError> {
        envelope::open(&self.bytes, wrapped)
    }

    /// Deterministic equality tag for an enc-indexed plaintext.
    pub fn equality_tag(&self, plaintext: &str) -> String {
        mac::equality_tag(&self.bytes, plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_16_and_32_byte_keys() {
        let k16 = Kek::from_master_key(Some(vec![7u8; 16]));
        let k32 = Kek::from_master_key(Some(vec![7u8; 32]));
        assert!(!k16.is_ephemeral());
        assert!(!k32.is_ephemeral());
    }

    #[test]
    fn test_bad_sizes_fall_back_to_ephemeral() {
        assert!(Kek::from_master_key(None).is_ephemeral());
        assert!(Kek::from_master_key(Some(vec![7u8; 24])).is_ephemeral());
        assert!(Kek::from_master_key(Some(vec![7u8; 5])).is_ephemeral());
    }

    #[test]
    fn test_dek_wrap_round_trip() {
        let kek = Kek::from_master_key(Some(vec![9u8; 32]));
        let dek = Kek::generate_dek();
        let wrapped = kek.wrap_dek(&dek).unwrap();
        assert_eq!(kek.unwrap_dek(&wrapped).unwrap(), dek);
    }

    #[test]
    fn test_ephemeral_keks_differ() {
        let a = Kek::from_master_key(None);
        let b = Kek::from_master_key(None);
        let dek = Kek::generate_dek();
        let wrapped = a.wrap_dek(&dek).unwrap();
        assert!(b.unwrap_dek(&wrapped).is_err());
    }
}
