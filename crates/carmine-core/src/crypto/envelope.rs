//! AES-GCM field envelope.
//!
//! Ciphertext strings are `encf:v1:gcm:` followed by base64 of
//! `nonce ‖ ciphertext ‖ tag`, with a 96-bit random nonce. The same envelope
//! wraps data keys under the master key.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::error::MalformedError;

/// Prefix identifying an encrypted field value.
pub const FIELD_ENC_PREFIX: &str = "encf:v1:gcm:";

/// GCM nonce size in bytes (96 bits).
const NONCE_SIZE: usize = 12;

/// Encrypt `plain` under `key` (16 or 32 bytes) into an envelope string.
pub fn seal(key: &[u8], plain: &[u8]) -> Result<String, MalformedError> {
    let raw = match key.len() {
        16 => {
            let cipher =
                Aes128Gcm::new_from_slice(key).map_err(|_| MalformedError::KeySize(key.len()))?;
            let nonce = Aes128Gcm::generate_nonce(&mut OsRng);
            let ct = cipher
                .encrypt(&nonce, plain)
                .map_err(|_| MalformedError::Cipher)?;
            let mut raw = nonce.to_vec();
            raw.extend_from_slice(&ct);
            raw
        }
        32 => {
            let cipher =
                Aes256Gcm::new_from_slice(key).map_err(|_| MalformedError::KeySize(key.len()))?;
            let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
            let ct = cipher
                .encrypt(&nonce, plain)
                .map_err(|_| MalformedError::Cipher)?;
            let mut raw = nonce.to_vec();
            raw.extend_from_slice(&ct);
            raw
        }
        n => return Err(MalformedError::KeySize(n)),
    };
    Ok(format!("{FIELD_ENC_PREFIX}{}", BASE64.encode(raw)))
}

/// Decrypt an envelope string produced by [`seal`]. Rejects inputs without
/// the exact prefix.
pub fn open(key: &[u8], enc: &str) -> Result<Vec<u8>, MalformedError> {
    let b64 = enc
        .strip_prefix(FIELD_ENC_PREFIX)
        .ok_or(MalformedError::CiphertextPrefix)?;
    let raw = BASE64.decode(b64)?;
    if raw.len() < NONCE_SIZE {
        return Err(MalformedError::CiphertextTooShort);
    }
    let (nonce_bytes, ct) = raw.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);
    match key.len() {
        16 => Aes128Gcm::new_from_slice(key)
            .map_err(|_| MalformedError::KeySize(key.len()))?
            .decrypt(nonce, ct)
            .map_err(|_| MalformedError::Decrypt),
        32 => Aes256Gcm::new_from_slice(key)
            .map_err(|_| MalformedError::KeySize(key.len()))?
            .decrypt(nonce, ct)
            .map_err(|_| MalformedError::Decrypt),
        n => Err(MalformedError::KeySize(n)),
    }
}

/// Whether a stored string carries the envelope prefix.
pub fn is_envelope(value: &str) -> bool {
    value.starts_with(FIELD_ENC_PREFIX)
}
