//! Deterministic equality tags for encrypted indexes.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use sha2::Sha256;

/// `base64(HMAC-SHA-256(kek, plaintext))`.
///
/// Deterministic, so equal plaintexts map to the same index set without
/// revealing the plaintext itself. Equality across records is leaked by
/// construction; that is the intended trade.
pub fn equality_tag(kek: &[u8], plaintext: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(kek).expect("HMAC accepts any key length");
    mac.update(plaintext.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}
