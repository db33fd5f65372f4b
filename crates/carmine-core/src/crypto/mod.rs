//! Field-level encryption: the ciphertext envelope, master-key handling, and
//! the deterministic equality tag used by encrypted indexes.

pub mod envelope;
pub mod kek;
pub mod mac;

pub use envelope::{FIELD_ENC_PREFIX, open, seal};
pub use kek::Kek;
pub use mac::equality_tag;
