//! Error types for all carmine operations.

use thiserror::Error;

/// Top-level error type for carmine operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The record (or payload) does not exist at its primary key.
    #[error("record not found")]
    NotFound,

    /// A compare-and-swap save or delete observed a version counter that
    /// differs from the expected one.
    #[error("version conflict")]
    VersionConflict,

    /// A unique slot for one of the record's unique fields is already owned
    /// by a different primary key.
    #[error("unique constraint violation")]
    UniqueConflict,

    /// A lock could not be acquired within the configured attempts.
    #[error("lock held by another owner")]
    LockHeld,

    #[error(transparent)]
    Malformed(#[from] MalformedError),

    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// A batch save failed at the given input position.
    #[error("batch item {index}: {source}")]
    BatchItem {
        index: usize,
        #[source]
        source: Box<Error>,
    },
}

/// Stored bytes (or caller-supplied ciphertext) that cannot be interpreted.
#[derive(Debug, Error)]
pub enum MalformedError {
    #[error("invalid ciphertext prefix")]
    CiphertextPrefix,

    #[error("ciphertext shorter than nonce")]
    CiphertextTooShort,

    #[error("base64 decode: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("unsupported key size: {0} bytes")]
    KeySize(usize),

    #[error("cipher failure")]
    Cipher,

    #[error("decryption failed (wrong key or tampered data)")]
    Decrypt,

    #[error("data key missing for ciphertext")]
    DekMissing,

    #[error("corrupted stored document: {0}")]
    StoredJson(#[from] serde_json::Error),

    #[error("stored document is not a JSON object")]
    NotAnObject,

    #[error("decrypted value is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Caller violations of the API contract.
#[derive(Debug, Error)]
pub enum ContractError {
    #[error("empty primary key id")]
    EmptyId,

    #[error("model '{model}' declares no primary key field")]
    MissingPrimaryKey { model: String },

    #[error("primary key field '{field}' must serialize to a string or number")]
    PrimaryKeyNotString { field: String },

    #[error("secret field '{field}' must serialize to a string")]
    SecretNotString { field: String },

    #[error("model '{model}' has no version field for a compare-and-swap save")]
    NoVersionField { model: String },

    #[error("version field '{field}' must serialize to an integer")]
    VersionNotInteger { field: String },

    #[error("ttl must be positive")]
    NonPositiveTtl,

    #[error("field '{field}' cannot be both indexed and enc-indexed")]
    IndexedAndEncIndexed { field: String },

    #[error("enc-indexed field '{field}' must also be secret")]
    EncIndexWithoutSecret { field: String },

    #[error("empty field name in descriptor for model '{model}'")]
    EmptyFieldName { model: String },

    #[error("patch value for field '{field}' has an incompatible type")]
    PatchTypeMismatch { field: String },

    #[error("patched document does not deserialize into the record type: {0}")]
    PatchIncompatible(String),
}

/// Transport and store-level failures, surfaced as-is.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection: {0}")]
    Connection(String),

    #[error("script error reply: {0}")]
    Reply(String),

    #[error("wrong value type at key '{key}'")]
    WrongType { key: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

pub type Result<T> = std::result::Result<T, Error>;
