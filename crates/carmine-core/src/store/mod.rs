//! The transport seam to the Redis-compatible store.
//!
//! The core talks to the store exclusively through the [`Store`] trait: a
//! primitive channel of GET/SET/PSETEX/DEL/SADD/SREM/SSCAN/EXISTS/EXPIRE/
//! SETNX-with-TTL plus scripted execution. A driver backend EVALs the Lua
//! sources carried by [`Script`]; the bundled [`MemoryStore`] executes a
//! native equivalent of each script under a single mutex, preserving
//! whole-script atomicity.

pub mod memory;
pub mod scripts;

use std::time::Duration;

use crate::error::StoreError;
use crate::types::ScanPage;

pub use memory::MemoryStore;
pub use scripts::Script;

/// A non-error reply from scripted execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Int(i64),
    Str(String),
}

/// One scripted call within a pipelined flush.
pub struct ScriptCall<'a> {
    pub script: &'a Script,
    pub keys: Vec<String>,
    pub args: Vec<String>,
}

/// The primitive store channel.
///
/// Implementations must execute [`eval`](Store::eval) atomically with respect
/// to every other operation: no other command may interleave with a script's
/// reads and writes.
pub trait Store: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// SET with a millisecond TTL.
    fn psetex(&self, key: &str, ttl: Duration, value: &str) -> Result<(), StoreError>;

    /// Returns whether the key existed.
    fn del(&self, key: &str) -> Result<bool, StoreError>;

    fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError>;

    fn srem(&self, key: &str, member: &str) -> Result<(), StoreError>;

    /// Cursor-paged scan over a set's members. A returned cursor of 0 means
    /// the scan is complete. `count` is a hint; 0 applies the store default.
    fn sscan(&self, key: &str, cursor: u64, count: u64) -> Result<ScanPage, StoreError>;

    fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Set a TTL on an existing key; returns false when the key is absent.
    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// SET if absent, with an optional TTL. Returns whether the value was set.
    fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool, StoreError>;

    /// Execute a script atomically. Error replies raised by the script itself
    /// (e.g. `VERSION_CONFLICT`) surface as [`StoreError::Reply`].
    fn eval(&self, script: &Script, keys: &[String], args: &[String])
    -> Result<Reply, StoreError>;

    /// Submit several scripted calls in one flush. Each call is individually
    /// atomic; the batch as a whole is not. The outer `Err` is reserved for
    /// transport failure of the flush itself.
    fn eval_pipelined(
        &self,
        calls: &[ScriptCall<'_>],
    ) -> Result<Vec<Result<Reply, StoreError>>, StoreError> {
        calls
            .iter()
            .map(|c| Ok(self.eval(c.script, &c.keys, &c.args)))
            .collect()
    }
}
