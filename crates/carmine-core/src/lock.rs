//! Pessimistic locking and the transactional edit wrapper.
//!
//! A lock is a store key holding a random 128-bit token with a finite TTL,
//! acquired with SETNX and released by a token-checked compare-and-delete
//! script. Token checking makes expiry safe: a lock that expired and was
//! reacquired by another owner is never released by the first one. Clock
//! skew beyond the TTL is not defended against; workloads that need stricter
//! guarantees should layer fencing tokens on top.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use tracing::debug;

use crate::api::client::Client;
use crate::api::session::{Session, require_id};
use crate::error::{Error, Result};
use crate::registry::Model;
use crate::store::scripts;

/// Lock TTL used when the caller does not specify one.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(5);

/// Retry schedule for lock acquisition: exponential backoff from
/// `initial_backoff`, doubling up to `max_backoff`, bounded by `attempts`,
/// with an optional 10% jitter on every sleep.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(80),
            max_backoff: Duration::from_secs(2),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    fn sleep_for(&self, backoff: Duration) -> Duration {
        if self.jitter {
            backoff + backoff / 10
        } else {
            backoff
        }
    }
}

/// An acquired lease. Release it explicitly with [`release`](Self::release);
/// dropping the guard releases best-effort (transport errors are swallowed).
pub struct LockGuard {
    client: Client,
    key: String,
    token: String,
    released: bool,
}

impl LockGuard {
    /// Release the lock if this guard's token still owns it.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.client
            .inner()
            .store
            .eval(
                &scripts::UNLOCK,
                std::slice::from_ref(&self.key),
                std::slice::from_ref(&self.token),
            )
            .map_err(Error::Store)?;
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let result = self.client.inner().store.eval(
            &scripts::UNLOCK,
            std::slice::from_ref(&self.key),
            std::slice::from_ref(&self.token),
        );
        if let Err(e) = result {
            debug!(key = %self.key, error = %e, "best-effort lock release failed");
        }
    }
}

fn random_token() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}

impl Session {
    /// Try once to acquire the named lock for a record. Fails with
    /// [`Error::LockHeld`] when another owner holds it. `ttl` defaults to
    /// [`DEFAULT_LOCK_TTL`].
    pub fn try_lock<T: Model>(&self, id: &str, ttl: Option<Duration>) -> Result<LockGuard> {
        let desc = self.descriptor::<T>();
        require_id(id)?;
        let ttl = ttl.filter(|t| !t.is_zero()).unwrap_or(DEFAULT_LOCK_TTL);
        let key = self.keyspace().lock(&desc.qualified_name(), id);
        let token = random_token();
        self.check_live()?;
        if !self.store().set_nx(&key, &token, Some(ttl))? {
            return Err(Error::LockHeld);
        }
        Ok(LockGuard {
            client: self.client().clone(),
            key,
            token,
            released: false,
        })
    }

    /// Acquire the lock, retrying per `policy`. Sleeps honor the session's
    /// deadline and cancellation token.
    pub fn lock<T: Model>(
        &self,
        id: &str,
        ttl: Option<Duration>,
        policy: RetryPolicy,
    ) -> Result<LockGuard> {
        let attempts = policy.attempts.max(1);
        let mut backoff = policy.initial_backoff.max(Duration::from_millis(1));
        for attempt in 0..attempts {
            match self.try_lock::<T>(id, ttl) {
                Err(Error::LockHeld) if attempt + 1 < attempts => {
                    debug!(id = %id, attempt, backoff_ms = backoff.as_millis() as u64, "lock held, backing off");
                    self.sleep_cancellable(policy.sleep_for(backoff))?;
                    backoff = (backoff * 2).min(policy.max_backoff);
                }
                other => return other,
            }
        }
        Err(Error::LockHeld)
    }

    /// Load-mutate-save under the record's lock.
    ///
    /// Acquires the lock with the default retry policy, loads the record,
    /// runs the mutator, and commits — through a compare-and-swap save when
    /// the type declares a version field, a plain save otherwise. The lock
    /// is released whatever the outcome. Returns the record's id.
    pub fn edit<T: Model>(
        &self,
        id: &str,
        mutator: impl FnOnce(&mut T) -> Result<()>,
    ) -> Result<String> {
        let desc = self.descriptor::<T>();
        require_id(id)?;
        let guard = self.lock::<T>(id, Some(DEFAULT_LOCK_TTL), RetryPolicy::default())?;

        let outcome = (|| {
            let mut record: T = self.load(id)?;
            mutator(&mut record)?;
            if desc.version_field().is_some() {
                self.save_with_cas(&mut record)
            } else {
                self.save(&mut record)
            }
        })();

        if let Err(e) = guard.release() {
            debug!(id = %id, error = %e, "lock release after edit failed");
        }
        outcome
    }
}
