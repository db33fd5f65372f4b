//! The client handle: immutable configuration plus the descriptor cache.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::info;

use crate::crypto::Kek;
use crate::keyspace::Keyspace;
use crate::registry::Registry;
use crate::store::Store;

use super::session::{CancelToken, Session};

const DEFAULT_NAMESPACE: &str = "orm";

pub(crate) struct ClientInner {
    pub(crate) store: Box<dyn Store>,
    pub(crate) keyspace: Keyspace,
    pub(crate) kek: Kek,
    pub(crate) registry: Registry,
}

/// The object-mapping client.
///
/// `Client` is cheaply clonable (`Arc`-based) and `Send + Sync`. It holds
/// only immutable configuration — namespace, master key, the store channel —
/// plus the concurrent descriptor cache; all per-request state lives on the
/// [`Session`]s it hands out.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Start building a client over the given store channel.
    pub fn builder(store: impl Store + 'static) -> ClientBuilder {
        ClientBuilder {
            store: Box::new(store),
            namespace: DEFAULT_NAMESPACE.to_string(),
            master_key: None,
        }
    }

    /// A session with no deadline.
    pub fn session(&self) -> Session {
        Session::new(self.clone(), None, CancelToken::new())
    }

    /// A session whose operations fail with a deadline error once `timeout`
    /// has elapsed.
    pub fn session_with_timeout(&self, timeout: Duration) -> Session {
        Session::new(self.clone(), Some(Instant::now() + timeout), CancelToken::new())
    }

    /// A session that fails past the given instant.
    pub fn session_with_deadline(&self, deadline: Instant) -> Session {
        Session::new(self.clone(), Some(deadline), CancelToken::new())
    }

    pub(crate) fn inner(&self) -> &ClientInner {
        &self.inner
    }
}

/// Builder for [`Client`].
pub struct ClientBuilder {
    store: Box<dyn Store>,
    namespace: String,
    master_key: Option<Vec<u8>>,
}

impl ClientBuilder {
    /// Set the key namespace. Defaults to `"orm"`; empty input keeps the
    /// default.
    pub fn namespace(mut self, ns: impl Into<String>) -> Self {
        let ns = ns.into();
        if !ns.is_empty() {
            self.namespace = ns;
        }
        self
    }

    /// Set the master key (16 or 32 bytes). A missing or badly sized key
    /// falls back to an ephemeral runtime key.
    pub fn master_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.master_key = Some(key.into());
        self
    }

    /// Build the client.
    pub fn build(self) -> Client {
        let kek = Kek::from_master_key(self.master_key);
        info!(
            namespace = %self.namespace,
            ephemeral_kek = kek.is_ephemeral(),
            "carmine client initialized"
        );
        Client {
            inner: Arc::new(ClientInner {
                store: self.store,
                keyspace: Keyspace::new(self.namespace),
                kek,
                registry: Registry::new(),
            }),
        }
    }
}
