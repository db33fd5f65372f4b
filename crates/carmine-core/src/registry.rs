//! Model registration and the per-type descriptor cache.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::types::Descriptor;

/// A record type that can be stored by the client.
///
/// Implementations declare their descriptor once; the client caches it keyed
/// by the type's identity, so `descriptor()` runs at most a handful of times
/// per process regardless of call volume.
pub trait Model: Serialize + DeserializeOwned + 'static {
    /// The declarative descriptor for this type. Field names given here must
    /// match the JSON keys the type serializes under (use
    /// [`DescriptorBuilder::rename`](crate::types::DescriptorBuilder::rename)
    /// to mirror serde renames).
    fn descriptor() -> Descriptor;
}

/// Concurrent descriptor cache.
///
/// First touch computes the descriptor outside the lock; concurrent first
/// touches race benignly (the computed descriptor is deterministic, so
/// last-write-wins is safe).
#[derive(Default)]
pub struct Registry {
    cache: RwLock<HashMap<TypeId, Arc<Descriptor>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached descriptor for `T`, computing it on first touch.
    pub fn descriptor<T: Model>(&self) -> Arc<Descriptor> {
        let key = TypeId::of::<T>();
        if let Some(desc) = self.cache.read().get(&key) {
            return Arc::clone(desc);
        }
        let desc = Arc::new(T::descriptor());
        self.cache.write().insert(key, Arc::clone(&desc));
        desc
    }
}
