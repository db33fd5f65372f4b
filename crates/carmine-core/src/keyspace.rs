//! Store key construction for every logical asset.
//!
//! All keys begin with the configured namespace, then a segment naming the
//! asset kind. The model segment is the descriptor's qualified name
//! (`<model>` or `<group>:<model>`). Field values are embedded as-is; the
//! store accepts arbitrary bytes in keys and no escaping is applied.

/// Builds namespaced store keys.
#[derive(Debug, Clone)]
pub struct Keyspace {
    ns: String,
}

impl Keyspace {
    pub fn new(ns: impl Into<String>) -> Self {
        Self { ns: ns.into() }
    }

    /// The configured namespace.
    pub fn namespace(&self) -> &str {
        &self.ns
    }

    /// Primary record value: `<ns>:val:<model>:<id>`.
    pub fn val(&self, model: &str, id: &str) -> String {
        format!("{}:val:{model}:{id}", self.ns)
    }

    /// Version counter: `<ns>:ver:<model>:<id>`.
    pub fn ver(&self, model: &str, id: &str) -> String {
        format!("{}:ver:{model}:{id}", self.ns)
    }

    /// Plaintext equality index set: `<ns>:idx:<model>:<field>:<value>`.
    pub fn idx(&self, model: &str, field: &str, value: &str) -> String {
        format!("{}:idx:{model}:{field}:{value}", self.ns)
    }

    /// HMAC equality index set: `<ns>:idxenc:<model>:<field>:<mac>`.
    pub fn idx_enc(&self, model: &str, field: &str, mac: &str) -> String {
        format!("{}:idxenc:{model}:{field}:{mac}", self.ns)
    }

    /// Unique slot: `<ns>:uniq:<model>:<field>:<value>`.
    pub fn uniq(&self, model: &str, field: &str, value: &str) -> String {
        format!("{}:uniq:{model}:{field}:{value}", self.ns)
    }

    /// Lock: `<ns>:lock:<model>:<id>`.
    pub fn lock(&self, model: &str, id: &str) -> String {
        format!("{}:lock:{model}:{id}", self.ns)
    }

    /// Attached payload: `<ns>:pl:<model>:<id>`.
    pub fn payload(&self, model: &str, id: &str) -> String {
        format!("{}:pl:{model}:{id}", self.ns)
    }

    /// Per-record wrapped data key: `<ns>:dek:<model>:<id>`.
    pub fn dek(&self, model: &str, id: &str) -> String {
        format!("{}:dek:{model}:{id}", self.ns)
    }

    /// Per-payload wrapped data key: `<ns>:dekp:<model>:<id>`.
    pub fn payload_dek(&self, model: &str, id: &str) -> String {
        format!("{}:dekp:{model}:{id}", self.ns)
    }
}
