//! # carmine
//!
//! A typed object-mapping layer over a Redis-compatible key-value store.
//!
//! carmine stores records as JSON documents and gives three guarantees plain
//! clients do not: every save atomically updates the primary value, all
//! secondary indexes, all unique constraints, and (optionally) a version
//! counter in one scripted round trip; fields marked secret are encrypted at
//! rest yet stay equality-searchable through deterministic HMAC index keys;
//! and both optimistic (compare-and-swap) and pessimistic (token-owned
//! lease) concurrency are built in.
//!
//! ## Quick Start
//!
//! ```no_run
//! use carmine_core::api::Client;
//! use carmine_core::registry::Model;
//! use carmine_core::store::MemoryStore;
//! use carmine_core::types::Descriptor;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Default, Serialize, Deserialize)]
//! struct User {
//!     #[serde(default)]
//!     id: String,
//!     email: String,
//!     country: String,
//! }
//!
//! impl Model for User {
//!     fn descriptor() -> Descriptor {
//!         Descriptor::builder("User")
//!             .primary_key("id")
//!             .secret("email")
//!             .enc_indexed("email")
//!             .unique("email")
//!             .indexed("country")
//!             .build()
//!             .unwrap()
//!     }
//! }
//!
//! // Any Store backend works; MemoryStore is the bundled in-process one.
//! let client = Client::builder(MemoryStore::new())
//!     .namespace("app")
//!     .master_key(*b"thisis32byteslongsecretkey123456")
//!     .build();
//!
//! let session = client.session();
//! let mut user = User {
//!     email: "a@b.com".into(),
//!     country: "DE".into(),
//!     ..Default::default()
//! };
//! let id = session.save(&mut user).unwrap();
//!
//! let loaded: User = session.load(&id).unwrap();
//! assert_eq!(loaded.email, "a@b.com");
//!
//! // Equality lookup over the encrypted field, without plaintext in keys.
//! let page = session
//!     .page_ids_by_enc_index::<User>("email", "a@b.com", 0, 10)
//!     .unwrap();
//! assert_eq!(page.ids, vec![id]);
//! ```

pub mod api;
pub mod crypto;
pub mod error;
pub mod extract;
pub mod keyspace;
pub mod lock;
pub mod registry;
pub mod store;
pub mod types;
pub mod update;
