//! Index, unique, and enc-index projection and differencing.
//!
//! The extractor operates on a record's JSON projection, so the values it
//! sees are exactly the values the wire format carries. Enc-indexed fields
//! are projected from *plaintext* documents (the caller decrypts stored
//! documents before projecting them).

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::crypto::Kek;
use crate::types::Descriptor;

/// The three per-category maps projected from one document:
/// `field name → stringified value` for indexed and unique fields,
/// `field name → equality tag` for enc-indexed fields.
#[derive(Debug, Default, Clone)]
pub struct Projection {
    pub indexed: BTreeMap<String, String>,
    pub unique: BTreeMap<String, String>,
    pub enc_indexed: BTreeMap<String, String>,
}

/// Project a plaintext JSON document through a descriptor.
///
/// Fields that are absent or null in the document produce no entry.
pub fn project(desc: &Descriptor, doc: &Map<String, Value>, kek: &Kek) -> Projection {
    let mut out = Projection::default();
    for f in desc.indexed_fields() {
        if let Some(s) = doc.get(&f.serialized).and_then(stringify) {
            out.indexed.insert(f.name.clone(), s);
        }
    }
    for f in desc.unique_fields() {
        if let Some(s) = doc.get(&f.serialized).and_then(stringify) {
            out.unique.insert(f.name.clone(), s);
        }
    }
    for f in desc.enc_indexed_fields() {
        if let Some(s) = doc.get(&f.serialized).and_then(stringify) {
            out.enc_indexed.insert(f.name.clone(), kek.equality_tag(&s));
        }
    }
    out
}

/// Diff two per-category maps into concrete store keys.
///
/// `add` holds keys for pairs present in `cur` whose value differs from (or
/// is absent in) `prev`; `remove` the mirror image. Ordering within each list
/// is the map's iteration order and callers must not depend on it.
pub fn diff_keys(
    cur: &BTreeMap<String, String>,
    prev: &BTreeMap<String, String>,
    mut key_fn: impl FnMut(&str, &str) -> String,
) -> (Vec<String>, Vec<String>) {
    let mut add = Vec::new();
    let mut remove = Vec::new();
    for (field, value) in cur {
        if prev.get(field) != Some(value) {
            add.push(key_fn(field, value));
        }
    }
    for (field, value) in prev {
        if cur.get(field) != Some(value) {
            remove.push(key_fn(field, value));
        }
    }
    (add, remove)
}

/// Lower every entry of a map to a store key (used by delete, which removes
/// all current memberships rather than a differential).
pub fn all_keys(
    map: &BTreeMap<String, String>,
    mut key_fn: impl FnMut(&str, &str) -> String,
) -> Vec<String> {
    map.iter().map(|(f, v)| key_fn(f, v)).collect()
}

/// Stringify a JSON value the way it appears inside an index key.
/// Null yields no entry; composites use their compact JSON encoding.
fn stringify(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn desc() -> Descriptor {
        Descriptor::builder("User")
            .primary_key("id")
            .indexed("country")
            .unique("email")
            .secret("email")
            .enc_indexed("email")
            .build()
            .unwrap()
    }

    fn kek() -> Kek {
        Kek::from_master_key(Some(vec![1u8; 32]))
    }

    fn doc(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn test_project_categories() {
        let kek = kek();
        let p = project(
            &desc(),
            &doc(json!({"id": "u1", "email": "a@b", "country": "DE"})),
            &kek,
        );
        assert_eq!(p.indexed.get("country"), Some(&"DE".to_string()));
        assert_eq!(p.unique.get("email"), Some(&"a@b".to_string()));
        assert_eq!(
            p.enc_indexed.get("email"),
            Some(&kek.equality_tag("a@b"))
        );
    }

    #[test]
    fn test_project_skips_null_and_missing() {
        let p = project(&desc(), &doc(json!({"id": "u1", "country": null})), &kek());
        assert!(p.indexed.is_empty());
        assert!(p.unique.is_empty());
        assert!(p.enc_indexed.is_empty());
    }

    #[test]
    fn test_numbers_and_bools_stringified() {
        let d = Descriptor::builder("Doc")
            .primary_key("id")
            .indexed("rank")
            .indexed("active")
            .build()
            .unwrap();
        let p = project(
            &d,
            &doc(json!({"id": "1", "rank": 30, "active": true})),
            &kek(),
        );
        assert_eq!(p.indexed.get("rank"), Some(&"30".to_string()));
        assert_eq!(p.indexed.get("active"), Some(&"true".to_string()));
    }

    #[test]
    fn test_diff_keys() {
        let cur = BTreeMap::from([
            ("country".to_string(), "US".to_string()),
            ("tier".to_string(), "gold".to_string()),
        ]);
        let prev = BTreeMap::from([
            ("country".to_string(), "DE".to_string()),
            ("tier".to_string(), "gold".to_string()),
        ]);
        let (add, remove) = diff_keys(&cur, &prev, |f, v| format!("{f}={v}"));
        assert_eq!(add, vec!["country=US"]);
        assert_eq!(remove, vec!["country=DE"]);
    }

    #[test]
    fn test_diff_against_empty_previous() {
        let cur = BTreeMap::from([("country".to_string(), "DE".to_string())]);
        let (add, remove) = diff_keys(&cur, &BTreeMap::new(), |f, v| format!("{f}={v}"));
        assert_eq!(add, vec!["country=DE"]);
        assert!(remove.is_empty());
    }
}
