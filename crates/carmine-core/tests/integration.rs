//! End-to-end scenarios against the in-memory store backend: indexed saves,
//! unique constraints, CAS, encrypted fields and lookups, locks, payloads.

use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use carmine_core::api::Client;
use carmine_core::error::{ContractError, Error, StoreError};
use carmine_core::registry::Model;
use carmine_core::store::{MemoryStore, Store};
use carmine_core::types::{DefaultSpec, Descriptor};

const MASTER_KEY: &[u8; 32] = b"thisis32byteslongsecretkey123456";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct User {
    #[serde(default)]
    id: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    note: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    version: i64,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl Model for User {
    fn descriptor() -> Descriptor {
        Descriptor::builder("User")
            .primary_key("id")
            .version("version")
            .secret("email")
            .enc_indexed("email")
            .unique("email")
            .secret("note")
            .indexed("country")
            .default_value("status", DefaultSpec::Literal(json!("pending")))
            .auto_create_time("created_at")
            .auto_update_time("updated_at")
            .build()
            .expect("valid descriptor")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Counter {
    #[serde(default)]
    id: String,
    #[serde(default)]
    count: i64,
    #[serde(default)]
    version: i64,
}

impl Model for Counter {
    fn descriptor() -> Descriptor {
        Descriptor::builder("Counter")
            .primary_key("id")
            .version("version")
            .build()
            .expect("valid descriptor")
    }
}

fn harness() -> (MemoryStore, Client) {
    let store = MemoryStore::new();
    let client = Client::builder(store.clone())
        .namespace("t")
        .master_key(*MASTER_KEY)
        .build();
    (store, client)
}

fn user(email: &str, country: &str) -> User {
    User {
        email: email.to_string(),
        country: country.to_string(),
        ..Default::default()
    }
}

fn patch(v: Value) -> Map<String, Value> {
    v.as_object().expect("object patch").clone()
}

#[test]
fn test_save_and_load_round_trip() {
    let (store, client) = harness();
    let session = client.session();

    let mut u = user("a@b.com", "DE");
    let id = session.save(&mut u).unwrap();
    assert!(!id.is_empty());
    assert_eq!(u.id, id);
    assert_eq!(u.status, "pending");
    assert!(u.created_at.is_some());
    assert!(u.updated_at.is_some());

    let loaded: User = session.load(&id).unwrap();
    assert_eq!(loaded, u);
    assert_eq!(loaded.email, "a@b.com");

    // At rest the email is an envelope, never plaintext.
    let stored = store.get(&format!("t:val:User:{id}")).unwrap().unwrap();
    assert!(stored.contains("encf:v1:gcm:"));
    assert!(!stored.contains("a@b.com"));
}

#[test]
fn test_load_missing_and_empty_id() {
    let (_, client) = harness();
    let session = client.session();
    assert!(matches!(session.load::<User>("ghost"), Err(Error::NotFound)));
    assert!(matches!(
        session.load::<User>(""),
        Err(Error::Contract(ContractError::EmptyId))
    ));
}

#[test]
fn test_unique_collision_leaves_second_record_absent() {
    let (store, client) = harness();
    let session = client.session();

    let mut first = user("x@y", "DE");
    session.save(&mut first).unwrap();

    let mut second = user("x@y", "FR");
    let err = session.save(&mut second).unwrap_err();
    assert!(matches!(err, Error::UniqueConflict));
    // The colliding record was not written back and left no value behind.
    assert!(second.id.is_empty());
    let vals: Vec<String> = store
        .keys()
        .into_iter()
        .filter(|k| k.starts_with("t:val:User:"))
        .collect();
    assert_eq!(vals.len(), 1);
}

#[test]
fn test_plain_save_never_touches_version_counter() {
    let (store, client) = harness();
    let session = client.session();

    let mut u = user("v@b", "DE");
    let id = session.save(&mut u).unwrap();
    assert_eq!(store.get(&format!("t:ver:User:{id}")).unwrap(), None);
}

#[test]
fn test_cas_conflict_after_intervening_save() {
    let (store, client) = harness();
    let session = client.session();

    let mut u = user("cas@b", "DE");
    let id = session.save_with_cas(&mut u).unwrap();
    session.save_with_cas(&mut u).unwrap();
    session.save_with_cas(&mut u).unwrap();
    assert_eq!(u.version, 3);

    // Another writer loads the same version and commits first.
    let mut fresh: User = session.load(&id).unwrap();
    fresh.country = "US".to_string();
    session.save_with_cas(&mut fresh).unwrap();

    // The stale writer conflicts; the counter shows the intervening commit.
    let mut stale = u.clone();
    stale.country = "NL".to_string();
    let err = session.save_with_cas(&mut stale).unwrap_err();
    assert!(matches!(err, Error::VersionConflict));
    assert_eq!(
        store.get(&format!("t:ver:User:{id}")).unwrap().as_deref(),
        Some("4")
    );
    // Failed CAS leaves the in-memory record unchanged.
    assert_eq!(stale.version, 3);
}

#[test]
fn test_concurrent_cas_admits_exactly_one_writer() {
    let (store, client) = harness();
    let session = client.session();

    let mut u = user("race@b", "DE");
    let id = session.save_with_cas(&mut u).unwrap();
    assert_eq!(u.version, 1);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let client = client.clone();
            let snapshot = u.clone();
            thread::spawn(move || {
                let mut copy = snapshot;
                client.session().save_with_cas(&mut copy).is_ok()
            })
        })
        .collect();
    let successes = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|ok| *ok)
        .count();

    assert_eq!(successes, 1);
    assert_eq!(
        store.get(&format!("t:ver:User:{id}")).unwrap().as_deref(),
        Some("2")
    );
}

#[test]
fn test_index_maintenance_follows_updates() {
    let (_, client) = harness();
    let session = client.session();

    let mut u = user("idx@b", "DE");
    let id = session.save(&mut u).unwrap();
    let page = session
        .page_ids_by_index::<User>("country", "DE", 0, 10)
        .unwrap();
    assert_eq!(page.ids, vec![id.clone()]);

    session
        .update_fields::<User>(&id, &patch(json!({"country": "US"})))
        .unwrap();

    let old = session
        .page_ids_by_index::<User>("country", "DE", 0, 10)
        .unwrap();
    assert!(old.ids.is_empty());
    let new = session
        .page_ids_by_index::<User>("country", "US", 0, 10)
        .unwrap();
    assert_eq!(new.ids, vec![id]);
}

#[test]
fn test_unique_slot_moves_with_value() {
    let (store, client) = harness();
    let session = client.session();

    let mut u = user("old@y", "DE");
    let id = session.save(&mut u).unwrap();
    assert_eq!(
        store.get("t:uniq:User:email:old@y").unwrap().as_deref(),
        Some(id.as_str())
    );

    session
        .update_fields::<User>(&id, &patch(json!({"email": "new@y"})))
        .unwrap();
    assert_eq!(store.get("t:uniq:User:email:old@y").unwrap(), None);
    assert_eq!(
        store.get("t:uniq:User:email:new@y").unwrap().as_deref(),
        Some(id.as_str())
    );
}

#[test]
fn test_enc_index_lookup_without_plaintext_keys() {
    let (store, client) = harness();
    let session = client.session();

    let mut u = user("farhad@example.com", "DE");
    let id = session.save(&mut u).unwrap();

    let page = session
        .page_ids_by_enc_index::<User>("email", "farhad@example.com", 0, 10)
        .unwrap();
    assert_eq!(page.ids, vec![id]);

    for key in store.keys() {
        assert!(!key.contains("farhad"), "plaintext leaked into key {key}");
    }
}

#[test]
fn test_enc_index_membership_migrates_on_update() {
    let (_, client) = harness();
    let session = client.session();

    let mut u = user("before@x", "DE");
    let id = session.save(&mut u).unwrap();
    session
        .update_fields::<User>(&id, &patch(json!({"email": "after@x"})))
        .unwrap();

    let before = session
        .page_ids_by_enc_index::<User>("email", "before@x", 0, 10)
        .unwrap();
    assert!(before.ids.is_empty());
    let after = session
        .page_ids_by_enc_index::<User>("email", "after@x", 0, 10)
        .unwrap();
    assert_eq!(after.ids, vec![id]);
}

#[test]
fn test_records_sharing_plaintext_share_one_enc_index_set() {
    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Contact {
        #[serde(default)]
        id: String,
        phone: String,
    }
    impl Model for Contact {
        fn descriptor() -> Descriptor {
            Descriptor::builder("Contact")
                .primary_key("id")
                .secret("phone")
                .enc_indexed("phone")
                .build()
                .expect("valid descriptor")
        }
    }

    let (store, client) = harness();
    let session = client.session();
    let mut a = Contact {
        phone: "555-0101".to_string(),
        ..Default::default()
    };
    let mut b = Contact {
        phone: "555-0101".to_string(),
        ..Default::default()
    };
    let id_a = session.save(&mut a).unwrap();
    let id_b = session.save(&mut b).unwrap();

    let mut page = session
        .page_ids_by_enc_index::<Contact>("phone", "555-0101", 0, 10)
        .unwrap();
    page.ids.sort();
    let mut expected = vec![id_a, id_b];
    expected.sort();
    assert_eq!(page.ids, expected);

    // Exactly one enc-index set exists for the shared plaintext.
    let sets: Vec<String> = store
        .keys()
        .into_iter()
        .filter(|k| k.starts_with("t:idxenc:Contact:phone:"))
        .collect();
    assert_eq!(sets.len(), 1);
}

#[test]
fn test_delete_cleans_every_family_but_keeps_dek() {
    let (store, client) = harness();
    let session = client.session();

    let mut u = user("gone@x", "DE");
    let id = session.save_with_cas(&mut u).unwrap();

    session.delete::<User>(&id).unwrap();
    assert!(!session.exists::<User>(&id).unwrap());

    // Primary value and version counter are gone.
    let dek_key = format!("t:dek:User:{id}");
    let leftover: Vec<String> = store
        .keys()
        .into_iter()
        .filter(|k| k.contains(&id) && *k != dek_key)
        .collect();
    assert!(leftover.is_empty(), "stale references: {leftover:?}");

    // The unique slot is released and index memberships removed.
    assert_eq!(store.get("t:uniq:User:email:gone@x").unwrap(), None);
    let idx = session
        .page_ids_by_index::<User>("country", "DE", 0, 10)
        .unwrap();
    assert!(!idx.ids.contains(&id));
    let enc = session
        .page_ids_by_enc_index::<User>("email", "gone@x", 0, 10)
        .unwrap();
    assert!(!enc.ids.contains(&id));

    // The record DEK intentionally survives for id reuse.
    assert!(store.get(&dek_key).unwrap().is_some());
}

#[test]
fn test_transactional_edit_serializes_writers() {
    let (_, client) = harness();
    let session = client.session();

    let mut counter = Counter::default();
    let id = session.save(&mut counter).unwrap();

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let client = client.clone();
            let id = id.clone();
            thread::spawn(move || {
                client
                    .session()
                    .edit::<Counter>(&id, |c| {
                        c.count += 1;
                        Ok(())
                    })
                    .unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let final_state: Counter = session.load(&id).unwrap();
    assert_eq!(final_state.count, 2);
}

#[test]
fn test_edit_propagates_mutator_error_and_releases_lock() {
    let (_, client) = harness();
    let session = client.session();

    let mut counter = Counter::default();
    let id = session.save(&mut counter).unwrap();

    let err = session
        .edit::<Counter>(&id, |_| Err(Error::NotFound))
        .unwrap_err();
    assert!(matches!(err, Error::NotFound));

    // The lock was released despite the failure.
    let guard = session.try_lock::<Counter>(&id, None).unwrap();
    guard.release().unwrap();
}

#[test]
fn test_lock_exclusion_and_token_safety() {
    let (_, client) = harness();
    let session = client.session();

    let guard = session.try_lock::<User>("L1", None).unwrap();
    assert!(matches!(
        session.try_lock::<User>("L1", None),
        Err(Error::LockHeld)
    ));
    guard.release().unwrap();

    // Expired lease gets reacquired; the stale guard's release is a no-op.
    let stale = session
        .try_lock::<User>("L1", Some(Duration::from_millis(30)))
        .unwrap();
    thread::sleep(Duration::from_millis(60));
    let fresh = session.try_lock::<User>("L1", None).unwrap();
    drop(stale);
    assert!(matches!(
        session.try_lock::<User>("L1", None),
        Err(Error::LockHeld)
    ));
    fresh.release().unwrap();
}

#[test]
fn test_lock_retry_waits_out_short_holder() {
    let (_, client) = harness();

    let holder = client
        .session()
        .try_lock::<User>("L2", Some(Duration::from_millis(50)))
        .unwrap();
    let waiter = {
        let client = client.clone();
        thread::spawn(move || {
            client
                .session()
                .lock::<User>("L2", None, Default::default())
                .map(|g| g.release())
                .is_ok()
        })
    };
    thread::sleep(Duration::from_millis(20));
    holder.release().unwrap();
    assert!(waiter.join().unwrap());
}

#[test]
fn test_fast_patch_updates_stored_document() {
    let (store, client) = harness();
    let session = client.session();

    let mut u = user("fp@x", "DE");
    let id = session.save(&mut u).unwrap();

    session
        .fast_patch_fields::<User>(&id, &patch(json!({"status": "active"})))
        .unwrap();
    let loaded: User = session.load(&id).unwrap();
    assert_eq!(loaded.status, "active");
    assert_eq!(loaded.country, "DE");

    // Secret fields in the patch are encrypted before dispatch.
    session
        .fast_patch_fields::<User>(&id, &patch(json!({"note": "ssn 123"})))
        .unwrap();
    let stored = store.get(&format!("t:val:User:{id}")).unwrap().unwrap();
    assert!(!stored.contains("ssn 123"));
    let loaded: User = session.load(&id).unwrap();
    assert_eq!(loaded.note, "ssn 123");
}

#[test]
fn test_fast_patch_missing_record() {
    let (_, client) = harness();
    let err = client
        .session()
        .fast_patch_fields::<User>("ghost", &patch(json!({"status": "x"})))
        .unwrap_err();
    assert!(matches!(err, Error::NotFound));
}

#[test]
fn test_update_fields_rejects_incompatible_types() {
    let (_, client) = harness();
    let session = client.session();

    let mut u = user("tm@x", "DE");
    let id = session.save(&mut u).unwrap();
    let err = session
        .update_fields::<User>(&id, &patch(json!({"country": 5})))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Contract(ContractError::PatchTypeMismatch { .. })
    ));
}

#[test]
fn test_exists() {
    let (_, client) = harness();
    let session = client.session();
    let mut u = user("ex@x", "DE");
    let id = session.save(&mut u).unwrap();
    assert!(session.exists::<User>(&id).unwrap());
    assert!(!session.exists::<User>("ghost").unwrap());
}

#[test]
fn test_touch_contract_and_expiry() {
    let (_, client) = harness();
    let session = client.session();

    assert!(matches!(
        session.touch::<User>("ghost", Duration::from_secs(1)),
        Err(Error::NotFound)
    ));

    let mut u = user("touch@x", "DE");
    let id = session.save(&mut u).unwrap();
    assert!(matches!(
        session.touch::<User>(&id, Duration::ZERO),
        Err(Error::Contract(ContractError::NonPositiveTtl))
    ));

    session
        .touch::<User>(&id, Duration::from_millis(40))
        .unwrap();
    assert!(session.exists::<User>(&id).unwrap());
    thread::sleep(Duration::from_millis(80));
    assert!(!session.exists::<User>(&id).unwrap());
}

#[test]
fn test_save_with_ttl_expires_record() {
    let (_, client) = harness();
    let session = client.session();

    let mut u = user("ttl@x", "DE");
    let id = session
        .save_with_ttl(&mut u, Duration::from_millis(40))
        .unwrap();
    assert!(session.exists::<User>(&id).unwrap());
    thread::sleep(Duration::from_millis(80));
    assert!(!session.exists::<User>(&id).unwrap());
}

#[test]
fn test_auto_delete_ttl_applies_when_no_explicit_ttl() {
    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Ticket {
        #[serde(default)]
        id: String,
        seat: String,
    }
    impl Model for Ticket {
        fn descriptor() -> Descriptor {
            Descriptor::builder("Ticket")
                .primary_key("id")
                .auto_delete_ttl(Duration::from_millis(40))
                .build()
                .expect("valid descriptor")
        }
    }

    let (_, client) = harness();
    let session = client.session();
    let mut t = Ticket {
        seat: "12A".to_string(),
        ..Default::default()
    };
    let id = session.save(&mut t).unwrap();
    assert!(session.exists::<Ticket>(&id).unwrap());
    thread::sleep(Duration::from_millis(80));
    assert!(!session.exists::<Ticket>(&id).unwrap());
}

#[test]
fn test_payload_round_trip_encrypted() {
    let (store, client) = harness();
    let session = client.session();

    let mut u = user("pl@x", "DE");
    let id = session.save(&mut u).unwrap();

    let payload = json!({"notes": "attached blob", "n": 7});
    session
        .save_payload::<User>(&id, &payload, true, None)
        .unwrap();

    let raw = store.get(&format!("t:pl:User:{id}")).unwrap().unwrap();
    assert!(raw.starts_with("encf:v1:gcm:"));
    assert!(store.get(&format!("t:dekp:User:{id}")).unwrap().is_some());

    let bytes = session.get_payload::<User>(&id, true).unwrap();
    let decoded: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(decoded, payload);

    // Without decrypt the envelope comes back as stored.
    let opaque = session.get_payload::<User>(&id, false).unwrap();
    assert!(String::from_utf8(opaque).unwrap().starts_with("encf:"));
}

#[test]
fn test_payload_resave_keeps_data_key() {
    let (store, client) = harness();
    let session = client.session();

    let mut u = user("pl2@x", "DE");
    let id = session.save(&mut u).unwrap();
    session
        .save_payload::<User>(&id, &json!({"v": 1}), true, None)
        .unwrap();
    let dek_before = store.get(&format!("t:dekp:User:{id}")).unwrap().unwrap();

    session
        .save_payload::<User>(&id, &json!({"v": 2}), true, None)
        .unwrap();
    let dek_after = store.get(&format!("t:dekp:User:{id}")).unwrap().unwrap();
    assert_eq!(dek_before, dek_after);

    let bytes = session.get_payload::<User>(&id, true).unwrap();
    let decoded: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(decoded, json!({"v": 2}));
}

#[test]
fn test_touch_payload() {
    let (_, client) = harness();
    let session = client.session();

    let mut u = user("pl3@x", "DE");
    let id = session.save(&mut u).unwrap();
    assert!(matches!(
        session.touch_payload::<User>(&id, Duration::from_secs(1)),
        Err(Error::NotFound)
    ));
    session
        .save_payload::<User>(&id, &json!({"v": 1}), false, None)
        .unwrap();
    session
        .touch_payload::<User>(&id, Duration::from_secs(5))
        .unwrap();
}

#[test]
fn test_save_all_returns_ids_in_order() {
    let (_, client) = harness();
    let session = client.session();

    let mut records = vec![
        user("b1@x", "DE"),
        user("b2@x", "FR"),
        user("b3@x", "US"),
    ];
    let ids = session.save_all(&mut records).unwrap();
    assert_eq!(ids.len(), 3);
    for (record, id) in records.iter().zip(&ids) {
        assert_eq!(&record.id, id);
        let loaded: User = session.load(id).unwrap();
        assert_eq!(loaded.email, record.email);
    }
}

#[test]
fn test_save_all_reports_first_failing_index() {
    let (_, client) = harness();
    let session = client.session();

    let mut records = vec![user("dup@batch", "DE"), user("dup@batch", "FR")];
    let err = session.save_all(&mut records).unwrap_err();
    match err {
        Error::BatchItem { index, source } => {
            assert_eq!(index, 1);
            assert!(matches!(*source, Error::UniqueConflict));
        }
        other => panic!("expected BatchItem, got {other:?}"),
    }
}

#[test]
fn test_group_name_segments_keys() {
    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Event {
        #[serde(default)]
        id: String,
        kind: String,
    }
    impl Model for Event {
        fn descriptor() -> Descriptor {
            Descriptor::builder("Event")
                .group("audit")
                .primary_key("id")
                .indexed("kind")
                .build()
                .expect("valid descriptor")
        }
    }

    let (store, client) = harness();
    let session = client.session();
    let mut e = Event {
        kind: "login".to_string(),
        ..Default::default()
    };
    let id = session.save(&mut e).unwrap();
    assert!(store.get(&format!("t:val:audit:Event:{id}")).unwrap().is_some());
    let page = session
        .page_ids_by_index::<Event>("kind", "login", 0, 10)
        .unwrap();
    assert_eq!(page.ids, vec![id]);
}

#[test]
fn test_cancelled_session_refuses_dispatch() {
    let (_, client) = harness();
    let session = client.session();
    session.cancel_token().cancel();
    let mut u = user("c@x", "DE");
    assert!(matches!(
        session.save(&mut u),
        Err(Error::Store(StoreError::Cancelled))
    ));
}

#[test]
fn test_expired_deadline_refuses_dispatch() {
    let (_, client) = harness();
    let session = client.session_with_timeout(Duration::ZERO);
    let mut u = user("d@x", "DE");
    assert!(matches!(
        session.save(&mut u),
        Err(Error::Store(StoreError::DeadlineExceeded))
    ));
}
