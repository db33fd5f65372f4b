//! In-memory store backend.
//!
//! A single-process stand-in for the real store, used by tests and local
//! development. All commands and the native script equivalents run under one
//! mutex, which gives scripted execution the same atomicity the store's
//! scripting engine provides. Per-key expiry is tracked with monotonic
//! instants and purged lazily on access.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::types::ScanPage;

use super::{Reply, Script, Store};

const DEFAULT_SCAN_COUNT: u64 = 10;

#[derive(Debug, Clone)]
enum Stored {
    Str(String),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Stored,
    expires_at: Option<Instant>,
}

type Data = HashMap<String, Entry>;

/// Cheaply clonable handle to a shared in-memory store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<Data>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all live keys, sorted. Intended for tests asserting on
    /// key families.
    pub fn keys(&self) -> Vec<String> {
        let mut data = self.data.lock();
        let now = Instant::now();
        data.retain(|_, e| !expired(e, now));
        let mut keys: Vec<String> = data.keys().cloned().collect();
        keys.sort();
        keys
    }
}

fn expired(entry: &Entry, now: Instant) -> bool {
    entry.expires_at.is_some_and(|at| at <= now)
}

fn live<'a>(data: &'a mut Data, key: &str, now: Instant) -> Option<&'a mut Entry> {
    if data.get(key).is_some_and(|e| expired(e, now)) {
        data.remove(key);
    }
    data.get_mut(key)
}

fn get_str(data: &mut Data, key: &str, now: Instant) -> Result<Option<String>, StoreError> {
    match live(data, key, now) {
        None => Ok(None),
        Some(Entry {
            value: Stored::Str(s),
            ..
        }) => Ok(Some(s.clone())),
        Some(_) => Err(StoreError::WrongType {
            key: key.to_string(),
        }),
    }
}

fn set_str(data: &mut Data, key: &str, value: &str, expires_at: Option<Instant>) {
    data.insert(
        key.to_string(),
        Entry {
            value: Stored::Str(value.to_string()),
            expires_at,
        },
    );
}

fn set_add(data: &mut Data, key: &str, member: &str, now: Instant) -> Result<(), StoreError> {
    match live(data, key, now) {
        None => {
            data.insert(
                key.to_string(),
                Entry {
                    value: Stored::Set(BTreeSet::from([member.to_string()])),
                    expires_at: None,
                },
            );
            Ok(())
        }
        Some(Entry {
            value: Stored::Set(s),
            ..
        }) => {
            s.insert(member.to_string());
            Ok(())
        }
        Some(_) => Err(StoreError::WrongType {
            key: key.to_string(),
        }),
    }
}

fn set_rem(data: &mut Data, key: &str, member: &str, now: Instant) -> Result<(), StoreError> {
    if let Some(Entry {
        value: Stored::Set(s),
        ..
    }) = live(data, key, now)
    {
        s.remove(member);
        if s.is_empty() {
            data.remove(key);
        }
    }
    Ok(())
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        get_str(&mut self.data.lock(), key, Instant::now())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        set_str(&mut self.data.lock(), key, value, None);
        Ok(())
    }

    fn psetex(&self, key: &str, ttl: Duration, value: &str) -> Result<(), StoreError> {
        set_str(
            &mut self.data.lock(),
            key,
            value,
            Some(Instant::now() + ttl),
        );
        Ok(())
    }

    fn del(&self, key: &str) -> Result<bool, StoreError> {
        let mut data = self.data.lock();
        let was_live = live(&mut data, key, Instant::now()).is_some();
        data.remove(key);
        Ok(was_live)
    }

    fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError> {
        set_add(&mut self.data.lock(), key, member, Instant::now())
    }

    fn srem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        set_rem(&mut self.data.lock(), key, member, Instant::now())
    }

    fn sscan(&self, key: &str, cursor: u64, count: u64) -> Result<ScanPage, StoreError> {
        let mut data = self.data.lock();
        let members: Vec<String> = match live(&mut data, key, Instant::now()) {
            None => return Ok(ScanPage::default()),
            Some(Entry {
                value: Stored::Set(s),
                ..
            }) => s.iter().cloned().collect(),
            Some(_) => {
                return Err(StoreError::WrongType {
                    key: key.to_string(),
                });
            }
        };
        let count = if count == 0 { DEFAULT_SCAN_COUNT } else { count };
        let start = cursor as usize;
        let ids: Vec<String> = members.iter().skip(start).take(count as usize).cloned().collect();
        let next = start + ids.len();
        let cursor = if next < members.len() { next as u64 } else { 0 };
        Ok(ScanPage { ids, cursor })
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(live(&mut self.data.lock(), key, Instant::now()).is_some())
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        match live(&mut self.data.lock(), key, now) {
            Some(entry) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut data = self.data.lock();
        if live(&mut data, key, now).is_some() {
            return Ok(false);
        }
        set_str(&mut data, key, value, ttl.map(|t| now + t));
        Ok(true)
    }

    fn eval(
        &self,
        script: &Script,
        keys: &[String],
        args: &[String],
    ) -> Result<Reply, StoreError> {
        let now = Instant::now();
        let mut data = self.data.lock();
        match script.name() {
            "save" => run_save(&mut data, keys, args, now),
            "delete" => run_delete(&mut data, keys, args, now),
            "fast_patch" => run_fast_patch(&mut data, keys, args, now),
            "payload_save" => run_payload_save(&mut data, keys, args, now),
            "unlock" => run_unlock(&mut data, keys, args, now),
            other => Err(StoreError::Reply(format!("unknown script '{other}'"))),
        }
    }
}

fn arg_u64(args: &[String], i: usize) -> u64 {
    args.get(i).and_then(|s| s.parse().ok()).unwrap_or(0)
}

fn arg_usize(args: &[String], i: usize) -> usize {
    args.get(i).and_then(|s| s.parse().ok()).unwrap_or(0)
}

fn check_version(
    data: &mut Data,
    ver_key: &str,
    expected: &str,
    now: Instant,
) -> Result<(), StoreError> {
    let cur: i64 = get_str(data, ver_key, now)?
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    match expected.parse::<i64>() {
        Ok(exp) if exp == cur => Ok(()),
        _ => Err(StoreError::Reply("VERSION_CONFLICT".to_string())),
    }
}

fn run_save(data: &mut Data, keys: &[String], args: &[String], now: Instant) -> Result<Reply, StoreError> {
    let ver_key = &keys[0];
    let val_key = &keys[1];
    let id = &args[0];
    let enc = &args[1];
    let ttl_ms = arg_u64(args, 2);
    let expected = args[3].as_str();
    let n_add_uniq = arg_usize(args, 4);
    let n_del_uniq = arg_usize(args, 5);
    let n_add_idx = arg_usize(args, 6);
    let n_rem_idx = arg_usize(args, 7);
    let n_add_enc = arg_usize(args, 8);
    let n_rem_enc = arg_usize(args, 9);

    if !expected.is_empty() {
        check_version(data, ver_key, expected, now)?;
    }

    let mut idx = 2;
    // Read-only unique probes before any mutation.
    for k in &keys[idx..idx + n_add_uniq] {
        if let Some(owner) = get_str(data, k, now)?
            && owner != *id
        {
            return Err(StoreError::Reply("UNIQUE_CONFLICT".to_string()));
        }
    }

    let expires_at = (ttl_ms > 0).then(|| now + Duration::from_millis(ttl_ms));
    set_str(data, val_key, enc, expires_at);

    for i in 0..n_add_uniq {
        set_str(data, &keys[idx + i], id, None);
    }
    idx += n_add_uniq;
    for i in 0..n_del_uniq {
        let k = keys[idx + i].clone();
        if get_str(data, &k, now)?.as_deref() == Some(id.as_str()) {
            data.remove(&k);
        }
    }
    idx += n_del_uniq;
    for i in 0..n_add_idx {
        set_add(data, &keys[idx + i], id, now)?;
    }
    idx += n_add_idx;
    for i in 0..n_rem_idx {
        set_rem(data, &keys[idx + i], id, now)?;
    }
    idx += n_rem_idx;
    for i in 0..n_add_enc {
        set_add(data, &keys[idx + i], id, now)?;
    }
    idx += n_add_enc;
    for i in 0..n_rem_enc {
        set_rem(data, &keys[idx + i], id, now)?;
    }

    if !expected.is_empty() {
        let next = expected.parse::<i64>().unwrap_or(0) + 1;
        set_str(data, ver_key, &next.to_string(), None);
    }
    Ok(Reply::Str(id.clone()))
}

fn run_delete(data: &mut Data, keys: &[String], args: &[String], now: Instant) -> Result<Reply, StoreError> {
    let ver_key = keys[0].clone();
    let val_key = keys[1].clone();
    let id = &args[0];
    let expected = args[1].as_str();
    let remove_ver = args[2].as_str() == "1";
    let n_del_uniq = arg_usize(args, 3);
    let n_rem_idx = arg_usize(args, 4);
    let n_rem_enc = arg_usize(args, 5);

    if !expected.is_empty() {
        check_version(data, &ver_key, expected, now)?;
    }

    data.remove(&val_key);
    let mut idx = 2;
    for i in 0..n_del_uniq {
        let k = keys[idx + i].clone();
        if get_str(data, &k, now)?.as_deref() == Some(id.as_str()) {
            data.remove(&k);
        }
    }
    idx += n_del_uniq;
    for i in 0..n_rem_idx {
        set_rem(data, &keys[idx + i], id, now)?;
    }
    idx += n_rem_idx;
    for i in 0..n_rem_enc {
        set_rem(data, &keys[idx + i], id, now)?;
    }
    if remove_ver {
        data.remove(&ver_key);
    }
    Ok(Reply::Int(1))
}

fn run_fast_patch(data: &mut Data, keys: &[String], args: &[String], now: Instant) -> Result<Reply, StoreError> {
    let val_key = &keys[0];
    let Some(current) = get_str(data, val_key, now)? else {
        return Err(StoreError::Reply("NOT_FOUND".to_string()));
    };
    let mut doc: Map<String, Value> = serde_json::from_str(&current)
        .map_err(|e| StoreError::Reply(format!("cjson decode: {e}")))?;
    let patch: Map<String, Value> = serde_json::from_str(&args[0])
        .map_err(|e| StoreError::Reply(format!("cjson decode: {e}")))?;
    for (k, v) in patch {
        doc.insert(k, v);
    }
    let encoded = serde_json::to_string(&doc)
        .map_err(|e| StoreError::Reply(format!("cjson encode: {e}")))?;
    // SET preserves no TTL, matching the script's plain SET.
    set_str(data, val_key, &encoded, None);
    Ok(Reply::Int(1))
}

fn run_payload_save(data: &mut Data, keys: &[String], args: &[String], now: Instant) -> Result<Reply, StoreError> {
    let pl_key = &keys[0];
    let dek_key = &keys[1];
    let val = &args[0];
    let ttl_ms = arg_u64(args, 1);
    let wrapped = &args[2];
    if !wrapped.is_empty() && live(data, dek_key, now).is_none() {
        set_str(data, dek_key, wrapped, None);
    }
    let expires_at = (ttl_ms > 0).then(|| now + Duration::from_millis(ttl_ms));
    set_str(data, pl_key, val, expires_at);
    Ok(Reply::Int(1))
}

fn run_unlock(data: &mut Data, keys: &[String], args: &[String], now: Instant) -> Result<Reply, StoreError> {
    let lock_key = &keys[0];
    if get_str(data, lock_key, now)?.as_deref() == Some(args[0].as_str()) {
        data.remove(lock_key.as_str());
        Ok(Reply::Int(1))
    } else {
        Ok(Reply::Int(0))
    }
}
