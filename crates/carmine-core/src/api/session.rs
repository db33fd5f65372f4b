//! Per-request sessions and the record operations.
//!
//! A [`Session`] binds a deadline and a cancellation token to the client.
//! Every store interaction observes both before dispatch; a script that has
//! already been dispatched cannot be cancelled server-side, so a deadline
//! that fires mid-flight means "outcome unknown" and callers who care must
//! read back.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::crypto::{Kek, envelope};
use crate::error::{ContractError, Error, MalformedError, Result, StoreError};
use crate::extract::{self, Projection};
use crate::keyspace::Keyspace;
use crate::registry::Model;
use crate::store::{ScriptCall, Store, scripts};
use crate::types::{DefaultSpec, Descriptor, ScanPage, is_zero_value};
use crate::update;

use super::client::Client;

/// Granularity of cancellation checks inside backoff sleeps.
const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// A shareable cancellation flag. Cloning hands out another handle to the
/// same flag.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel every operation observing this token.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// A per-request facade over the client. Construction is cheap; create one
/// per unit of work and drop it when done.
pub struct Session {
    client: Client,
    deadline: Option<Instant>,
    cancel: CancelToken,
}

/// A save prepared but not yet dispatched: the script invocation plus the
/// plaintext document to write back into the record on success.
struct PreparedSave {
    id: String,
    keys: Vec<String>,
    args: Vec<String>,
    doc: Map<String, Value>,
}

impl Session {
    pub(crate) fn new(client: Client, deadline: Option<Instant>, cancel: CancelToken) -> Self {
        Self {
            client,
            deadline,
            cancel,
        }
    }

    /// A handle that cancels this session's in-progress and future
    /// operations when triggered.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    pub(crate) fn store(&self) -> &dyn Store {
        self.client.inner().store.as_ref()
    }

    pub(crate) fn keyspace(&self) -> &Keyspace {
        &self.client.inner().keyspace
    }

    fn kek(&self) -> &Kek {
        &self.client.inner().kek
    }

    pub(crate) fn descriptor<T: Model>(&self) -> Arc<Descriptor> {
        self.client.inner().registry.descriptor::<T>()
    }

    /// Fail if the session is cancelled or past its deadline. Called before
    /// every store interaction.
    pub(crate) fn check_live(&self) -> std::result::Result<(), StoreError> {
        if self.cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(StoreError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Sleep for `dur`, waking early on cancellation or deadline expiry.
    pub(crate) fn sleep_cancellable(&self, dur: Duration) -> std::result::Result<(), StoreError> {
        let until = Instant::now() + dur;
        loop {
            self.check_live()?;
            let now = Instant::now();
            if now >= until {
                return Ok(());
            }
            std::thread::sleep(SLEEP_SLICE.min(until - now));
        }
    }

    // -----------------------------------------------------------------------
    // Record operations
    // -----------------------------------------------------------------------

    /// Atomically save a record, minting a primary key if absent. Returns
    /// the record's id.
    ///
    /// The version counter is untouched: it reflects only compare-and-swap
    /// commits (see [`save_with_cas`](Self::save_with_cas)). Uses the
    /// descriptor's auto-delete TTL when one is configured.
    pub fn save<T: Model>(&self, record: &mut T) -> Result<String> {
        self.save_inner(record, None, false)
    }

    /// [`save`](Self::save) with an explicit expiry on the record value.
    pub fn save_with_ttl<T: Model>(&self, record: &mut T, ttl: Duration) -> Result<String> {
        self.save_inner(record, Some(ttl), false)
    }

    /// Save conditioned on the record's current version field value: the
    /// write succeeds only if the stored counter still equals it, and bumps
    /// both the counter and the record's field by one. Fails fast with
    /// [`Error::VersionConflict`]; the record is left unchanged on failure.
    pub fn save_with_cas<T: Model>(&self, record: &mut T) -> Result<String> {
        self.save_inner(record, None, true)
    }

    /// [`save_with_cas`](Self::save_with_cas) with an explicit expiry.
    pub fn save_with_cas_and_ttl<T: Model>(
        &self,
        record: &mut T,
        ttl: Duration,
    ) -> Result<String> {
        self.save_inner(record, Some(ttl), true)
    }

    /// Load a record by primary key. Secret fields are decrypted
    /// best-effort: a field whose ciphertext cannot be decrypted (missing
    /// data key, rotated master key) keeps its stored string so the
    /// remaining fields stay available.
    pub fn load<T: Model>(&self, id: &str) -> Result<T> {
        let desc = self.descriptor::<T>();
        let doc = self.load_document(&desc, id)?;
        serde_json::from_value(Value::Object(doc)).map_err(|e| MalformedError::from(e).into())
    }

    /// Atomically delete a record: primary value, owned unique slots, index
    /// and enc-index memberships, and the version counter.
    ///
    /// The record's data key (`dek`) is intentionally left in place; a
    /// record later recreated under the same id reuses it. Deleting a
    /// missing id is not an error.
    pub fn delete<T: Model>(&self, id: &str) -> Result<()> {
        let desc = self.descriptor::<T>();
        require_id(id)?;
        let model = desc.qualified_name();
        let ks = self.keyspace();
        let val_key = ks.val(&model, id);
        let ver_key = ks.ver(&model, id);

        let prior = self.prior_projection(&desc, &val_key, id)?;
        let del_uniq = extract::all_keys(&prior.unique, |f, v| ks.uniq(&model, f, v));
        let rem_idx = extract::all_keys(&prior.indexed, |f, v| ks.idx(&model, f, v));
        let rem_enc = extract::all_keys(&prior.enc_indexed, |f, v| ks.idx_enc(&model, f, v));

        let mut keys = Vec::with_capacity(2 + del_uniq.len() + rem_idx.len() + rem_enc.len());
        keys.push(ver_key);
        keys.push(val_key);
        keys.extend(del_uniq.iter().cloned());
        keys.extend(rem_idx.iter().cloned());
        keys.extend(rem_enc.iter().cloned());
        let args = vec![
            id.to_string(),
            String::new(),
            "1".to_string(),
            del_uniq.len().to_string(),
            rem_idx.len().to_string(),
            rem_enc.len().to_string(),
        ];

        self.check_live()?;
        self.store()
            .eval(&scripts::DELETE, &keys, &args)
            .map_err(map_script_err)?;
        Ok(())
    }

    /// Load, apply a patch by field name, and save. Safe for indexed,
    /// unique, and enc-indexed fields: the save recomputes every index
    /// differential. Returns the updated record.
    pub fn update_fields<T: Model>(&self, id: &str, patch: &Map<String, Value>) -> Result<T> {
        let desc = self.descriptor::<T>();
        let mut doc = self.load_document(&desc, id)?;
        update::apply_patch(&desc, &mut doc, patch)?;
        let mut record: T = serde_json::from_value(Value::Object(doc))
            .map_err(|e| ContractError::PatchIncompatible(e.to_string()))?;
        self.save(&mut record)?;
        Ok(record)
    }

    /// Merge-patch the stored document in place without index maintenance.
    ///
    /// Much cheaper than [`update_fields`](Self::update_fields), but the
    /// patch must not name indexed, unique, or enc-indexed fields: the store
    /// does not enforce this, and index consistency is forfeit if it is
    /// violated. Secret fields in the patch are encrypted before dispatch.
    pub fn fast_patch_fields<T: Model>(&self, id: &str, patch: &Map<String, Value>) -> Result<()> {
        let desc = self.descriptor::<T>();
        require_id(id)?;
        let model = desc.qualified_name();

        let mut normalized = Map::with_capacity(patch.len());
        let mut dek: Option<Vec<u8>> = None;
        for (key, value) in patch {
            let Some(field) = desc.field_by_patch_name(key) else {
                normalized.insert(key.clone(), value.clone());
                continue;
            };
            if field.secret {
                let Value::String(plain) = value else {
                    return Err(ContractError::SecretNotString {
                        field: field.name.clone(),
                    }
                    .into());
                };
                if plain.is_empty() {
                    normalized.insert(field.serialized.clone(), value.clone());
                    continue;
                }
                if dek.is_none() {
                    dek = self.object_dek(&model, id, true)?;
                }
                let dek = dek.as_deref().ok_or(MalformedError::DekMissing)?;
                let ct = envelope::seal(dek, plain.as_bytes())?;
                normalized.insert(field.serialized.clone(), Value::String(ct));
            } else {
                normalized.insert(field.serialized.clone(), value.clone());
            }
        }

        let patch_json = serde_json::to_string(&normalized).map_err(MalformedError::from)?;
        self.check_live()?;
        self.store()
            .eval(
                &scripts::FAST_PATCH,
                &[self.keyspace().val(&model, id)],
                &[patch_json],
            )
            .map_err(map_script_err)?;
        Ok(())
    }

    /// Whether a record exists at the given id.
    pub fn exists<T: Model>(&self, id: &str) -> Result<bool> {
        let desc = self.descriptor::<T>();
        require_id(id)?;
        self.check_live()?;
        let key = self.keyspace().val(&desc.qualified_name(), id);
        Ok(self.store().exists(&key)?)
    }

    /// Page through the primary keys of records whose indexed `field`
    /// currently holds `value`. Pass the returned cursor to continue; 0
    /// means the scan is complete.
    pub fn page_ids_by_index<T: Model>(
        &self,
        field: &str,
        value: &str,
        cursor: u64,
        count: u64,
    ) -> Result<ScanPage> {
        let desc = self.descriptor::<T>();
        self.check_live()?;
        let key = self.keyspace().idx(&desc.qualified_name(), field, value);
        Ok(self.store().sscan(&key, cursor, count)?)
    }

    /// Equality lookup over an enc-indexed field: the plaintext is tagged
    /// locally and never leaves the process.
    pub fn page_ids_by_enc_index<T: Model>(
        &self,
        field: &str,
        plaintext: &str,
        cursor: u64,
        count: u64,
    ) -> Result<ScanPage> {
        let desc = self.descriptor::<T>();
        self.check_live()?;
        let mac = self.kek().equality_tag(plaintext);
        let key = self
            .keyspace()
            .idx_enc(&desc.qualified_name(), field, &mac);
        Ok(self.store().sscan(&key, cursor, count)?)
    }

    /// Extend the expiry of a record value. `ttl` must be positive; a
    /// missing record reports [`Error::NotFound`].
    pub fn touch<T: Model>(&self, id: &str, ttl: Duration) -> Result<()> {
        let desc = self.descriptor::<T>();
        let key = self.keyspace().val(&desc.qualified_name(), id);
        self.touch_key(id, &key, ttl)
    }

    // -----------------------------------------------------------------------
    // Payloads
    // -----------------------------------------------------------------------

    /// Attach an opaque JSON payload to a record, optionally encrypted under
    /// the payload's own data key. The payload value and (on first
    /// encryption) its wrapped data key are written in one atomic script.
    pub fn save_payload<T: Model>(
        &self,
        id: &str,
        payload: &impl Serialize,
        encrypt: bool,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let desc = self.descriptor::<T>();
        require_id(id)?;
        let model = desc.qualified_name();
        let ks = self.keyspace();
        let bytes = serde_json::to_vec(payload).map_err(MalformedError::from)?;

        let (value, wrapped_arg) = if encrypt {
            let dek_key = ks.payload_dek(&model, id);
            self.check_live()?;
            match self.store().get(&dek_key)? {
                Some(wrapped) => {
                    let dek = self.kek().unwrap_dek(&wrapped)?;
                    (envelope::seal(&dek, &bytes)?, String::new())
                }
                None => {
                    let dek = Kek::generate_dek();
                    let wrapped = self.kek().wrap_dek(&dek)?;
                    (envelope::seal(&dek, &bytes)?, wrapped)
                }
            }
        } else {
            (
                String::from_utf8(bytes).map_err(MalformedError::from)?,
                String::new(),
            )
        };

        let ttl_ms = ttl.map_or(0, |t| t.as_millis() as u64);
        self.check_live()?;
        self.store()
            .eval(
                &scripts::PAYLOAD_SAVE,
                &[ks.payload(&model, id), ks.payload_dek(&model, id)],
                &[value, ttl_ms.to_string(), wrapped_arg],
            )
            .map_err(map_script_err)?;
        Ok(())
    }

    /// Fetch a record's payload. With `decrypt`, an enveloped value is
    /// decrypted under the payload data key; a plaintext payload is returned
    /// as stored.
    pub fn get_payload<T: Model>(&self, id: &str, decrypt: bool) -> Result<Vec<u8>> {
        let desc = self.descriptor::<T>();
        require_id(id)?;
        let model = desc.qualified_name();
        let ks = self.keyspace();
        self.check_live()?;
        let value = self
            .store()
            .get(&ks.payload(&model, id))?
            .ok_or(Error::NotFound)?;
        if decrypt && envelope::is_envelope(&value) {
            self.check_live()?;
            let wrapped = self
                .store()
                .get(&ks.payload_dek(&model, id))?
                .ok_or(MalformedError::DekMissing)?;
            let dek = self.kek().unwrap_dek(&wrapped)?;
            return Ok(envelope::open(&dek, &value)?);
        }
        Ok(value.into_bytes())
    }

    /// Extend the expiry of a record's payload.
    pub fn touch_payload<T: Model>(&self, id: &str, ttl: Duration) -> Result<()> {
        let desc = self.descriptor::<T>();
        let key = self.keyspace().payload(&desc.qualified_name(), id);
        self.touch_key(id, &key, ttl)
    }

    // -----------------------------------------------------------------------
    // Batch
    // -----------------------------------------------------------------------

    /// Save several records in one pipelined flush. Each record's save is
    /// atomic; the batch as a whole is not. Returns ids in input order; the
    /// first failure is reported with its input position via
    /// [`Error::BatchItem`], and no record is written back in that case.
    pub fn save_all<T: Model>(&self, records: &mut [T]) -> Result<Vec<String>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let mut prepared = Vec::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            let p = self
                .prepare_save(record, None, false)
                .map_err(|e| Error::BatchItem {
                    index,
                    source: Box::new(e),
                })?;
            prepared.push(p);
        }

        let calls: Vec<ScriptCall<'_>> = prepared
            .iter_mut()
            .map(|p| ScriptCall {
                script: &scripts::SAVE,
                keys: std::mem::take(&mut p.keys),
                args: std::mem::take(&mut p.args),
            })
            .collect();

        self.check_live()?;
        let results = self.store().eval_pipelined(&calls)?;
        for (index, result) in results.into_iter().enumerate() {
            if let Err(e) = result {
                return Err(Error::BatchItem {
                    index,
                    source: Box::new(map_script_err(e)),
                });
            }
        }

        let mut ids = Vec::with_capacity(prepared.len());
        for (record, p) in records.iter_mut().zip(prepared) {
            *record =
                serde_json::from_value(Value::Object(p.doc)).map_err(MalformedError::from)?;
            ids.push(p.id);
        }
        Ok(ids)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn touch_key(&self, id: &str, key: &str, ttl: Duration) -> Result<()> {
        require_id(id)?;
        if ttl.is_zero() {
            return Err(ContractError::NonPositiveTtl.into());
        }
        self.check_live()?;
        if !self.store().exists(key)? {
            return Err(Error::NotFound);
        }
        self.check_live()?;
        self.store().expire(key, ttl)?;
        Ok(())
    }

    fn save_inner<T: Model>(
        &self,
        record: &mut T,
        ttl: Option<Duration>,
        cas: bool,
    ) -> Result<String> {
        let prepared = self.prepare_save(record, ttl, cas)?;
        self.check_live()?;
        match self
            .store()
            .eval(&scripts::SAVE, &prepared.keys, &prepared.args)
        {
            Ok(_) => {
                *record = serde_json::from_value(Value::Object(prepared.doc))
                    .map_err(MalformedError::from)?;
                Ok(prepared.id)
            }
            Err(e) => Err(map_script_err(e)),
        }
    }

    fn prepare_save<T: Model>(
        &self,
        record: &T,
        ttl: Option<Duration>,
        cas: bool,
    ) -> Result<PreparedSave> {
        let desc = self.descriptor::<T>();
        let model = desc.qualified_name();
        let ks = self.keyspace();

        let value = serde_json::to_value(record).map_err(MalformedError::from)?;
        let Value::Object(mut doc) = value else {
            return Err(MalformedError::NotAnObject.into());
        };

        apply_defaults(&desc, &mut doc);
        let id = ensure_primary_key(&desc, &mut doc)?;
        touch_timestamps(&desc, &mut doc);

        let expected = if cas {
            let field = desc
                .version_field()
                .ok_or_else(|| ContractError::NoVersionField {
                    model: desc.name().to_string(),
                })?
                .to_string();
            let serialized = desc.serialized_name(&field).to_string();
            let expected = match doc.get(&serialized) {
                None | Some(Value::Null) => 0,
                Some(Value::Number(n)) => {
                    n.as_i64().ok_or(ContractError::VersionNotInteger {
                        field: field.clone(),
                    })?
                }
                Some(_) => {
                    return Err(ContractError::VersionNotInteger { field }.into());
                }
            };
            doc.insert(serialized, Value::from(expected + 1));
            expected.to_string()
        } else {
            String::new()
        };

        let new = extract::project(&desc, &doc, self.kek());
        let val_key = ks.val(&model, &id);
        let prev = self.prior_projection(&desc, &val_key, &id)?;

        let enc_doc = self.encrypt_document(&desc, &model, &id, &doc)?;
        let enc_json = serde_json::to_string(&enc_doc).map_err(MalformedError::from)?;

        let (add_uniq, del_uniq) =
            extract::diff_keys(&new.unique, &prev.unique, |f, v| ks.uniq(&model, f, v));
        let (add_idx, rem_idx) =
            extract::diff_keys(&new.indexed, &prev.indexed, |f, v| ks.idx(&model, f, v));
        let (add_enc, rem_enc) = extract::diff_keys(&new.enc_indexed, &prev.enc_indexed, |f, v| {
            ks.idx_enc(&model, f, v)
        });

        let ttl_ms = ttl
            .or_else(|| desc.auto_delete_ttl())
            .map_or(0, |t| t.as_millis() as u64);

        let mut keys = Vec::with_capacity(
            2 + add_uniq.len()
                + del_uniq.len()
                + add_idx.len()
                + rem_idx.len()
                + add_enc.len()
                + rem_enc.len(),
        );
        keys.push(ks.ver(&model, &id));
        keys.push(val_key);
        let counts = [
            add_uniq.len(),
            del_uniq.len(),
            add_idx.len(),
            rem_idx.len(),
            add_enc.len(),
            rem_enc.len(),
        ];
        for list in [add_uniq, del_uniq, add_idx, rem_idx, add_enc, rem_enc] {
            keys.extend(list);
        }

        let mut args = vec![id.clone(), enc_json, ttl_ms.to_string(), expected];
        args.extend(counts.iter().map(usize::to_string));

        debug!(
            model = %model,
            id = %id,
            cas,
            add_uniq = counts[0],
            add_idx = counts[2],
            add_enc = counts[4],
            "prepared save script"
        );

        Ok(PreparedSave {
            id,
            keys,
            args,
            doc,
        })
    }

    /// Best-effort projection of the previously stored document. A missing
    /// record, undecodable document, or undecryptable field yields the empty
    /// (or partial) projection rather than failing the save.
    fn prior_projection(
        &self,
        desc: &Descriptor,
        val_key: &str,
        id: &str,
    ) -> Result<Projection> {
        self.check_live()?;
        let Some(enc_json) = self.store().get(val_key)? else {
            return Ok(Projection::default());
        };
        match self.decrypt_document(desc, id, &enc_json) {
            Ok(doc) => Ok(extract::project(desc, &doc, self.kek())),
            Err(e) => {
                warn!(key = %val_key, error = %e, "prior document undecodable, treating as absent");
                Ok(Projection::default())
            }
        }
    }

    /// Clone the plaintext document, replacing secret field values with
    /// envelope ciphertext under the record's data key. The key is created
    /// on first demand.
    fn encrypt_document(
        &self,
        desc: &Descriptor,
        model: &str,
        id: &str,
        doc: &Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        let mut out = doc.clone();
        let mut dek: Option<Vec<u8>> = None;
        for field in desc.secret_fields() {
            let Some(value) = out.get(&field.serialized) else {
                continue;
            };
            match value {
                Value::Null => continue,
                Value::String(plain) if plain.is_empty() => continue,
                Value::String(plain) => {
                    if dek.is_none() {
                        dek = self.object_dek(model, id, true)?;
                    }
                    let key = dek.as_deref().ok_or(MalformedError::DekMissing)?;
                    let ct = envelope::seal(key, plain.as_bytes())?;
                    out.insert(field.serialized.clone(), Value::String(ct));
                }
                _ => {
                    return Err(ContractError::SecretNotString {
                        field: field.name.clone(),
                    }
                    .into());
                }
            }
        }
        Ok(out)
    }

    /// Parse a stored document and decrypt its secret fields best-effort: a
    /// missing data key or failing field keeps the stored string in place.
    fn decrypt_document(
        &self,
        desc: &Descriptor,
        id: &str,
        enc_json: &str,
    ) -> Result<Map<String, Value>> {
        let mut doc: Map<String, Value> =
            serde_json::from_str(enc_json).map_err(MalformedError::from)?;
        if !desc.has_secret_fields() {
            return Ok(doc);
        }
        let model = desc.qualified_name();
        let mut dek: Option<Vec<u8>> = None;
        let mut dek_fetched = false;
        for field in desc.secret_fields() {
            let Some(Value::String(stored)) = doc.get(&field.serialized) else {
                continue;
            };
            if !envelope::is_envelope(stored) {
                continue;
            }
            if !dek_fetched {
                dek = self.object_dek(&model, id, false)?;
                dek_fetched = true;
            }
            let Some(dek) = dek.as_deref() else {
                warn!(model = %model, id = %id, field = %field.name, "data key missing, leaving field encrypted");
                continue;
            };
            match envelope::open(dek, stored).and_then(|b| Ok(String::from_utf8(b)?)) {
                Ok(plain) => {
                    doc.insert(field.serialized.clone(), Value::String(plain));
                }
                Err(e) => {
                    warn!(model = %model, id = %id, field = %field.name, error = %e, "field undecryptable, leaving as stored");
                }
            }
        }
        Ok(doc)
    }

    fn load_document(&self, desc: &Descriptor, id: &str) -> Result<Map<String, Value>> {
        require_id(id)?;
        let key = self.keyspace().val(&desc.qualified_name(), id);
        self.check_live()?;
        let enc_json = self.store().get(&key)?.ok_or(Error::NotFound)?;
        self.decrypt_document(desc, id, &enc_json)
    }

    /// Fetch (and with `create`, lazily establish) the record's data key.
    /// Creation races resolve through SETNX: the loser re-reads the winner's
    /// key.
    fn object_dek(&self, model: &str, id: &str, create: bool) -> Result<Option<Vec<u8>>> {
        let key = self.keyspace().dek(model, id);
        self.check_live()?;
        if let Some(wrapped) = self.store().get(&key)? {
            return Ok(Some(self.kek().unwrap_dek(&wrapped)?));
        }
        if !create {
            return Ok(None);
        }
        let dek = Kek::generate_dek();
        let wrapped = self.kek().wrap_dek(&dek)?;
        self.check_live()?;
        if self.store().set_nx(&key, &wrapped, None)? {
            return Ok(Some(dek));
        }
        let wrapped = self
            .store()
            .get(&key)?
            .ok_or(MalformedError::DekMissing)?;
        Ok(Some(self.kek().unwrap_dek(&wrapped)?))
    }
}

pub(crate) fn require_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(ContractError::EmptyId.into());
    }
    Ok(())
}

/// Map script error replies to their typed errors; everything else surfaces
/// as an underlying store error.
pub(crate) fn map_script_err(e: StoreError) -> Error {
    match e {
        StoreError::Reply(ref reply) => match reply.as_str() {
            "VERSION_CONFLICT" => Error::VersionConflict,
            "UNIQUE_CONFLICT" => Error::UniqueConflict,
            "NOT_FOUND" => Error::NotFound,
            _ => Error::Store(e),
        },
        other => Error::Store(other),
    }
}

fn apply_defaults(desc: &Descriptor, doc: &mut Map<String, Value>) {
    let now = Utc::now();
    for field in desc.fields() {
        let Some(spec) = &field.default else { continue };
        let current = doc.get(&field.serialized);
        if current.is_some_and(|v| !is_zero_value(v)) {
            continue;
        }
        let value = match spec {
            DefaultSpec::Literal(v) => v.clone(),
            DefaultSpec::Uuid => Value::String(Uuid::new_v4().to_string()),
            DefaultSpec::NowRfc3339 => Value::String(now.to_rfc3339()),
            DefaultSpec::UnixSeconds => Value::from(now.timestamp()),
            DefaultSpec::UnixMillis => Value::from(now.timestamp_millis()),
        };
        doc.insert(field.serialized.clone(), value);
    }
}

fn ensure_primary_key(desc: &Descriptor, doc: &mut Map<String, Value>) -> Result<String> {
    let serialized = desc.pk_serialized().to_string();
    match doc.get(&serialized) {
        None | Some(Value::Null) => {}
        Some(Value::String(s)) if s.is_empty() => {}
        Some(Value::String(s)) => return Ok(s.clone()),
        Some(Value::Number(n)) => return Ok(n.to_string()),
        Some(_) => {
            return Err(ContractError::PrimaryKeyNotString {
                field: desc.primary_key().to_string(),
            }
            .into());
        }
    }
    let id = Uuid::new_v4().to_string();
    doc.insert(serialized, Value::String(id.clone()));
    Ok(id)
}

/// Set auto-create timestamps when zero-valued and auto-update timestamps
/// unconditionally, all in UTC (RFC 3339).
fn touch_timestamps(desc: &Descriptor, doc: &mut Map<String, Value>) {
    let now = Value::String(Utc::now().to_rfc3339());
    for field in desc.fields() {
        if field.auto_update_time {
            doc.insert(field.serialized.clone(), now.clone());
        } else if field.auto_create_time {
            let current = doc.get(&field.serialized);
            if current.is_none() || current.is_some_and(is_zero_value) {
                doc.insert(field.serialized.clone(), now.clone());
            }
        }
    }
}
