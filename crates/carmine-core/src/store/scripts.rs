//! Server-side scripts and their ABI.
//!
//! Each script executes as one atomic unit on the store. Error replies are
//! the literal strings `VERSION_CONFLICT`, `UNIQUE_CONFLICT`, `NOT_FOUND`.

/// A named server-side script. Driver backends EVAL the Lua source;
/// [`MemoryStore`](super::MemoryStore) dispatches on the name to a native
/// equivalent of the same algorithm.
#[derive(Debug)]
pub struct Script {
    name: &'static str,
    source: &'static str,
}

impl Script {
    pub const fn new(name: &'static str, source: &'static str) -> Self {
        Self { name, source }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn source(&self) -> &'static str {
        self.source
    }
}

/// Atomic save: version CAS, unique probes, primary write, index deltas.
///
/// KEYS: `[verKey, valKey, addUniq…, delUniq…, addIdx…, remIdx…, addIdxEnc…, remIdxEnc…]`
/// ARGV: `[id, encJSON, ttl_ms, expectedVersion_or_empty, nAddUniq, nDelUniq, nAddIdx, nRemIdx, nAddIdxEnc, nRemIdxEnc]`
pub static SAVE: Script = Script::new(
    "save",
    r#"
local idx = 1
local verKey = KEYS[idx]; idx = idx + 1
local valKey = KEYS[idx]; idx = idx + 1
local id = ARGV[1]
local enc = ARGV[2]
local ttl = tonumber(ARGV[3]) or 0
local expected = tostring(ARGV[4])
local nAddUniq = tonumber(ARGV[5]) or 0
local nDelUniq = tonumber(ARGV[6]) or 0
local nAddIdx = tonumber(ARGV[7]) or 0
local nRemIdx = tonumber(ARGV[8]) or 0
local nAddIdxEnc = tonumber(ARGV[9]) or 0
local nRemIdxEnc = tonumber(ARGV[10]) or 0
if expected ~= nil and expected ~= '' then
  local cur = tonumber(redis.call('GET', verKey) or '0')
  if cur ~= tonumber(expected) then return redis.error_reply('VERSION_CONFLICT') end
end
for i=0,nAddUniq-1 do
  local k = KEYS[idx + i]
  local v = redis.call('GET', k)
  if v and v ~= id then return redis.error_reply('UNIQUE_CONFLICT') end
end
idx = idx + nAddUniq
if ttl > 0 then
  redis.call('PSETEX', valKey, ttl, enc)
else
  redis.call('SET', valKey, enc)
end
for i=0,nAddUniq-1 do
  local k = KEYS[idx - nAddUniq + i]
  redis.call('SET', k, id)
end
for i=0,nDelUniq-1 do
  local k = KEYS[idx + i]
  if redis.call('GET', k) == id then redis.call('DEL', k) end
end
idx = idx + nDelUniq
for i=0,nAddIdx-1 do
  redis.call('SADD', KEYS[idx + i], id)
end
idx = idx + nAddIdx
for i=0,nRemIdx-1 do
  redis.call('SREM', KEYS[idx + i], id)
end
idx = idx + nRemIdx
for i=0,nAddIdxEnc-1 do
  redis.call('SADD', KEYS[idx + i], id)
end
idx = idx + nAddIdxEnc
for i=0,nRemIdxEnc-1 do
  redis.call('SREM', KEYS[idx + i], id)
end
if expected ~= nil and expected ~= '' then
  redis.call('SET', verKey, tonumber(expected) + 1)
end
return id
"#,
);

/// Atomic delete: optional version CAS, primary delete, owned-slot release,
/// index removal, optional version erase.
///
/// KEYS: `[verKey, valKey, delUniq…, remIdx…, remIdxEnc…]`
/// ARGV: `[id, expectedVersion_or_empty, removeVer(0/1), nDelUniq, nRemIdx, nRemIdxEnc]`
pub static DELETE: Script = Script::new(
    "delete",
    r#"
local idx = 1
local verKey = KEYS[idx]; idx = idx + 1
local valKey = KEYS[idx]; idx = idx + 1
local id = ARGV[1]
local expected = tostring(ARGV[2])
local rmver = tostring(ARGV[3])
local nDelUniq = tonumber(ARGV[4]) or 0
local nRemIdx = tonumber(ARGV[5]) or 0
local nRemIdxEnc = tonumber(ARGV[6]) or 0
if expected ~= nil and expected ~= '' then
  local cur = tonumber(redis.call('GET', verKey) or '0')
  if cur ~= tonumber(expected) then return redis.error_reply('VERSION_CONFLICT') end
end
redis.call('DEL', valKey)
for i=0,nDelUniq-1 do
  local k = KEYS[idx + i]
  if redis.call('GET', k) == id then redis.call('DEL', k) end
end
idx = idx + nDelUniq
for i=0,nRemIdx-1 do redis.call('SREM', KEYS[idx + i], id) end
idx = idx + nRemIdx
for i=0,nRemIdxEnc-1 do redis.call('SREM', KEYS[idx + i], id) end
if rmver == '1' then redis.call('DEL', verKey) end
return 1
"#,
);

/// In-place merge-patch of the stored JSON document. No index maintenance;
/// callers must keep indexed fields out of the patch.
///
/// KEYS: `[valKey]`
/// ARGV: `[patchJSON]`
pub static FAST_PATCH: Script = Script::new(
    "fast_patch",
    r#"
local valKey = KEYS[1]
local patchJson = ARGV[1]
if redis.call("EXISTS", valKey) == 0 then
  return redis.error_reply('NOT_FOUND')
end
local currentJson = redis.call("GET", valKey)
local currentData = cjson.decode(currentJson)
local patchData = cjson.decode(patchJson)
for k, v in pairs(patchData) do
  currentData[k] = v
end
redis.call("SET", valKey, cjson.encode(currentData))
return 1
"#,
);

/// Payload write, with the wrapped payload DEK written only when the DEK key
/// is still absent (an existing DEK is never clobbered, so previously
/// encrypted payloads stay readable).
///
/// KEYS: `[payloadKey, dekKey]`
/// ARGV: `[value, ttl_ms, wrappedDek_or_empty]`
pub static PAYLOAD_SAVE: Script = Script::new(
    "payload_save",
    r#"
local plKey = KEYS[1]
local dekKey = KEYS[2]
local val = ARGV[1]
local ttl = tonumber(ARGV[2]) or 0
local wrapped = ARGV[3]
if wrapped ~= '' and redis.call('EXISTS', dekKey) == 0 then
  redis.call('SET', dekKey, wrapped)
end
if ttl > 0 then
  redis.call('PSETEX', plKey, ttl, val)
else
  redis.call('SET', plKey, val)
end
return 1
"#,
);

/// Token-checked lock release: delete only when the stored token matches,
/// so a lock that expired and was reacquired is never released by the old
/// owner.
///
/// KEYS: `[lockKey]`
/// ARGV: `[token]`
pub static UNLOCK: Script = Script::new(
    "unlock",
    r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
  return redis.call("DEL", KEYS[1])
else
  return 0
end
"#,
);
