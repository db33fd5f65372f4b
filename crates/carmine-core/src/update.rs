//! Patch application for `update_fields`.
//!
//! Patches are JSON objects keyed by declared or serialized field name.
//! Scalars are coerced toward the type already present in the document
//! (floats truncate toward zero into integer slots); nested objects merge
//! recursively; incompatible variants are rejected as contract violations.

use serde_json::{Map, Number, Value};

use crate::error::ContractError;
use crate::types::Descriptor;

/// Apply a patch to a plaintext document in place.
///
/// Keys are resolved through the descriptor first (declared or serialized
/// name), then against the document's own keys, so every record field is
/// patchable even when only the categorized ones were declared. Keys that
/// match neither are ignored; null patch values leave the existing value
/// untouched.
pub fn apply_patch(
    desc: &Descriptor,
    doc: &mut Map<String, Value>,
    patch: &Map<String, Value>,
) -> Result<(), ContractError> {
    for (key, incoming) in patch {
        let target = match desc.field_by_patch_name(key) {
            Some(field) => field.serialized.clone(),
            None if doc.contains_key(key) => key.clone(),
            None => continue,
        };
        if incoming.is_null() {
            continue;
        }
        let merged = match doc.get(&target) {
            Some(existing) => coerce(key, existing, incoming)?,
            None => incoming.clone(),
        };
        doc.insert(target, merged);
    }
    Ok(())
}

/// Coerce an incoming patch value toward the shape of the existing one.
fn coerce(field: &str, existing: &Value, incoming: &Value) -> Result<Value, ContractError> {
    let mismatch = || ContractError::PatchTypeMismatch {
        field: field.to_string(),
    };
    match existing {
        Value::Null => Ok(incoming.clone()),
        Value::String(_) => match incoming {
            Value::String(_) => Ok(incoming.clone()),
            _ => Err(mismatch()),
        },
        Value::Bool(_) => match incoming {
            Value::Bool(_) => Ok(incoming.clone()),
            _ => Err(mismatch()),
        },
        Value::Number(cur) => match incoming {
            Value::Number(n) => Ok(Value::Number(coerce_number(cur, n).ok_or_else(mismatch)?)),
            _ => Err(mismatch()),
        },
        Value::Array(_) => match incoming {
            Value::Array(_) => Ok(incoming.clone()),
            _ => Err(mismatch()),
        },
        Value::Object(cur) => match incoming {
            Value::Object(inc) => {
                let mut merged = cur.clone();
                for (k, v) in inc {
                    if v.is_null() {
                        continue;
                    }
                    let next = match merged.get(k) {
                        Some(old) => coerce(field, old, v)?,
                        None => v.clone(),
                    };
                    merged.insert(k.clone(), next);
                }
                Ok(Value::Object(merged))
            }
            _ => Err(mismatch()),
        },
    }
}

/// Align an incoming number with the representation of the current one:
/// float slots widen, integer slots truncate floats toward zero.
fn coerce_number(cur: &Number, incoming: &Number) -> Option<Number> {
    if cur.is_f64() {
        return incoming.as_f64().and_then(Number::from_f64);
    }
    if let Some(i) = incoming.as_i64() {
        return Some(Number::from(i));
    }
    incoming.as_f64().map(|f| Number::from(f as i64))
}
