//! Decoding helpers for admin payloads.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::{EntityKind, Identifier, ModelError};

/// Rendering of a field whose value is disputed between partitions.
pub const CONFLICT_MARKER: &str = "VALUE_IN_CONFLICT";

/// A JSON object as served for a single entity.
pub type WireObject = Map<String, Value>;

pub fn is_conflict_marker(value: &Value) -> bool {
    value.as_str() == Some(CONFLICT_MARKER)
}

/// Looks up a required field; conflict-marked values come back as `None`.
pub(crate) fn settled<'a>(
    payload: &'a WireObject,
    kind: EntityKind,
    field: &str,
) -> Result<Option<&'a Value>, ModelError> {
    let value = payload.get(field).ok_or_else(|| ModelError::MissingField {
        kind,
        field: field.to_string(),
    })?;
    Ok((!is_conflict_marker(value)).then_some(value))
}

/// Looks up an opaque field that may be absent.
pub(crate) fn opaque(payload: &WireObject, field: &str) -> Value {
    payload
        .get(field)
        .filter(|value| !is_conflict_marker(value))
        .cloned()
        .unwrap_or(Value::Null)
}

fn invalid(field: &str, reason: impl Into<String>) -> ModelError {
    ModelError::InvalidField {
        field: field.to_string(),
        reason: reason.into(),
    }
}

pub(crate) fn decode_string(field: &str, value: &Value) -> Result<String, ModelError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| invalid(field, format!("expected a string, got {value}")))
}

pub(crate) fn decode_port(field: &str, value: &Value) -> Result<u16, ModelError> {
    value
        .as_u64()
        .and_then(|n| u16::try_from(n).ok())
        .ok_or_else(|| invalid(field, format!("expected a port number, got {value}")))
}

pub(crate) fn decode_optional_id(field: &str, value: &Value) -> Result<Option<Identifier>, ModelError> {
    match value {
        Value::Null => Ok(None),
        Value::String(text) => Identifier::parse(text).map(Some),
        other => Err(invalid(field, format!("expected an identifier or null, got {other}"))),
    }
}

pub(crate) fn encode_optional_id(id: Option<Identifier>) -> Value {
    id.map_or(Value::Null, |id| Value::String(id.to_string()))
}

pub(crate) fn decode_affinities(field: &str, value: &Value) -> Result<BTreeMap<Identifier, u32>, ModelError> {
    let object = value
        .as_object()
        .ok_or_else(|| invalid(field, format!("expected an object, got {value}")))?;
    object
        .iter()
        .map(|(key, count)| -> Result<(Identifier, u32), ModelError> {
            let id = Identifier::parse(key)?;
            let count = count
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| invalid(field, format!("expected a replica count, got {count}")))?;
            Ok((id, count))
        })
        .collect()
}

pub(crate) fn encode_affinities(affinities: &BTreeMap<Identifier, u32>) -> Value {
    Value::Object(
        affinities
            .iter()
            .map(|(id, count)| (id.to_string(), Value::from(*count)))
            .collect(),
    )
}
