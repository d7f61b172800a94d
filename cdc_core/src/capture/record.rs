//! Debezium change record conversion.
//!
//! Accepts both the enveloped form produced with schemas enabled
//! (`{"schema": ..., "payload": {...}}`) and the bare payload.

use crate::event::{ChangeEvent, Operation};
use errors::CaptureError;
use serde_json::Value;
use tracing::debug;

use super::RawRecord;

/// Converts one raw engine record into a [`ChangeEvent`].
///
/// Returns `Ok(None)` for records that carry no row mutation: tombstones
/// (absent value) and schema-change records (no `op`).
pub fn convert(raw: &RawRecord, source_type: &str) -> Result<Option<ChangeEvent>, CaptureError> {
    let Some(value) = raw.value.as_deref() else {
        debug!(key = ?raw.key, "Skipping tombstone record");
        return Ok(None);
    };

    let parsed: Value = serde_json::from_str(value)
        .map_err(|e| CaptureError::conversion(format!("invalid JSON: {e}")))?;

    let payload = unwrap_envelope(&parsed);
    if payload.is_null() {
        debug!(key = ?raw.key, "Skipping record with null payload");
        return Ok(None);
    }
    if !payload.is_object() {
        return Err(CaptureError::conversion("payload is not a JSON object"));
    }

    let Some(op) = payload.get("op").and_then(Value::as_str) else {
        debug!(key = ?raw.key, "Skipping record without operation");
        return Ok(None);
    };
    let operation = parse_operation(op)?;

    let source = payload.get("source");
    let coordinate = |field: &str| {
        source
            .and_then(|s| s.get(field))
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    let image = |field: &str| payload.get(field).and_then(Value::as_object).cloned();

    Ok(Some(
        ChangeEvent::new(source_type, operation)
            .with_origin(coordinate("db"), coordinate("table"))
            .with_images(image("before"), image("after"))
    ))
}

fn unwrap_envelope(parsed: &Value) -> &Value {
    match parsed.get("payload") {
        Some(payload) if parsed.get("op").is_none() => payload,
        _ => parsed
    }
}

fn parse_operation(op: &str) -> Result<Operation, CaptureError> {
    match op {
        "c" | "r" => Ok(Operation::Insert),
        "u" => Ok(Operation::Update),
        "d" => Ok(Operation::Delete),
        other => Err(CaptureError::conversion(format!(
            "unknown operation code '{other}'"
        )))
    }
}
