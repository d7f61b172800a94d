//! Captured row mutations and their wire form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Column name to scalar value.
pub type RowImage = Map<String, Value>;

/// Kind of row mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Insert,
    Update,
    Delete
}

/// One captured row mutation.
///
/// Created by the capture adapter and shared read-only afterwards. Absent
/// fields are omitted from the JSON wire form rather than sent as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Assigned at ingestion, never taken from the source database.
    pub id: String,
    /// Origin system tag, e.g. the capture technology name.
    #[serde(rename = "type")]
    pub source_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    pub operation: Operation,
    /// Capture time. Not monotonic relative to the source transaction log.
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<RowImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<RowImage>
}

impl ChangeEvent {
    /// Creates an event with a fresh id stamped at the current instant.
    pub fn new(source_type: impl Into<String>, operation: Operation) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_type: source_type.into(),
            database: None,
            table: None,
            operation,
            timestamp: Utc::now(),
            before: None,
            after: None
        }
    }

    #[must_use]
    pub fn with_origin(mut self, database: Option<String>, table: Option<String>) -> Self {
        self.database = database;
        self.table = table;
        self
    }

    #[must_use]
    pub fn with_images(mut self, before: Option<RowImage>, after: Option<RowImage>) -> Self {
        self.before = before;
        self.after = after;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    fn row(value: Value) -> RowImage {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_insert_wire_form_omits_absent_fields() {
        let event = ChangeEvent::new("mysql", Operation::Insert)
            .with_origin(Some("inventory".to_string()), Some("customers".to_string()))
            .with_images(None, Some(row(json!({"id": 1001, "email": "a@example.com"}))));

        let wire = serde_json::to_value(&event).unwrap();
        let object = wire.as_object().unwrap();

        assert_eq!(object["type"], "mysql");
        assert_eq!(object["database"], "inventory");
        assert_eq!(object["table"], "customers");
        assert_eq!(object["operation"], "INSERT");
        assert_eq!(object["after"]["id"], 1001);
        assert!(!object.contains_key("before"));
        assert!(!object.contains_key("source_type"));
    }

    #[test]
    fn test_delete_without_origin_omits_coordinates() {
        let event = ChangeEvent::new("mysql", Operation::Delete)
            .with_images(Some(row(json!({"id": 7}))), None);

        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("database"));
        assert!(!json.contains("table"));
        assert!(!json.contains("after"));
        assert!(!json.contains("null"));
        assert!(json.contains("\"operation\":\"DELETE\""));
    }

    #[test]
    fn test_timestamp_is_iso8601() {
        let mut event = ChangeEvent::new("mysql", Operation::Update);
        event.timestamp = DateTime::parse_from_rfc3339("2024-03-01T12:30:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let wire = serde_json::to_value(&event).unwrap();
        assert_eq!(wire["timestamp"], "2024-03-01T12:30:00Z");
    }

    #[test]
    fn test_ids_are_unique() {
        let a = ChangeEvent::new("mysql", Operation::Insert);
        let b = ChangeEvent::new("mysql", Operation::Insert);
        assert_ne!(a.id, b.id);
        assert!(Uuid::parse_str(&a.id).is_ok());
    }

    #[test]
    fn test_operation_names() {
        assert_eq!(Operation::Update.to_string(), "UPDATE");
        assert_eq!(Operation::from_str("DELETE").unwrap(), Operation::Delete);
        assert!(Operation::from_str("UPSERT").is_err());
    }
}
