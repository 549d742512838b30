//! Schema migration for stored project records
//!
//! Records without a version, or at version `1.0`, stored results as an array of
//! per-student objects. They are rewritten to the keyed 2.0 layout on load;
//! results already in the keyed layout are kept as they are.

use crate::project::SCHEMA_VERSION;
use serde_json::{Map, Value};
use tracing::info;

/// Migrate every record that predates the current schema
pub fn migrate_records(records: Vec<Value>) -> Vec<Value> {
    records.into_iter().map(migrate_record).collect()
}

/// Migrate one record; current records pass through untouched
pub fn migrate_record(mut record: Value) -> Value {
    let Some(map) = record.as_object_mut() else {
        return record;
    };
    if !needs_migration(map) {
        return record;
    }

    let name = map
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("<unnamed>")
        .to_string();
    info!("Migrating project {} to schema {}", name, SCHEMA_VERSION);

    if let Some(Value::Array(rows)) = map.get_mut("results") {
        let rows = std::mem::take(rows);
        map.insert("results".to_string(), Value::Object(rekey_results(rows)));
    }

    map.insert("version".to_string(), Value::String(SCHEMA_VERSION.to_string()));
    // Missing stats are seeded from the project's shape at load
    for key in ["errors", "schoolData"] {
        if !map.get(key).is_some_and(|v| !v.is_null()) {
            map.insert(key.to_string(), Value::Object(Map::new()));
        }
    }
    record
}

fn needs_migration(map: &Map<String, Value>) -> bool {
    match map.get("version") {
        None | Some(Value::Null) => true,
        Some(Value::String(v)) => v.is_empty() || v == "1.0",
        Some(_) => false,
    }
}

/// Entries carrying a `studentId` are keyed by it, others by position
fn rekey_results(rows: Vec<Value>) -> Map<String, Value> {
    let mut keyed = Map::new();
    for (index, row) in rows.into_iter().enumerate() {
        let Value::Object(mut row) = row else {
            continue;
        };
        let key = match row.remove("studentId") {
            Some(Value::String(id)) if !id.is_empty() => id,
            Some(Value::Number(id)) => id.to_string(),
            Some(other) if !other.is_null() => {
                row.insert("studentId".to_string(), other);
                index.to_string()
            }
            _ => index.to_string(),
        };
        keyed.insert(key, Value::Object(row));
    }
    keyed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_v1_record_is_migrated() {
        let migrated = migrate_record(json!({
            "name": "Old quiz",
            "results": [{"studentId": 3, "t1": 2}, {"t1": 1}, null]
        }));
        assert_eq!(migrated["version"], SCHEMA_VERSION);
        assert_eq!(migrated["results"]["3"], json!({"t1": 2}));
        assert_eq!(migrated["results"]["1"], json!({"t1": 1}));
        assert_eq!(migrated["errors"], json!({}));
        assert_eq!(migrated["schoolData"], json!({}));
        assert!(migrated.get("stats").is_none());
    }

    #[test]
    fn test_unversioned_keyed_results_kept() {
        let migrated = migrate_record(json!({
            "name": "Quiz",
            "results": {"0": {"t1": 8}}
        }));
        assert_eq!(migrated["version"], SCHEMA_VERSION);
        assert_eq!(migrated["results"], json!({"0": {"t1": 8}}));
    }

    #[test]
    fn test_current_record_untouched() {
        let record = json!({"name": "New", "version": "2.0", "results": [{"t1": 1}]});
        assert_eq!(migrate_record(record.clone()), record);
    }

    #[test]
    fn test_existing_fields_kept() {
        let migrated = migrate_record(json!({
            "version": "1.0",
            "errors": {"0": "x"},
            "results": {"0": {"t1": 1}}
        }));
        assert_eq!(migrated["errors"], json!({"0": "x"}));
        assert_eq!(migrated["results"], json!({"0": {"t1": 1}}));
    }
}
