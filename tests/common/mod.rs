//! Common test utilities and helpers

#![allow(dead_code)]

use gradebook_core::{InMemoryStore, JsonFileStore, ProjectManager, WorkingSet};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Manager over a fresh in-memory store
pub fn memory_manager() -> (Arc<InMemoryStore>, ProjectManager) {
    let store = Arc::new(InMemoryStore::new());
    let manager = manager_over(store.clone());
    (store, manager)
}

/// Manager over an in-memory store seeded with raw records
pub fn seeded_manager(records: Vec<Value>) -> (Arc<InMemoryStore>, ProjectManager) {
    let store = Arc::new(InMemoryStore::with_records(records, Vec::new()));
    let manager = manager_over(store.clone());
    (store, manager)
}

pub fn manager_over(store: Arc<InMemoryStore>) -> ProjectManager {
    ProjectManager::new(store.clone(), store, WorkingSet::new().shared())
}

/// JSON file store in a temporary directory
pub async fn create_test_store() -> (TempDir, Arc<JsonFileStore>) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = JsonFileStore::open(dir.path().join("data"))
        .await
        .expect("Failed to open store");
    (dir, Arc::new(store))
}

/// Manager over a JSON file store
pub fn file_manager(store: Arc<JsonFileStore>) -> ProjectManager {
    ProjectManager::new(store.clone(), store, WorkingSet::new().shared())
}

/// Minimal current-schema project record
pub fn project_record(id: &str, name: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "version": "2.0",
        "createdAt": "2024-03-01T09:00:00Z",
        "updatedAt": "2024-03-01T09:00:00Z"
    })
}

/// Write an export file containing `projects`
pub fn write_export(dir: &Path, file_name: &str, projects: Vec<Value>) -> std::path::PathBuf {
    let path = dir.join(file_name);
    let content = json!({
        "projects": projects,
        "exportInfo": {
            "exportedAt": "2024-03-01T09:00:00Z",
            "version": "2.0",
            "system": "Education Analytics System"
        }
    });
    std::fs::write(&path, serde_json::to_string_pretty(&content).unwrap())
        .expect("Failed to write export file");
    path
}
