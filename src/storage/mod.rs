//! Storage layer for the gradebook project core
//!
//! Provides the persistence contract the manager depends on, plus a JSON file
//! backend and an in-memory backend.

pub mod json_file;
pub mod memory;
pub mod migration;

use crate::error::Result;
use crate::project::{Project, SCHEMA_VERSION};
use crate::types::ProjectId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// System name written into export bundles
pub const EXPORT_SYSTEM_NAME: &str = "Education Analytics System";

/// Project collection as read from a backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredProjects {
    /// Serialized project records, migrated to the current schema
    pub projects: Vec<Value>,
    pub recent_projects: Vec<ProjectId>,
}

/// Export file layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBundle {
    pub projects: Vec<Value>,
    pub export_info: ExportInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportInfo {
    pub exported_at: DateTime<Utc>,
    pub version: String,
    pub system: String,
}

impl ExportBundle {
    /// Wrap serialized projects with export metadata
    pub fn new(projects: &[Project]) -> Result<Self> {
        let projects = projects
            .iter()
            .map(Project::to_record)
            .collect::<serde_json::Result<Vec<_>>>()?;
        Ok(Self {
            projects,
            export_info: ExportInfo {
                exported_at: Utc::now(),
                version: SCHEMA_VERSION.to_string(),
                system: EXPORT_SYSTEM_NAME.to_string(),
            },
        })
    }
}

/// Result of an export: the bundle and where it was written, if anywhere
#[derive(Debug, Clone, PartialEq)]
pub struct ExportArtifact {
    pub location: Option<PathBuf>,
    pub bundle: ExportBundle,
}

/// Projects read from one import file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportBundle {
    pub projects: Vec<Value>,
}

/// Persistence backend for the project collection
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Load all projects and the recent list
    async fn load_projects(&self) -> Result<StoredProjects>;

    /// Persist all projects and the recent list
    async fn save_projects(&self, projects: &[Project], recent: &[ProjectId]) -> Result<()>;

    /// Hand projects off as an export bundle
    async fn export_projects(&self, projects: &[Project]) -> Result<ExportArtifact>;

    /// Read projects from an export file
    async fn import_from_file(&self, path: &Path) -> Result<ImportBundle>;
}

/// Single persistent slot remembering the last open project across sessions
#[async_trait]
pub trait LastActiveSlot: Send + Sync {
    async fn get(&self) -> Result<Option<ProjectId>>;

    async fn set(&self, id: &ProjectId) -> Result<()>;

    async fn clear(&self) -> Result<()>;
}

/// Parse an export file's text into an import bundle
///
/// The document must be an object with a `projects` array.
pub fn parse_import(content: &str) -> Result<ImportBundle> {
    let document: Value = serde_json::from_str(content)?;
    match document.get("projects") {
        Some(Value::Array(projects)) => Ok(ImportBundle {
            projects: projects.clone(),
        }),
        _ => Err(crate::error::GradebookError::InvalidImport(
            "expected an object with a `projects` array".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GradebookError;
    use crate::project::NewProject;

    #[test]
    fn test_export_bundle_layout() {
        let bundle = ExportBundle::new(&[Project::new(NewProject::named("Quiz"))]).unwrap();
        let value = serde_json::to_value(&bundle).unwrap();
        assert_eq!(value["projects"][0]["name"], "Quiz");
        assert_eq!(value["exportInfo"]["version"], SCHEMA_VERSION);
        assert_eq!(value["exportInfo"]["system"], EXPORT_SYSTEM_NAME);
    }

    #[test]
    fn test_parse_import() {
        let bundle = parse_import(r#"{"projects": [{"name": "A"}, {"name": "B"}]}"#).unwrap();
        assert_eq!(bundle.projects.len(), 2);

        let err = parse_import(r#"{"items": []}"#).unwrap_err();
        assert!(matches!(err, GradebookError::InvalidImport(_)));

        let err = parse_import("not json").unwrap_err();
        assert!(matches!(err, GradebookError::Serialization(_)));
    }
}
