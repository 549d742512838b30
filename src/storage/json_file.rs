//! JSON file storage backend
//!
//! Layout under the store root:
//!
//! ```text
//! projects.json          array of project records
//! recent.json            array of project ids, most recent first
//! projects_meta.json     {lastSave, totalProjects, version}
//! last_active            id of the last open project (plain text)
//! exports/               education_projects_<YYYY-MM-DD>.json bundles
//! ```
//!
//! Writes go to a sibling temp file that is renamed into place. Missing files
//! read as empty; unparseable files are errors.

use super::migration::migrate_records;
use super::{
    parse_import, ExportArtifact, ExportBundle, ImportBundle, LastActiveSlot, ProjectStore,
    StoredProjects,
};
use crate::error::{GradebookError, Result};
use crate::project::{Project, SCHEMA_VERSION};
use crate::types::ProjectId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

const PROJECTS_FILE: &str = "projects.json";
const RECENT_FILE: &str = "recent.json";
const META_FILE: &str = "projects_meta.json";
const LAST_ACTIVE_FILE: &str = "last_active";
const EXPORTS_DIR: &str = "exports";

/// Metadata written next to the project list on every save
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreMetadata {
    pub last_save: DateTime<Utc>,
    pub total_projects: usize,
    pub version: String,
}

/// Disk usage summary of a store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub files: usize,
    pub total_bytes: u64,
    pub total_projects: usize,
}

/// File-backed project store
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    /// Open (creating if needed) a store rooted at `root`
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(|e| {
            GradebookError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to create store directory {:?}: {}", root, e),
            ))
        })?;
        debug!("Opened project store at {:?}", root);
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.root.join(EXPORTS_DIR)
    }

    /// Metadata from the last save, if any
    pub async fn metadata(&self) -> Result<Option<StoreMetadata>> {
        self.read_json(META_FILE).await
    }

    /// File count and size of the store root (exports excluded)
    pub async fn storage_stats(&self) -> Result<StorageStats> {
        let mut stats = StorageStats::default();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if metadata.is_file() {
                stats.files += 1;
                stats.total_bytes += metadata.len();
            }
        }
        stats.total_projects = self
            .read_json::<Vec<serde_json::Value>>(PROJECTS_FILE)
            .await?
            .map_or(0, |projects| projects.len());
        Ok(stats)
    }

    async fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.root.join(name);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(GradebookError::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to read {:?}: {}", path, e),
                )))
            }
        };
        let value = serde_json::from_str(&content).map_err(|e| {
            GradebookError::Storage(format!("Failed to parse {:?}: {}", path, e))
        })?;
        Ok(Some(value))
    }

    async fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<()> {
        let content = serde_json::to_string_pretty(value)?;
        write_atomic(&self.root.join(name), content.as_bytes()).await
    }
}

/// Write to `<path>.tmp` then rename over `path`
async fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, content).await.map_err(|e| {
        GradebookError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to write {:?}: {}", tmp, e),
        ))
    })?;
    fs::rename(&tmp, path).await.map_err(|e| {
        GradebookError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to replace {:?}: {}", path, e),
        ))
    })?;
    Ok(())
}

#[async_trait]
impl ProjectStore for JsonFileStore {
    async fn load_projects(&self) -> Result<StoredProjects> {
        let projects: Vec<serde_json::Value> =
            self.read_json(PROJECTS_FILE).await?.unwrap_or_default();
        let recent_projects: Vec<ProjectId> =
            self.read_json(RECENT_FILE).await?.unwrap_or_default();

        debug!("Loaded {} project records from {:?}", projects.len(), self.root);
        Ok(StoredProjects {
            projects: migrate_records(projects),
            recent_projects,
        })
    }

    async fn save_projects(&self, projects: &[Project], recent: &[ProjectId]) -> Result<()> {
        self.write_json(PROJECTS_FILE, projects).await?;
        self.write_json(RECENT_FILE, recent).await?;
        self.write_json(
            META_FILE,
            &StoreMetadata {
                last_save: Utc::now(),
                total_projects: projects.len(),
                version: SCHEMA_VERSION.to_string(),
            },
        )
        .await?;
        debug!("Saved {} projects to {:?}", projects.len(), self.root);
        Ok(())
    }

    async fn export_projects(&self, projects: &[Project]) -> Result<ExportArtifact> {
        let bundle = ExportBundle::new(projects)?;
        let dir = self.exports_dir();
        fs::create_dir_all(&dir).await?;

        let path = dir.join(format!(
            "education_projects_{}.json",
            bundle.export_info.exported_at.format("%Y-%m-%d")
        ));
        let content = serde_json::to_string_pretty(&bundle)?;
        write_atomic(&path, content.as_bytes()).await?;

        info!("Exported {} projects to {:?}", projects.len(), path);
        Ok(ExportArtifact {
            location: Some(path),
            bundle,
        })
    }

    async fn import_from_file(&self, path: &Path) -> Result<ImportBundle> {
        let content = fs::read_to_string(path).await.map_err(|e| {
            GradebookError::InvalidImport(format!("Failed to read {:?}: {}", path, e))
        })?;
        let mut bundle = parse_import(&content)?;
        bundle.projects = migrate_records(bundle.projects);
        Ok(bundle)
    }
}

#[async_trait]
impl LastActiveSlot for JsonFileStore {
    async fn get(&self) -> Result<Option<ProjectId>> {
        match fs::read_to_string(self.root.join(LAST_ACTIVE_FILE)).await {
            Ok(content) => {
                let id = content.trim();
                Ok((!id.is_empty()).then(|| ProjectId::from(id)))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, id: &ProjectId) -> Result<()> {
        write_atomic(&self.root.join(LAST_ACTIVE_FILE), id.as_str().as_bytes()).await
    }

    async fn clear(&self) -> Result<()> {
        match fs::remove_file(self.root.join(LAST_ACTIVE_FILE)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::NewProject;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_empty_store_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        let stored = store.load_projects().await.unwrap();
        assert!(stored.projects.is_empty());
        assert!(stored.recent_projects.is_empty());
        assert!(store.metadata().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path().join("nested")).await.unwrap();
        let project = Project::new(NewProject::named("Quiz"));
        let recent = vec![project.id.clone()];

        store.save_projects(&[project.clone()], &recent).await.unwrap();
        let stored = store.load_projects().await.unwrap();
        assert_eq!(stored.recent_projects, recent);
        assert_eq!(Project::from_record(stored.projects[0].clone()), project);

        let meta = store.metadata().await.unwrap().unwrap();
        assert_eq!(meta.total_projects, 1);
        assert_eq!(meta.version, SCHEMA_VERSION);

        let stats = store.storage_stats().await.unwrap();
        assert_eq!(stats.files, 3);
        assert_eq!(stats.total_projects, 1);
        assert!(stats.total_bytes > 0);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(PROJECTS_FILE), "{ broken").unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        let err = store.load_projects().await.unwrap_err();
        assert!(matches!(err, GradebookError::Storage(_)));
    }

    #[tokio::test]
    async fn test_last_active_slot() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        assert_eq!(store.get().await.unwrap(), None);

        let id = ProjectId::from("project_1_abc");
        store.set(&id).await.unwrap();
        assert_eq!(store.get().await.unwrap(), Some(id));

        store.clear().await.unwrap();
        store.clear().await.unwrap();
        assert_eq!(store.get().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_export_then_import() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        let projects = vec![
            Project::new(NewProject::named("A")),
            Project::new(NewProject::named("B")),
        ];

        let artifact = store.export_projects(&projects).await.unwrap();
        let path = artifact.location.unwrap();
        assert!(path.starts_with(store.exports_dir()));

        let imported = store.import_from_file(&path).await.unwrap();
        assert_eq!(imported.projects.len(), 2);
        assert_eq!(imported.projects[1]["name"], "B");
    }

    #[tokio::test]
    async fn test_import_missing_file() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        let err = store
            .import_from_file(&dir.path().join("nope.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, GradebookError::InvalidImport(_)));
    }
}
