//! In-memory storage backend
//!
//! Keeps the same contract as the file store without touching disk. Loads and
//! saves can be made to fail on demand, which is how callers exercise the
//! manager's error paths.

use super::{
    parse_import, ExportArtifact, ExportBundle, ImportBundle, LastActiveSlot, ProjectStore,
    StoredProjects,
};
use crate::error::{GradebookError, Result};
use crate::project::Project;
use crate::types::ProjectId;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct Inner {
    projects: Vec<Value>,
    recent: Vec<ProjectId>,
    last_active: Option<ProjectId>,
    files: HashMap<PathBuf, String>,
    exports: Vec<ExportBundle>,
}

/// Project store held entirely in memory
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
    fail_loads: AtomicBool,
    fail_saves: AtomicBool,
    save_count: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with raw records (migrated like a real load would be)
    pub fn with_records(records: Vec<Value>, recent: Vec<ProjectId>) -> Self {
        let store = Self::default();
        if let Ok(mut inner) = store.inner.lock() {
            inner.projects = records;
            inner.recent = recent;
        }
        store
    }

    /// Make subsequent loads fail
    pub fn set_fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent saves fail
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves so far
    pub fn save_count(&self) -> usize {
        self.save_count.load(Ordering::SeqCst)
    }

    /// Records as last saved
    pub fn records(&self) -> Vec<Value> {
        self.lock().map(|inner| inner.projects.clone()).unwrap_or_default()
    }

    /// Recent list as last saved
    pub fn recent(&self) -> Vec<ProjectId> {
        self.lock().map(|inner| inner.recent.clone()).unwrap_or_default()
    }

    /// Register text served by `import_from_file` for `path`
    pub fn add_file(&self, path: impl Into<PathBuf>, content: impl Into<String>) {
        if let Ok(mut inner) = self.lock() {
            inner.files.insert(path.into(), content.into());
        }
    }

    /// Bundles produced by `export_projects`
    pub fn exports(&self) -> Vec<ExportBundle> {
        self.lock().map(|inner| inner.exports.clone()).unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| GradebookError::Storage("in-memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl ProjectStore for InMemoryStore {
    async fn load_projects(&self) -> Result<StoredProjects> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(GradebookError::Storage("load failed".to_string()));
        }
        let inner = self.lock()?;
        Ok(StoredProjects {
            projects: super::migration::migrate_records(inner.projects.clone()),
            recent_projects: inner.recent.clone(),
        })
    }

    async fn save_projects(&self, projects: &[Project], recent: &[ProjectId]) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(GradebookError::Storage("save failed".to_string()));
        }
        let records = projects
            .iter()
            .map(Project::to_record)
            .collect::<serde_json::Result<Vec<_>>>()?;
        let mut inner = self.lock()?;
        inner.projects = records;
        inner.recent = recent.to_vec();
        self.save_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn export_projects(&self, projects: &[Project]) -> Result<ExportArtifact> {
        let bundle = ExportBundle::new(projects)?;
        self.lock()?.exports.push(bundle.clone());
        Ok(ExportArtifact {
            location: None,
            bundle,
        })
    }

    async fn import_from_file(&self, path: &Path) -> Result<ImportBundle> {
        let content = self
            .lock()?
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| GradebookError::InvalidImport(format!("No such file: {:?}", path)))?;
        parse_import(&content)
    }
}

#[async_trait]
impl LastActiveSlot for InMemoryStore {
    async fn get(&self) -> Result<Option<ProjectId>> {
        Ok(self.lock()?.last_active.clone())
    }

    async fn set(&self, id: &ProjectId) -> Result<()> {
        self.lock()?.last_active = Some(id.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.lock()?.last_active = None;
        Ok(())
    }
}
