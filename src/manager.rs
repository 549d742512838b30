//! Project manager
//!
//! Owns the project collection and mediates between stored projects and the
//! shared [`WorkingSet`]. At most one project is open at a time; its data lives
//! in the working set while open and is compressed back onto the project on
//! save and on switch.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized --init()--> Initialized (a project may have been resumed)
//! No project open --open_project(id)--> id open
//! X open --open_project(Y)--> save X, then Y open
//! X open --delete_project(X)--> last remaining project open, or none
//! ```
//!
//! Manager operations are awaited one at a time by a single driver; mutating
//! methods take `&mut self`. Share the manager between tasks with
//! `Arc<tokio::sync::Mutex<ProjectManager>>`.

use crate::config::ManagerSettings;
use crate::error::{GradebookError, Result};
use crate::events::{EventBus, EventChannel, ListenerId, ProjectEvent};
use crate::project::{NewProject, Project};
use crate::storage::{ExportArtifact, LastActiveSlot, ProjectStore};
use crate::types::{ProjectId, ProjectStatus};
use crate::working_set::{expand, SharedWorkingSet};
use async_trait::async_trait;
use chrono::Utc;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Maximum distance between `createdAt` values of import duplicates
const DUPLICATE_WINDOW_MS: i64 = 1000;

const MS_PER_DAY: f64 = 86_400_000.0;

/// Asks the user whether a project may be deleted
#[async_trait]
pub trait DeleteConfirmation: Send + Sync {
    async fn confirm_delete(&self, project: &Project) -> bool;
}

/// Confirmation that always agrees
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysConfirm;

#[async_trait]
impl DeleteConfirmation for AlwaysConfirm {
    async fn confirm_delete(&self, _project: &Project) -> bool {
        true
    }
}

/// Exact-match filters for [`ProjectManager::filter_projects`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectFilter {
    /// Case-insensitive substring of name or subject
    pub search: Option<String>,
    pub subject: Option<String>,
    pub status: Option<ProjectStatus>,
    pub kind: Option<String>,
}

/// Owner of the project collection and the open-project lifecycle
pub struct ProjectManager {
    store: Arc<dyn ProjectStore>,
    last_active: Arc<dyn LastActiveSlot>,
    confirmation: Arc<dyn DeleteConfirmation>,
    working: SharedWorkingSet,
    events: EventBus,
    settings: ManagerSettings,

    projects: Vec<Project>,
    recent_projects: Vec<ProjectId>,
    current_project_id: Option<ProjectId>,
    is_initialized: bool,
}

impl ProjectManager {
    /// Create a manager over a store, a last-active slot and a working set
    pub fn new(
        store: Arc<dyn ProjectStore>,
        last_active: Arc<dyn LastActiveSlot>,
        working: SharedWorkingSet,
    ) -> Self {
        Self {
            store,
            last_active,
            confirmation: Arc::new(AlwaysConfirm),
            working,
            events: EventBus::default(),
            settings: ManagerSettings::default(),
            projects: Vec::new(),
            recent_projects: Vec::new(),
            current_project_id: None,
            is_initialized: false,
        }
    }

    /// Use manager policy from configuration
    pub fn with_settings(mut self, settings: ManagerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Use a custom delete confirmation
    pub fn with_confirmation(mut self, confirmation: Arc<dyn DeleteConfirmation>) -> Self {
        self.confirmation = confirmation;
        self
    }

    // === Accessors ===

    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    pub fn project(&self, id: &ProjectId) -> Option<&Project> {
        self.projects.iter().find(|p| &p.id == id)
    }

    fn project_mut(&mut self, id: &ProjectId) -> Option<&mut Project> {
        self.projects.iter_mut().find(|p| &p.id == id)
    }

    pub fn current_project(&self) -> Option<&Project> {
        self.current_project_id.as_ref().and_then(|id| self.project(id))
    }

    pub fn current_project_id(&self) -> Option<&ProjectId> {
        self.current_project_id.as_ref()
    }

    pub fn recent_projects(&self) -> &[ProjectId] {
        &self.recent_projects
    }

    pub fn is_initialized(&self) -> bool {
        self.is_initialized
    }

    /// Handle to the working set the open project is expanded into
    pub fn working_set(&self) -> SharedWorkingSet {
        self.working.clone()
    }

    // === Events ===

    /// Register a listener on a channel
    pub fn on<F>(&mut self, channel: EventChannel, listener: F) -> ListenerId
    where
        F: Fn(&ProjectEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.events.on(channel, listener)
    }

    /// Unregister a listener
    pub fn off(&mut self, channel: EventChannel, id: ListenerId) -> bool {
        self.events.off(channel, id)
    }

    /// Subscribe to all events as an async stream
    pub fn subscribe(&self) -> broadcast::Receiver<ProjectEvent> {
        self.events.subscribe()
    }

    fn trigger_event(&self, event: ProjectEvent) {
        self.events.trigger(event);
    }

    // === Initialization ===

    /// Load the collection and resume a project; later calls are no-ops
    ///
    /// Load failures propagate. Failures while resuming are logged and leave
    /// no project open.
    pub async fn init(&mut self) -> Result<()> {
        if self.is_initialized {
            return Ok(());
        }

        info!("Initializing project manager");
        self.load_projects().await?;
        self.load_last_active_project().await;

        self.is_initialized = true;
        self.trigger_event(ProjectEvent::ProjectsLoaded {
            count: self.projects.len(),
        });
        info!("Project manager initialized with {} projects", self.projects.len());
        Ok(())
    }

    async fn load_projects(&mut self) -> Result<()> {
        let stored = self.store.load_projects().await?;
        self.projects = stored.projects.into_iter().map(Project::from_record).collect();
        self.recent_projects = stored.recent_projects;
        self.recent_projects.truncate(self.settings.recent_limit);
        Ok(())
    }

    /// Resume policy, evaluated once by `init`
    ///
    /// Returns the id of the project that ended up open, if any.
    pub async fn load_last_active_project(&mut self) -> Option<ProjectId> {
        match self.resume_project().await {
            Ok(resumed) => resumed,
            Err(e) => {
                warn!("Failed to resume last project: {}", e);
                None
            }
        }
    }

    async fn resume_project(&mut self) -> Result<Option<ProjectId>> {
        if let Some(last_id) = self.last_active.get().await? {
            if let Some(project) = self.project(&last_id) {
                let touched = project.last_opened.unwrap_or(project.updated_at);
                let days_since =
                    (Utc::now() - touched).num_milliseconds() as f64 / MS_PER_DAY;

                if days_since <= self.settings.resume_window_days {
                    info!("Resuming last project: {}", project.name);
                    self.open_project(&last_id).await?;
                    return Ok(Some(last_id));
                }
                debug!(
                    "Last project {} untouched for {:.1} days, not resuming",
                    last_id, days_since
                );
            }
        }

        if let Some(active_id) = self
            .projects
            .iter()
            .find(|p| p.is_active())
            .map(|p| p.id.clone())
        {
            self.open_project(&active_id).await?;
            return Ok(Some(active_id));
        }

        if self.projects.is_empty() {
            let name = self.settings.default_project_name.clone();
            let id = self.create_project(NewProject::named(name)).id.clone();
            self.open_project(&id).await?;
            return Ok(Some(id));
        }

        Ok(None)
    }

    // === Persistence ===

    /// Persist the whole collection and the recent list
    pub async fn save_projects(&self) -> Result<()> {
        self.store
            .save_projects(&self.projects, &self.recent_projects)
            .await?;
        self.trigger_event(ProjectEvent::ProjectsSaved {
            count: self.projects.len(),
        });
        Ok(())
    }

    // === Creation ===

    /// Create a project from partial options and add it to the collection
    ///
    /// The name defaults to `New project <n>` where `n` is the new count.
    pub fn create_project(&mut self, mut options: NewProject) -> &Project {
        if options.name.as_deref().map_or(true, str::is_empty) {
            options.name = Some(format!("New project {}", self.projects.len() + 1));
        }
        self.add_project(Project::new(options))
    }

    /// Insert a project, suffixing its name with ` (n)` until it is unique
    pub fn add_project(&mut self, mut project: Project) -> &Project {
        let base = project.name.clone();
        let mut name = base.clone();
        let mut counter = 1;
        while self
            .projects
            .iter()
            .any(|p| p.name == name && p.id != project.id)
        {
            name = format!("{} ({})", base, counter);
            counter += 1;
        }
        if name != base {
            debug!("Renamed project {:?} to {:?} to keep names unique", base, name);
        }
        project.name = name;

        self.trigger_event(ProjectEvent::ProjectAdded {
            project: project.clone(),
        });
        self.projects.push(project);
        &self.projects[self.projects.len() - 1]
    }

    // === Open / save ===

    /// Make `id` the open project
    ///
    /// The currently open project is saved first; if that save fails the switch
    /// is aborted and the old project stays open. Failures while expanding the
    /// target into the working set are logged and do not stop the switch.
    pub async fn open_project(&mut self, id: &ProjectId) -> Result<&Project> {
        if self.current_project_id.as_ref() == Some(id) {
            return self
                .project(id)
                .ok_or_else(|| GradebookError::ProjectNotFound(id.to_string()));
        }
        if self.project(id).is_none() {
            return Err(GradebookError::ProjectNotFound(id.to_string()));
        }

        if self.current_project_id.is_some() {
            self.save_current_project().await?;
        }

        self.load_project_data(id).await;

        let old_project_id = self.current_project_id.replace(id.clone());
        let project = self
            .project_mut(id)
            .ok_or_else(|| GradebookError::ProjectNotFound(id.to_string()))?;
        project.last_opened = Some(Utc::now());
        project.status = ProjectStatus::Active;
        project.compute_stats();
        let name = project.name.clone();

        self.add_to_recent(id);
        self.save_projects().await?;
        self.last_active.set(id).await?;

        self.trigger_event(ProjectEvent::ProjectSwitched {
            old_project_id,
            new_project_id: id.clone(),
        });
        info!("Opened project: {}", name);

        self.project(id)
            .ok_or_else(|| GradebookError::ProjectNotFound(id.to_string()))
    }

    /// Expand a project into the working set, containing any failure
    async fn load_project_data(&self, id: &ProjectId) {
        let Some(project) = self.project(id) else {
            return;
        };
        let mut working = self.working.write().await;
        match panic::catch_unwind(AssertUnwindSafe(|| expand(project, &mut working))) {
            Ok(summary) => {
                debug!(
                    "Loaded {}: {} students, {} tasks, {} scores ({} skipped)",
                    project.name,
                    working.students.len(),
                    working.tasks.len(),
                    summary.applied,
                    summary.skipped
                );
            }
            Err(_) => {
                error!("Failed to load data of project {}; working set is partial", project.name);
            }
        }
    }

    /// Write the working set back onto the open project and persist
    ///
    /// Returns `None` when no project is open. Failures propagate.
    pub async fn save_current_project(&mut self) -> Result<Option<&Project>> {
        let Some(id) = self.current_project_id.clone() else {
            return Ok(None);
        };
        let working = self.working.clone();
        let Some(project) = self.project_mut(&id) else {
            return Ok(None);
        };

        {
            let working = working.read().await;
            working.apply_to(project);
        }
        project.compute_stats();
        project.updated_at = Utc::now();
        debug!(
            "Prepared {} for saving: {} students, {} tasks, {} result rows",
            project.name,
            project.students.len(),
            project.tasks.len(),
            project.results.len()
        );

        self.save_projects().await?;

        let project = self
            .project(&id)
            .ok_or_else(|| GradebookError::ProjectNotFound(id.to_string()))?;
        self.trigger_event(ProjectEvent::ProjectUpdated {
            project: project.clone(),
        });
        Ok(Some(project))
    }

    // === Delete / duplicate ===

    /// Delete a project, optionally asking for confirmation first
    ///
    /// Returns `false` when the id does not resolve or deletion was declined.
    /// Deleting the open project opens the last remaining one, if any.
    pub async fn delete_project(&mut self, id: &ProjectId, confirm: bool) -> Result<bool> {
        let Some(project) = self.project(id) else {
            return Ok(false);
        };
        if confirm && !self.confirmation.confirm_delete(project).await {
            debug!("Deletion of {} declined", project.name);
            return Ok(false);
        }
        let name = project.name.clone();

        self.projects.retain(|p| &p.id != id);
        self.recent_projects.retain(|recent| recent != id);

        if self.current_project_id.as_ref() == Some(id) {
            self.current_project_id = None;
            self.last_active.clear().await?;

            if let Some(last_id) = self.projects.last().map(|p| p.id.clone()) {
                self.open_project(&last_id).await?;
            }
        }

        self.save_projects().await?;
        self.trigger_event(ProjectEvent::ProjectDeleted {
            project_id: id.clone(),
        });
        info!("Deleted project: {}", name);
        Ok(true)
    }

    /// Copy a project under a new id with ` (copy)` appended to its name
    pub async fn duplicate_project(&mut self, id: &ProjectId) -> Result<Option<&Project>> {
        let Some(original) = self.project(id) else {
            return Ok(None);
        };

        let mut record = original.to_record()?;
        if let Some(map) = record.as_object_mut() {
            let now = serde_json::to_value(Utc::now())?;
            map.remove("id");
            map.insert("lastOpened".to_string(), serde_json::Value::Null);
            map.insert("createdAt".to_string(), now.clone());
            map.insert("updatedAt".to_string(), now);
            map.insert(
                "name".to_string(),
                serde_json::Value::String(format!("{} (copy)", original.name)),
            );
        }

        let new_id = self.add_project(Project::from_record(record)).id.clone();
        self.save_projects().await?;

        let duplicate = self
            .project(&new_id)
            .ok_or_else(|| GradebookError::ProjectNotFound(new_id.to_string()))?;
        info!("Created copy: {}", duplicate.name);
        Ok(Some(duplicate))
    }

    // === Queries ===

    /// Case-insensitive substring search over name, subject, theme, class and tags
    pub fn search_projects(&self, query: &str) -> Vec<&Project> {
        if query.is_empty() {
            return self.projects.iter().collect();
        }
        let term = query.to_lowercase();
        self.projects
            .iter()
            .filter(|p| {
                p.name.to_lowercase().contains(&term)
                    || p.subject.to_lowercase().contains(&term)
                    || p.theme.to_lowercase().contains(&term)
                    || p.class.to_lowercase().contains(&term)
                    || p.tags.iter().any(|tag| tag.to_lowercase().contains(&term))
            })
            .collect()
    }

    /// Filter projects, most recently updated first
    pub fn filter_projects(&self, filter: &ProjectFilter) -> Vec<&Project> {
        let term = filter
            .search
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        let mut filtered: Vec<&Project> = self
            .projects
            .iter()
            .filter(|p| {
                term.as_ref().map_or(true, |term| {
                    p.name.to_lowercase().contains(term) || p.subject.to_lowercase().contains(term)
                })
            })
            .filter(|p| filter.subject.as_ref().map_or(true, |s| &p.subject == s))
            .filter(|p| filter.status.map_or(true, |s| p.status == s))
            .filter(|p| filter.kind.as_ref().map_or(true, |k| &p.kind == k))
            .collect();

        filtered.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        filtered
    }

    fn add_to_recent(&mut self, id: &ProjectId) {
        self.recent_projects.retain(|recent| recent != id);
        self.recent_projects.insert(0, id.clone());
        self.recent_projects.truncate(self.settings.recent_limit);
    }

    // === Import / export ===

    /// Export one project; `None` if the id does not resolve
    pub async fn export_project(&self, id: &ProjectId) -> Result<Option<ExportArtifact>> {
        let Some(project) = self.project(id) else {
            return Ok(None);
        };
        let artifact = self.store.export_projects(std::slice::from_ref(project)).await?;
        Ok(Some(artifact))
    }

    /// Export the whole collection
    pub async fn export_all_projects(&self) -> Result<ExportArtifact> {
        self.store.export_projects(&self.projects).await
    }

    /// Import projects from files, skipping near-duplicates
    ///
    /// A file that cannot be read is logged and skipped. A project matching an
    /// existing one by name, subject and class with `createdAt` less than a
    /// second apart is skipped. Returns the projects actually added.
    pub async fn import_projects(&mut self, files: &[PathBuf]) -> Result<Vec<Project>> {
        let mut imported = Vec::new();

        for file in files {
            let bundle = match self.store.import_from_file(file).await {
                Ok(bundle) => bundle,
                Err(e) => {
                    error!("Failed to import {:?}: {}", file, e);
                    continue;
                }
            };

            for record in bundle.projects {
                let mut project = Project::from_record(record);
                if self.is_near_duplicate(&project) {
                    debug!("Skipping duplicate import of {}", project.name);
                    continue;
                }
                if self.project(&project.id).is_some() {
                    project.id = ProjectId::generate();
                }
                imported.push(self.add_project(project).clone());
            }
        }

        if !imported.is_empty() {
            self.save_projects().await?;
            info!("Imported {} projects", imported.len());
        }
        Ok(imported)
    }

    fn is_near_duplicate(&self, candidate: &Project) -> bool {
        self.projects.iter().any(|p| {
            p.name == candidate.name
                && p.subject == candidate.subject
                && p.class == candidate.class
                && (p.created_at - candidate.created_at).num_milliseconds().abs()
                    < DUPLICATE_WINDOW_MS
        })
    }
}

impl std::fmt::Debug for ProjectManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectManager")
            .field("projects", &self.projects.len())
            .field("recent_projects", &self.recent_projects)
            .field("current_project_id", &self.current_project_id)
            .field("is_initialized", &self.is_initialized)
            .field("events", &self.events)
            .finish()
    }
}
