//! Background autosave
//!
//! Saves the open project when changes are pending, either on a fixed interval
//! or once edits have been quiet for the debounce period.
//!
//! - `mark_changed()` after mutating the working set
//! - `save_now()` saves immediately and returns the error to the caller
//! - background failures are logged and retried on the next trigger

use crate::config::AutoSaveSettings;
use crate::error::{GradebookError, Result};
use crate::manager::ProjectManager;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

/// Handle to the autosave task
pub struct AutoSaver {
    manager: Arc<Mutex<ProjectManager>>,
    changes_tx: mpsc::UnboundedSender<()>,
    shutdown_tx: broadcast::Sender<()>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl AutoSaver {
    /// Spawn the autosave task; when disabled only `save_now` does anything
    pub fn spawn(manager: Arc<Mutex<ProjectManager>>, settings: &AutoSaveSettings) -> Self {
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let task_handle = settings.enabled.then(|| {
            let manager = manager.clone();
            let settings = settings.clone();
            tokio::spawn(run_autosave_loop(manager, settings, changes_rx, shutdown_rx))
        });

        Self {
            manager,
            changes_tx,
            shutdown_tx,
            task_handle,
        }
    }

    /// Record that the working set changed
    pub fn mark_changed(&self) {
        let _ = self.changes_tx.send(());
    }

    /// Save the open project now; `false` if no project is open
    pub async fn save_now(&self) -> Result<bool> {
        let mut manager = self.manager.lock().await;
        Ok(manager.save_current_project().await?.is_some())
    }

    /// Stop the background task without a final save
    pub async fn stop(&mut self) -> Result<()> {
        let _ = self.shutdown_tx.send(());

        if let Some(handle) = self.task_handle.take() {
            handle.await.map_err(|e| {
                GradebookError::Other(format!("Failed to stop autosave task: {}", e))
            })?;
            info!("Autosave stopped");
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.task_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

async fn run_autosave_loop(
    manager: Arc<Mutex<ProjectManager>>,
    settings: AutoSaveSettings,
    mut changes_rx: mpsc::UnboundedReceiver<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut timer = interval(settings.interval());
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    timer.tick().await;

    debug!(
        "Autosave running every {:?}, debounce {:?}",
        settings.interval(),
        settings.debounce()
    );

    let mut pending = false;
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = timer.tick() => {
                if pending {
                    pending = !save_open_project(&manager).await;
                    deadline = None;
                }
            }

            Some(()) = changes_rx.recv() => {
                pending = true;
                deadline = Some(Instant::now() + settings.debounce());
            }

            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                pending = !save_open_project(&manager).await;
                deadline = None;
            }

            _ = shutdown_rx.recv() => {
                debug!("Autosave received shutdown signal");
                break;
            }
        }
    }
}

/// Returns whether the save succeeded
async fn save_open_project(manager: &Mutex<ProjectManager>) -> bool {
    let mut manager = manager.lock().await;
    match manager.save_current_project().await {
        Ok(Some(project)) => {
            debug!("Autosaved {}", project.name);
            true
        }
        Ok(None) => true,
        Err(e) => {
            error!("Autosave failed: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::NewProject;
    use crate::storage::memory::InMemoryStore;
    use crate::working_set::WorkingSet;
    use std::time::Duration;

    async fn open_manager(store: Arc<InMemoryStore>) -> Arc<Mutex<ProjectManager>> {
        let mut manager = ProjectManager::new(store.clone(), store, WorkingSet::new().shared());
        let id = manager
            .create_project(NewProject {
                name: Some("Quiz".to_string()),
                students: vec!["Alice".to_string()],
                tasks: vec![crate::types::Task::new("t1", 10.0)],
                ..NewProject::default()
            })
            .id
            .clone();
        manager.open_project(&id).await.unwrap();
        Arc::new(Mutex::new(manager))
    }

    fn fast_settings() -> AutoSaveSettings {
        AutoSaveSettings {
            enabled: true,
            interval_secs: 3600,
            debounce_ms: 20,
        }
    }

    #[tokio::test]
    async fn test_debounced_change_is_saved() {
        let store = Arc::new(InMemoryStore::new());
        let manager = open_manager(store.clone()).await;
        let mut saver = AutoSaver::spawn(manager.clone(), &fast_settings());
        assert!(saver.is_running());

        let working = manager.lock().await.working_set();
        assert!(working.write().await.set_score(0, 0, 7.0));
        saver.mark_changed();

        tokio::time::sleep(Duration::from_millis(300)).await;
        let records = store.records();
        assert_eq!(records[0]["results"]["0"]["t1"], 7.0);

        saver.stop().await.unwrap();
        assert!(!saver.is_running());
    }

    #[tokio::test]
    async fn test_disabled_saver_only_saves_on_demand() {
        let store = Arc::new(InMemoryStore::new());
        let manager = open_manager(store.clone()).await;
        let settings = AutoSaveSettings {
            enabled: false,
            ..fast_settings()
        };
        let mut saver = AutoSaver::spawn(manager, &settings);
        assert!(!saver.is_running());

        let saves = store.save_count();
        saver.mark_changed();
        assert!(saver.save_now().await.unwrap());
        assert_eq!(store.save_count(), saves + 1);
        saver.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_save_now_propagates_errors() {
        let store = Arc::new(InMemoryStore::new());
        let manager = open_manager(store.clone()).await;
        let saver = AutoSaver::spawn(manager, &fast_settings());

        store.set_fail_saves(true);
        assert!(saver.save_now().await.is_err());
    }
}
