//! Gradebook - project persistence and reconciliation core
//!
//! Keeps a collection of grading projects (a class, a set of tasks, students
//! and their scores), persists it, and mediates between the sparse on-disk
//! result layout and the dense grid an editor works on.
//!
//! # Architecture
//!
//! - **Types / Project**: the project record, lenient normalization, statistics
//! - **Working set**: expand stored results into a dense grid and compress back
//! - **Manager**: collection ownership, open-project lifecycle, import/export
//! - **Events**: per-channel listeners plus a broadcast stream
//! - **Storage**: `ProjectStore` contract with JSON file and in-memory backends
//! - **Autosave**: interval and debounce saving of the open project
//!
//! # Example
//!
//! ```ignore
//! use gradebook_core::{JsonFileStore, ProjectManager, WorkingSet};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> gradebook_core::Result<()> {
//!     let store = Arc::new(JsonFileStore::open("/tmp/gradebook").await?);
//!     let mut manager = ProjectManager::new(store.clone(), store, WorkingSet::new().shared());
//!     manager.init().await?;
//!
//!     let working = manager.working_set();
//!     working.write().await.set_score(0, 0, 8.0);
//!     manager.save_current_project().await?;
//!     Ok(())
//! }
//! ```

pub mod autosave;
pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod project;
pub mod storage;
pub mod types;
pub mod working_set;

// Re-export commonly used types
pub use autosave::AutoSaver;
pub use config::GradebookConfig;
pub use error::{GradebookError, Result};
pub use events::{EventBus, EventChannel, ListenerId, ProjectEvent};
pub use manager::{AlwaysConfirm, DeleteConfirmation, ProjectFilter, ProjectManager};
pub use project::{NewProject, Project};
pub use storage::{
    json_file::JsonFileStore, memory::InMemoryStore, LastActiveSlot, ProjectStore,
};
pub use types::{GradeRange, ProjectId, ProjectSettings, ProjectStats, ProjectStatus, Task};
pub use working_set::{SharedWorkingSet, WorkingSet};
