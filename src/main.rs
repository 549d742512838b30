//! Gradebook command-line front-end
//!
//! Drives the project manager against the JSON file store in the data
//! directory. Every command initializes the manager first, which resumes the
//! last open project the same way an editor session would.

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use gradebook_core::{
    error::{GradebookError, Result},
    DeleteConfirmation, GradebookConfig, JsonFileStore, NewProject, Project, ProjectFilter,
    ProjectId, ProjectManager, ProjectStatus, WorkingSet,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gradebook")]
#[command(about = "Grading project manager", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Data directory (overrides GRADEBOOK_DATA_DIR and the config file)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Config file path
    #[arg(long)]
    config: Option<PathBuf>,

    /// Set log level
    #[arg(short, long, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// List projects, most recently updated first
    List {
        /// Substring of name or subject
        #[arg(short, long)]
        search: Option<String>,

        #[arg(long)]
        subject: Option<String>,

        /// draft, active, completed or archived
        #[arg(long)]
        status: Option<String>,

        #[arg(short = 'y', long = "type")]
        kind: Option<String>,
    },

    /// Create a project
    Create {
        name: Option<String>,

        #[arg(long)]
        subject: Option<String>,

        #[arg(long)]
        class: Option<String>,

        #[arg(long)]
        theme: Option<String>,

        #[arg(short = 'y', long = "type")]
        kind: Option<String>,

        #[arg(short, long)]
        tag: Vec<String>,

        /// Open the project after creating it
        #[arg(long)]
        open: bool,
    },

    /// Open a project
    Open { id: String },

    /// Delete a project
    Delete {
        id: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Copy a project
    Duplicate { id: String },

    /// Search name, subject, theme, class and tags
    Search { query: String },

    /// Show statistics of a project (the open one by default)
    Stats { id: Option<String> },

    /// Export one project, or all of them
    Export { id: Option<String> },

    /// Import projects from export files
    Import {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

/// Asks on the terminal before deleting
struct PromptConfirmation;

#[async_trait]
impl DeleteConfirmation for PromptConfirmation {
    async fn confirm_delete(&self, project: &Project) -> bool {
        eprint!("Delete project \"{}\"? This cannot be undone. [y/N] ", project.name);
        let mut line = String::new();
        match BufReader::new(tokio::io::stdin()).read_line(&mut line).await {
            Ok(_) => matches!(line.trim().to_lowercase().as_str(), "y" | "yes"),
            Err(_) => false,
        }
    }
}

fn parse_status(status: Option<String>) -> Result<Option<ProjectStatus>> {
    status
        .map(|s| {
            ProjectStatus::parse(&s)
                .ok_or_else(|| GradebookError::InvalidOperation(format!("Unknown status: {}", s)))
        })
        .transpose()
}

fn print_project(project: &Project, current: Option<&ProjectId>) {
    let marker = if current == Some(&project.id) { "*" } else { " " };
    println!(
        "{} {}  {}  [{}]  {}  {}",
        marker,
        project.id,
        project.display_name(),
        project.status.as_str(),
        project.full_info(),
        project.last_modified()
    );
}

fn print_projects(projects: &[&Project], current: Option<&ProjectId>) {
    if projects.is_empty() {
        println!("No projects found");
        return;
    }
    for project in projects {
        print_project(project, current);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let filter = EnvFilter::new(format!(
        "gradebook={},gradebook_core={}",
        level.as_str().to_lowercase(),
        level.as_str().to_lowercase()
    ));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    debug!("Gradebook v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = cli.config.unwrap_or_else(GradebookConfig::default_path);
    let mut config = GradebookConfig::load(&config_path)?;
    if let Some(data_dir) = cli.data_dir {
        config.storage.data_dir = data_dir;
    }

    let store = Arc::new(JsonFileStore::open(&config.storage.data_dir).await?);
    let mut manager = ProjectManager::new(store.clone(), store, WorkingSet::new().shared())
        .with_settings(config.manager.clone())
        .with_confirmation(Arc::new(PromptConfirmation));
    manager.init().await?;

    match cli.command {
        Commands::List {
            search,
            subject,
            status,
            kind,
        } => {
            let filter = ProjectFilter {
                search,
                subject,
                status: parse_status(status)?,
                kind,
            };
            print_projects(&manager.filter_projects(&filter), manager.current_project_id());
        }
        Commands::Create {
            name,
            subject,
            class,
            theme,
            kind,
            tag,
            open,
        } => {
            let id = manager
                .create_project(NewProject {
                    name,
                    subject,
                    class,
                    theme,
                    kind,
                    tags: tag,
                    ..NewProject::default()
                })
                .id
                .clone();
            if open {
                manager.open_project(&id).await?;
            } else {
                manager.save_projects().await?;
            }
            if let Some(project) = manager.project(&id) {
                println!("Created {} ({})", project.display_name(), project.id);
            }
        }
        Commands::Open { id } => {
            let project = manager.open_project(&ProjectId::from(id)).await?;
            println!("Opened {}", project.display_name());
        }
        Commands::Delete { id, yes } => {
            let id = ProjectId::from(id);
            if manager.project(&id).is_none() {
                return Err(GradebookError::ProjectNotFound(id.to_string()));
            }
            if manager.delete_project(&id, !yes).await? {
                println!("Deleted {}", id);
            } else {
                println!("Cancelled");
            }
        }
        Commands::Duplicate { id } => {
            let id = ProjectId::from(id);
            match manager.duplicate_project(&id).await? {
                Some(copy) => println!("Created {} ({})", copy.display_name(), copy.id),
                None => return Err(GradebookError::ProjectNotFound(id.to_string())),
            }
        }
        Commands::Search { query } => {
            print_projects(&manager.search_projects(&query), manager.current_project_id());
        }
        Commands::Stats { id } => {
            let project = match id {
                Some(id) => {
                    let id = ProjectId::from(id);
                    manager
                        .project(&id)
                        .ok_or_else(|| GradebookError::ProjectNotFound(id.to_string()))?
                }
                None => manager.current_project().ok_or_else(|| {
                    GradebookError::InvalidOperation("No project is open".to_string())
                })?,
            };
            let stats = project.calculate_stats();
            println!("{}", project.display_name());
            println!("  {}", project.full_info());
            println!("  Students:    {}", stats.total_students);
            println!("  Tasks:       {}", stats.total_tasks);
            println!("  Average:     {:.1}%", stats.avg_grade);
            println!("  Completion:  {:.1}%", stats.completion_percent);
            for (grade, count) in stats.grades_distribution.iter().rev() {
                println!("  Grade {}:     {}", grade, count);
            }
        }
        Commands::Export { id } => {
            let artifact = match id {
                Some(id) => {
                    let id = ProjectId::from(id);
                    manager
                        .export_project(&id)
                        .await?
                        .ok_or_else(|| GradebookError::ProjectNotFound(id.to_string()))?
                }
                None => manager.export_all_projects().await?,
            };
            match artifact.location {
                Some(path) => println!(
                    "Exported {} projects to {}",
                    artifact.bundle.projects.len(),
                    path.display()
                ),
                None => println!("{}", serde_json::to_string_pretty(&artifact.bundle)?),
            }
        }
        Commands::Import { files } => {
            let imported = manager.import_projects(&files).await?;
            println!("Imported {} projects", imported.len());
            for project in &imported {
                print_project(project, None);
            }
        }
    }

    Ok(())
}
