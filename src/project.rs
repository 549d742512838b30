//! The `Project` entity
//!
//! A project is one gradebook: metadata, settings, task list, roster, sparse
//! results and a cached statistics snapshot. Fresh projects ([`Project::new`])
//! and persisted records ([`Project::from_record`]) share one normalization
//! path, and that path never fails: malformed fields degrade to defaults.

use crate::types::{
    default_criteria, parse_score, CriteriaTable, GradeRange, OpaqueMap, ProjectId,
    ProjectSettings, ProjectStats, ProjectStatus, SparseResults, Task,
};
use chrono::{DateTime, Local, TimeZone, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Name given to a project constructed without one
pub const DEFAULT_PROJECT_NAME: &str = "New project";

/// Icon given to a project constructed without one
pub const DEFAULT_ICON: &str = "📊";

/// Schema version written by this crate
pub const SCHEMA_VERSION: &str = "2.0";

/// Palette random colors are drawn from
pub const COLOR_PALETTE: [&str; 10] = [
    "#3498db", "#2ecc71", "#e74c3c", "#f39c12", "#9b59b6", "#1abc9c", "#34495e", "#e67e22",
    "#27ae60", "#2980b9",
];

/// One persisted gradebook record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "Value")]
pub struct Project {
    // === Identity ===
    pub id: ProjectId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,

    // === Descriptive metadata ===
    pub subject: String,
    pub class: String,
    pub theme: String,
    pub description: String,
    pub icon: String,
    pub color: String,
    pub tags: Vec<String>,
    pub status: ProjectStatus,

    // === Timestamps ===
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_opened: Option<DateTime<Utc>>,

    // === Work data ===
    pub settings: ProjectSettings,
    pub tasks: Vec<Task>,
    pub students: Vec<String>,
    pub results: SparseResults,
    pub errors: OpaqueMap,
    pub psychology_features: Vec<Value>,

    // === Metadata ===
    pub stats: ProjectStats,
    pub version: String,
    pub school_data: OpaqueMap,
}

/// Caller-supplied overrides for a fresh project
#[derive(Debug, Clone, Default)]
pub struct NewProject {
    pub name: Option<String>,
    pub kind: Option<String>,
    pub subject: Option<String>,
    pub class: Option<String>,
    pub theme: Option<String>,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub tags: Vec<String>,
    pub status: Option<ProjectStatus>,
    pub settings: Option<ProjectSettings>,
    pub tasks: Vec<Task>,
    pub students: Vec<String>,
}

impl NewProject {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Render the overrides as a partial record for normalization
    fn into_record(self) -> Value {
        let mut record = OpaqueMap::new();
        let strings = [
            ("name", self.name),
            ("type", self.kind),
            ("subject", self.subject),
            ("class", self.class),
            ("theme", self.theme),
            ("description", self.description),
            ("icon", self.icon),
            ("color", self.color),
        ];
        for (key, value) in strings {
            if let Some(value) = value {
                record.insert(key.to_string(), Value::String(value));
            }
        }
        if !self.tags.is_empty() {
            record.insert(
                "tags".to_string(),
                Value::Array(self.tags.into_iter().map(Value::String).collect()),
            );
        }
        if let Some(status) = self.status {
            record.insert("status".to_string(), Value::String(status.as_str().to_string()));
        }
        if let Some(settings) = self.settings.and_then(|s| serde_json::to_value(s).ok()) {
            record.insert("settings".to_string(), settings);
        }
        if !self.tasks.is_empty() {
            let tasks = self
                .tasks
                .into_iter()
                .filter_map(|t| serde_json::to_value(t).ok())
                .collect();
            record.insert("tasks".to_string(), Value::Array(tasks));
        }
        if !self.students.is_empty() {
            record.insert(
                "students".to_string(),
                Value::Array(self.students.into_iter().map(Value::String).collect()),
            );
        }
        Value::Object(record)
    }
}

impl Project {
    /// Create a fresh project from caller overrides
    pub fn new(options: NewProject) -> Self {
        Self::from_record(options.into_record())
    }

    /// Normalize a (possibly partial or malformed) record into a project
    ///
    /// A non-object record is treated as empty. Every field ends up populated.
    pub fn from_record(record: Value) -> Self {
        let mut map = match record {
            Value::Object(map) => map,
            _ => OpaqueMap::new(),
        };

        let id = take_non_empty(&mut map, "id")
            .map(ProjectId)
            .unwrap_or_else(ProjectId::generate);
        let created_at = map
            .remove("createdAt")
            .and_then(|v| parse_timestamp(&v))
            .unwrap_or_else(Utc::now);
        let updated_at = map
            .remove("updatedAt")
            .and_then(|v| parse_timestamp(&v))
            .unwrap_or(created_at);
        let last_opened = map.remove("lastOpened").and_then(|v| parse_timestamp(&v));

        let tasks: Vec<Task> = match map.remove("tasks") {
            Some(Value::Array(items)) => items.into_iter().map(Task::from_value).collect(),
            _ => Vec::new(),
        };
        let students: Vec<String> = match map.remove("students") {
            Some(Value::Array(items)) => items.into_iter().map(student_label).collect(),
            _ => Vec::new(),
        };

        let mut project = Self {
            id,
            name: take_non_empty(&mut map, "name")
                .unwrap_or_else(|| DEFAULT_PROJECT_NAME.to_string()),
            kind: take_non_empty(&mut map, "type").unwrap_or_else(|| "current".to_string()),
            subject: take_string(&mut map, "subject"),
            class: take_string(&mut map, "class"),
            theme: take_string(&mut map, "theme"),
            description: take_string(&mut map, "description"),
            icon: take_non_empty(&mut map, "icon").unwrap_or_else(|| DEFAULT_ICON.to_string()),
            color: take_non_empty(&mut map, "color").unwrap_or_else(random_color),
            tags: match map.remove("tags") {
                Some(Value::Array(items)) => items
                    .into_iter()
                    .filter_map(|t| match t {
                        Value::String(s) => Some(s),
                        _ => None,
                    })
                    .collect(),
                _ => Vec::new(),
            },
            status: match map.remove("status") {
                Some(Value::String(s)) => ProjectStatus::parse(&s).unwrap_or_default(),
                _ => ProjectStatus::Draft,
            },
            created_at,
            updated_at,
            last_opened,
            settings: normalize_settings(map.remove("settings").unwrap_or(Value::Null)),
            tasks,
            students,
            results: normalize_results(map.remove("results").unwrap_or(Value::Null)),
            errors: take_object(&mut map, "errors"),
            psychology_features: match map.remove("psychologyFeatures") {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            },
            stats: ProjectStats::default(),
            version: take_non_empty(&mut map, "version")
                .unwrap_or_else(|| SCHEMA_VERSION.to_string()),
            school_data: take_object(&mut map, "schoolData"),
        };

        project.stats = match map.remove("stats") {
            Some(stats @ Value::Object(_)) => {
                serde_json::from_value(stats).unwrap_or_else(|_| project.initial_stats())
            }
            _ => project.initial_stats(),
        };
        project
    }

    /// Serialize to a plain record for the persistence layer
    pub fn to_record(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    /// Empty statistics for the current shape of the project
    fn initial_stats(&self) -> ProjectStats {
        let grades_distribution = self
            .settings
            .criteria
            .keys()
            .map(|grade| (grade.clone(), 0))
            .collect();
        ProjectStats {
            total_students: self.students.len(),
            total_tasks: self.tasks.len(),
            avg_grade: 0.0,
            completion_percent: 0.0,
            grades_distribution,
        }
    }

    /// Calculate statistics from the current state without storing them
    pub fn calculate_stats(&self) -> ProjectStats {
        let mut stats = self.initial_stats();
        if self.tasks.is_empty() {
            return stats;
        }

        let mut total_score = 0.0;
        let mut graded_count = 0usize;

        for student_results in self.results.values() {
            if student_results.is_empty() {
                continue;
            }

            let mut student_total = 0.0;
            let mut max_possible = 0.0;
            for (index, task) in self.tasks.iter().enumerate() {
                student_total += student_results.get(&task.key(index)).copied().unwrap_or(0.0);
                max_possible += task.effective_max_score();
            }

            if max_possible > 0.0 {
                let percent = student_total / max_possible * 100.0;
                total_score += percent;
                graded_count += 1;

                if let Some(grade) = self.grade_for(percent) {
                    *stats.grades_distribution.entry(grade).or_insert(0) += 1;
                }
            }
        }

        if graded_count > 0 {
            stats.avg_grade = total_score / graded_count as f64;
            // Share of attainable points, which is the average percentage again
            stats.completion_percent = stats.avg_grade;
        }
        stats
    }

    /// Recompute and store the statistics snapshot
    pub fn compute_stats(&mut self) -> &ProjectStats {
        self.stats = self.calculate_stats();
        &self.stats
    }

    /// Grade for a percentage, or `None` when it falls outside every range
    pub fn grade_for(&self, percent: f64) -> Option<String> {
        grade_for(&self.settings.criteria, percent)
    }

    /// `"<icon> <name>"`
    pub fn display_name(&self) -> String {
        format!("{} {}", self.icon, self.name)
    }

    /// `"<subject> | <class> | <theme>"` with placeholders for blanks
    pub fn full_info(&self) -> String {
        fn or_placeholder<'a>(value: &'a str, placeholder: &'a str) -> &'a str {
            if value.is_empty() {
                placeholder
            } else {
                value
            }
        }
        format!(
            "{} | {} | {}",
            or_placeholder(&self.subject, "No subject"),
            or_placeholder(&self.class, "No class"),
            or_placeholder(&self.theme, "No theme")
        )
    }

    pub fn is_active(&self) -> bool {
        self.status == ProjectStatus::Active
    }

    pub fn is_archived(&self) -> bool {
        self.status == ProjectStatus::Archived
    }

    /// Last modification time in local time, `dd.mm.yyyy, HH:MM`
    pub fn last_modified(&self) -> String {
        self.updated_at
            .with_timezone(&Local)
            .format("%d.%m.%Y, %H:%M")
            .to_string()
    }
}

impl From<Value> for Project {
    fn from(record: Value) -> Self {
        Self::from_record(record)
    }
}

/// Look up the grade for a percentage
///
/// Ranges are tried by descending `min`; the first inclusive match wins.
pub fn grade_for(criteria: &CriteriaTable, percent: f64) -> Option<String> {
    let mut entries: Vec<(&String, &GradeRange)> = criteria.iter().collect();
    entries.sort_by(|a, b| b.1.min.total_cmp(&a.1.min));
    entries
        .into_iter()
        .find(|(_, range)| range.contains(percent))
        .map(|(grade, _)| grade.clone())
}

/// Normalize stored settings: default criteria under caller values
pub fn normalize_settings(settings: Value) -> ProjectSettings {
    let mut map = match settings {
        Value::Object(map) => map,
        _ => return ProjectSettings::default(),
    };

    let criteria = match map.remove("criteria") {
        Some(Value::Object(entries)) => {
            let parsed: CriteriaTable = entries
                .into_iter()
                .filter_map(|(grade, range)| {
                    let min = range.get("min").and_then(parse_score)?;
                    let max = range.get("max").and_then(parse_score)?;
                    Some((grade, GradeRange::new(min, max)))
                })
                .collect();
            if parsed.is_empty() {
                default_criteria()
            } else {
                parsed
            }
        }
        _ => default_criteria(),
    };

    ProjectSettings {
        subject: take_string(&mut map, "subject"),
        class: take_string(&mut map, "class"),
        work_type: take_string(&mut map, "workType"),
        criteria,
        extra: map,
    }
}

/// Normalize stored results into the sparse keyed shape
///
/// Accepts the sparse object form, or the legacy dense array form (re-keyed by
/// position). Anything else yields an empty map. Non-numeric scores are dropped.
pub fn normalize_results(results: Value) -> SparseResults {
    let entries: Vec<(String, Value)> = match results {
        Value::Object(map) => map.into_iter().collect(),
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(index, item)| (index.to_string(), item))
            .collect(),
        _ => return SparseResults::new(),
    };

    entries
        .into_iter()
        .filter_map(|(student_key, scores)| match scores {
            Value::Object(scores) => {
                let scores: BTreeMap<String, f64> = scores
                    .into_iter()
                    .filter_map(|(task_key, score)| parse_score(&score).map(|s| (task_key, s)))
                    .collect();
                Some((student_key, scores))
            }
            _ => None,
        })
        .collect()
}

fn random_color() -> String {
    COLOR_PALETTE
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(COLOR_PALETTE[0])
        .to_string()
}

/// Student entries are names; legacy object entries use their `name` field
fn student_label(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Object(ref map) => match map.get("name") {
            Some(Value::String(name)) => name.clone(),
            _ => value.to_string(),
        },
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        _ => None,
    }
}

fn take_string(map: &mut OpaqueMap, key: &str) -> String {
    match map.remove(key) {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn take_non_empty(map: &mut OpaqueMap, key: &str) -> Option<String> {
    Some(take_string(map, key)).filter(|s| !s.is_empty())
}

fn take_object(map: &mut OpaqueMap, key: &str) -> OpaqueMap {
    match map.remove(key) {
        Some(Value::Object(obj)) => obj,
        _ => OpaqueMap::new(),
    }
}
