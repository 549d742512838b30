//! Core data types for the gradebook project core
//!
//! This module defines the typed building blocks of a [`Project`](crate::project::Project):
//! identifiers, status, tasks, grading criteria, settings and cached statistics.
//! Field names follow the on-disk camelCase layout so records written by earlier
//! versions of the application deserialize unchanged.

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Schemaless key-value blob carried through the core without interpretation
pub type OpaqueMap = serde_json::Map<String, Value>;

/// Sparse results: student position key -> task key -> score
pub type SparseResults = BTreeMap<String, BTreeMap<String, f64>>;

/// Grade symbol -> inclusive percentage range
pub type CriteriaTable = BTreeMap<String, GradeRange>;

/// Unique identifier for projects
///
/// Generated as `project_<unix-millis>_<9 base36 chars>` and never changed
/// after creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub String);

impl ProjectId {
    /// Generate a fresh project id
    pub fn generate() -> Self {
        const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
        let mut rng = rand::thread_rng();
        let suffix: String = (0..9)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        Self(format!("project_{}_{}", Utc::now().timestamp_millis(), suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProjectId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ProjectId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle status of a project
///
/// Status is informational: several closed projects may hold `Active`.
/// Which project is open is tracked by the manager, not here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    #[default]
    Draft,
    Active,
    Completed,
    Archived,
}

impl ProjectStatus {
    /// Parse a status string, returning `None` for unknown values
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Archived => "archived",
        }
    }
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single task (question/exercise) of a test
///
/// Only `id` and `maxScore` are interpreted; every other field is kept in
/// `extra` and written back verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_score: Option<f64>,

    #[serde(flatten)]
    pub extra: OpaqueMap,
}

impl Task {
    /// Create a task with an explicit id and maximum score
    pub fn new(id: impl Into<String>, max_score: f64) -> Self {
        Self {
            id: Some(id.into()),
            max_score: Some(max_score),
            extra: OpaqueMap::new(),
        }
    }

    /// Create a task without an id; it is addressed as `task_<index>`
    pub fn positional(max_score: f64) -> Self {
        Self {
            id: None,
            max_score: Some(max_score),
            extra: OpaqueMap::new(),
        }
    }

    /// Build a task from an arbitrary JSON value without failing
    ///
    /// Numeric ids are stringified, numeric-string max scores are parsed.
    /// A non-object value is kept under `extra["value"]`.
    pub fn from_value(value: Value) -> Self {
        let mut map = match value {
            Value::Object(map) => map,
            Value::Null => return Self::default(),
            other => {
                let mut extra = OpaqueMap::new();
                extra.insert("value".to_string(), other);
                return Self {
                    extra,
                    ..Self::default()
                };
            }
        };

        let id = match map.remove("id") {
            Some(Value::String(s)) if !s.is_empty() => Some(s),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        let max_score = map.remove("maxScore").and_then(|v| parse_score(&v));

        Self {
            id,
            max_score,
            extra: map,
        }
    }

    /// Explicit id, ignoring empty strings
    pub fn explicit_id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }

    /// Key under which this task's scores are stored
    pub fn key(&self, index: usize) -> String {
        match self.explicit_id() {
            Some(id) => id.to_string(),
            None => positional_task_key(index),
        }
    }

    /// Maximum score; missing or zero counts as 1
    pub fn effective_max_score(&self) -> f64 {
        match self.max_score {
            Some(max) if max != 0.0 && max.is_finite() => max,
            _ => 1.0,
        }
    }
}

/// Synthesized key for a task without an explicit id
pub fn positional_task_key(index: usize) -> String {
    format!("task_{}", index)
}

/// Parse a score the way loosely typed records store them
///
/// Accepts JSON numbers and strings with a leading float (`"8"`, `" 7.5pts"`).
/// Returns `None` for anything else or non-finite results.
pub fn parse_score(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_leading_float(s),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

fn parse_leading_float(s: &str) -> Option<f64> {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    let mut seen_digit = false;
    let mut seen_dot = false;
    while end < bytes.len() {
        match bytes[end] {
            b'+' | b'-' if end == 0 => {}
            b'0'..=b'9' => seen_digit = true,
            b'.' if !seen_dot => seen_dot = true,
            _ => break,
        }
        end += 1;
    }
    if !seen_digit {
        return None;
    }
    let mantissa = s[..end].trim_end_matches('.');

    // Exponent counts only when digits follow `e`, `e+` or `e-`
    let mut exponent = "";
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut digits_start = end + 1;
        if matches!(bytes.get(digits_start), Some(b'+' | b'-')) {
            digits_start += 1;
        }
        let digits_end = bytes[digits_start.min(bytes.len())..]
            .iter()
            .position(|b| !b.is_ascii_digit())
            .map_or(bytes.len(), |n| digits_start + n);
        if digits_end > digits_start {
            exponent = &s[end..digits_end];
        }
    }

    format!("{}{}", mantissa, exponent).parse().ok()
}

/// Parse a leading non-negative integer (`"3"`, `" 3"`, `"3x"` are all 3)
///
/// Student keys and positional task keys are addressed this way.
pub fn parse_leading_index(s: &str) -> Option<usize> {
    let s = s.trim_start();
    let s = s.strip_prefix('+').unwrap_or(s);
    let digits: &str = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(end) => &s[..end],
        None => s,
    };
    digits.parse().ok()
}

/// Inclusive percentage range for one grade
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradeRange {
    pub min: f64,
    pub max: f64,
}

impl GradeRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, percent: f64) -> bool {
        percent >= self.min && percent <= self.max
    }
}

/// Default five-point criteria: 5 >= 85, 4 >= 70, 3 >= 50, 2 below
pub fn default_criteria() -> CriteriaTable {
    let mut criteria = CriteriaTable::new();
    criteria.insert("5".to_string(), GradeRange::new(85.0, 100.0));
    criteria.insert("4".to_string(), GradeRange::new(70.0, 84.0));
    criteria.insert("3".to_string(), GradeRange::new(50.0, 69.0));
    criteria.insert("2".to_string(), GradeRange::new(0.0, 49.0));
    criteria
}

/// Test/work settings of a project
///
/// `subject`, `class`, `workType` and `criteria` are always present.
/// Any other keys supplied by callers live in `extra` and pass through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSettings {
    #[serde(default)]
    pub subject: String,

    #[serde(default)]
    pub class: String,

    #[serde(default)]
    pub work_type: String,

    #[serde(default = "default_criteria")]
    pub criteria: CriteriaTable,

    #[serde(flatten)]
    pub extra: OpaqueMap,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            subject: String::new(),
            class: String::new(),
            work_type: String::new(),
            criteria: default_criteria(),
            extra: OpaqueMap::new(),
        }
    }
}

impl ProjectSettings {
    /// Merge `other` onto `self`; values from `other` win, unknown keys are unioned
    pub fn merge_from(&mut self, other: &ProjectSettings) {
        self.subject = other.subject.clone();
        self.class = other.class.clone();
        self.work_type = other.work_type.clone();
        self.criteria = other.criteria.clone();
        for (key, value) in &other.extra {
            self.extra.insert(key.clone(), value.clone());
        }
    }
}

/// Cached statistics snapshot, recomputed by `Project::compute_stats`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectStats {
    pub total_students: usize,
    pub total_tasks: usize,
    /// Average percentage across graded students (a percent, not a grade)
    pub avg_grade: f64,
    /// Always equal to `avg_grade`; kept for record compatibility
    pub completion_percent: f64,
    pub grades_distribution: BTreeMap<String, u32>,
}
