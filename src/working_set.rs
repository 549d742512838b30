//! Dense working set and the expand/compress adapter
//!
//! While a project is open its data lives in a [`WorkingSet`]: settings, tasks,
//! roster and a dense `students x tasks` score grid that editing and analytics
//! code mutate directly. [`expand`] fills the working set from a project's sparse
//! results; [`compress`] turns the grid back into sparse results on save.
//!
//! Stored task keys are resolved to grid columns through an ordered list of
//! [`TaskKeyStrategy`] tiers. Records written by different schema versions key
//! scores by explicit id or by `task_<n>`, so all tiers must stay in this order.

use crate::project::Project;
use crate::types::{
    parse_leading_index, positional_task_key, OpaqueMap, ProjectSettings, SparseResults, Task,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Working set shared between the manager and the editing surface
pub type SharedWorkingSet = Arc<RwLock<WorkingSet>>;

/// Live, densely indexed data of the open project
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkingSet {
    pub settings: ProjectSettings,
    pub tasks: Vec<Task>,
    pub students: Vec<String>,
    /// `results[student][task]`; a row shorter than `tasks` leaves cells undefined
    pub results: Vec<Vec<f64>>,
    pub errors: OpaqueMap,
    pub psychology_features: Vec<Value>,
}

impl WorkingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a working set for sharing with the manager
    pub fn shared(self) -> SharedWorkingSet {
        Arc::new(RwLock::new(self))
    }

    /// Score cell, if defined
    pub fn score(&self, student: usize, task: usize) -> Option<f64> {
        self.results.get(student).and_then(|row| row.get(task)).copied()
    }

    /// Write a score, growing the row with zeros if needed
    ///
    /// Returns `false` when the student or task position does not exist.
    pub fn set_score(&mut self, student: usize, task: usize, score: f64) -> bool {
        if student >= self.students.len() || task >= self.tasks.len() {
            return false;
        }
        if self.results.len() <= student {
            self.results.resize_with(student + 1, Vec::new);
        }
        let row = &mut self.results[student];
        if row.len() <= task {
            row.resize(task + 1, 0.0);
        }
        row[task] = score;
        true
    }

    /// Copy the working data back onto `project`
    ///
    /// Settings are merged, tasks and students replaced, results compressed and
    /// error annotations copied.
    pub fn apply_to(&self, project: &mut Project) {
        project.settings.merge_from(&self.settings);
        project.tasks = self.tasks.clone();
        project.students = self.students.clone();
        project.results = compress(self);
        project.errors = self.errors.clone();
    }
}

/// One tier of task-key resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKeyStrategy {
    /// Key equals a task's explicit id
    ExplicitId,
    /// Key has the shape `task_<n>` and `n` is a valid position
    PositionalKey,
    /// Key equals the `task_<index>` key reconstructed from a task's position
    ReconstructedKey,
}

/// Resolution tiers in priority order
pub const RESOLUTION_ORDER: [TaskKeyStrategy; 3] = [
    TaskKeyStrategy::ExplicitId,
    TaskKeyStrategy::PositionalKey,
    TaskKeyStrategy::ReconstructedKey,
];

impl TaskKeyStrategy {
    /// Try to resolve `key` to a task position with this tier alone
    pub fn resolve(&self, key: &str, tasks: &[Task]) -> Option<usize> {
        match self {
            TaskKeyStrategy::ExplicitId => tasks
                .iter()
                .position(|task| task.explicit_id() == Some(key)),
            TaskKeyStrategy::PositionalKey => key
                .strip_prefix("task_")
                .and_then(parse_leading_index)
                .filter(|&index| index < tasks.len()),
            TaskKeyStrategy::ReconstructedKey => {
                (0..tasks.len()).find(|&index| positional_task_key(index) == key)
            }
        }
    }
}

/// Resolve a stored task key to a position, reporting which tier matched
pub fn resolve_task_key(key: &str, tasks: &[Task]) -> Option<(usize, TaskKeyStrategy)> {
    RESOLUTION_ORDER
        .iter()
        .find_map(|strategy| strategy.resolve(key, tasks).map(|index| (index, *strategy)))
}

/// Outcome of an expansion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpandSummary {
    /// Scores written into the grid
    pub applied: usize,
    /// Scores whose student or task could not be placed
    pub skipped: usize,
}

/// Expand a project's stored data into the working set
pub fn expand(project: &Project, working: &mut WorkingSet) -> ExpandSummary {
    working.settings.merge_from(&project.settings);
    working.tasks = project.tasks.clone();
    working.students = project.students.clone();
    working.results = vec![vec![0.0; working.tasks.len()]; working.students.len()];

    let mut summary = ExpandSummary::default();
    for (student_key, scores) in &project.results {
        let student = match parse_leading_index(student_key) {
            Some(index) if index < working.students.len() => index,
            _ => {
                summary.skipped += scores.len();
                continue;
            }
        };

        for (task_key, score) in scores {
            let placed = resolve_task_key(task_key, &working.tasks)
                .filter(|_| score.is_finite())
                .and_then(|(task, _)| working.results.get_mut(student)?.get_mut(task));
            match placed {
                Some(cell) => {
                    *cell = *score;
                    summary.applied += 1;
                }
                None => summary.skipped += 1,
            }
        }
    }

    working.errors = project.errors.clone();
    working.psychology_features = project.psychology_features.clone();
    summary
}

/// Compress the dense grid into sparse results
///
/// Within an emitted row every defined cell is kept, zeros included, and
/// non-finite cells are stored as 0. A student whose defined cells are all zero
/// (or who has no row) gets no entry: an untouched row reads back the same.
pub fn compress(working: &WorkingSet) -> SparseResults {
    let mut sparse = SparseResults::new();
    for (student, _) in working.students.iter().enumerate() {
        let Some(row) = working.results.get(student) else {
            continue;
        };

        let scores: BTreeMap<String, f64> = working
            .tasks
            .iter()
            .enumerate()
            .filter_map(|(index, task)| {
                let score = *row.get(index)?;
                let score = if score.is_finite() { score } else { 0.0 };
                Some((task.key(index), score))
            })
            .collect();

        if scores.values().any(|&score| score != 0.0) {
            sparse.insert(student.to_string(), scores);
        }
    }
    sparse
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn two_student_project() -> Project {
        Project::from_record(json!({
            "settings": {"subject": "Math", "custom": true},
            "tasks": [{"id": "t1", "maxScore": 10}],
            "students": ["Alice", "Bob"],
            "results": {"0": {"t1": 8}},
            "errors": {"0": {"t1": "arith"}},
            "psychologyFeatures": [{"student": 0, "note": "anxious"}]
        }))
    }

    #[test]
    fn test_expand_fills_dense_grid() {
        let project = two_student_project();
        let mut working = WorkingSet::new();
        let summary = expand(&project, &mut working);

        assert_eq!(working.results, vec![vec![8.0], vec![0.0]]);
        assert_eq!(summary, ExpandSummary { applied: 1, skipped: 0 });
        assert_eq!(working.settings.subject, "Math");
        assert_eq!(working.settings.extra.get("custom"), Some(&json!(true)));
        assert_eq!(working.errors, project.errors);
        assert_eq!(working.psychology_features.len(), 1);
    }

    #[test]
    fn test_compress_drops_untouched_students() {
        let project = two_student_project();
        let mut working = WorkingSet::new();
        expand(&project, &mut working);

        let sparse = compress(&working);
        assert_eq!(sparse.len(), 1);
        assert_eq!(sparse["0"]["t1"], 8.0);
        assert!(!sparse.contains_key("1"));

        // Zeros next to a real score are kept explicitly
        working.tasks.push(Task::new("t2", 5.0));
        working.results[0].push(0.0);
        let sparse = compress(&working);
        assert_eq!(sparse["0"]["t2"], 0.0);

        working.results.truncate(0);
        assert!(compress(&working).is_empty());
    }

    #[test]
    fn test_all_zero_student_is_left_out_of_stats() {
        let mut project = two_student_project();
        let mut working = WorkingSet::new();
        expand(&project, &mut working);
        working.set_score(0, 0, 10.0);
        working.set_score(1, 0, 0.0);

        working.apply_to(&mut project);
        let stats = project.compute_stats().clone();

        // An explicit zero reads the same as an untouched row
        assert!(!project.results.contains_key("1"));
        assert_eq!(stats.avg_grade, 100.0);
        assert_eq!(stats.grades_distribution.get("5"), Some(&1));
        assert_eq!(stats.grades_distribution.get("2"), Some(&0));
    }

    #[test]
    fn test_compress_non_finite_becomes_zero() {
        let mut working = WorkingSet {
            tasks: vec![Task::new("a", 1.0), Task::positional(1.0)],
            students: vec!["Alice".to_string()],
            results: vec![vec![f64::NAN]],
            ..WorkingSet::default()
        };
        assert!(compress(&working).is_empty());

        working.results[0].push(4.0);
        let sparse = compress(&working);
        assert_eq!(sparse["0"]["a"], 0.0);
        assert_eq!(sparse["0"]["task_1"], 4.0);
    }

    #[test]
    fn test_resolution_tier_priority() {
        let tasks = vec![
            Task::new("task_1", 1.0),
            Task::positional(1.0),
            Task::positional(1.0),
        ];
        // Explicit id wins over the positional reading of the same key
        assert_eq!(
            resolve_task_key("task_1", &tasks),
            Some((0, TaskKeyStrategy::ExplicitId))
        );
        assert_eq!(
            resolve_task_key("task_2", &tasks),
            Some((2, TaskKeyStrategy::PositionalKey))
        );
        assert_eq!(resolve_task_key("task_9", &tasks), None);
        assert_eq!(resolve_task_key("unknown", &tasks), None);
    }

    #[test]
    fn test_each_tier_in_isolation() {
        let tasks = vec![Task::new("q1", 1.0), Task::positional(1.0)];
        assert_eq!(TaskKeyStrategy::ExplicitId.resolve("q1", &tasks), Some(0));
        assert_eq!(TaskKeyStrategy::ExplicitId.resolve("task_1", &tasks), None);
        assert_eq!(TaskKeyStrategy::PositionalKey.resolve("task_1", &tasks), Some(1));
        assert_eq!(TaskKeyStrategy::PositionalKey.resolve("task_1x", &tasks), Some(1));
        assert_eq!(TaskKeyStrategy::ReconstructedKey.resolve("task_1", &tasks), Some(1));
        assert_eq!(TaskKeyStrategy::ReconstructedKey.resolve("task_1x", &tasks), None);
    }

    #[test]
    fn test_expand_skips_out_of_range_entries() {
        let project = Project::from_record(json!({
            "tasks": [{"id": "t1"}],
            "students": ["Alice"],
            "results": {"0": {"t1": 2, "gone": 5}, "4": {"t1": 1}, "x": {"t1": 1}}
        }));
        let mut working = WorkingSet::new();
        let summary = expand(&project, &mut working);
        assert_eq!(working.results, vec![vec![2.0]]);
        assert_eq!(summary, ExpandSummary { applied: 1, skipped: 3 });
    }

    #[test]
    fn test_expand_replaces_previous_contents() {
        let mut working = WorkingSet {
            students: vec!["Old".to_string(); 3],
            results: vec![vec![1.0; 5]; 3],
            ..WorkingSet::default()
        };
        working.errors.insert("stale".to_string(), json!(1));
        expand(&Project::from_record(json!({})), &mut working);
        assert!(working.students.is_empty());
        assert!(working.results.is_empty());
        assert!(working.errors.is_empty());
    }

    #[test]
    fn test_apply_to_project() {
        let mut project = two_student_project();
        let mut working = WorkingSet::new();
        expand(&project, &mut working);

        working.students.push("Carol".to_string());
        working.results.push(vec![10.0]);
        assert!(working.set_score(1, 0, 3.0));
        assert!(!working.set_score(5, 0, 3.0));
        working.settings.work_type = "quiz".to_string();

        working.apply_to(&mut project);
        assert_eq!(project.students.len(), 3);
        assert_eq!(project.results["1"]["t1"], 3.0);
        assert_eq!(project.results["2"]["t1"], 10.0);
        assert_eq!(project.settings.work_type, "quiz");
        assert_eq!(project.settings.extra.get("custom"), Some(&json!(true)));
    }
}
