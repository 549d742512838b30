//! Property tests: results round-trip, name uniqueness, stats invariants

mod common;

use common::*;
use gradebook_core::working_set::{compress, expand};
use gradebook_core::{NewProject, Project, Task, WorkingSet};
use proptest::prelude::*;
use std::collections::HashSet;

/// Tasks where `Some(true)` gets an explicit id and `None` stays positional
fn tasks_from(explicit: &[bool]) -> Vec<Task> {
    explicit
        .iter()
        .enumerate()
        .map(|(i, &has_id)| {
            if has_id {
                Task::new(format!("t{}", i), 10.0)
            } else {
                Task::positional(10.0)
            }
        })
        .collect()
}

fn grid_strategy() -> impl Strategy<Value = (Vec<bool>, Vec<Vec<f64>>)> {
    (0usize..5, 0usize..6).prop_flat_map(|(tasks, students)| {
        let cell = prop_oneof![Just(0.0), 0.0f64..10.0];
        (
            prop::collection::vec(any::<bool>(), tasks),
            prop::collection::vec(prop::collection::vec(cell, tasks), students),
        )
    })
}

#[derive(Debug, Clone)]
enum Op {
    Create(Option<&'static str>),
    Duplicate(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        prop::option::of(prop::sample::select(vec!["Quiz", "Quiz (1)", "Essay", "Quiz (copy)"]))
            .prop_map(Op::Create),
        (0usize..8).prop_map(Op::Duplicate),
    ]
}

proptest! {
    #[test]
    fn compressed_grid_expands_back((explicit, grid) in grid_strategy()) {
        let tasks = tasks_from(&explicit);
        let students: Vec<String> = (0..grid.len()).map(|i| format!("Student {}", i)).collect();

        let mut working = WorkingSet::new();
        working.tasks = tasks.clone();
        working.students = students.clone();
        working.results = grid.clone();

        let mut project = Project::new(NewProject {
            tasks,
            students,
            ..NewProject::default()
        });
        project.results = compress(&working);

        let mut fresh = WorkingSet::new();
        let summary = expand(&project, &mut fresh);
        prop_assert_eq!(summary.skipped, 0);
        prop_assert_eq!(fresh.results, grid);
    }

    #[test]
    fn names_stay_unique(ops in prop::collection::vec(op_strategy(), 1..20)) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let (_store, mut manager) = memory_manager();
            for op in ops {
                match op {
                    Op::Create(name) => {
                        manager.create_project(NewProject {
                            name: name.map(str::to_string),
                            ..NewProject::default()
                        });
                    }
                    Op::Duplicate(index) => {
                        if let Some(id) = manager.projects().get(index).map(|p| p.id.clone()) {
                            manager.duplicate_project(&id).await.unwrap();
                        }
                    }
                }

                let names: HashSet<&str> =
                    manager.projects().iter().map(|p| p.name.as_str()).collect();
                assert_eq!(names.len(), manager.projects().len());
            }
        });
    }

    #[test]
    fn stats_are_idempotent_and_consistent((explicit, grid) in grid_strategy()) {
        let mut working = WorkingSet::new();
        working.tasks = tasks_from(&explicit);
        working.students = (0..grid.len()).map(|i| i.to_string()).collect();
        working.results = grid;

        let mut project = Project::new(NewProject::named("Stats"));
        working.apply_to(&mut project);

        let first = project.compute_stats().clone();
        let second = project.compute_stats().clone();
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.avg_grade, first.completion_percent);
        prop_assert_eq!(first.total_students, project.students.len());

        let graded: u32 = first.grades_distribution.values().sum();
        prop_assert!(graded as usize <= project.results.len());
    }
}
