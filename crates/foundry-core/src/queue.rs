//! Task Retriever / Queue (spec.md §4.2).
//!
//! Two logical per-project lists, `ready` and `waiting`, backed by
//! `foundry_db::queries::tasks`. This module owns the policy (cycle
//! detection, promotion, retry-slot precedence); `foundry-db` owns only the
//! SQL.

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use foundry_db::models::{DependencyType, QueueLocation, Task, TaskStatus, TaskType};
use foundry_db::queries::{projects, tasks};
use sqlx::PgPool;

use crate::error::EnqueueError;

/// One task plus its declared dependency edges, as read from a task file
/// (spec.md §3 Task, §6 "Task file").
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub task_id: String,
    pub intent: String,
    pub instructions: String,
    pub acceptance_criteria: Vec<String>,
    pub task_type: Option<TaskType>,
    pub agent_mode: Option<String>,
    pub working_directory: Option<String>,
    pub required_artifacts: Vec<String>,
    pub test_command: Option<String>,
    pub expected_json_schema: Option<serde_json::Value>,
    pub depends_on: Vec<(String, DependencyType)>,
    pub retry_max: i32,
    pub feature_id: Option<String>,
}

/// Detect `greet|hello|say|respond|explain|who are you` → behavioral, etc.
/// (spec.md §4.6 task-type auto-detection, applied here at enqueue time so
/// the persisted `task_type` is never `None`).
pub fn detect_task_type(intent: &str, instructions: &str) -> TaskType {
    let text = format!("{intent} {instructions}").to_lowercase();
    const BEHAVIORAL: &[&str] = &["greet", "hello", "say", "respond", "explain", "who are you"];
    const VERIFICATION: &[&str] = &["verify", "check"];
    const TESTING: &[&str] = &["test", "spec", "coverage"];
    const CONFIGURATION: &[&str] = &["configure", "setup", "install"];
    const DOCUMENTATION: &[&str] = &["document", "readme"];

    if BEHAVIORAL.iter().any(|k| text.contains(k)) {
        TaskType::Behavioral
    } else if VERIFICATION.iter().any(|k| text.contains(k)) {
        TaskType::Verification
    } else if TESTING.iter().any(|k| text.contains(k)) {
        TaskType::Testing
    } else if CONFIGURATION.iter().any(|k| text.contains(k)) {
        TaskType::Configuration
    } else if DOCUMENTATION.iter().any(|k| text.contains(k)) {
        TaskType::Documentation
    } else {
        TaskType::Coding
    }
}

/// Validate and enqueue a whole task file transactionally: either every
/// task lands, or none do (spec.md §6: "whole file rejected").
///
/// Steps, matching spec.md §4.2 `enqueue` and §8 P4/R1/R2/S3:
/// 1. Reject duplicate `task_id`s already present for the project.
/// 2. Reject `depends_on` targets that don't resolve to a task in this file
///    or already in the project.
/// 3. Reject hard-dependency cycles (DFS over the combined edge set).
/// 4. Insert every task, placing it in `ready` iff all hard dependencies are
///    already `completed`, else `waiting`.
pub async fn enqueue(
    pool: &PgPool,
    project_id: &str,
    goal_description: &str,
    sandbox_root: &str,
    specs: Vec<TaskSpec>,
) -> Result<Vec<String>> {
    projects::ensure_project(pool, project_id, goal_description, sandbox_root).await?;

    let mut tx = pool.begin().await.context("failed to open enqueue transaction")?;

    let existing_tasks = tasks::list_tasks_for_project(pool, project_id).await?;
    let existing_ids: HashSet<String> = existing_tasks.iter().map(|t| t.task_id.clone()).collect();
    let existing_completed: HashSet<String> = existing_tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Completed)
        .map(|t| t.task_id.clone())
        .collect();

    let mut new_ids = HashSet::new();
    for spec in &specs {
        if existing_ids.contains(&spec.task_id) || !new_ids.insert(spec.task_id.clone()) {
            anyhow::bail!(EnqueueError::DuplicateTaskId(spec.task_id.clone()));
        }
    }

    // Combined hard-edge adjacency for cycle detection: task_id -> targets,
    // covering both the new file and whatever hard edges already exist.
    let mut hard_edges: HashMap<String, Vec<String>> = HashMap::new();
    for spec in &specs {
        for (target, dep_type) in &spec.depends_on {
            let known = existing_ids.contains(target) || new_ids.contains(target);
            if !known {
                anyhow::bail!(EnqueueError::MissingDependencyTarget {
                    task_id: spec.task_id.clone(),
                    target: target.clone(),
                });
            }
            if *dep_type == DependencyType::Hard {
                hard_edges
                    .entry(spec.task_id.clone())
                    .or_default()
                    .push(target.clone());
            }
        }
    }
    for (task_id, depends_on, dep_type) in tasks::list_dependency_edges(pool, project_id).await? {
        if dep_type == DependencyType::Hard {
            hard_edges.entry(task_id).or_default().push(depends_on);
        }
    }

    if let Some(cycle) = find_cycle(&hard_edges) {
        anyhow::bail!(EnqueueError::CircularDependency(cycle.join(" -> ")));
    }

    let mut inserted = Vec::with_capacity(specs.len());
    for spec in specs {
        let all_hard_satisfied = spec
            .depends_on
            .iter()
            .filter(|(_, t)| *t == DependencyType::Hard)
            .all(|(target, _)| existing_completed.contains(target));

        let queue_location = if all_hard_satisfied {
            QueueLocation::Ready
        } else {
            QueueLocation::Waiting
        };

        let task_type = spec
            .task_type
            .unwrap_or_else(|| detect_task_type(&spec.intent, &spec.instructions));

        let new_task = tasks::NewTask {
            task_id: spec.task_id.clone(),
            project_id: project_id.to_string(),
            intent: spec.intent,
            instructions: spec.instructions,
            acceptance_criteria: spec.acceptance_criteria,
            task_type,
            agent_mode: spec.agent_mode,
            working_directory: spec.working_directory,
            required_artifacts: spec.required_artifacts,
            test_command: spec.test_command,
            expected_json_schema: spec.expected_json_schema,
            retry_max: spec.retry_max,
            feature_id: spec.feature_id,
            queue_location,
        };

        tasks::insert_task(&mut tx, &new_task).await?;
        for (target, dep_type) in spec.depends_on {
            tasks::insert_dependency(&mut tx, project_id, &spec.task_id, &target, dep_type)
                .await?;
        }
        inserted.push(spec.task_id);
    }

    tx.commit().await.context("failed to commit enqueue transaction")?;
    Ok(inserted)
}

/// DFS cycle detection over the hard-edge adjacency map. Returns the cycle
/// as a path of task ids if one exists (spec.md §8 P4, S3).
fn find_cycle(edges: &HashMap<String, Vec<String>>) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        InProgress,
        Done,
    }

    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut stack: Vec<String> = Vec::new();

    fn visit<'a>(
        node: &'a str,
        edges: &'a HashMap<String, Vec<String>>,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        if let Some(Mark::Done) = marks.get(node) {
            return None;
        }
        if let Some(Mark::InProgress) = marks.get(node) {
            let start = stack.iter().position(|n| n == node).unwrap_or(0);
            let mut cycle = stack[start..].to_vec();
            cycle.push(node.to_string());
            return Some(cycle);
        }

        marks.insert(node, Mark::InProgress);
        stack.push(node.to_string());

        if let Some(targets) = edges.get(node) {
            for target in targets {
                if let Some(cycle) = visit(target, edges, marks, stack) {
                    return Some(cycle);
                }
            }
        }

        stack.pop();
        marks.insert(node, Mark::Done);
        None
    }

    let nodes: Vec<&str> = edges.keys().map(|s| s.as_str()).collect();
    for node in nodes {
        if let Some(cycle) = visit(node, edges, &mut marks, &mut stack) {
            return Some(cycle);
        }
    }
    None
}

/// Pop the next task to dispatch (spec.md §4.2 `retrieve()`): a pending
/// resource-exhausted retry takes precedence over the ready queue's head.
pub async fn retrieve(pool: &PgPool, project_id: &str) -> Result<Option<Task>> {
    let project = projects::get_project(pool, project_id)
        .await?
        .context("project not found")?;

    if let (Some(task_id), Some(deadline)) = (
        project.resource_exhausted_retry_task_id.as_deref(),
        project.resource_exhausted_retry_deadline,
    ) {
        if chrono::Utc::now() >= deadline {
            projects::clear_resource_exhausted_retry(pool, project_id).await?;
            return tasks::get_task(pool, project_id, task_id).await;
        }
        return Ok(None);
    }

    tasks::pop_ready_head(pool, project_id).await
}

/// Promote every waiting task whose hard dependencies are now satisfied
/// (spec.md §4.2 `promoteOnCompletion`). Called by the Finalizer after a
/// task completes.
pub async fn promote_on_completion(pool: &PgPool, project_id: &str) -> Result<Vec<String>> {
    let promotable = tasks::promotable_waiting_tasks(pool, project_id).await?;
    for task_id in &promotable {
        tasks::promote_to_ready(pool, project_id, task_id).await?;
    }
    Ok(promotable)
}

/// True iff both queues are empty and no task is in flight (spec.md §4.2
/// `exhausted`).
pub async fn exhausted(pool: &PgPool, project_id: &str) -> Result<bool> {
    tasks::queues_exhausted(pool, project_id).await
}
