//! `foundry enqueue` command: read a task file, validate it, and persist
//! it (spec.md §6 "Task file", §4.2 `enqueue`).

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use sqlx::PgPool;

use foundry_db::models::{DependencyType, TaskType};

use foundry_core::queue::{self, TaskSpec};

/// On-disk task file shape: one project's goal plus its task list (spec.md
/// §6). Task-file parsing is JSON deserialization only — anything beyond
/// that (templating, includes, YAML) is out of scope.
#[derive(Debug, Deserialize)]
struct TaskFile {
    project_id: String,
    goal_description: String,
    sandbox_root: String,
    tasks: Vec<TaskFileEntry>,
}

#[derive(Debug, Deserialize)]
struct TaskFileEntry {
    task_id: String,
    intent: String,
    instructions: String,
    #[serde(default)]
    acceptance_criteria: Vec<String>,
    task_type: Option<TaskType>,
    agent_mode: Option<String>,
    working_directory: Option<String>,
    #[serde(default)]
    required_artifacts: Vec<String>,
    test_command: Option<String>,
    expected_json_schema: Option<serde_json::Value>,
    #[serde(default)]
    depends_on: Vec<DependencyEntry>,
    retry_policy: Option<RetryPolicyEntry>,
    meta: Option<MetaEntry>,
}

#[derive(Debug, Deserialize)]
struct DependencyEntry {
    task_id: String,
    #[serde(rename = "type")]
    dep_type: DependencyType,
}

#[derive(Debug, Deserialize)]
struct RetryPolicyEntry {
    max_retries: i32,
}

#[derive(Debug, Deserialize)]
struct MetaEntry {
    feature_id: Option<String>,
}

const DEFAULT_RETRY_MAX: i32 = 3;

fn to_task_spec(entry: TaskFileEntry) -> TaskSpec {
    TaskSpec {
        task_id: entry.task_id,
        intent: entry.intent,
        instructions: entry.instructions,
        acceptance_criteria: entry.acceptance_criteria,
        task_type: entry.task_type,
        agent_mode: entry.agent_mode,
        working_directory: entry.working_directory,
        required_artifacts: entry.required_artifacts,
        test_command: entry.test_command,
        expected_json_schema: entry.expected_json_schema,
        depends_on: entry
            .depends_on
            .into_iter()
            .map(|d| (d.task_id, d.dep_type))
            .collect(),
        retry_max: entry
            .retry_policy
            .map(|p| p.max_retries)
            .unwrap_or(DEFAULT_RETRY_MAX),
        feature_id: entry.meta.and_then(|m| m.feature_id),
    }
}

/// Run `foundry enqueue <task-file>`. Rejects the whole file on schema or
/// dependency errors (spec.md §6: "whole file rejected"); nothing is
/// persisted on failure since `queue::enqueue` runs inside one transaction.
pub async fn run_enqueue(pool: &PgPool, path: &Path) -> Result<()> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read task file at {}", path.display()))?;
    let file: TaskFile = serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse task file at {}", path.display()))?;

    let specs: Vec<TaskSpec> = file.tasks.into_iter().map(to_task_spec).collect();
    let count = specs.len();

    let inserted = queue::enqueue(
        pool,
        &file.project_id,
        &file.goal_description,
        &file.sandbox_root,
        specs,
    )
    .await?;

    println!(
        "Enqueued {} of {count} task(s) for project {}",
        inserted.len(),
        file.project_id
    );
    for task_id in &inserted {
        println!("  + {task_id}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_task_file() {
        let json = r#"{
            "project_id": "proj1",
            "goal_description": "ship the thing",
            "sandbox_root": "/tmp/proj1",
            "tasks": [
                {
                    "task_id": "impl_auth_01",
                    "intent": "add middleware",
                    "instructions": "Create src/auth/middleware.ts",
                    "acceptance_criteria": ["function authMiddleware exported"],
                    "required_artifacts": ["src/auth/middleware.ts"]
                }
            ]
        }"#;
        let file: TaskFile = serde_json::from_str(json).unwrap();
        assert_eq!(file.tasks.len(), 1);
        let spec = to_task_spec(file.tasks.into_iter().next().unwrap());
        assert_eq!(spec.retry_max, DEFAULT_RETRY_MAX);
        assert_eq!(spec.task_id, "impl_auth_01");
    }

    #[test]
    fn parses_dependency_edges_and_retry_policy() {
        let json = r#"{
            "project_id": "proj1",
            "goal_description": "ship the thing",
            "sandbox_root": "/tmp/proj1",
            "tasks": [
                {
                    "task_id": "b",
                    "intent": "second step",
                    "instructions": "...",
                    "depends_on": [{"task_id": "a", "type": "hard"}],
                    "retry_policy": {"max_retries": 5}
                }
            ]
        }"#;
        let file: TaskFile = serde_json::from_str(json).unwrap();
        let spec = to_task_spec(file.tasks.into_iter().next().unwrap());
        assert_eq!(spec.retry_max, 5);
        assert_eq!(spec.depends_on, vec![("a".to_string(), DependencyType::Hard)]);
    }
}
