//! Prompt Builder (spec.md §4.6).
//!
//! Assembles the text sent to a provider for a task dispatch, a fix retry,
//! a clarification retry, or a goal-completion check, and applies the
//! post-hoc file-path filter to a parsed agent response.

pub mod strategies;

use std::path::{Path, PathBuf};

use foundry_db::models::Task;
use tracing::debug;

use crate::validator::ValidationReport;

pub use strategies::{strategy_for, Pipeline, PromptStrategy};

/// Verbatim constraints prepended to every prompt (spec.md §4.6 "Rules
/// block").
pub const RULES_BLOCK: &[&str] = &[
    "Use only information from the task, criteria, and provided context.",
    "Do not paraphrase or speculate.",
    "If a critical detail (file path, API signature, variable name) is missing, STOP and ask exactly one clarifying question.",
    "Remain in the declared agent mode.",
    "Reference only files that exist under the sandbox root.",
    "Your response must contain only code changes and the final JSON block.",
];

/// Hedging words forbidden in a clarification-retry response (spec.md §4.6
/// "Clarification prompt").
pub const FORBIDDEN_HEDGES: &[&str] = &["maybe", "could", "suggest", "recommend", "option"];

/// Everything the Minimal State Projection and prompt headers need about the
/// project beyond the task itself (spec.md §4.6 "Minimal State Projection").
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub project_id: String,
    pub sandbox_root: String,
    pub goal_description: String,
    pub last_task_id: Option<String>,
    /// Most recent completions first, already capped to 5 by the caller.
    pub recent_completed_summaries: Vec<String>,
    pub blocked_task_ids: Vec<String>,
}

fn mentions_any(haystack: &str, keywords: &[&str]) -> bool {
    let lower = haystack.to_lowercase();
    keywords.iter().any(|k| lower.contains(k))
}

/// Build the Minimal State Projection block (spec.md §4.6).
///
/// `project.{id, sandbox_root}` is always included. Everything else is
/// gated on trigger keywords found in the task's intent/instructions/
/// acceptance criteria, except documentation tasks, which receive only the
/// unconditional project line.
fn minimal_state(task: &Task, ctx: &PromptContext, is_documentation: bool) -> String {
    let mut lines = vec![format!(
        "project: {{ id: {}, sandbox_root: {} }}",
        ctx.project_id, ctx.sandbox_root
    )];

    if is_documentation {
        return lines.join("\n");
    }

    let criteria_text = task
        .acceptance_criteria
        .as_array()
        .map(|a| a.iter().filter_map(|v| v.as_str()).collect::<Vec<_>>().join(" "))
        .unwrap_or_default();
    let text = format!("{} {} {}", task.intent, task.instructions, criteria_text);

    if mentions_any(&text, &["goal"]) {
        lines.push(format!("goal: {}", ctx.goal_description));
    }
    if mentions_any(&text, &["previous", "last task", "earlier", "after", "before"]) {
        if let Some(last) = &ctx.last_task_id {
            lines.push(format!("queue.last_task_id: {last}"));
        }
    }
    if mentions_any(
        &text,
        &["extend", "build on", "previous implementation", "based on"],
    ) {
        for (i, summary) in ctx.recent_completed_summaries.iter().take(5).enumerate() {
            lines.push(format!("completed[{i}]: {summary}"));
        }
    }
    if mentions_any(&text, &["unblock", "blocked"]) {
        for id in &ctx.blocked_task_ids {
            lines.push(format!("blocked: {id}"));
        }
    }

    lines.join("\n")
}

/// Build the full task-dispatch prompt (spec.md §4.6, first paragraph:
/// "Every prompt contains, in order: Task ID, Task Description, Intent,
/// Acceptance Criteria, a single Rules block, task-type-specific
/// Guidelines, Output Requirements, a Minimal State projection, and the
/// working directory").
pub fn build_task_prompt(task: &Task, ctx: &PromptContext, working_directory: &str) -> String {
    let strategy = strategy_for(task.task_type);
    let is_documentation = matches!(task.task_type, foundry_db::models::TaskType::Documentation);

    let criteria = task
        .acceptance_criteria
        .as_array()
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_str())
                .map(|s| format!("- {s}"))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();

    let mut sections = vec![
        format!("Task ID: {}", task.task_id),
        format!("Intent: {}", task.intent),
        format!("Description: {}", task.instructions),
        format!("Acceptance Criteria:\n{criteria}"),
        format!("Rules:\n{}", RULES_BLOCK.iter().map(|r| format!("- {r}")).collect::<Vec<_>>().join("\n")),
        format!(
            "Guidelines:\n{}",
            strategy.guidelines().iter().map(|g| format!("- {g}")).collect::<Vec<_>>().join("\n")
        ),
        format!("Output Requirements: respond with exactly one JSON object: {}", strategy.output_schema()),
        format!("State:\n{}", minimal_state(task, ctx, is_documentation)),
        format!("Working Directory: {working_directory}"),
    ];
    sections.retain(|s| !s.is_empty());
    sections.join("\n\n")
}

/// Build a fix-retry prompt (spec.md §4.6 "Fix prompt"): no task body,
/// just the validation report and the Rules block.
pub fn build_fix_prompt(task: &Task, report: &ValidationReport) -> String {
    let failed = report.failed_criteria.join(", ");
    let uncertain = report.uncertain_criteria.join(", ");
    format!(
        "Task ID: {}\n\nThe previous attempt did not pass validation.\nFailed criteria: {}\nUncertain criteria: {}\n\nFix only the failed or uncertain criteria above; do not touch anything already passing.\n\nRules:\n{}",
        task.task_id,
        if failed.is_empty() { "(none)".to_string() } else { failed },
        if uncertain.is_empty() { "(none)".to_string() } else { uncertain },
        RULES_BLOCK.iter().map(|r| format!("- {r}")).collect::<Vec<_>>().join("\n"),
    )
}

/// Build a clarification-retry prompt (spec.md §4.6 "Clarification
/// prompt"): reacts to an `AMBIGUITY`/`ASKED_QUESTION` soft halt.
pub fn build_clarification_prompt(task: &Task, asked_question: &str) -> String {
    format!(
        "Task ID: {}\n\nYour previous response asked: \"{asked_question}\"\n\nGive a single declarative resolution. Do not hedge: avoid the words {}.\n\nRules:\n{}",
        task.task_id,
        FORBIDDEN_HEDGES.join(", "),
        RULES_BLOCK.iter().map(|r| format!("- {r}")).collect::<Vec<_>>().join("\n"),
    )
}

/// Build the goal-completion verdict prompt (spec.md §4.3, §4.6 output
/// contract row "goal-completion").
pub fn build_goal_completion_prompt(goal_description: &str, completed_summaries: &[String]) -> String {
    format!(
        "Goal: {goal_description}\n\nCompleted so far:\n{}\n\nRespond with exactly one JSON object: {{ completed: bool, reason: string, missing: string[] }}.",
        completed_summaries.iter().map(|s| format!("- {s}")).collect::<Vec<_>>().join("\n"),
    )
}

/// Reject absolute paths, `~`-relative paths, and paths containing `..`
/// (spec.md §4.6 "any absolute path, `~`, or path containing `..` must be
/// rejected post-parse").
pub fn is_sandbox_safe(path: &str) -> bool {
    if path.starts_with('~') || path.contains("..") {
        return false;
    }
    !Path::new(path).is_absolute()
}

/// Post-hoc file-path validation (spec.md §4.6): drop any entry that is
/// unsafe, or that does not exist on disk under `sandbox_root` once
/// resolved. Each drop is logged.
pub fn filter_paths(paths: &[String], sandbox_root: &Path) -> Vec<String> {
    paths
        .iter()
        .filter(|p| {
            if !is_sandbox_safe(p) {
                debug!(path = %p, "dropping unsafe path from agent output");
                return false;
            }
            let resolved: PathBuf = sandbox_root.join(p);
            if !resolved.exists() {
                debug!(path = %p, "dropping nonexistent path from agent output");
                return false;
            }
            true
        })
        .cloned()
        .collect()
}
