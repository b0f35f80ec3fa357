//! Goal Completion Checker (spec.md §4.3).
//!
//! Invoked exactly when `retrieve()` yields nothing. Parses the verdict
//! from a dedicated goal-completion prompt dispatch and applies the three
//! control rules.

use serde::Deserialize;

use crate::error::HaltReason;

/// `{completed, reason, missing[]}` (spec.md §4.3).
#[derive(Debug, Clone, Deserialize)]
pub struct GoalVerdict {
    pub completed: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub missing: Vec<String>,
}

/// What the Control Loop should do after a goal-completion dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GoalOutcome {
    /// `completed = true`: set `goal.completed`, status `COMPLETED`, exit.
    Completed,
    /// `completed = false` with an empty queue: halt.
    Halt(String),
    /// Provider error, or `completed = false` with a non-empty queue:
    /// don't halt, sleep and retry next iteration.
    Retry,
}

/// Apply the control rules for a parsed verdict (spec.md §4.3).
///
/// `queue_empty` should be the queue's `exhausted()` result evaluated at the
/// same moment `retrieve()` returned nothing.
pub fn evaluate(verdict: &GoalVerdict, queue_empty: bool) -> GoalOutcome {
    if verdict.completed {
        return GoalOutcome::Completed;
    }
    if queue_empty {
        return GoalOutcome::Halt(
            verdict
                .reason
                .clone()
                .unwrap_or_else(|| "goal incomplete, no tasks remain".to_string()),
        );
    }
    GoalOutcome::Retry
}

/// Build the halt reason for a `TASK_LIST_EXHAUSTED_GOAL_INCOMPLETE` exit.
pub fn halt_reason(verdict: &GoalVerdict) -> HaltReason {
    HaltReason::TaskListExhaustedGoalIncomplete { missing: verdict.missing.clone() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_verdict_exits() {
        let verdict = GoalVerdict { completed: true, reason: None, missing: vec![] };
        assert_eq!(evaluate(&verdict, false), GoalOutcome::Completed);
    }

    #[test]
    fn incomplete_with_empty_queue_halts() {
        let verdict = GoalVerdict {
            completed: false,
            reason: Some("missing tests".to_string()),
            missing: vec!["tests".to_string()],
        };
        assert_eq!(evaluate(&verdict, true), GoalOutcome::Halt("missing tests".to_string()));
    }

    #[test]
    fn incomplete_with_nonempty_queue_retries() {
        let verdict = GoalVerdict { completed: false, reason: None, missing: vec![] };
        assert_eq!(evaluate(&verdict, false), GoalOutcome::Retry);
    }

    #[test]
    fn halt_reason_carries_missing_list() {
        let verdict = GoalVerdict {
            completed: false,
            reason: None,
            missing: vec!["docs".to_string()],
        };
        match halt_reason(&verdict) {
            HaltReason::TaskListExhaustedGoalIncomplete { missing } => {
                assert_eq!(missing, vec!["docs".to_string()]);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
