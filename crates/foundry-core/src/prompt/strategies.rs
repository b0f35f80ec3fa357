//! Task-type prompt strategies (spec.md §4.6, §9 design note: "a closed sum
//! type `TaskType` with strategy objects implementing a uniform
//! `PromptStrategy { rules(), guidelines(), outputSchema(), validator() }`.
//! Resolution by `task_type` is a table lookup, not inheritance.").

use foundry_db::models::TaskType;

/// Which Deterministic Validator pipeline a task type feeds (spec.md §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pipeline {
    Coding,
    Behavioral,
    Verification,
}

/// Per-task-type prompt contribution. `rules()` is deliberately not part of
/// this trait: the Rules block (spec.md §4.6 "verbatim constraints") is
/// identical across every task type and lives in `prompt::RULES_BLOCK`.
pub trait PromptStrategy: Send + Sync {
    /// Single-line imperative guidelines specific to this task type.
    fn guidelines(&self) -> &'static [&'static str];

    /// Human-readable description of the required output JSON shape
    /// (spec.md §4.6 output contract table), rendered into Output
    /// Requirements.
    fn output_schema(&self) -> &'static str;

    /// Which validator pipeline consumes this type's output.
    fn validator(&self) -> Pipeline;
}

macro_rules! strategy {
    ($name:ident, $guidelines:expr, $schema:expr, $pipeline:expr) => {
        struct $name;
        impl PromptStrategy for $name {
            fn guidelines(&self) -> &'static [&'static str] {
                $guidelines
            }
            fn output_schema(&self) -> &'static str {
                $schema
            }
            fn validator(&self) -> Pipeline {
                $pipeline
            }
        }
    };
}

strategy!(
    CodingStrategy,
    &[
        "Write the minimal code that satisfies the acceptance criteria.",
        "Create or update only the files named in required_artifacts unless more are strictly necessary.",
        "Do not modify files outside the working directory.",
    ],
    "status in {completed, failed}; files_created[]; files_updated[]; changes[]; neededChanges (bool); summary (one sentence)",
    Pipeline::Coding
);

strategy!(
    ImplementationStrategy,
    &[
        "Write the minimal code that satisfies the acceptance criteria.",
        "Prefer extending existing modules over introducing new ones.",
    ],
    "status in {completed, failed}; files_created[]; files_updated[]; changes[]; neededChanges (bool); summary (one sentence)",
    Pipeline::Coding
);

strategy!(
    RefactoringStrategy,
    &[
        "Preserve existing behavior; do not change any public interface unless the task says to.",
        "Keep the diff as small as correctness allows.",
    ],
    "status in {completed, failed}; files_created[]; files_updated[]; changes[]; neededChanges (bool); summary (one sentence)",
    Pipeline::Coding
);

strategy!(
    TestingStrategy,
    &[
        "Add or update tests that exercise the acceptance criteria directly.",
        "Do not weaken or delete an existing passing test to make this one pass.",
    ],
    "status in {completed, failed}; files_created[]; files_updated[]; changes[]; neededChanges (bool); summary (one sentence)",
    Pipeline::Coding
);

strategy!(
    ConfigurationStrategy,
    &[
        "Change only configuration files named in the task; do not touch application source.",
    ],
    "status in {completed, failed}; files_created[]; files_updated[]; changes[]; neededChanges (bool); summary (one sentence)",
    Pipeline::Coding
);

strategy!(
    DocumentationStrategy,
    &[
        "Write documentation only; do not modify source or configuration files.",
    ],
    "status in {completed, failed}; files_created[]; files_updated[]; changes[]; neededChanges (bool); summary (one sentence)",
    Pipeline::Coding
);

strategy!(
    BehavioralStrategy,
    &[
        "Answer directly in the response field; do not write or modify any file.",
        "State your confidence honestly; do not round up to look certain.",
    ],
    "status; response; isDirectAnswer (bool); confidence in [0,1]; reasoning",
    Pipeline::Behavioral
);

strategy!(
    VerificationStrategy,
    &[
        "Inspect the sandbox to confirm or refute the stated claim; do not modify any file.",
        "List every finding, not just the first one that matches.",
    ],
    "status; findings[]; verdict in {pass, fail}; reasoning; issues[]",
    Pipeline::Verification
);

/// Table lookup from `task_type` to its strategy (spec.md §9: "Resolution by
/// `task_type` is a table lookup, not inheritance").
pub fn strategy_for(task_type: TaskType) -> &'static dyn PromptStrategy {
    match task_type {
        TaskType::Coding => &CodingStrategy,
        TaskType::Implementation => &ImplementationStrategy,
        TaskType::Refactoring => &RefactoringStrategy,
        TaskType::Testing => &TestingStrategy,
        TaskType::Configuration => &ConfigurationStrategy,
        TaskType::Documentation => &DocumentationStrategy,
        TaskType::Behavioral => &BehavioralStrategy,
        TaskType::Verification => &VerificationStrategy,
    }
}
