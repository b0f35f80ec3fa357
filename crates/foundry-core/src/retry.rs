//! Retry Orchestrator (spec.md §4.11).
//!
//! Builds the pre-context block injected ahead of a fix/fallover/helper
//! prompt, and implements the repeated-error guard that blocks a task
//! rather than retrying it forever.

/// The three pre-context variants (spec.md §4.11: "Three variants exist
/// (provider-switch, retry, helper) with distinct headers and delimiters").
#[derive(Debug, Clone)]
pub enum PreContext {
    ProviderSwitch {
        previous_provider: String,
        failure_class: String,
        files_touched: Vec<String>,
        first_error: Option<String>,
    },
    Retry {
        files_touched: Vec<String>,
        first_error: Option<String>,
    },
    Helper {
        criteria: Vec<String>,
    },
}

impl PreContext {
    pub fn provider_switch(
        previous_provider: &str,
        failure_class: &str,
        files_touched: &[String],
        first_error: Option<&str>,
    ) -> Self {
        PreContext::ProviderSwitch {
            previous_provider: previous_provider.to_string(),
            failure_class: failure_class.to_string(),
            files_touched: files_touched.to_vec(),
            first_error: first_error.map(str::to_string),
        }
    }

    pub fn retry(files_touched: &[String], first_error: Option<&str>) -> Self {
        PreContext::Retry {
            files_touched: files_touched.to_vec(),
            first_error: first_error.map(str::to_string),
        }
    }

    pub fn helper(criteria: &[String]) -> Self {
        PreContext::Helper { criteria: criteria.to_vec() }
    }

    /// Render to a block of at most `max_lines` lines (default 10, spec.md
    /// §4.11, configurable via `PRE_CONTEXT_MAX_LINES`).
    pub fn render(&self, max_lines: usize) -> String {
        let mut lines = Vec::new();
        match self {
            PreContext::ProviderSwitch { previous_provider, failure_class, files_touched, first_error } => {
                lines.push("--- PREVIOUS ATTEMPT (provider switch) ---".to_string());
                lines.push(format!("Previous provider: {previous_provider}"));
                lines.push(format!("Failure class: {failure_class}"));
                if !files_touched.is_empty() {
                    lines.push(format!(
                        "Files already created/modified: {}",
                        files_touched.iter().take(3).cloned().collect::<Vec<_>>().join(", ")
                    ));
                }
                if let Some(err) = first_error {
                    lines.push(format!("First error: {err}"));
                }
                lines.push("Do not recreate files that already exist; continue from them.".to_string());
            }
            PreContext::Retry { files_touched, first_error } => {
                lines.push("--- PREVIOUS ATTEMPT (retry) ---".to_string());
                if !files_touched.is_empty() {
                    lines.push(format!(
                        "Files already created/modified: {}",
                        files_touched.iter().take(3).cloned().collect::<Vec<_>>().join(", ")
                    ));
                }
                if let Some(err) = first_error {
                    lines.push(format!("First validation error: {err}"));
                }
                lines.push("Fix only the failed or uncertain criteria listed below.".to_string());
            }
            PreContext::Helper { criteria } => {
                lines.push("--- VERIFICATION REQUEST (helper) ---".to_string());
                for c in criteria.iter().take(5) {
                    lines.push(format!("Uncertain: {c}"));
                }
            }
        }
        lines.truncate(max_lines);
        lines.join("\n")
    }
}

/// Repeated-error guard (spec.md §4.11, §9 S6): if the last 3 failures
/// carry identical error text, stop retrying and block the task.
pub fn repeated_error_guard(recent_errors: &[String]) -> bool {
    if recent_errors.len() < 3 {
        return false;
    }
    let tail = &recent_errors[recent_errors.len() - 3..];
    tail.windows(2).all(|pair| pair[0] == pair[1])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_switch_context_mentions_previous_provider() {
        let ctx = PreContext::provider_switch("codex", "RateLimit", &["src/a.ts".into()], None);
        let rendered = ctx.render(10);
        assert!(rendered.contains("codex"));
        assert!(rendered.contains("RateLimit"));
        assert!(rendered.contains("src/a.ts"));
    }

    #[test]
    fn render_respects_max_lines() {
        let ctx = PreContext::helper(&vec![
            "c1".into(), "c2".into(), "c3".into(), "c4".into(), "c5".into(), "c6".into(),
        ]);
        let rendered = ctx.render(3);
        assert_eq!(rendered.lines().count(), 3);
    }

    #[test]
    fn guard_triggers_on_three_identical_errors() {
        let errors = vec![
            "Artifact not found: src/X.ts".to_string(),
            "Artifact not found: src/X.ts".to_string(),
            "Artifact not found: src/X.ts".to_string(),
        ];
        assert!(repeated_error_guard(&errors));
    }

    #[test]
    fn guard_does_not_trigger_on_varied_errors() {
        let errors = vec![
            "Artifact not found: src/X.ts".to_string(),
            "Artifact not found: src/Y.ts".to_string(),
            "Artifact not found: src/X.ts".to_string(),
        ];
        assert!(!repeated_error_guard(&errors));
    }

    #[test]
    fn guard_does_not_trigger_with_fewer_than_three() {
        let errors = vec!["same".to_string(), "same".to_string()];
        assert!(!repeated_error_guard(&errors));
    }
}
