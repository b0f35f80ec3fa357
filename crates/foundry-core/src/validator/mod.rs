//! Deterministic Validator (spec.md §4.8). Runs before any helper agent;
//! dispatches to one of three pipelines by task type (§4.6/§9 `Pipeline`).

pub mod ast;
pub mod cache;
pub mod checks;

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::debug;

use foundry_db::models::{Confidence, Task};

use crate::exec;
use crate::prompt::{filter_paths, is_sandbox_safe, Pipeline};
use crate::provider::cli::extract_outermost_json;
use ast::{infer_query_kind, run_query, AstRegistry};
use checks::{run_check, CheckOutcome, CheckSpec};

const TEST_COMMAND_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Result of running the validator against one task dispatch (spec.md §3
/// ValidationReport, §4.8 "Outputs").
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub valid: bool,
    pub confidence: Confidence,
    pub failed_criteria: Vec<String>,
    pub uncertain_criteria: Vec<String>,
    pub criteria_confidence: HashMap<String, Confidence>,
    pub reasoning: Option<String>,
}

impl ValidationReport {
    fn schema_failure(reason: impl Into<String>) -> Self {
        ValidationReport {
            valid: false,
            confidence: Confidence::None,
            failed_criteria: vec![],
            uncertain_criteria: vec![],
            criteria_confidence: HashMap::new(),
            reasoning: Some(reason.into()),
        }
    }
}

/// Criterion text is treated as design/planning rather than code-backed when
/// it uses this vocabulary (spec.md §4.8 "Documentation fallback for design/
/// planning criteria").
fn is_design_style(criterion: &str) -> bool {
    let lower = criterion.to_lowercase();
    ["design", "plan", "architecture", "document", "spec", "proposal"]
        .iter()
        .any(|k| lower.contains(k))
}

/// Parse the agent's JSON object out of raw dispatch output (spec.md §4.8
/// "Parses the agent's JSON from raw output (markdown-fenced or bare
/// braces)").
pub fn parse_agent_json(raw_output: &str) -> Result<serde_json::Value, String> {
    let candidate = extract_outermost_json(raw_output).ok_or_else(|| "no JSON object found in output".to_string())?;
    serde_json::from_str(&candidate).map_err(|e| format!("failed to parse agent JSON: {e}"))
}

fn require_keys(obj: &serde_json::Value, keys: &[&str]) -> Result<(), String> {
    let map = obj.as_object().ok_or("agent output is not a JSON object")?;
    for key in keys {
        if !map.contains_key(*key) {
            return Err(format!("missing required key {key:?}"));
        }
    }
    Ok(())
}

/// Enforce `expected_json_schema`'s exact top-level key set and primitive
/// types (spec.md §4.8 step 2). Schema values are type names: `"string"`,
/// `"number"`, `"boolean"`, `"array"`, `"object"`.
fn enforce_expected_schema(obj: &serde_json::Value, schema: &serde_json::Value) -> Result<(), String> {
    let schema_map = schema.as_object().ok_or("expected_json_schema is not an object")?;
    let obj_map = obj.as_object().ok_or("agent output is not a JSON object")?;

    let schema_keys: std::collections::HashSet<&str> = schema_map.keys().map(String::as_str).collect();
    let obj_keys: std::collections::HashSet<&str> = obj_map.keys().map(String::as_str).collect();
    if schema_keys != obj_keys {
        return Err(format!(
            "top-level key set mismatch: expected {schema_keys:?}, got {obj_keys:?}"
        ));
    }

    for (key, expected_type) in schema_map {
        let Some(value) = obj_map.get(key) else { continue };
        let actual_type = match value {
            serde_json::Value::String(_) => "string",
            serde_json::Value::Number(_) => "number",
            serde_json::Value::Bool(_) => "boolean",
            serde_json::Value::Array(_) => "array",
            serde_json::Value::Object(_) => "object",
            serde_json::Value::Null => "null",
        };
        let expected = expected_type.as_str().unwrap_or("");
        if expected != actual_type {
            return Err(format!("key {key:?}: expected type {expected}, got {actual_type}"));
        }
    }
    Ok(())
}

fn extract_string_array(obj: &serde_json::Value, key: &str) -> Vec<String> {
    obj.get(key)
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

/// Aggregate per-criterion confidence into the overall report (spec.md
/// §4.8 "Each criterion is labelled ... Overall confidence"). Precedence,
/// resolving the spec's listed rules against each other: a non-design `NONE`
/// always drags the whole report to LOW; a design-style `NONE`, or any LOW/
/// MEDIUM, drags it to UNCERTAIN; only all-HIGH yields a valid report.
fn aggregate_confidence(
    results: &[(String, Confidence, bool)],
) -> (Confidence, bool, Vec<String>, Vec<String>) {
    let mut failed = Vec::new();
    let mut uncertain = Vec::new();
    let mut has_none_other = false;
    let mut has_soft_downgrade = false;

    for (criterion, confidence, design_style) in results {
        match confidence {
            Confidence::None => {
                if *design_style {
                    has_soft_downgrade = true;
                    uncertain.push(criterion.clone());
                } else {
                    has_none_other = true;
                    failed.push(criterion.clone());
                }
            }
            Confidence::Low | Confidence::Medium => {
                has_soft_downgrade = true;
                uncertain.push(criterion.clone());
            }
            Confidence::Uncertain | Confidence::High => {}
        }
    }

    let confidence = if has_none_other {
        Confidence::Low
    } else if has_soft_downgrade {
        Confidence::Uncertain
    } else {
        Confidence::High
    };
    let valid = confidence == Confidence::High;
    (confidence, valid, failed, uncertain)
}

/// Read a candidate file's contents under `sandbox_root`, capped the same
/// way `checks::run_check` caps content scans. Returns `None` rather than
/// erroring: a missing or oversized candidate just can't contribute to a
/// positive match.
fn read_candidate(sandbox_root: &Path, path: &str) -> Option<String> {
    let full = sandbox_root.join(path);
    let meta = std::fs::metadata(&full).ok()?;
    if meta.len() > checks::MAX_FILE_BYTES {
        return None;
    }
    std::fs::read_to_string(full).ok()
}

/// Resolve one acceptance criterion to a confidence level, trying cache,
/// AST match, rule-based checks, keyword fallback, then documentation
/// fallback in that order (spec.md §4.8 step 6).
async fn resolve_criterion(
    pool: &PgPool,
    project_id: &str,
    sandbox_root: &Path,
    criterion: &str,
    candidate_paths: &[String],
    ast_registry: &AstRegistry,
    check_registry: &HashMap<String, Vec<CheckSpec>>,
    keyword_registry: &HashMap<String, Vec<String>>,
) -> Confidence {
    let contents: Vec<(String, String)> = candidate_paths
        .iter()
        .filter_map(|p| read_candidate(sandbox_root, p).map(|c| (p.clone(), c)))
        .collect();
    let content_hash = cache::hash_contents(&contents);

    if let Ok(Some(_)) = cache::lookup(pool, project_id, criterion, &content_hash).await {
        return Confidence::High;
    }

    if let Some(kind) = infer_query_kind(criterion) {
        for (path, source) in &contents {
            if run_query(ast_registry, Path::new(path), source, kind, None) {
                let report = serde_json::json!({ "confidence": "high", "via": "ast" });
                let _ = cache::store(pool, project_id, criterion, &content_hash, &report).await;
                return Confidence::High;
            }
        }
    }

    if let Some(check_list) = check_registry.get(criterion) {
        let mut all_pass = true;
        for check in check_list {
            match run_check(sandbox_root, check) {
                Ok(CheckOutcome::Pass) => {}
                _ => {
                    all_pass = false;
                    break;
                }
            }
        }
        if all_pass && !check_list.is_empty() {
            let report = serde_json::json!({ "confidence": "high", "via": "rule" });
            let _ = cache::store(pool, project_id, criterion, &content_hash, &report).await;
            return Confidence::High;
        }
    }

    let haystack: String = contents.iter().map(|(_, c)| c.as_str()).collect::<Vec<_>>().join("\n");
    if !haystack.is_empty() {
        if haystack.to_lowercase().contains(&criterion.to_lowercase()) {
            return Confidence::High;
        }
        if let Some(keywords) = keyword_registry.get(criterion) {
            if keywords.iter().any(|k| haystack.to_lowercase().contains(&k.to_lowercase())) {
                return Confidence::Medium;
            }
        }
        let tokens: Vec<&str> = criterion.split_whitespace().filter(|w| w.len() >= 4).collect();
        if !tokens.is_empty() && tokens.iter().all(|t| haystack.to_lowercase().contains(&t.to_lowercase())) {
            return Confidence::Low;
        }
    }

    if is_design_style(criterion) {
        if let Some(found) = scan_documentation(sandbox_root, criterion) {
            return found;
        }
    }

    Confidence::None
}

/// Scan `docs/`, `design/`, `specs/`, and root `.md`/`.txt` files for the
/// criterion phrase or its tokens (spec.md §4.8 "Documentation fallback").
fn scan_documentation(sandbox_root: &Path, criterion: &str) -> Option<Confidence> {
    let mut candidates = Vec::new();
    for dir in ["docs", "design", "specs"] {
        let path = sandbox_root.join(dir);
        if path.is_dir() {
            collect_text_files(&path, &mut candidates);
        }
    }
    if let Ok(entries) = std::fs::read_dir(sandbox_root) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file()
                && path.extension().and_then(|e| e.to_str()).map(|e| e == "md" || e == "txt").unwrap_or(false)
            {
                candidates.push(path);
            }
        }
    }

    let lower_criterion = criterion.to_lowercase();
    let tokens: Vec<&str> = criterion.split_whitespace().filter(|w| w.len() >= 4).collect();
    for path in candidates {
        let Ok(text) = std::fs::read_to_string(&path) else { continue };
        let lower_text = text.to_lowercase();
        if lower_text.contains(&lower_criterion) {
            return Some(Confidence::Medium);
        }
        if !tokens.is_empty() && tokens.iter().all(|t| lower_text.contains(&t.to_lowercase())) {
            return Some(Confidence::Low);
        }
    }
    None
}

fn collect_text_files(dir: &Path, out: &mut Vec<std::path::PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() {
            out.push(path);
        }
    }
}

/// Inputs the Coding pipeline needs beyond the task row itself.
pub struct CodingValidationInput<'a> {
    pub sandbox_root: &'a Path,
    pub raw_output: &'a str,
    pub check_registry: &'a HashMap<String, Vec<CheckSpec>>,
    pub keyword_registry: &'a HashMap<String, Vec<String>>,
}

/// Coding / Implementation / Refactoring / Testing / Configuration /
/// Documentation pipeline (spec.md §4.8 "Coding pipeline").
pub async fn validate_coding(
    pool: &PgPool,
    project_id: &str,
    task: &Task,
    input: CodingValidationInput<'_>,
) -> Result<ValidationReport> {
    let parsed = match parse_agent_json(input.raw_output) {
        Ok(v) => v,
        Err(e) => return Ok(ValidationReport::schema_failure(e)),
    };

    if let Err(e) = require_keys(&parsed, &["status", "files_created", "files_updated", "changes", "neededChanges", "summary"]) {
        return Ok(ValidationReport::schema_failure(e));
    }

    if let Some(schema) = &task.expected_json_schema {
        if let Err(e) = enforce_expected_schema(&parsed, schema) {
            return Ok(ValidationReport::schema_failure(e));
        }
    }

    let ast_registry = AstRegistry::with_builtin_adapters();

    let declared_created = extract_string_array(&parsed, "files_created");
    let declared_updated = extract_string_array(&parsed, "files_updated");
    let required_artifacts: Vec<String> = task
        .required_artifacts
        .as_array()
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();

    let mut all_declared: Vec<String> = declared_created.iter().chain(declared_updated.iter()).cloned().collect();
    all_declared.retain(|p| is_sandbox_safe(p));
    let safe_declared = filter_paths(&all_declared, input.sandbox_root);

    let mut failed = Vec::new();
    let mut candidate_paths: Vec<String> = required_artifacts.clone();
    for p in &declared_created {
        if !candidate_paths.contains(p) {
            candidate_paths.push(p.clone());
        }
    }
    for p in &declared_updated {
        if !candidate_paths.contains(p) {
            candidate_paths.push(p.clone());
        }
    }

    for p in &candidate_paths {
        if !is_sandbox_safe(p) {
            failed.push(format!("Artifact not found: {p}"));
            continue;
        }
        if !input.sandbox_root.join(p).exists() {
            failed.push(format!("Artifact not found: {p}"));
        }
    }
    let _ = safe_declared;

    if let Some(test_command) = &task.test_command {
        let result = exec::run_shell(test_command, input.sandbox_root, TEST_COMMAND_TIMEOUT)
            .await
            .context("failed to execute test_command")?;
        if !result.succeeded() {
            failed.push(format!("test_command failed: {}", result.stderr));
        }
    }

    let criteria: Vec<String> = task
        .acceptance_criteria
        .as_array()
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();

    let mut results = Vec::with_capacity(criteria.len());
    let mut criteria_confidence = HashMap::new();
    for criterion in &criteria {
        let confidence = resolve_criterion(
            pool,
            project_id,
            input.sandbox_root,
            criterion,
            &candidate_paths,
            &ast_registry,
            input.check_registry,
            input.keyword_registry,
        )
        .await;
        debug!(criterion, ?confidence, "resolved acceptance criterion");
        criteria_confidence.insert(criterion.clone(), confidence);
        results.push((criterion.clone(), confidence, is_design_style(criterion)));
    }

    let (mut confidence, mut valid, mut failed_criteria, uncertain_criteria) = aggregate_confidence(&results);
    if !failed.is_empty() {
        valid = false;
        confidence = Confidence::Low.min(confidence);
        failed_criteria.extend(failed);
    }

    Ok(ValidationReport {
        valid,
        confidence,
        failed_criteria,
        uncertain_criteria,
        criteria_confidence,
        reasoning: None,
    })
}

/// Behavioral pipeline (spec.md §4.8 "Behavioral pipeline"): no file checks,
/// no interrogation.
pub fn validate_behavioral(raw_output: &str, intent: &str) -> ValidationReport {
    let parsed = match parse_agent_json(raw_output) {
        Ok(v) => v,
        Err(e) => return ValidationReport::schema_failure(e),
    };
    if let Err(e) = require_keys(&parsed, &["status", "response", "isDirectAnswer", "confidence", "reasoning"]) {
        return ValidationReport::schema_failure(e);
    }

    let status_ok = parsed.get("status").and_then(|v| v.as_str()) == Some("completed");
    let response = parsed.get("response").and_then(|v| v.as_str()).unwrap_or("");
    let mut failed = Vec::new();
    if !status_ok {
        failed.push("status is not completed".to_string());
    }
    if response.trim().is_empty() {
        failed.push("response is empty".to_string());
    }

    let greeting_required = ["greet", "hello"].iter().any(|k| intent.to_lowercase().contains(k));
    if greeting_required {
        let greeting_tokens = ["hello", "hi", "hey", "greetings"];
        let lower = response.to_lowercase();
        if !greeting_tokens.iter().any(|t| lower.contains(t)) {
            failed.push("response does not contain a greeting token".to_string());
        }
    }

    let confidence_score = parsed.get("confidence").and_then(|v| v.as_f64()).unwrap_or(1.0);
    if confidence_score < 0.5 {
        debug!(confidence_score, "behavioral response reports low confidence (warning only)");
    }

    let valid = failed.is_empty();
    ValidationReport {
        valid,
        confidence: if valid { Confidence::High } else { Confidence::Low },
        failed_criteria: failed,
        uncertain_criteria: vec![],
        criteria_confidence: HashMap::new(),
        reasoning: None,
    }
}

/// Verification pipeline (spec.md §4.8 "Verification pipeline").
pub fn validate_verification(raw_output: &str) -> ValidationReport {
    let parsed = match parse_agent_json(raw_output) {
        Ok(v) => v,
        Err(e) => return ValidationReport::schema_failure(e),
    };
    if let Err(e) = require_keys(&parsed, &["status", "findings", "verdict", "reasoning", "issues"]) {
        return ValidationReport::schema_failure(e);
    }

    let status_ok = parsed.get("status").and_then(|v| v.as_str()) == Some("completed");
    let findings_nonempty = parsed.get("findings").and_then(|v| v.as_array()).map(|a| !a.is_empty()).unwrap_or(false);
    let verdict_pass = parsed.get("verdict").and_then(|v| v.as_str()) == Some("pass");

    let mut failed = Vec::new();
    if !status_ok {
        failed.push("status is not completed".to_string());
    }
    if !findings_nonempty {
        failed.push("findings is empty".to_string());
    }
    if !verdict_pass {
        failed.push("verdict is not pass".to_string());
    }

    let valid = failed.is_empty();
    ValidationReport {
        valid,
        confidence: if valid { Confidence::High } else { Confidence::Low },
        failed_criteria: failed,
        uncertain_criteria: vec![],
        criteria_confidence: HashMap::new(),
        reasoning: None,
    }
}

/// Dispatch to the right pipeline for `pipeline` (spec.md §4.8, §9 table
/// lookup by `task_type`).
pub async fn validate(
    pool: &PgPool,
    project_id: &str,
    task: &Task,
    pipeline: Pipeline,
    raw_output: &str,
    coding_extras: CodingValidationInput<'_>,
) -> Result<ValidationReport> {
    match pipeline {
        Pipeline::Coding => validate_coding(pool, project_id, task, coding_extras).await,
        Pipeline::Behavioral => Ok(validate_behavioral(raw_output, &task.intent)),
        Pipeline::Verification => Ok(validate_verification(raw_output)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_from_markdown_fence() {
        let raw = "```json\n{\"status\":\"completed\"}\n```";
        let parsed = parse_agent_json(raw).unwrap();
        assert_eq!(parsed["status"], "completed");
    }

    #[test]
    fn schema_enforcement_rejects_extra_key() {
        let obj = serde_json::json!({"status": "completed", "extra": 1});
        let schema = serde_json::json!({"status": "string"});
        assert!(enforce_expected_schema(&obj, &schema).is_err());
    }

    #[test]
    fn schema_enforcement_rejects_wrong_type() {
        let obj = serde_json::json!({"status": 1});
        let schema = serde_json::json!({"status": "string"});
        assert!(enforce_expected_schema(&obj, &schema).is_err());
    }

    #[test]
    fn schema_enforcement_accepts_matching_shape() {
        let obj = serde_json::json!({"status": "completed", "count": 3});
        let schema = serde_json::json!({"status": "string", "count": "number"});
        assert!(enforce_expected_schema(&obj, &schema).is_ok());
    }

    #[test]
    fn aggregate_all_high_is_valid() {
        let results = vec![
            ("a".to_string(), Confidence::High, false),
            ("b".to_string(), Confidence::High, false),
        ];
        let (confidence, valid, failed, uncertain) = aggregate_confidence(&results);
        assert_eq!(confidence, Confidence::High);
        assert!(valid);
        assert!(failed.is_empty());
        assert!(uncertain.is_empty());
    }

    #[test]
    fn aggregate_none_on_non_design_criterion_is_low() {
        let results = vec![("a".to_string(), Confidence::None, false)];
        let (confidence, valid, failed, _) = aggregate_confidence(&results);
        assert_eq!(confidence, Confidence::Low);
        assert!(!valid);
        assert_eq!(failed, vec!["a".to_string()]);
    }

    #[test]
    fn aggregate_none_on_design_criterion_is_uncertain() {
        let results = vec![("design doc".to_string(), Confidence::None, true)];
        let (confidence, valid, _, uncertain) = aggregate_confidence(&results);
        assert_eq!(confidence, Confidence::Uncertain);
        assert!(!valid);
        assert_eq!(uncertain, vec!["design doc".to_string()]);
    }

    #[test]
    fn aggregate_medium_downgrades_to_uncertain() {
        let results = vec![("a".to_string(), Confidence::Medium, false)];
        let (confidence, valid, _, _) = aggregate_confidence(&results);
        assert_eq!(confidence, Confidence::Uncertain);
        assert!(!valid);
    }

    #[test]
    fn behavioral_requires_greeting_token_for_greet_intent() {
        let raw = r#"{"status":"completed","response":"The weather is nice.","isDirectAnswer":true,"confidence":0.9,"reasoning":"ok"}"#;
        let report = validate_behavioral(raw, "greet the user");
        assert!(!report.valid);
        assert!(report.failed_criteria.iter().any(|f| f.contains("greeting")));
    }

    #[test]
    fn behavioral_passes_with_greeting() {
        let raw = r#"{"status":"completed","response":"Hello there!","isDirectAnswer":true,"confidence":0.9,"reasoning":"ok"}"#;
        let report = validate_behavioral(raw, "greet the user");
        assert!(report.valid);
    }

    #[test]
    fn verification_requires_pass_verdict() {
        let raw = r#"{"status":"completed","findings":["f1"],"verdict":"fail","reasoning":"r","issues":["bug"]}"#;
        let report = validate_verification(raw);
        assert!(!report.valid);
        assert!(report.failed_criteria.iter().any(|f| f.contains("verdict")));
    }

    #[test]
    fn verification_passes_clean() {
        let raw = r#"{"status":"completed","findings":["f1"],"verdict":"pass","reasoning":"r","issues":[]}"#;
        let report = validate_verification(raw);
        assert!(report.valid);
    }
}
