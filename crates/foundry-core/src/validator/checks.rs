//! Rule-based file checks (spec.md §4.8 "Rule-based file checks"): the
//! registry of `criterion -> check list` primitives the Coding pipeline
//! falls back to once cache lookup and AST matching are exhausted.

use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;

/// Safety caps shared by every check (spec.md §4.8, §5 "file I/O during
/// validation (bounded by caps: 2000 files, 10MiB aggregate, 512KiB per
/// file)").
pub const MAX_FILES_SCANNED: usize = 2000;
pub const MAX_TOTAL_BYTES: u64 = 10 * 1024 * 1024;
pub const MAX_FILE_BYTES: u64 = 512 * 1024;

/// Extensions eligible for content scans (`grep_*`, keyword fallback);
/// anything else is skipped even if it matches a glob.
pub const SAFE_EXTENSIONS: &[&str] = &[
    "rs", "ts", "tsx", "js", "jsx", "py", "go", "java", "rb", "md", "txt", "toml", "json", "yaml",
    "yml", "html", "css",
];

/// One rule-based check (spec.md §4.8 check-type list).
#[derive(Debug, Clone)]
pub enum CheckSpec {
    FileExists(String),
    FileNotExists(String),
    DirectoryExists(String),
    JsonContains { path: String, key_path: String, value: Option<serde_json::Value> },
    JsonNotContains { path: String, key_path: String, value: Option<serde_json::Value> },
    FileCount { glob: String, min: Option<usize>, max: Option<usize> },
    GrepFound { path: String, pattern: String },
    GrepNotFound { path: String, pattern: String },
}

/// Outcome of running a single check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Pass,
    Fail(String),
    /// Safety cap exceeded or a catastrophic-backtracking pattern detected;
    /// the validator treats this the same as a fail but with a distinct
    /// reason (spec.md §4.8: "A check fails if ... safety caps are
    /// exceeded").
    Rejected(String),
}

fn has_safe_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SAFE_EXTENSIONS.contains(&e))
        .unwrap_or(false)
}

/// Heuristic catastrophic-backtracking detector: nested quantifiers like
/// `(a+)+` or `(a*)*` are the classic ReDoS shape (spec.md §4.8: "catastrophic-
/// backtracking patterns are detected in the regex").
fn looks_catastrophic(pattern: &str) -> bool {
    let nested = Regex::new(r"\([^)]*[+*][^)]*\)[+*]").unwrap();
    nested.is_match(pattern)
}

fn compile_safe_regex(pattern: &str) -> Result<Regex, CheckOutcome> {
    if looks_catastrophic(pattern) {
        return Err(CheckOutcome::Rejected(format!(
            "regex rejected: catastrophic-backtracking shape detected in {pattern:?}"
        )));
    }
    Regex::new(pattern).map_err(|e| CheckOutcome::Rejected(format!("invalid regex {pattern:?}: {e}")))
}

fn read_capped(path: &Path) -> Result<String, CheckOutcome> {
    let meta = std::fs::metadata(path)
        .map_err(|_| CheckOutcome::Fail(format!("file not found: {}", path.display())))?;
    if meta.len() > MAX_FILE_BYTES {
        return Err(CheckOutcome::Rejected(format!(
            "{} exceeds the {MAX_FILE_BYTES}-byte per-file cap",
            path.display()
        )));
    }
    std::fs::read_to_string(path)
        .map_err(|e| CheckOutcome::Rejected(format!("failed to read {}: {e}", path.display())))
}

/// Run one check rooted at `sandbox_root`.
pub fn run_check(sandbox_root: &Path, check: &CheckSpec) -> Result<CheckOutcome> {
    let outcome = match check {
        CheckSpec::FileExists(p) => {
            let full = sandbox_root.join(p);
            if full.is_file() {
                CheckOutcome::Pass
            } else {
                CheckOutcome::Fail(format!("expected file to exist: {p}"))
            }
        }
        CheckSpec::FileNotExists(p) => {
            let full = sandbox_root.join(p);
            if full.exists() {
                CheckOutcome::Fail(format!("expected file to NOT exist: {p}"))
            } else {
                CheckOutcome::Pass
            }
        }
        CheckSpec::DirectoryExists(p) => {
            let full = sandbox_root.join(p);
            if full.is_dir() {
                CheckOutcome::Pass
            } else {
                CheckOutcome::Fail(format!("expected directory to exist: {p}"))
            }
        }
        CheckSpec::JsonContains { path, key_path, value } => {
            json_check(sandbox_root, path, key_path, value.as_ref(), true)?
        }
        CheckSpec::JsonNotContains { path, key_path, value } => {
            json_check(sandbox_root, path, key_path, value.as_ref(), false)?
        }
        CheckSpec::FileCount { glob: pattern, min, max } => {
            let full_pattern = sandbox_root.join(pattern);
            let matches: Vec<_> = glob::glob(&full_pattern.to_string_lossy())
                .context("invalid glob pattern")?
                .filter_map(Result::ok)
                .collect();
            if matches.len() > MAX_FILES_SCANNED {
                CheckOutcome::Rejected(format!(
                    "file_count glob matched {} files, exceeding the {MAX_FILES_SCANNED} cap",
                    matches.len()
                ))
            } else {
                let count = matches.len();
                let min_ok = min.map(|m| count >= m).unwrap_or(true);
                let max_ok = max.map(|m| count <= m).unwrap_or(true);
                if min_ok && max_ok {
                    CheckOutcome::Pass
                } else {
                    CheckOutcome::Fail(format!(
                        "file_count({pattern}) = {count}, outside bounds [{min:?}, {max:?}]"
                    ))
                }
            }
        }
        CheckSpec::GrepFound { path, pattern } => grep_check(sandbox_root, path, pattern, true)?,
        CheckSpec::GrepNotFound { path, pattern } => grep_check(sandbox_root, path, pattern, false)?,
    };
    Ok(outcome)
}

fn json_check(
    sandbox_root: &Path,
    path: &str,
    key_path: &str,
    expected: Option<&serde_json::Value>,
    want_present: bool,
) -> Result<CheckOutcome> {
    let full = sandbox_root.join(path);
    let text = match read_capped(&full) {
        Ok(t) => t,
        Err(outcome) => return Ok(outcome),
    };
    let parsed: serde_json::Value = match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(e) => return Ok(CheckOutcome::Fail(format!("{path} is not valid JSON: {e}"))),
    };

    let mut cursor = &parsed;
    let mut found = true;
    for segment in key_path.split('.').filter(|s| !s.is_empty()) {
        match cursor.get(segment) {
            Some(next) => cursor = next,
            None => {
                found = false;
                break;
            }
        }
    }

    let matches = found && expected.map(|e| cursor == e).unwrap_or(true);
    let pass = matches == want_present;
    if pass {
        Ok(CheckOutcome::Pass)
    } else if want_present {
        Ok(CheckOutcome::Fail(format!("{path}: key path {key_path:?} did not match the expected value")))
    } else {
        Ok(CheckOutcome::Fail(format!("{path}: key path {key_path:?} was present but should not be")))
    }
}

fn grep_check(sandbox_root: &Path, path: &str, pattern: &str, want_found: bool) -> Result<CheckOutcome> {
    let full = sandbox_root.join(path);
    if !has_safe_extension(&full) {
        return Ok(CheckOutcome::Rejected(format!("{path} does not have a safe extension for content scans")));
    }
    let re = match compile_safe_regex(pattern) {
        Ok(re) => re,
        Err(outcome) => return Ok(outcome),
    };
    let text = match read_capped(&full) {
        Ok(t) => t,
        Err(outcome) => return Ok(outcome),
    };
    let found = re.is_match(&text);
    if found == want_found {
        Ok(CheckOutcome::Pass)
    } else if want_found {
        Ok(CheckOutcome::Fail(format!("pattern {pattern:?} not found in {path}")))
    } else {
        Ok(CheckOutcome::Fail(format!("pattern {pattern:?} unexpectedly found in {path}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_exists_passes_for_real_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), b"fn main() {}").unwrap();
        let outcome = run_check(dir.path(), &CheckSpec::FileExists("a.rs".into())).unwrap();
        assert_eq!(outcome, CheckOutcome::Pass);
    }

    #[test]
    fn file_exists_fails_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run_check(dir.path(), &CheckSpec::FileExists("missing.rs".into())).unwrap();
        assert!(matches!(outcome, CheckOutcome::Fail(_)));
    }

    #[test]
    fn json_contains_matches_nested_key() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pkg.json"), r#"{"name":"foundry","deps":{"tokio":"1"}}"#).unwrap();
        let outcome = run_check(
            dir.path(),
            &CheckSpec::JsonContains {
                path: "pkg.json".into(),
                key_path: "deps.tokio".into(),
                value: Some(serde_json::json!("1")),
            },
        )
        .unwrap();
        assert_eq!(outcome, CheckOutcome::Pass);
    }

    #[test]
    fn grep_found_matches_pattern() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.rs"), "pub fn handle_login() {}\n").unwrap();
        let outcome = run_check(
            dir.path(),
            &CheckSpec::GrepFound { path: "lib.rs".into(), pattern: "fn handle_login".into() },
        )
        .unwrap();
        assert_eq!(outcome, CheckOutcome::Pass);
    }

    #[test]
    fn grep_rejects_catastrophic_pattern() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.rs"), "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").unwrap();
        let outcome = run_check(
            dir.path(),
            &CheckSpec::GrepFound { path: "lib.rs".into(), pattern: "(a+)+b".into() },
        )
        .unwrap();
        assert!(matches!(outcome, CheckOutcome::Rejected(_)));
    }

    #[test]
    fn grep_rejects_unsafe_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("binary.exe"), b"\x00\x01").unwrap();
        let outcome = run_check(
            dir.path(),
            &CheckSpec::GrepFound { path: "binary.exe".into(), pattern: "anything".into() },
        )
        .unwrap();
        assert!(matches!(outcome, CheckOutcome::Rejected(_)));
    }

    #[test]
    fn file_count_respects_bounds() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), b"").unwrap();
        std::fs::write(dir.path().join("b.rs"), b"").unwrap();
        let outcome = run_check(
            dir.path(),
            &CheckSpec::FileCount { glob: "*.rs".into(), min: Some(2), max: Some(2) },
        )
        .unwrap();
        assert_eq!(outcome, CheckOutcome::Pass);
    }
}
