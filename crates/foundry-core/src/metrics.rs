//! Per-task metrics (spec.md §3 TaskMetrics).
//!
//! Unlike every other piece of state, metrics are not stored in Postgres:
//! spec.md §6 describes them as "flushed to an append-only line-delimited
//! metrics log", one file per project. This is the one place in Foundry
//! that writes directly to the filesystem instead of through `foundry-db`.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use foundry_db::models::TaskStatus;

/// Counters accumulated over one task's lifetime (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMetrics {
    pub task_id: String,
    pub iterations: u32,
    pub time_in_execution_ms: u64,
    pub time_in_validation_ms: u64,
    pub time_in_interrogation_ms: u64,
    pub helper_agent_calls: u32,
    pub helper_durations_ms: Vec<u64>,
    pub deterministic_attempts: u32,
    pub deterministic_successes: u32,
    pub cache_hits: u32,
    pub cache_lookups: u32,
    pub prompt_bytes: u64,
    pub response_bytes: u64,
    pub status: TaskStatus,
}

impl TaskMetrics {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            iterations: 0,
            time_in_execution_ms: 0,
            time_in_validation_ms: 0,
            time_in_interrogation_ms: 0,
            helper_agent_calls: 0,
            helper_durations_ms: Vec::new(),
            deterministic_attempts: 0,
            deterministic_successes: 0,
            cache_hits: 0,
            cache_lookups: 0,
            prompt_bytes: 0,
            response_bytes: 0,
            status: TaskStatus::InProgress,
        }
    }

    pub fn cache_hit_rate(&self) -> f64 {
        if self.cache_lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.cache_lookups as f64
        }
    }

    pub fn helper_duration_avg_ms(&self) -> f64 {
        if self.helper_durations_ms.is_empty() {
            0.0
        } else {
            self.helper_durations_ms.iter().sum::<u64>() as f64 / self.helper_durations_ms.len() as f64
        }
    }

    /// p95 helper call duration, nearest-rank over the sorted sample.
    pub fn helper_duration_p95_ms(&self) -> u64 {
        if self.helper_durations_ms.is_empty() {
            return 0;
        }
        let mut sorted = self.helper_durations_ms.clone();
        sorted.sort_unstable();
        let rank = ((sorted.len() as f64) * 0.95).ceil() as usize;
        sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
    }
}

/// Path to a project's metrics log, `metrics:<project_id>.jsonl` (spec.md
/// §6 persistent state layout).
pub fn metrics_log_path(metrics_dir: &Path, project_id: &str) -> PathBuf {
    metrics_dir.join(format!("metrics_{project_id}.jsonl"))
}

/// Append one metrics record as a line of JSON (spec.md §4.12: "flush
/// `TaskMetrics` to disk" on finalization).
pub fn flush(metrics_dir: &Path, project_id: &str, metrics: &TaskMetrics) -> Result<()> {
    std::fs::create_dir_all(metrics_dir)
        .with_context(|| format!("failed to create metrics directory {metrics_dir:?}"))?;
    let path = metrics_log_path(metrics_dir, project_id);
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open metrics log {path:?}"))?;
    let line = serde_json::to_string(metrics).context("failed to serialize TaskMetrics")?;
    writeln!(file, "{line}").with_context(|| format!("failed to append to metrics log {path:?}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_hit_rate_is_zero_with_no_lookups() {
        let m = TaskMetrics::new("t1");
        assert_eq!(m.cache_hit_rate(), 0.0);
    }

    #[test]
    fn cache_hit_rate_computes_ratio() {
        let mut m = TaskMetrics::new("t1");
        m.cache_lookups = 4;
        m.cache_hits = 3;
        assert!((m.cache_hit_rate() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn helper_duration_stats() {
        let mut m = TaskMetrics::new("t1");
        m.helper_durations_ms = vec![100, 200, 300, 400, 500];
        assert_eq!(m.helper_duration_avg_ms(), 300.0);
        assert_eq!(m.helper_duration_p95_ms(), 500);
    }

    #[test]
    fn flush_appends_one_line_per_call() {
        let dir = tempfile::tempdir().unwrap();
        let metrics = TaskMetrics::new("impl_auth_01");
        flush(dir.path(), "proj1", &metrics).unwrap();
        flush(dir.path(), "proj1", &metrics).unwrap();

        let path = metrics_log_path(dir.path(), "proj1");
        let contents = std::fs::read_to_string(path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        for line in contents.lines() {
            let parsed: TaskMetrics = serde_json::from_str(line).unwrap();
            assert_eq!(parsed.task_id, "impl_auth_01");
        }
    }
}
