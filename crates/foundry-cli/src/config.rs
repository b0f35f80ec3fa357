//! Configuration file management for foundry.
//!
//! Provides a TOML-based config file at `~/.config/foundry/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use foundry_core::session::SessionPolicy;
use foundry_db::config::DbConfig;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    #[serde(default)]
    pub provider: ProviderSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub retry: RetrySection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ProviderSection {
    /// Ordered fallback priority (spec.md §6 `PROVIDER_PRIORITY`).
    #[serde(default)]
    pub priority: Vec<String>,
    /// `CONTEXT_LIMIT_<provider>` entries, keyed by provider name.
    #[serde(default)]
    pub context_limits: HashMap<String, i64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SessionSection {
    pub error_limit: Option<i32>,
    pub max_age_ms: Option<i64>,
    pub disable_reuse: Option<bool>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RetrySection {
    pub interrogation_max_rounds: Option<u32>,
    pub pre_context_enabled: Option<bool>,
    pub pre_context_max_lines: Option<usize>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the foundry config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/foundry` or `~/.config/foundry`.
/// We intentionally ignore the platform-specific `dirs::config_dir()`
/// (which returns `~/Library/Application Support` on macOS).
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("foundry");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("foundry")
}

/// Return the path to the foundry config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use by the control loop.
#[derive(Debug)]
pub struct FoundryConfig {
    pub db_config: DbConfig,
    pub provider_priority: Vec<String>,
    pub session_policy: SessionPolicy,
    pub pre_context_enabled: bool,
    pub pre_context_max_lines: usize,
    pub max_interrogation_rounds: u32,
}

impl FoundryConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - DB URL: `cli_db_url` > `FOUNDRY_DATABASE_URL` env > `config_file.database.url` > default.
    /// - Everything else falls back to the config file's `[provider]`/`[session]`/`[retry]`
    ///   sections, then to the control loop's own sane defaults.
    pub fn resolve(cli_db_url: Option<&str>) -> Result<Self> {
        let file_config = load_config().ok();

        let db_url = if let Some(url) = cli_db_url {
            url.to_string()
        } else if let Ok(url) = std::env::var("FOUNDRY_DATABASE_URL") {
            url
        } else if let Some(ref cfg) = file_config {
            cfg.database.url.clone()
        } else {
            DbConfig::from_env().database_url
        };
        let db_config = DbConfig::new(db_url);

        let default_loop = foundry_core::control_loop::ControlLoopConfig::default();

        let provider_priority = file_config
            .as_ref()
            .map(|c| c.provider.priority.clone())
            .filter(|p| !p.is_empty())
            .unwrap_or(default_loop.provider_priority);

        let mut session_policy = SessionPolicy::default();
        if let Some(cfg) = &file_config {
            session_policy.context_limits = cfg.provider.context_limits.clone();
            if let Some(limit) = cfg.session.error_limit {
                session_policy.error_limit = limit;
            }
            if let Some(ms) = cfg.session.max_age_ms {
                session_policy.max_age = chrono::Duration::milliseconds(ms);
            }
            if let Some(disable) = cfg.session.disable_reuse {
                session_policy.disable_reuse = disable;
            }
        }

        let pre_context_enabled = file_config
            .as_ref()
            .and_then(|c| c.retry.pre_context_enabled)
            .unwrap_or(default_loop.pre_context_enabled);
        let pre_context_max_lines = file_config
            .as_ref()
            .and_then(|c| c.retry.pre_context_max_lines)
            .unwrap_or(default_loop.pre_context_max_lines);
        let max_interrogation_rounds = file_config
            .as_ref()
            .and_then(|c| c.retry.interrogation_max_rounds)
            .unwrap_or(default_loop.max_interrogation_rounds);

        Ok(Self {
            db_config,
            provider_priority,
            session_policy,
            pre_context_enabled,
            pre_context_max_lines,
            max_interrogation_rounds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        crate::test_util::lock_env()
    }

    #[test]
    fn resolve_with_cli_flag_overrides_all() {
        let _lock = lock_env();
        unsafe { std::env::set_var("FOUNDRY_DATABASE_URL", "postgresql://env:5432/envdb") };

        let config = FoundryConfig::resolve(Some("postgresql://cli:5432/clidb")).unwrap();
        assert_eq!(config.db_config.database_url, "postgresql://cli:5432/clidb");

        unsafe { std::env::remove_var("FOUNDRY_DATABASE_URL") };
    }

    #[test]
    fn resolve_with_env_var_overrides_config_file() {
        let _lock = lock_env();
        unsafe { std::env::set_var("FOUNDRY_DATABASE_URL", "postgresql://env:5432/envdb") };

        let config = FoundryConfig::resolve(None).unwrap();
        assert_eq!(config.db_config.database_url, "postgresql://env:5432/envdb");

        unsafe { std::env::remove_var("FOUNDRY_DATABASE_URL") };
    }

    #[test]
    fn resolve_falls_back_to_control_loop_defaults() {
        let _lock = lock_env();
        unsafe { std::env::remove_var("FOUNDRY_DATABASE_URL") };
        let config = FoundryConfig::resolve(Some("postgresql://x:5432/x")).unwrap();
        assert_eq!(config.provider_priority, vec!["claude".to_string()]);
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(
            path.ends_with("foundry/config.toml"),
            "unexpected config path: {}",
            path.display()
        );
    }
}
