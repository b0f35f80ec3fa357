//! Database connection configuration.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Default connection string used when nothing else is configured.
const DEFAULT_URL: &str = "postgresql://localhost:5432/foundry";

/// Database connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    pub database_url: String,
}

impl DbConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            database_url: url.into(),
        }
    }

    /// Resolve from the `FOUNDRY_DATABASE_URL` environment variable,
    /// falling back to [`DEFAULT_URL`].
    pub fn from_env() -> Self {
        let database_url =
            std::env::var("FOUNDRY_DATABASE_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
        Self { database_url }
    }

    /// Extract the database name from the connection URL (the final path segment).
    pub fn database_name(&self) -> Result<&str> {
        let without_query = self
            .database_url
            .split('?')
            .next()
            .unwrap_or(&self.database_url);
        let name = without_query
            .rsplit('/')
            .next()
            .context("database URL has no path segment")?;
        if name.is_empty() {
            bail!("database URL has an empty database name");
        }
        Ok(name)
    }

    /// The maintenance (`postgres`) database URL used to create/drop the
    /// target database.
    pub fn maintenance_url(&self) -> String {
        let without_query = self
            .database_url
            .split('?')
            .next()
            .unwrap_or(&self.database_url);
        let prefix = without_query
            .rsplitn(2, '/')
            .nth(1)
            .unwrap_or(without_query);
        format!("{prefix}/postgres")
    }
}
