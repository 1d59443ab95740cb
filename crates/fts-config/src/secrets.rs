//! Runtime secret resolution.
//!
//! # Contract
//! - Config YAML stores only **env var NAMES** (`store.database_url_env`).
//! - Callers invoke [`resolve_secrets`] once at startup and pass the result to
//!   constructors; no other module reads credentials from the environment.
//! - `Debug` redacts values; errors name the env var, never its value.

use anyhow::{bail, Result};

use crate::ServiceConfig;

/// Secrets resolved from the environment for one process.
#[derive(Clone)]
pub struct ResolvedSecrets {
    /// Env var the URL was (or would have been) read from.
    pub database_url_env: String,
    /// Postgres connection URL. `None` if the named env var was absent or empty.
    pub database_url: Option<String>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field("database_url_env", &self.database_url_env)
            .field("database_url", &self.database_url.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

impl ResolvedSecrets {
    /// The database URL, or an error naming the env var that should hold it.
    pub fn require_database_url(&self) -> Result<&str> {
        match self.database_url.as_deref() {
            Some(url) => Ok(url),
            None => bail!(
                "SECRETS_MISSING: required env var '{}' (database url) is not set or empty",
                self.database_url_env
            ),
        }
    }
}

/// Returns `None` if the variable is unset or blank.
fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

pub fn resolve_secrets(cfg: &ServiceConfig) -> ResolvedSecrets {
    let name = cfg.store.database_url_env.trim().to_string();
    ResolvedSecrets {
        database_url: resolve_env(&name),
        database_url_env: name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_never_prints_the_url() {
        let s = ResolvedSecrets {
            database_url_env: "FTS_DATABASE_URL".to_string(),
            database_url: Some("postgres://fts:hunter2@db/fts".to_string()),
        };
        let dbg = format!("{s:?}");
        assert!(dbg.contains("<REDACTED>"));
        assert!(!dbg.contains("hunter2"));
    }

    #[test]
    fn missing_url_error_names_the_env_var() {
        let mut cfg = ServiceConfig::default();
        cfg.store.database_url_env = "FTS_TEST_SECRETS_UNSET_9F2C".to_string();
        let s = resolve_secrets(&cfg);
        let err = s.require_database_url().unwrap_err().to_string();
        assert!(err.contains("FTS_TEST_SECRETS_UNSET_9F2C"), "got: {err}");
    }
}
