use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

const DEFAULT_DB_PATH: &str = "warbler.db";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unsupported database url '{0}': expected a sqlite path or sqlite:// url")]
    UnsupportedUrl(String),

    #[error("unknown delete policy '{0}': expected 'restrict' or 'cascade'")]
    UnknownDeletePolicy(String),
}

/// What happens to a user's messages, likes and follow edges when the user is
/// deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeletePolicy {
    /// Refuse to delete a user that still owns rows.
    #[default]
    Restrict,
    /// Delete the user's dependent rows in the same transaction.
    Cascade,
}

impl FromStr for DeletePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "restrict" => Ok(Self::Restrict),
            "cascade" => Ok(Self::Cascade),
            other => Err(ConfigError::UnknownDeletePolicy(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    Memory,
    File(PathBuf),
}

impl StoreLocation {
    /// Accepts a bare path, `sqlite://path`, `sqlite:path`, `:memory:` or
    /// `sqlite::memory:`.
    pub fn parse(url: &str) -> Result<Self, ConfigError> {
        let url = url.trim();
        let rest = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .unwrap_or(url);

        if rest == ":memory:" {
            return Ok(Self::Memory);
        }
        if rest.is_empty() || rest.contains("://") {
            return Err(ConfigError::UnsupportedUrl(url.to_string()));
        }
        Ok(Self::File(PathBuf::from(rest)))
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub location: StoreLocation,
    pub delete_policy: DeletePolicy,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            location: StoreLocation::File(PathBuf::from(DEFAULT_DB_PATH)),
            delete_policy: DeletePolicy::default(),
        }
    }
}

impl DatabaseConfig {
    /// Reads `WARBLER_DATABASE_URL` (or `DATABASE_URL`) and
    /// `WARBLER_DELETE_POLICY` from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup("WARBLER_DATABASE_URL")
            .or_else(|| lookup("DATABASE_URL"))
            .unwrap_or_else(|| DEFAULT_DB_PATH.into());

        let delete_policy = match lookup("WARBLER_DELETE_POLICY") {
            Some(raw) => raw.parse()?,
            None => DeletePolicy::default(),
        };

        Ok(Self {
            location: StoreLocation::parse(&url)?,
            delete_policy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<DatabaseConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        DatabaseConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_to_local_file_and_restrict() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.location, StoreLocation::File(PathBuf::from("warbler.db")));
        assert_eq!(config.delete_policy, DeletePolicy::Restrict);
    }

    #[test]
    fn warbler_url_wins_over_generic_url() {
        let config = config_from(&[
            ("DATABASE_URL", "sqlite://other.db"),
            ("WARBLER_DATABASE_URL", "sqlite://warbler-test.db"),
        ])
        .unwrap();
        assert_eq!(
            config.location,
            StoreLocation::File(PathBuf::from("warbler-test.db"))
        );
    }

    #[test]
    fn falls_back_to_generic_database_url() {
        let config = config_from(&[("DATABASE_URL", "sqlite:///tmp/warbler-test.db")]).unwrap();
        assert_eq!(
            config.location,
            StoreLocation::File(PathBuf::from("/tmp/warbler-test.db"))
        );
        assert_eq!(config.delete_policy, DeletePolicy::Restrict);
    }

    #[test]
    fn parses_memory_urls() {
        assert_eq!(StoreLocation::parse(":memory:").unwrap(), StoreLocation::Memory);
        assert_eq!(
            StoreLocation::parse("sqlite::memory:").unwrap(),
            StoreLocation::Memory
        );
    }

    #[test]
    fn rejects_foreign_schemes() {
        assert_eq!(
            StoreLocation::parse("postgresql:///warbler-test"),
            Err(ConfigError::UnsupportedUrl("postgresql:///warbler-test".into()))
        );
    }

    #[test]
    fn delete_policy_is_case_insensitive() {
        let config = config_from(&[("WARBLER_DELETE_POLICY", "Cascade")]).unwrap();
        assert_eq!(config.delete_policy, DeletePolicy::Cascade);

        let err = config_from(&[("WARBLER_DELETE_POLICY", "orphan")]).unwrap_err();
        assert_eq!(err, ConfigError::UnknownDeletePolicy("orphan".into()));
    }
}
