// ⚙️ Migration Config - TOML file → environment → CLI flags
//
// Later layers win. Every field has a default, so an empty file (or no file)
// is a valid configuration: SQLite at ./migration.db, verification off.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::verification::ProviderKind;

pub const DEFAULT_DATABASE: &str = "migration.db";
pub const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 30;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UspsCredentials {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SmartyCredentials {
    pub auth_id: Option<String>,
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    pub database: PathBuf,
    pub provider: ProviderKind,
    pub http_timeout_seconds: u64,
    pub usps: UspsCredentials,
    pub smarty: SmartyCredentials,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        MigrationConfig {
            database: PathBuf::from(DEFAULT_DATABASE),
            provider: ProviderKind::None,
            http_timeout_seconds: DEFAULT_HTTP_TIMEOUT_SECONDS,
            usps: UspsCredentials::default(),
            smarty: SmartyCredentials::default(),
        }
    }
}

impl MigrationConfig {
    /// Parse a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Optional file, then process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.with_env(|name| std::env::var(name).ok())
    }

    /// Overlay environment variables read through `lookup`. Blank values are
    /// ignored.
    pub fn with_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(database) = var("MIGRATION_DATABASE") {
            self.database = PathBuf::from(database);
        }
        if let Some(provider) = var("ADDRESS_VERIFICATION_PROVIDER") {
            self.provider = ProviderKind::from_name(&provider)?;
        }
        if let Some(timeout) = var("HTTP_TIMEOUT_SECONDS") {
            self.http_timeout_seconds = parse_timeout(&timeout)?;
        }
        if let Some(id) = var("USPS_CLIENT_ID") {
            self.usps.client_id = Some(id);
        }
        if let Some(secret) = var("USPS_CLIENT_SECRET") {
            self.usps.client_secret = Some(secret);
        }
        if let Some(id) = var("SMARTY_AUTH_ID") {
            self.smarty.auth_id = Some(id);
        }
        if let Some(token) = var("SMARTY_AUTH_TOKEN") {
            self.smarty.auth_token = Some(token);
        }

        Ok(self)
    }
}

fn parse_timeout(raw: &str) -> Result<u64, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(secs),
        _ => Err(ConfigError::InvalidValue {
            name: "HTTP_TIMEOUT_SECONDS",
            value: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = MigrationConfig::default();
        assert_eq!(config.database, PathBuf::from("migration.db"));
        assert_eq!(config.provider, ProviderKind::None);
        assert_eq!(config.http_timeout_seconds, 30);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = MigrationConfig::from_toml(
            r#"
            provider = "usps"

            [usps]
            client_id = "abc"
            "#,
        )
        .unwrap();

        assert_eq!(config.provider, ProviderKind::Usps);
        assert_eq!(config.usps.client_id.as_deref(), Some("abc"));
        assert!(config.usps.client_secret.is_none());
        assert_eq!(config.http_timeout_seconds, 30);
        assert_eq!(config.database, PathBuf::from("migration.db"));
    }

    #[test]
    fn test_env_overrides_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "database = \"from-file.db\"\nprovider = \"mock\"").unwrap();

        let env: HashMap<&str, &str> = [
            ("MIGRATION_DATABASE", "from-env.db"),
            ("ADDRESS_VERIFICATION_PROVIDER", "smarty"),
            ("SMARTY_AUTH_ID", "id"),
            ("SMARTY_AUTH_TOKEN", "token"),
            ("HTTP_TIMEOUT_SECONDS", "5"),
            ("USPS_CLIENT_ID", "   "),
        ]
        .into_iter()
        .collect();

        let config = MigrationConfig::from_file(file.path())
            .unwrap()
            .with_env(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.database, PathBuf::from("from-env.db"));
        assert_eq!(config.provider, ProviderKind::Smarty);
        assert_eq!(config.smarty.auth_id.as_deref(), Some("id"));
        assert_eq!(config.http_timeout_seconds, 5);
        assert!(config.usps.client_id.is_none());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let bad_provider = MigrationConfig::default()
            .with_env(|name| (name == "ADDRESS_VERIFICATION_PROVIDER").then(|| "fedex".to_string()));
        assert!(matches!(bad_provider, Err(ConfigError::UnknownProvider(_))));

        let bad_timeout = MigrationConfig::default()
            .with_env(|name| (name == "HTTP_TIMEOUT_SECONDS").then(|| "0".to_string()));
        assert!(matches!(bad_timeout, Err(ConfigError::InvalidValue { .. })));

        assert!(matches!(
            MigrationConfig::from_toml("provider = 3"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            MigrationConfig::from_file(Path::new("/nonexistent/migrate.toml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
