//! Catalog configuration loading from `catalog.toml`.
//!
//! The file is optional: every key has a default, and a handful of environment
//! variables override the file so deployments can be tuned without editing it.

use crate::errors::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "catalog.toml";

fn default_importer() -> String {
    "toml_fixture".to_string()
}

fn default_search_engine() -> String {
    "generic_sql".to_string()
}

const fn default_true() -> bool {
    true
}

/// Configuration structure representing the entire `catalog.toml` file
#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    /// Database URL, falls back to `DATABASE_URL` and then to a local `SQLite` file
    #[serde(default)]
    pub database_url: Option<String>,
    /// Registry name of the importer plugin that owns the catalog's source
    #[serde(default = "default_importer")]
    pub importer: String,
    /// Registry name of the search engine to serve queries with
    #[serde(default = "default_search_engine")]
    pub search_engine: String,
    /// Source feed to import on startup
    #[serde(default)]
    pub import_source: Option<PathBuf>,
    /// Make a freshly imported version the current one
    #[serde(default = "default_true")]
    pub activate_after_import: bool,
    /// Mark an import `failed` when it runs longer than this
    #[serde(default)]
    pub import_timeout_secs: Option<u64>,
    /// Delete superseded vendor versions after a successful import
    #[serde(default)]
    pub purge_obsolete_versions: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            importer: default_importer(),
            search_engine: default_search_engine(),
            import_source: None,
            activate_after_import: true,
            import_timeout_secs: None,
            purge_obsolete_versions: false,
        }
    }
}

impl CatalogConfig {
    /// Database URL after applying the `DATABASE_URL` fallback.
    #[must_use]
    pub fn database_url(&self) -> String {
        self.database_url
            .clone()
            .unwrap_or_else(super::database::get_database_url)
    }

    /// Import timeout as a [`Duration`].
    #[must_use]
    pub fn import_timeout(&self) -> Option<Duration> {
        self.import_timeout_secs.map(Duration::from_secs)
    }

    /// Applies `DATABASE_URL`, `DRUG_IMPORTER`, `DRUG_SEARCH_ENGINE` and `DRUG_IMPORT_SOURCE`.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database_url = Some(url);
        }
        if let Ok(importer) = std::env::var("DRUG_IMPORTER") {
            self.importer = importer;
        }
        if let Ok(engine) = std::env::var("DRUG_SEARCH_ENGINE") {
            self.search_engine = engine;
        }
        if let Ok(source) = std::env::var("DRUG_IMPORT_SOURCE") {
            self.import_source = Some(PathBuf::from(source));
        }
        self
    }
}

/// Loads catalog configuration from a TOML file
///
/// # Errors
/// Returns an error if:
/// - The file cannot be read
/// - The TOML syntax is invalid
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CatalogConfig> {
    let path_ref = path.as_ref();
    debug!("Attempting to load configuration from: {:?}", path_ref);
    let contents = std::fs::read_to_string(path_ref).map_err(|e| Error::Config {
        message: format!("Failed to read config file {}: {e}", path_ref.display()),
    })?;

    toml::from_str(&contents).map_err(|e| Error::Config {
        message: format!("Failed to parse {}: {e}", path_ref.display()),
    })
}

/// Loads the application configuration.
///
/// Reads the file named by `DRUG_CATALOG_CONFIG` (default `./catalog.toml`). A missing
/// file yields the defaults; a malformed one is an error. Environment overrides are
/// applied last.
pub fn load_app_configuration() -> Result<CatalogConfig> {
    let path = std::env::var("DRUG_CATALOG_CONFIG")
        .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);

    let config = if path.exists() {
        info!("Loading catalog configuration from {}", path.display());
        load_config(&path)?
    } else {
        warn!(
            "No configuration file at {}, using defaults",
            path.display()
        );
        CatalogConfig::default()
    };

    Ok(config.with_env_overrides())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_parse_catalog_config() {
        let toml_str = r#"
            database_url = "sqlite::memory:"
            importer = "toml_fixture"
            search_engine = "generic_sql"
            import_source = "data/pharmindex"
            activate_after_import = false
            import_timeout_secs = 600
        "#;

        let config: CatalogConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.database_url.as_deref(), Some("sqlite::memory:"));
        assert_eq!(config.search_engine, "generic_sql");
        assert_eq!(config.import_source, Some(PathBuf::from("data/pharmindex")));
        assert!(!config.activate_after_import);
        assert_eq!(config.import_timeout(), Some(Duration::from_secs(600)));
        assert!(!config.purge_obsolete_versions);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: CatalogConfig = toml::from_str("").unwrap();
        assert_eq!(config.importer, "toml_fixture");
        assert_eq!(config.search_engine, "generic_sql");
        assert!(config.activate_after_import);
        assert!(config.import_source.is_none());
    }

    #[test]
    fn test_load_config_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.toml");
        std::fs::write(&path, "search_engine = [").unwrap();

        let result = load_config(&path);
        assert!(matches!(result, Err(Error::Config { message: _ })));
    }
}
