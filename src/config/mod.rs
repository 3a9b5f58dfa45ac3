/// Catalog configuration loaded from `catalog.toml` and the environment
pub mod catalog;

/// Database configuration and connection management
pub mod database;

pub use catalog::{CatalogConfig, load_app_configuration, load_config};
