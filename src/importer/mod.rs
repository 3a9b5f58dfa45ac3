//! Importer plugins - turn a vendor feed into catalog rows.
//!
//! A plugin only knows its vendor's file format. It declares the attribute schema, lookup
//! values and code systems of its source, names the release found at a source path, and
//! yields drug rows. Version bookkeeping, validation and persistence are done by
//! [`runner::run_import`].

pub mod registry;
pub mod runner;
pub mod toml_fixture;

use crate::catalog::{CodeSystemDefinition, FieldDefinition, LookupItem, NewDrug};
use crate::errors::Result;
use async_trait::async_trait;
use std::path::Path;

pub use registry::{importer_by_name, importer_names};
pub use runner::{RunImportOptions, provision_metadata, run_import};
pub use toml_fixture::TomlFixtureImporter;

/// A vendor-specific importer.
#[async_trait]
pub trait DrugImporter: Send + Sync {
    /// Registry name the importer is selected by.
    fn name(&self) -> &'static str;

    /// Source name the importer's dataset versions are filed under.
    fn dataset_name(&self) -> &str;

    /// Attribute fields drugs of this source may carry.
    fn get_attr_field_definitions(&self) -> Vec<FieldDefinition>;

    /// Lookup values referenced by lookup fields.
    fn get_lookup_values(&self) -> Vec<LookupItem> {
        Vec::new()
    }

    /// Code systems drugs of this source are identified by.
    fn get_code_definitions(&self) -> Vec<CodeSystemDefinition>;

    /// Lexically orderable label of the release found at `source`.
    async fn version_label(&self, source: &Path) -> Result<String>;

    /// Reads every drug of the release found at `source`.
    async fn load_drugs(&self, source: &Path) -> Result<Vec<NewDrug>>;
}
