//! Shared test utilities for the drug catalog.
//!
//! This module provides common helper functions for setting up test databases,
//! provisioning a small test source and creating dataset versions with drugs.

use crate::{
    catalog::{
        CodeSystemDefinition, FieldDefinition, LookupItem, NewDrug, SourceSchema,
        dataset_version::{create_queued, mark_done, mark_running},
        drug::create_bulk,
    },
    entities::{AttrKind, ValueType, dataset_version},
    errors::Result,
    importer::{DrugImporter, provision_metadata},
    search::EngineContext,
};
use async_trait::async_trait;
use sea_orm::DatabaseConnection;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Source name used by all test data.
pub const TEST_SOURCE: &str = "testsource";

static NEXT_PZN: AtomicU64 = AtomicU64::new(1);

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// [`setup_test_db`] behind an `Arc`, for tests sharing the connection with an engine or facade.
pub async fn setup_shared_test_db() -> Result<Arc<DatabaseConnection>> {
    Ok(Arc::new(setup_test_db().await?))
}

/// Routes `tracing` output through the test harness. Safe to call from every test.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// Field definitions of the test source.
///
/// * `manufacturer`: optional, searchable text
/// * `amount`: optional integer
/// * `dispensing`: required lookup, defaults to `OTC`, searchable
/// * `keywords`: searchable list of text
/// * `countries`: list of lookup values
/// * `approved_on`: optional date
pub fn test_field_definitions() -> Vec<FieldDefinition> {
    vec![
        FieldDefinition::new("manufacturer", "Manufacturer", ValueType::Str, AttrKind::Scalar)
            .searchable(),
        FieldDefinition::new("amount", "Amount", ValueType::Int, AttrKind::Scalar),
        FieldDefinition::new("dispensing", "Dispensing", ValueType::Str, AttrKind::Lookup)
            .required()
            .with_default("OTC")
            .searchable(),
        FieldDefinition::new("keywords", "Keywords", ValueType::Str, AttrKind::Multi).searchable(),
        FieldDefinition::new("countries", "Countries", ValueType::Str, AttrKind::MultiLookup),
        FieldDefinition::new("approved_on", "Approved on", ValueType::Date, AttrKind::Scalar),
    ]
}

/// Lookup values of the test source.
pub fn test_lookup_items() -> Vec<LookupItem> {
    vec![
        LookupItem::new("dispensing", "RX", "Prescription only"),
        LookupItem::new("dispensing", "OTC", "Over the counter"),
        LookupItem::new("countries", "DE", "Germany"),
        LookupItem::new("countries", "AT", "Austria"),
    ]
}

/// `PZN` (unique, required) and `ATC` (shared, optional).
pub fn test_code_systems() -> Vec<CodeSystemDefinition> {
    vec![
        CodeSystemDefinition {
            id: "PZN".to_string(),
            name: "Pharmazentralnummer".to_string(),
            country: "Germany".to_string(),
            description: None,
            unique: true,
            optional: false,
        },
        CodeSystemDefinition {
            id: "ATC".to_string(),
            name: "Anatomical Therapeutic Chemical".to_string(),
            country: "International".to_string(),
            description: None,
            unique: false,
            optional: true,
        },
    ]
}

/// Provisions the test metadata and returns the loaded schema.
pub async fn provision_test_metadata(db: &DatabaseConnection) -> Result<SourceSchema> {
    provision_metadata(db, &InMemoryImporter::new("unused", &[])).await?;
    SourceSchema::load(db, TEST_SOURCE).await
}

/// A valid test drug with a unique PZN.
///
/// # Defaults
/// * `manufacturer`: "Test Pharma"
/// * `PZN`: `T` followed by a process-wide counter
pub fn test_drug(trade_name: &str) -> NewDrug {
    let pzn = NEXT_PZN.fetch_add(1, Ordering::Relaxed);
    NewDrug::new(trade_name)
        .with_attr("manufacturer", "Test Pharma")
        .with_code("PZN", &format!("T{pzn:07}"))
}

/// Creates a `done` version without drugs. It is not activated.
pub async fn create_done_version(
    db: &DatabaseConnection,
    source_name: &str,
    version_label: &str,
) -> Result<dataset_version::Model> {
    let version = create_queued(db, source_name, version_label, None).await?;
    mark_running(db, version.id).await?;
    mark_done(db, version.id).await
}

/// Creates a `done` version of [`TEST_SOURCE`] holding one [`test_drug`] per name.
/// It is not activated.
pub async fn create_version_with_drugs(
    db: &DatabaseConnection,
    schema: &SourceSchema,
    version_label: &str,
    trade_names: &[&str],
) -> Result<dataset_version::Model> {
    let version = create_queued(db, TEST_SOURCE, version_label, None).await?;
    mark_running(db, version.id).await?;
    let rows = trade_names.iter().map(|name| test_drug(name)).collect();
    create_bulk(db, schema, version.id, rows).await?;
    mark_done(db, version.id).await
}

/// Engine context over `db` for [`TEST_SOURCE`] with a fresh schema cache.
pub fn test_engine_context(db: &Arc<DatabaseConnection>) -> EngineContext {
    EngineContext::new(Arc::clone(db), TEST_SOURCE)
}

/// Importer serving a fixed release of [`TEST_SOURCE`] from memory.
#[derive(Debug, Clone)]
pub struct InMemoryImporter {
    version_label: String,
    drugs: Vec<NewDrug>,
    delay: Option<Duration>,
}

impl InMemoryImporter {
    /// A release labelled `version_label` with one [`test_drug`] per name.
    pub fn new(version_label: &str, trade_names: &[&str]) -> Self {
        Self {
            version_label: version_label.to_string(),
            drugs: trade_names.iter().map(|name| test_drug(name)).collect(),
            delay: None,
        }
    }

    /// Appends a drug after the named ones.
    #[must_use]
    pub fn with_drug(mut self, drug: NewDrug) -> Self {
        self.drugs.push(drug);
        self
    }

    /// Sleeps this long before yielding the drugs.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl DrugImporter for InMemoryImporter {
    fn name(&self) -> &'static str {
        "in_memory"
    }

    fn dataset_name(&self) -> &str {
        TEST_SOURCE
    }

    fn get_attr_field_definitions(&self) -> Vec<FieldDefinition> {
        test_field_definitions()
    }

    fn get_lookup_values(&self) -> Vec<LookupItem> {
        test_lookup_items()
    }

    fn get_code_definitions(&self) -> Vec<CodeSystemDefinition> {
        test_code_systems()
    }

    async fn version_label(&self, _source: &Path) -> Result<String> {
        Ok(self.version_label.clone())
    }

    async fn load_drugs(&self, _source: &Path) -> Result<Vec<NewDrug>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.drugs.clone())
    }
}
