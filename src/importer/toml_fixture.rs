//! Importer for hand-written TOML datasets, used for demos and local development.
//!
//! A source directory holds two files:
//!
//! - `dataset.toml` with the release label, e.g. `version_label = "2024-03"`
//! - `drugs.toml` with one `[[drugs]]` table per drug, shaped like [`NewDrug`]

use super::DrugImporter;
use crate::{
    catalog::{CodeSystemDefinition, FieldDefinition, LookupItem, NewDrug},
    entities::{AttrKind, ValueType},
    errors::{Error, Result},
};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, instrument};

const DATASET_FILE: &str = "dataset.toml";
const DRUGS_FILE: &str = "drugs.toml";

#[derive(Debug, Deserialize)]
struct DatasetFile {
    version_label: String,
}

#[derive(Debug, Deserialize)]
struct DrugsFile {
    #[serde(default)]
    drugs: Vec<NewDrug>,
}

/// Reads releases laid out as `dataset.toml` + `drugs.toml`.
#[derive(Debug, Clone)]
pub struct TomlFixtureImporter {
    dataset_name: String,
}

impl TomlFixtureImporter {
    /// Registry name of this importer.
    pub const NAME: &'static str = "toml_fixture";
    /// Source name releases are filed under.
    pub const DATASET_NAME: &'static str = "fixture_drugs";

    /// An importer filing releases under [`Self::DATASET_NAME`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            dataset_name: Self::DATASET_NAME.to_string(),
        }
    }

    fn importer_error(message: String) -> Error {
        Error::Importer {
            importer: Self::NAME.to_string(),
            message,
        }
    }

    async fn read_toml<T>(&self, path: &Path) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Self::importer_error(format!("cannot read {}: {e}", path.display())))?;
        toml::from_str(&content)
            .map_err(|e| Self::importer_error(format!("cannot parse {}: {e}", path.display())))
    }
}

impl Default for TomlFixtureImporter {
    fn default() -> Self {
        Self::new()
    }
}

/// `YYYY`, `YYYY-MM` or `YYYY-MM-DD`, so labels sort in release order.
fn is_iso_label(label: &str) -> bool {
    let mut parts = label.split('-');
    let year_ok = parts
        .next()
        .is_some_and(|year| year.len() == 4 && year.bytes().all(|b| b.is_ascii_digit()));
    let rest: Vec<&str> = parts.collect();
    year_ok
        && rest.len() <= 2
        && rest
            .iter()
            .all(|part| part.len() == 2 && part.bytes().all(|b| b.is_ascii_digit()))
}

fn lookup_items(field_name: &str, values: &[(&str, &str)]) -> Vec<LookupItem> {
    values
        .iter()
        .zip(0..)
        .map(|(&(value, display), sort_order)| LookupItem {
            sort_order,
            ..LookupItem::new(field_name, value, display)
        })
        .collect()
}

#[async_trait]
impl DrugImporter for TomlFixtureImporter {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn dataset_name(&self) -> &str {
        &self.dataset_name
    }

    fn get_attr_field_definitions(&self) -> Vec<FieldDefinition> {
        vec![
            FieldDefinition::new("amount", "Amount", ValueType::Float, AttrKind::Scalar)
                .with_description("Amount in package")
                .required(),
            FieldDefinition::new("manufacturer", "Manufacturer", ValueType::Str, AttrKind::Scalar)
                .with_description("Manufacturing company of the drug")
                .required()
                .searchable(),
            FieldDefinition::new(
                "deliverysystem",
                "Delivery System",
                ValueType::Str,
                AttrKind::Scalar,
            ),
            FieldDefinition::new(
                "routeofadministration",
                "Route of administration",
                ValueType::Str,
                AttrKind::Scalar,
            ),
            FieldDefinition::new("keywords", "Keywords", ValueType::Str, AttrKind::Multi)
                .searchable(),
            FieldDefinition::new(
                "dispensingtype",
                "Dispensing Type",
                ValueType::Int,
                AttrKind::Lookup,
            )
            .with_description("How the drug is made available")
            .with_default("3")
            .required()
            .searchable(),
            FieldDefinition::new(
                "producing_country",
                "Producing Country",
                ValueType::Str,
                AttrKind::MultiLookup,
            )
            .searchable(),
        ]
    }

    fn get_lookup_values(&self) -> Vec<LookupItem> {
        let dispensing = [
            ("1", "Prescription only"),
            ("2", "Pharmacy only"),
            ("3", "Over the counter"),
        ];
        let countries = [
            ("AT", "Austria"),
            ("CH", "Switzerland"),
            ("DE", "Germany"),
            ("FR", "France"),
            ("US", "United States"),
        ];
        let mut lookups = lookup_items("dispensingtype", &dispensing);
        lookups.extend(lookup_items("producing_country", &countries));
        lookups
    }

    fn get_code_definitions(&self) -> Vec<CodeSystemDefinition> {
        vec![
            CodeSystemDefinition {
                id: "ATC".to_string(),
                name: "Anatomical Therapeutic Chemical Classification".to_string(),
                country: "International".to_string(),
                description: Some(
                    "Classifies active ingredients by the organ or system they act on".to_string(),
                ),
                unique: false,
                optional: true,
            },
            CodeSystemDefinition {
                id: "PZN".to_string(),
                name: "Pharmazentralnummer".to_string(),
                country: "Germany".to_string(),
                description: None,
                unique: true,
                optional: false,
            },
        ]
    }

    #[instrument(skip(self))]
    async fn version_label(&self, source: &Path) -> Result<String> {
        let dataset: DatasetFile = self.read_toml(&source.join(DATASET_FILE)).await?;
        let label = dataset.version_label.trim().to_string();
        if !is_iso_label(&label) {
            return Err(Self::importer_error(format!(
                "version label '{label}' is not of the form YYYY, YYYY-MM or YYYY-MM-DD"
            )));
        }
        Ok(label)
    }

    #[instrument(skip(self))]
    async fn load_drugs(&self, source: &Path) -> Result<Vec<NewDrug>> {
        let file: DrugsFile = self.read_toml(&source.join(DRUGS_FILE)).await?;
        debug!("Read {} drugs from {}", file.drugs.len(), source.display());
        Ok(file.drugs)
    }
}
