//! Attribute schema registry.
//!
//! Each source (vendor) declares the attributes its drugs may carry. A definition fixes the
//! storage shape ([`AttrKind`]) and the [`ValueType`] raw values are cast into, so vendors
//! with different schemas share one attribute table without migrations.
//!
//! Definitions are provisioned once by an importer and treated as static afterwards.
//! [`SourceSchema`] bundles everything needed to validate and decode a source's drugs.

use crate::{
    entities::{
        AttrFieldDefinition, AttrKind, CodeSystem, ValueType, attr_field_definition,
        code_system, lookup_value,
    },
    errors::Result,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sea_orm::{QueryOrder, Set, prelude::*};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, instrument};

/// A typed attribute value, produced by casting the stored text through its field definition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttrValue {
    /// Plain text
    Str(String),
    /// Integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// Timestamp in UTC
    DateTime(DateTime<Utc>),
    /// Calendar date
    Date(NaiveDate),
}

impl ValueType {
    /// Casts a raw stored value. The error names the expected type.
    pub fn cast(self, raw: &str) -> std::result::Result<AttrValue, String> {
        let trimmed = raw.trim();
        match self {
            Self::Str => Ok(AttrValue::Str(raw.to_string())),
            Self::Int => trimmed
                .parse::<i64>()
                .map(AttrValue::Int)
                .map_err(|_| format!("expected an integer, got '{raw}'")),
            Self::Float => trimmed
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(AttrValue::Float)
                .ok_or_else(|| format!("expected a finite number, got '{raw}'")),
            Self::DateTime => DateTime::parse_from_rfc3339(trimmed)
                .map(|dt| dt.with_timezone(&Utc))
                .or_else(|_| {
                    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S")
                        .map(|naive| naive.and_utc())
                })
                .map(AttrValue::DateTime)
                .map_err(|_| format!("expected an ISO 8601 timestamp, got '{raw}'")),
            Self::Date => NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                .map(AttrValue::Date)
                .map_err(|_| format!("expected a YYYY-MM-DD date, got '{raw}'")),
        }
    }
}

/// Importer-side declaration of one attribute field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Field name, unique per source
    pub field_name: String,
    /// Title for humans
    pub display: String,
    /// Help text
    pub description: Option<String>,
    /// Drugs may omit the field
    pub optional: bool,
    /// Raw value used when a drug omits the field
    pub default_value: Option<String>,
    /// Cast applied to raw values
    pub value_type: ValueType,
    /// Storage shape
    pub kind: AttrKind,
    /// Whether the generic search engine matches against this field
    pub searchable: bool,
}

impl FieldDefinition {
    /// An optional, non-searchable field without default.
    #[must_use]
    pub fn new(field_name: &str, display: &str, value_type: ValueType, kind: AttrKind) -> Self {
        Self {
            field_name: field_name.to_string(),
            display: display.to_string(),
            description: None,
            optional: true,
            default_value: None,
            value_type,
            kind,
            searchable: false,
        }
    }

    /// Marks the field as required.
    #[must_use]
    pub const fn required(mut self) -> Self {
        self.optional = false;
        self
    }

    /// Makes the field visible to text search.
    #[must_use]
    pub const fn searchable(mut self) -> Self {
        self.searchable = true;
        self
    }

    /// Sets the value used when a drug omits the field.
    #[must_use]
    pub fn with_default(mut self, default_value: &str) -> Self {
        self.default_value = Some(default_value.to_string());
        self
    }

    /// Sets the help text.
    #[must_use]
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}

/// Inserts the field definitions a source does not have yet.
///
/// Existing definitions are left untouched; they are read-only once provisioned.
/// Returns the number of inserted definitions.
#[instrument(skip(db, definitions))]
pub async fn provision_field_definitions(
    db: &DatabaseConnection,
    source_name: &str,
    definitions: &[FieldDefinition],
) -> Result<usize> {
    let existing: HashMap<String, attr_field_definition::Model> =
        list_field_definitions(db, source_name)
            .await?
            .into_iter()
            .map(|def| (def.field_name.clone(), def))
            .collect();

    let mut inserted = 0;
    for definition in definitions {
        if existing.contains_key(&definition.field_name) {
            debug!(
                "Field definition '{}' already provisioned, skipping",
                definition.field_name
            );
            continue;
        }
        attr_field_definition::ActiveModel {
            source_name: Set(source_name.to_string()),
            field_name: Set(definition.field_name.clone()),
            display: Set(definition.display.clone()),
            description: Set(definition.description.clone()),
            optional: Set(definition.optional),
            default_value: Set(definition.default_value.clone()),
            value_type: Set(definition.value_type),
            kind: Set(definition.kind),
            searchable: Set(definition.searchable),
            ..Default::default()
        }
        .insert(db)
        .await?;
        inserted += 1;
    }

    info!("Provisioned {inserted} field definitions for '{source_name}'");
    Ok(inserted)
}

/// All field definitions of a source, ordered by field name.
pub async fn list_field_definitions<C>(
    db: &C,
    source_name: &str,
) -> Result<Vec<attr_field_definition::Model>>
where
    C: ConnectionTrait,
{
    AttrFieldDefinition::find()
        .filter(attr_field_definition::Column::SourceName.eq(source_name))
        .order_by_asc(attr_field_definition::Column::FieldName)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Everything needed to validate and decode the drugs of one source.
#[derive(Debug, Clone, Default)]
pub struct SourceSchema {
    /// Source (vendor) this schema describes
    pub source_name: String,
    fields: HashMap<String, attr_field_definition::Model>,
    lookups: HashMap<(String, String), lookup_value::Model>,
    code_systems: HashMap<String, code_system::Model>,
}

impl SourceSchema {
    /// Loads field definitions and lookup values of `source_name`, plus all code systems.
    pub async fn load<C>(db: &C, source_name: &str) -> Result<Self>
    where
        C: ConnectionTrait,
    {
        let fields = list_field_definitions(db, source_name)
            .await?
            .into_iter()
            .map(|def| (def.field_name.clone(), def))
            .collect();
        let lookups = super::lookup::list_source_lookup_values(db, source_name)
            .await?
            .into_iter()
            .map(|item| ((item.field_name.clone(), item.value.clone()), item))
            .collect();
        let code_systems = CodeSystem::find()
            .all(db)
            .await?
            .into_iter()
            .map(|system| (system.id.clone(), system))
            .collect();

        Ok(Self {
            source_name: source_name.to_string(),
            fields,
            lookups,
            code_systems,
        })
    }

    /// Definition of `field_name`, if the source declares it.
    #[must_use]
    pub fn field(&self, field_name: &str) -> Option<&attr_field_definition::Model> {
        self.fields.get(field_name)
    }

    /// All field definitions, in no particular order.
    pub fn fields(&self) -> impl Iterator<Item = &attr_field_definition::Model> {
        self.fields.values()
    }

    /// Sorted field names, for error messages.
    #[must_use]
    pub fn field_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.fields.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// The lookup entry for `value` of `field_name`.
    #[must_use]
    pub fn lookup(&self, field_name: &str, value: &str) -> Option<&lookup_value::Model> {
        self.lookups
            .get(&(field_name.to_string(), value.to_string()))
    }

    /// A known code system.
    #[must_use]
    pub fn code_system(&self, code_system_id: &str) -> Option<&code_system::Model> {
        self.code_systems.get(code_system_id)
    }

    /// All known code systems, in no particular order.
    pub fn code_systems(&self) -> impl Iterator<Item = &code_system::Model> {
        self.code_systems.values()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::*;

    #[test]
    fn test_value_type_cast() {
        assert_eq!(ValueType::Int.cast(" 42 ").unwrap(), AttrValue::Int(42));
        assert_eq!(ValueType::Float.cast("2.5").unwrap(), AttrValue::Float(2.5));
        assert_eq!(
            ValueType::Date.cast("2024-03-01").unwrap(),
            AttrValue::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
        );
        assert!(matches!(
            ValueType::DateTime.cast("2024-03-01T10:00:00Z").unwrap(),
            AttrValue::DateTime(_)
        ));
        assert!(matches!(
            ValueType::DateTime.cast("2024-03-01T10:00:00").unwrap(),
            AttrValue::DateTime(_)
        ));
        assert_eq!(
            ValueType::Str.cast("Bayer").unwrap(),
            AttrValue::Str("Bayer".to_string())
        );

        assert!(ValueType::Int.cast("ten").is_err());
        assert!(ValueType::Float.cast("NaN").is_err());
        assert!(ValueType::Date.cast("01.03.2024").is_err());
    }

    #[tokio::test]
    async fn test_provision_field_definitions_is_insert_once() -> Result<()> {
        let db = setup_test_db().await?;
        let definitions = test_field_definitions();

        let first = provision_field_definitions(&db, TEST_SOURCE, &definitions).await?;
        assert_eq!(first, definitions.len());

        // A second run with a changed definition leaves the stored one alone
        let mut changed = definitions.clone();
        changed[0].display = "Changed".to_string();
        let second = provision_field_definitions(&db, TEST_SOURCE, &changed).await?;
        assert_eq!(second, 0);

        let stored = list_field_definitions(&db, TEST_SOURCE).await?;
        assert_eq!(stored.len(), definitions.len());
        assert!(stored.iter().all(|def| def.display != "Changed"));

        // Other sources are unaffected
        assert!(list_field_definitions(&db, "other").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_source_schema_load() -> Result<()> {
        let db = setup_test_db().await?;
        provision_test_metadata(&db).await?;

        let schema = SourceSchema::load(&db, TEST_SOURCE).await?;
        assert_eq!(schema.source_name, TEST_SOURCE);
        assert_eq!(schema.field("amount").unwrap().value_type, ValueType::Int);
        assert!(schema.field("unknown").is_none());
        assert_eq!(schema.lookup("dispensing", "RX").unwrap().display, "Prescription only");
        assert!(schema.lookup("dispensing", "XX").is_none());
        assert!(schema.code_system("PZN").unwrap().unique_codes);
        assert!(schema.field_names().windows(2).all(|w| w[0] <= w[1]));
        Ok(())
    }
}
