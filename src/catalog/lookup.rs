//! Lookup value store - enumerated values attributes may reference.
//!
//! Lookup values translate stored codes into display text (e.g. manufacturer codes into
//! company names). They are provisioned by importers and read-mostly afterwards.

use crate::{
    entities::{LookupValue, lookup_value},
    errors::Result,
};
use sea_orm::{QueryOrder, Set, prelude::*};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, instrument};

/// Importer-side declaration of one lookup value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupItem {
    /// Field the value belongs to
    pub field_name: String,
    /// Stored value
    pub value: String,
    /// Display text
    pub display: String,
    /// Position within the field's list
    #[serde(default)]
    pub sort_order: i32,
}

impl LookupItem {
    /// A lookup value sorted at position 0.
    #[must_use]
    pub fn new(field_name: &str, value: &str, display: &str) -> Self {
        Self {
            field_name: field_name.to_string(),
            value: value.to_string(),
            display: display.to_string(),
            sort_order: 0,
        }
    }
}

/// Inserts the lookup values a source does not have yet. Returns the number inserted.
#[instrument(skip(db, items))]
pub async fn provision_lookup_values(
    db: &DatabaseConnection,
    source_name: &str,
    items: &[LookupItem],
) -> Result<usize> {
    let existing: HashSet<(String, String)> = list_source_lookup_values(db, source_name)
        .await?
        .into_iter()
        .map(|item| (item.field_name, item.value))
        .collect();

    let new_items: Vec<lookup_value::ActiveModel> = items
        .iter()
        .filter(|item| !existing.contains(&(item.field_name.clone(), item.value.clone())))
        .map(|item| lookup_value::ActiveModel {
            source_name: Set(source_name.to_string()),
            field_name: Set(item.field_name.clone()),
            value: Set(item.value.clone()),
            display: Set(item.display.clone()),
            sort_order: Set(item.sort_order),
            ..Default::default()
        })
        .collect();

    let inserted = new_items.len();
    if !new_items.is_empty() {
        LookupValue::insert_many(new_items)
            .exec_without_returning(db)
            .await?;
    }
    info!("Provisioned {inserted} lookup values for '{source_name}'");
    Ok(inserted)
}

/// All lookup values of a source.
pub async fn list_source_lookup_values<C>(
    db: &C,
    source_name: &str,
) -> Result<Vec<lookup_value::Model>>
where
    C: ConnectionTrait,
{
    LookupValue::find()
        .filter(lookup_value::Column::SourceName.eq(source_name))
        .order_by_asc(lookup_value::Column::FieldName)
        .order_by_asc(lookup_value::Column::SortOrder)
        .order_by_asc(lookup_value::Column::Value)
        .all(db)
        .await
        .map_err(Into::into)
}
