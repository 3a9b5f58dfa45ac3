//! Lookup value entity - Enumerated values (lists-of-values) attributes may reference.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lookup value database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "lookup_values")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Source (vendor) the list belongs to
    pub source_name: String,
    /// Field the value belongs to
    pub field_name: String,
    /// Stored value (e.g. a manufacturer code)
    pub value: String,
    /// Human-readable translation of the value
    pub display: String,
    /// Position when listing the values of a field
    pub sort_order: i32,
}

/// `LookupValue` has no relationships with other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
