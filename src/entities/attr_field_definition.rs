//! Attribute field definition entity - Declares which attributes a source's drugs may carry.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::drug_attr::AttrKind;

/// Type an attribute value is cast into at the read/validation boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// Plain string
    #[sea_orm(string_value = "str")]
    Str,
    /// 64-bit integer
    #[sea_orm(string_value = "int")]
    Int,
    /// 64-bit float
    #[sea_orm(string_value = "float")]
    Float,
    /// ISO 8601 / RFC 3339 timestamp
    #[sea_orm(string_value = "datetime")]
    DateTime,
    /// ISO 8601 calendar date
    #[sea_orm(string_value = "date")]
    Date,
}

/// Attribute field definition database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "attr_field_definitions")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Source (vendor) the field belongs to
    pub source_name: String,
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
    /// Storage shape of the field
    pub kind: AttrKind,
    /// Whether the generic search engine matches against this field
    pub searchable: bool,
}

/// `AttrFieldDefinition` has no relationships with other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
