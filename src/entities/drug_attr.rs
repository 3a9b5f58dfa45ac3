//! Drug attribute entity - Tagged-union storage for vendor-specific attributes.
//!
//! All four attribute shapes share this table, keyed by `(drug_id, field_name, value_index)`.
//! Values are stored as text, the field definition decides how they are cast on read.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Storage shape of an attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum AttrKind {
    /// Single plain value
    #[sea_orm(string_value = "scalar")]
    Scalar,
    /// Single value referencing a lookup list
    #[sea_orm(string_value = "lookup")]
    Lookup,
    /// Ordered list of plain values
    #[sea_orm(string_value = "multi")]
    Multi,
    /// Ordered list of values referencing a lookup list
    #[sea_orm(string_value = "multi_lookup")]
    MultiLookup,
}

impl AttrKind {
    /// Whether values of this shape must exist in the lookup value store.
    #[must_use]
    pub const fn has_list_of_values(self) -> bool {
        matches!(self, Self::Lookup | Self::MultiLookup)
    }

    /// Whether this shape carries a list of values.
    #[must_use]
    pub const fn is_multi(self) -> bool {
        matches!(self, Self::Multi | Self::MultiLookup)
    }
}

/// Drug attribute database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "drug_attrs")]
pub struct Model {
    /// Unique identifier for the attribute row
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Drug carrying the attribute
    pub drug_id: Uuid,
    /// Field name as declared by the source's field definitions
    pub field_name: String,
    /// Position within a multi-valued attribute, 0 for single values
    pub value_index: i32,
    /// Storage shape
    pub kind: AttrKind,
    /// Raw value, cast through the field definition on read
    pub value: String,
}

/// Defines relationships between `DrugAttr` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each attribute belongs to one drug
    #[sea_orm(
        belongs_to = "super::drug::Entity",
        from = "Column::DrugId",
        to = "super::drug::Column::Id",
        on_delete = "Cascade"
    )]
    Drug,
}

impl Related<super::drug::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Drug.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
