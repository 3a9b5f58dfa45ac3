//! Drug code entity - External identifiers (PZN, ATC, NDC, ...) attached to a drug.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Drug code database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "drug_codes")]
pub struct Model {
    /// Unique identifier for the code row
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Drug carrying the code
    pub drug_id: Uuid,
    /// Code system the code belongs to (e.g. `"PZN"`)
    pub code_system_id: String,
    /// The code itself
    #[sea_orm(indexed)]
    pub code: String,
}

/// Defines relationships between `DrugCode` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each code belongs to one drug
    #[sea_orm(
        belongs_to = "super::drug::Entity",
        from = "Column::DrugId",
        to = "super::drug::Column::Id",
        on_delete = "Cascade"
    )]
    Drug,
    /// Each code belongs to one code system
    #[sea_orm(
        belongs_to = "super::code_system::Entity",
        from = "Column::CodeSystemId",
        to = "super::code_system::Column::Id"
    )]
    CodeSystem,
}

impl Related<super::drug::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Drug.def()
    }
}

impl Related<super::code_system::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CodeSystem.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
