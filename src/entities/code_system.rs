//! Code system entity - A national or international drug identifier scheme.
//!
//! Uniqueness and optionality of codes are declared here rather than hard-coded.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Code system database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "code_systems")]
pub struct Model {
    /// Short identifier, also the name of one code instance (e.g. `"PZN"`)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// Long name (e.g. `"Pharmazentralnummer"`)
    pub name: String,
    /// Country or region using the system
    pub country: String,
    /// Free-text description
    pub description: Option<String>,
    /// A code may identify at most one drug in the current scope
    pub unique_codes: bool,
    /// Drugs may omit a code of this system
    pub optional: bool,
}

/// Defines relationships between `CodeSystem` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One code system has many codes
    #[sea_orm(has_many = "super::drug_code::Entity")]
    Codes,
}

impl Related<super::drug_code::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Codes.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
