//! Drug search text entity - Case-folded searchable text of one drug.
//!
//! Maintained by the generic SQL search engine. `SQLite` folds only ASCII case in `LIKE`, so
//! the text is lowercased in Rust and matched against a lowercased token.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Drug search text database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "drug_search_texts")]
pub struct Model {
    /// Drug the text belongs to
    #[sea_orm(primary_key, auto_increment = false)]
    pub drug_id: Uuid,
    /// Dataset version of the drug
    #[sea_orm(indexed)]
    pub source_dataset_id: i64,
    /// Trade name, searchable attribute displays and codes, lowercased
    pub content: String,
}

/// Defines relationships between `DrugSearchText` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each text describes one drug
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
