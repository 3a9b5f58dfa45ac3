//! Drug entity - Canonical drug record.
//!
//! Vendor-specific attributes live in [`super::drug_attr`], external identifiers in
//! [`super::drug_code`]. Each drug belongs to exactly one dataset version.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Drug database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "drugs")]
pub struct Model {
    /// Unique identifier for the drug
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Dataset version this drug was imported with (or the custom pseudo-version)
    pub source_dataset_id: i64,
    /// Trade name as printed on the package
    #[sea_orm(indexed)]
    pub trade_name: String,
    /// First day the drug was available on the market
    pub market_access_date: Option<Date>,
    /// Day the drug was withdrawn from the market
    pub market_exit_date: Option<Date>,
    /// Whether a user authored this drug
    pub is_custom: bool,
    /// When the row was written
    pub created_at: DateTimeUtc,
}

/// Defines relationships between Drug and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each drug belongs to one dataset version
    #[sea_orm(
        belongs_to = "super::dataset_version::Entity",
        from = "Column::SourceDatasetId",
        to = "super::dataset_version::Column::Id",
        on_delete = "Cascade"
    )]
    DatasetVersion,
    /// One drug has many attribute values
    #[sea_orm(has_many = "super::drug_attr::Entity")]
    Attrs,
    /// One drug has many codes
    #[sea_orm(has_many = "super::drug_code::Entity")]
    Codes,
}

impl Related<super::dataset_version::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DatasetVersion.def()
    }
}

impl Related<super::drug_attr::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Attrs.def()
    }
}

impl Related<super::drug_code::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Codes.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
