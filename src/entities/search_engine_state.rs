//! Search engine state entity - Build bookkeeping of one search engine instance.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Search engine state database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "search_engine_state")]
pub struct Model {
    /// Registry name of the engine
    #[sea_orm(primary_key, auto_increment = false)]
    pub engine_name: String,
    /// A build is in progress
    pub building: bool,
    /// When the running build claimed the row
    pub build_started_at: Option<DateTimeUtc>,
    /// Number of completed builds
    pub build_count: i64,
    /// When the last build finished
    pub last_build_at: Option<DateTimeUtc>,
    /// Dataset version the last build was based on
    pub last_build_version_id: Option<i64>,
    /// Number of drugs visible to the engine after the last build
    pub item_count: Option<i64>,
    /// Error of the last failed build
    pub last_error: Option<String>,
}

/// `SearchEngineState` has no relationships with other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
