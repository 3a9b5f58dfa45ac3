//! Dataset version entity - One import batch of vendor reference data.
//!
//! Every vendor release gets its own row. A single `is_custom` pseudo-version per source
//! holds user-authored drugs. At most one non-custom version per `source_name` carries
//! `current_active = true`.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle state of an import batch: `queued -> running -> {done, failed}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    /// Created, importer not started yet
    #[sea_orm(string_value = "queued")]
    Queued,
    /// Importer is writing rows
    #[sea_orm(string_value = "running")]
    Running,
    /// Import failed, rows were not committed
    #[sea_orm(string_value = "failed")]
    Failed,
    /// Import finished, version is read-only
    #[sea_orm(string_value = "done")]
    Done,
}

impl ImportStatus {
    /// Stable lowercase name, as stored in the database.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Done => "done",
        }
    }

    /// Whether the one-directional lifecycle allows moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running | Self::Failed) | (Self::Running, Self::Done | Self::Failed)
        )
    }
}

impl std::fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dataset version database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "dataset_versions")]
pub struct Model {
    /// Unique identifier for the dataset version
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Groups releases of one vendor (e.g. `"pharmindex"`)
    pub source_name: String,
    /// Lexically sortable release label (e.g. `"2024-03"`)
    pub version_label: String,
    /// Marks the pseudo-version holding user-authored drugs
    pub is_custom: bool,
    /// Whether this is the authoritative release of its source
    pub current_active: bool,
    /// Import lifecycle state
    pub import_status: ImportStatus,
    /// Where the importer read its source feed from
    pub import_source: Option<String>,
    /// Failure message of the last import attempt
    pub import_error: Option<String>,
    /// When the importer started writing rows
    pub import_started_at: Option<DateTimeUtc>,
    /// When the import reached `done` or `failed`
    pub import_completed_at: Option<DateTimeUtc>,
    /// Soft-disable flag, excludes the version from "current" resolution
    pub deactivated: bool,
    /// When the version row was created
    pub created_at: DateTimeUtc,
}

impl Model {
    /// A version is writable while its importer runs, or always for the custom pseudo-version.
    #[must_use]
    pub const fn is_writable(&self) -> bool {
        self.is_custom || matches!(self.import_status, ImportStatus::Queued | ImportStatus::Running)
    }
}

/// Defines relationships between `DatasetVersion` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One dataset version has many drugs
    #[sea_orm(has_many = "super::drug::Entity")]
    Drugs,
}

impl Related<super::drug::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Drugs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
