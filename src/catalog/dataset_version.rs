//! Dataset version registry - Lifecycle of import batches and "current" resolution.
//!
//! A version moves `queued -> running -> {done, failed}` and never backwards. Transitions are
//! single conditional `UPDATE` statements filtered on the allowed source states, so two
//! callers racing on the same version cannot both succeed.
//!
//! Activation flips `current_active` on every non-custom version of a source inside one
//! transaction. Readers see either the old or the new active version, never none.

use crate::{
    entities::{
        DatasetVersion, Drug, DrugAttr, DrugCode, DrugSearchText, ImportStatus, dataset_version,
        drug, drug_attr, drug_code, drug_search_text,
    },
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{
    QueryOrder, Set, SqlErr, TransactionTrait, UpdateMany,
    prelude::*,
    sea_query::{Expr, Query},
};
use tracing::{debug, info, instrument, warn};

/// Label of the pseudo-version holding user-authored drugs.
pub const CUSTOM_VERSION_LABEL: &str = "custom";

const ALL_STATUSES: [ImportStatus; 4] = [
    ImportStatus::Queued,
    ImportStatus::Running,
    ImportStatus::Failed,
    ImportStatus::Done,
];

/// Filters for [`list`]. The default lists every non-custom, non-deactivated version.
#[derive(Debug, Clone, Default)]
pub struct VersionFilter {
    /// Restrict to one source
    pub source_name: Option<String>,
    /// Restrict to one lifecycle state
    pub import_status: Option<ImportStatus>,
    /// Include the custom pseudo-versions
    pub include_custom: bool,
    /// Include soft-disabled versions
    pub include_deactivated: bool,
}

impl VersionFilter {
    /// Versions of one source.
    #[must_use]
    pub fn for_source(source_name: &str) -> Self {
        Self {
            source_name: Some(source_name.to_string()),
            ..Self::default()
        }
    }
}

/// Loads a version by id.
pub async fn get_by_id<C>(db: &C, version_id: i64) -> Result<dataset_version::Model>
where
    C: ConnectionTrait,
{
    DatasetVersion::find_by_id(version_id)
        .one(db)
        .await?
        .ok_or(Error::VersionNotFound { version_id })
}

/// Finds a version by its natural key.
pub async fn find_by_label<C>(
    db: &C,
    source_name: &str,
    version_label: &str,
) -> Result<Option<dataset_version::Model>>
where
    C: ConnectionTrait,
{
    DatasetVersion::find()
        .filter(dataset_version::Column::SourceName.eq(source_name))
        .filter(dataset_version::Column::VersionLabel.eq(version_label))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Resolves the current version of a source, `None` when there is none.
///
/// Considers non-custom, `done`, non-deactivated versions ordered by
/// `current_active desc, version_label desc` and takes the first.
pub async fn find_current<C>(db: &C, source_name: &str) -> Result<Option<dataset_version::Model>>
where
    C: ConnectionTrait,
{
    DatasetVersion::find()
        .filter(dataset_version::Column::SourceName.eq(source_name))
        .filter(dataset_version::Column::IsCustom.eq(false))
        .filter(dataset_version::Column::ImportStatus.eq(ImportStatus::Done))
        .filter(dataset_version::Column::Deactivated.eq(false))
        .order_by_desc(dataset_version::Column::CurrentActive)
        .order_by_desc(dataset_version::Column::VersionLabel)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Resolves the current version of a source, failing with [`Error::NoCurrentVersion`].
pub async fn get_current<C>(db: &C, source_name: &str) -> Result<dataset_version::Model>
where
    C: ConnectionTrait,
{
    find_current(db, source_name)
        .await?
        .ok_or_else(|| Error::NoCurrentVersion {
            source_name: source_name.to_string(),
        })
}

/// The custom pseudo-version of a source, if it was created already.
pub async fn find_custom<C>(db: &C, source_name: &str) -> Result<Option<dataset_version::Model>>
where
    C: ConnectionTrait,
{
    DatasetVersion::find()
        .filter(dataset_version::Column::SourceName.eq(source_name))
        .filter(dataset_version::Column::IsCustom.eq(true))
        .one(db)
        .await
        .map_err(Into::into)
}

/// The custom pseudo-version of a source, created on first access.
#[instrument(skip(db))]
pub async fn get_custom(db: &DatabaseConnection, source_name: &str) -> Result<dataset_version::Model> {
    if let Some(custom) = find_custom(db, source_name).await? {
        return Ok(custom);
    }

    let now = Utc::now();
    let custom = dataset_version::ActiveModel {
        source_name: Set(source_name.to_string()),
        version_label: Set(CUSTOM_VERSION_LABEL.to_string()),
        is_custom: Set(true),
        current_active: Set(false),
        import_status: Set(ImportStatus::Done),
        import_source: Set(None),
        import_error: Set(None),
        import_started_at: Set(None),
        import_completed_at: Set(Some(now)),
        deactivated: Set(false),
        created_at: Set(now),
        ..Default::default()
    };

    match custom.insert(db).await {
        Ok(model) => {
            info!("Created custom dataset version {} for '{source_name}'", model.id);
            Ok(model)
        }
        // Lost a creation race, the other caller's row is just as good
        Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
            debug!("Custom version for '{source_name}' was created concurrently");
            find_custom(db, source_name)
                .await?
                .ok_or_else(|| Error::from(e))
        }
        Err(e) => Err(e.into()),
    }
}

/// Lists versions ordered by `version_label` descending.
pub async fn list<C>(db: &C, filter: &VersionFilter) -> Result<Vec<dataset_version::Model>>
where
    C: ConnectionTrait,
{
    let mut query = DatasetVersion::find();
    if let Some(source_name) = &filter.source_name {
        query = query.filter(dataset_version::Column::SourceName.eq(source_name.as_str()));
    }
    if let Some(status) = filter.import_status {
        query = query.filter(dataset_version::Column::ImportStatus.eq(status));
    }
    if !filter.include_custom {
        query = query.filter(dataset_version::Column::IsCustom.eq(false));
    }
    if !filter.include_deactivated {
        query = query.filter(dataset_version::Column::Deactivated.eq(false));
    }
    query
        .order_by_desc(dataset_version::Column::VersionLabel)
        .order_by_asc(dataset_version::Column::SourceName)
        .all(db)
        .await
        .map_err(Into::into)
}

fn validate_label(version_label: &str) -> Result<()> {
    if version_label.is_empty() || version_label.chars().any(char::is_whitespace) {
        return Err(Error::InvalidVersionLabel {
            version_label: version_label.to_string(),
            reason: "must be non-empty and contain no whitespace".to_string(),
        });
    }
    if version_label == CUSTOM_VERSION_LABEL {
        return Err(Error::InvalidVersionLabel {
            version_label: version_label.to_string(),
            reason: "reserved for the custom pseudo-version".to_string(),
        });
    }
    Ok(())
}

/// Creates a new `queued` version.
///
/// Fails with [`Error::DuplicateVersion`] if `(source_name, version_label)` exists, including
/// when a concurrent caller wins the insert.
#[instrument(skip(db))]
pub async fn create_queued(
    db: &DatabaseConnection,
    source_name: &str,
    version_label: &str,
    import_source: Option<String>,
) -> Result<dataset_version::Model> {
    validate_label(version_label)?;

    let duplicate = || Error::DuplicateVersion {
        source_name: source_name.to_string(),
        version_label: version_label.to_string(),
    };
    if find_by_label(db, source_name, version_label).await?.is_some() {
        return Err(duplicate());
    }

    let version = dataset_version::ActiveModel {
        source_name: Set(source_name.to_string()),
        version_label: Set(version_label.to_string()),
        is_custom: Set(false),
        current_active: Set(false),
        import_status: Set(ImportStatus::Queued),
        import_source: Set(import_source),
        import_error: Set(None),
        import_started_at: Set(None),
        import_completed_at: Set(None),
        deactivated: Set(false),
        created_at: Set(Utc::now()),
        ..Default::default()
    };

    match version.insert(db).await {
        Ok(model) => {
            info!("Queued dataset version {} ({source_name} {version_label})", model.id);
            Ok(model)
        }
        Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
            Err(duplicate())
        }
        Err(e) => Err(e.into()),
    }
}

/// Runs `update` as the transition of `version_id` into `next`, if the current state allows it.
async fn apply_transition<C>(
    db: &C,
    version_id: i64,
    next: ImportStatus,
    update: UpdateMany<DatasetVersion>,
) -> Result<dataset_version::Model>
where
    C: ConnectionTrait,
{
    let allowed: Vec<ImportStatus> = ALL_STATUSES
        .into_iter()
        .filter(|status| status.can_transition_to(next))
        .collect();

    let result = update
        .col_expr(dataset_version::Column::ImportStatus, Expr::value(next))
        .filter(dataset_version::Column::Id.eq(version_id))
        .filter(dataset_version::Column::IsCustom.eq(false))
        .filter(dataset_version::Column::ImportStatus.is_in(allowed))
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        let version = get_by_id(db, version_id).await?;
        let from = if version.is_custom {
            CUSTOM_VERSION_LABEL.to_string()
        } else {
            version.import_status.to_string()
        };
        warn!("Rejected transition of version {version_id} from '{from}' to '{next}'");
        return Err(Error::InvalidTransition {
            version_id,
            from,
            to: next.to_string(),
        });
    }

    get_by_id(db, version_id).await
}

/// `queued -> running`, stamping `import_started_at`.
#[instrument(skip(db))]
pub async fn mark_running<C>(db: &C, version_id: i64) -> Result<dataset_version::Model>
where
    C: ConnectionTrait,
{
    let update = DatasetVersion::update_many().col_expr(
        dataset_version::Column::ImportStartedAt,
        Expr::value(Some(Utc::now())),
    );
    apply_transition(db, version_id, ImportStatus::Running, update).await
}

/// `running -> done`, stamping `import_completed_at`. The version is read-only afterwards.
#[instrument(skip(db))]
pub async fn mark_done<C>(db: &C, version_id: i64) -> Result<dataset_version::Model>
where
    C: ConnectionTrait,
{
    let update = DatasetVersion::update_many().col_expr(
        dataset_version::Column::ImportCompletedAt,
        Expr::value(Some(Utc::now())),
    );
    let version = apply_transition(db, version_id, ImportStatus::Done, update).await?;
    info!(
        "Dataset version {} ({} {}) is done",
        version.id, version.source_name, version.version_label
    );
    Ok(version)
}

/// `queued|running -> failed`, recording the failure message.
#[instrument(skip(db))]
pub async fn mark_failed<C>(db: &C, version_id: i64, error: &str) -> Result<dataset_version::Model>
where
    C: ConnectionTrait,
{
    let update = DatasetVersion::update_many()
        .col_expr(
            dataset_version::Column::ImportCompletedAt,
            Expr::value(Some(Utc::now())),
        )
        .col_expr(
            dataset_version::Column::ImportError,
            Expr::value(Some(error.to_string())),
        );
    let version = apply_transition(db, version_id, ImportStatus::Failed, update).await?;
    warn!(
        "Dataset version {} ({} {}) failed: {error}",
        version.id, version.source_name, version.version_label
    );
    Ok(version)
}

/// Makes `version_id` the single active version of its source.
///
/// Runs in one transaction: every other non-custom version of the source loses the flag
/// and the target gains it. Only `done`, non-deactivated vendor versions can be activated.
#[instrument(skip(db))]
pub async fn activate(db: &DatabaseConnection, version_id: i64) -> Result<dataset_version::Model> {
    let txn = db.begin().await?;

    let version = get_by_id(&txn, version_id).await?;
    if version.is_custom || version.deactivated || version.import_status != ImportStatus::Done {
        let from = if version.is_custom {
            CUSTOM_VERSION_LABEL.to_string()
        } else if version.deactivated {
            "deactivated".to_string()
        } else {
            version.import_status.to_string()
        };
        return Err(Error::InvalidTransition {
            version_id,
            from,
            to: "active".to_string(),
        });
    }

    DatasetVersion::update_many()
        .col_expr(dataset_version::Column::CurrentActive, Expr::value(false))
        .filter(dataset_version::Column::SourceName.eq(version.source_name.as_str()))
        .filter(dataset_version::Column::IsCustom.eq(false))
        .filter(dataset_version::Column::Id.ne(version_id))
        .exec(&txn)
        .await?;
    DatasetVersion::update_many()
        .col_expr(dataset_version::Column::CurrentActive, Expr::value(true))
        .filter(dataset_version::Column::Id.eq(version_id))
        .exec(&txn)
        .await?;

    let activated = get_by_id(&txn, version_id).await?;
    txn.commit().await?;

    info!(
        "Activated dataset version {} ({} {})",
        activated.id, activated.source_name, activated.version_label
    );
    Ok(activated)
}

/// Soft-disables a version.
///
/// If it was the active one, the newest remaining `done` version of the source is activated
/// in the same transaction. Returns the deactivated version.
#[instrument(skip(db))]
pub async fn deactivate(db: &DatabaseConnection, version_id: i64) -> Result<dataset_version::Model> {
    let txn = db.begin().await?;

    let version = get_by_id(&txn, version_id).await?;
    if version.is_custom {
        return Err(Error::InvalidTransition {
            version_id,
            from: CUSTOM_VERSION_LABEL.to_string(),
            to: "deactivated".to_string(),
        });
    }

    DatasetVersion::update_many()
        .col_expr(dataset_version::Column::Deactivated, Expr::value(true))
        .col_expr(dataset_version::Column::CurrentActive, Expr::value(false))
        .filter(dataset_version::Column::Id.eq(version_id))
        .exec(&txn)
        .await?;

    if version.current_active {
        if let Some(successor) = find_current(&txn, &version.source_name).await? {
            DatasetVersion::update_many()
                .col_expr(dataset_version::Column::CurrentActive, Expr::value(true))
                .filter(dataset_version::Column::Id.eq(successor.id))
                .exec(&txn)
                .await?;
            info!(
                "Promoted dataset version {} ({}) after deactivating {version_id}",
                successor.id, successor.version_label
            );
        } else {
            warn!(
                "Deactivated the last usable version of '{}', no current version remains",
                version.source_name
            );
        }
    }

    let deactivated = get_by_id(&txn, version_id).await?;
    txn.commit().await?;
    Ok(deactivated)
}

/// Deletes a version together with its drugs, attributes and codes.
///
/// The active version and the custom pseudo-version cannot be deleted.
#[instrument(skip(db))]
pub async fn delete_version(db: &DatabaseConnection, version_id: i64) -> Result<u64> {
    let txn = db.begin().await?;

    let version = get_by_id(&txn, version_id).await?;
    if version.current_active || version.is_custom {
        return Err(Error::InvalidTransition {
            version_id,
            from: if version.is_custom {
                CUSTOM_VERSION_LABEL.to_string()
            } else {
                "active".to_string()
            },
            to: "deleted".to_string(),
        });
    }

    let version_drugs = Query::select()
        .column(drug::Column::Id)
        .from(Drug)
        .and_where(drug::Column::SourceDatasetId.eq(version_id))
        .to_owned();

    DrugAttr::delete_many()
        .filter(drug_attr::Column::DrugId.in_subquery(version_drugs.clone()))
        .exec(&txn)
        .await?;
    DrugCode::delete_many()
        .filter(drug_code::Column::DrugId.in_subquery(version_drugs))
        .exec(&txn)
        .await?;
    DrugSearchText::delete_many()
        .filter(drug_search_text::Column::SourceDatasetId.eq(version_id))
        .exec(&txn)
        .await?;
    let drugs = Drug::delete_many()
        .filter(drug::Column::SourceDatasetId.eq(version_id))
        .exec(&txn)
        .await?
        .rows_affected;
    DatasetVersion::delete_by_id(version_id).exec(&txn).await?;

    txn.commit().await?;
    info!(
        "Deleted dataset version {version_id} ({} {}) with {drugs} drugs",
        version.source_name, version.version_label
    );
    Ok(drugs)
}

/// Deletes every inactive vendor version older than the current one. Returns the deleted ids.
#[instrument(skip(db))]
pub async fn purge_obsolete(db: &DatabaseConnection, source_name: &str) -> Result<Vec<i64>> {
    let Some(current) = find_current(db, source_name).await? else {
        debug!("No current version for '{source_name}', nothing to purge");
        return Ok(Vec::new());
    };

    let obsolete = DatasetVersion::find()
        .filter(dataset_version::Column::SourceName.eq(source_name))
        .filter(dataset_version::Column::IsCustom.eq(false))
        .filter(dataset_version::Column::CurrentActive.eq(false))
        .filter(dataset_version::Column::VersionLabel.lt(current.version_label.as_str()))
        .filter(
            dataset_version::Column::ImportStatus.is_in([ImportStatus::Done, ImportStatus::Failed]),
        )
        .order_by_asc(dataset_version::Column::VersionLabel)
        .all(db)
        .await?;

    let mut purged = Vec::with_capacity(obsolete.len());
    for version in obsolete {
        delete_version(db, version.id).await?;
        purged.push(version.id);
    }
    info!("Purged {} obsolete versions of '{source_name}'", purged.len());
    Ok(purged)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::*;

    #[tokio::test]
    async fn test_bad_label_is_rejected_before_any_query() {
        use sea_orm::{DatabaseBackend, MockDatabase};

        // No query results are configured, so touching the database would fail differently
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();
        for label in ["", "2024 03", CUSTOM_VERSION_LABEL] {
            let result = create_queued(&db, TEST_SOURCE, label, None).await;
            let error = result.unwrap_err();
            assert!(matches!(error, Error::InvalidVersionLabel { .. }), "label {label:?}");
            assert_eq!(error.kind(), crate::errors::ErrorKind::Integrity);
        }
    }

    async fn active_count(db: &DatabaseConnection, source_name: &str) -> Result<usize> {
        Ok(DatasetVersion::find()
            .filter(dataset_version::Column::SourceName.eq(source_name))
            .filter(dataset_version::Column::IsCustom.eq(false))
            .filter(dataset_version::Column::CurrentActive.eq(true))
            .all(db)
            .await?
            .len())
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() -> Result<()> {
        let db = setup_test_db().await?;
        let version = create_queued(&db, TEST_SOURCE, "2024-01", None).await?;
        assert_eq!(version.import_status, ImportStatus::Queued);

        let running = mark_running(&db, version.id).await?;
        assert_eq!(running.import_status, ImportStatus::Running);
        assert!(running.import_started_at.is_some());

        let done = mark_done(&db, version.id).await?;
        assert_eq!(done.import_status, ImportStatus::Done);
        assert!(done.import_completed_at.is_some());

        // done is terminal
        let again = mark_done(&db, version.id).await;
        assert!(matches!(again, Err(Error::InvalidTransition { ref from, .. }) if from == "done"));
        assert!(matches!(
            mark_failed(&db, version.id, "late").await,
            Err(Error::InvalidTransition { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_mark_done_on_failed_version() -> Result<()> {
        let db = setup_test_db().await?;
        let version = create_queued(&db, TEST_SOURCE, "2024-01", None).await?;
        let failed = mark_failed(&db, version.id, "parse error").await?;
        assert_eq!(failed.import_error.as_deref(), Some("parse error"));

        let result = mark_done(&db, version.id).await;
        assert!(matches!(result, Err(Error::InvalidTransition { ref from, ref to, .. })
            if from == "failed" && to == "done"));

        assert!(matches!(
            mark_running(&db, 999).await,
            Err(Error::VersionNotFound { version_id: 999 })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_create_queued_rejects_duplicates_and_bad_labels() -> Result<()> {
        let db = setup_test_db().await?;
        create_queued(&db, TEST_SOURCE, "2024-01", None).await?;

        let duplicate = create_queued(&db, TEST_SOURCE, "2024-01", None).await;
        assert!(matches!(duplicate, Err(Error::DuplicateVersion { .. })));

        // Same label under another source is fine
        create_queued(&db, "other", "2024-01", None).await?;

        assert!(matches!(
            create_queued(&db, TEST_SOURCE, "2024 01", None).await,
            Err(Error::InvalidVersionLabel { .. })
        ));
        assert!(matches!(
            create_queued(&db, TEST_SOURCE, "", None).await,
            Err(Error::InvalidVersionLabel { .. })
        ));
        assert!(matches!(
            create_queued(&db, TEST_SOURCE, CUSTOM_VERSION_LABEL, None).await,
            Err(Error::InvalidVersionLabel { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_get_current_resolution() -> Result<()> {
        let db = setup_test_db().await?;
        assert!(matches!(
            get_current(&db, TEST_SOURCE).await,
            Err(Error::NoCurrentVersion { .. })
        ));
        assert!(find_current(&db, TEST_SOURCE).await?.is_none());

        let older = create_done_version(&db, TEST_SOURCE, "2024-01").await?;
        let newer = create_done_version(&db, TEST_SOURCE, "2024-02").await?;
        // A running import never becomes current
        let running = create_queued(&db, TEST_SOURCE, "2024-03", None).await?;
        mark_running(&db, running.id).await?;

        // Without an active flag the newest label wins
        assert_eq!(get_current(&db, TEST_SOURCE).await?.id, newer.id);

        // The active flag beats the label ordering
        activate(&db, older.id).await?;
        assert_eq!(get_current(&db, TEST_SOURCE).await?.id, older.id);

        // The custom pseudo-version is never current
        get_custom(&db, TEST_SOURCE).await?;
        assert_eq!(get_current(&db, TEST_SOURCE).await?.id, older.id);
        Ok(())
    }

    #[tokio::test]
    async fn test_get_custom_is_created_once() -> Result<()> {
        let db = setup_test_db().await?;
        assert!(find_custom(&db, TEST_SOURCE).await?.is_none());

        let first = get_custom(&db, TEST_SOURCE).await?;
        let second = get_custom(&db, TEST_SOURCE).await?;
        assert_eq!(first.id, second.id);
        assert!(first.is_custom);
        assert!(first.is_writable());
        assert_eq!(first.version_label, CUSTOM_VERSION_LABEL);

        assert!(matches!(
            mark_running(&db, first.id).await,
            Err(Error::InvalidTransition { ref from, .. }) if from == CUSTOM_VERSION_LABEL
        ));
        assert!(matches!(
            activate(&db, first.id).await,
            Err(Error::InvalidTransition { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_list_ordering_and_filters() -> Result<()> {
        let db = setup_test_db().await?;
        create_done_version(&db, TEST_SOURCE, "2024-01").await?;
        create_done_version(&db, TEST_SOURCE, "2024-03").await?;
        create_queued(&db, TEST_SOURCE, "2024-02", None).await?;
        get_custom(&db, TEST_SOURCE).await?;

        let all = list(&db, &VersionFilter::for_source(TEST_SOURCE)).await?;
        let labels: Vec<&str> = all.iter().map(|v| v.version_label.as_str()).collect();
        assert_eq!(labels, vec!["2024-03", "2024-02", "2024-01"]);

        let done = list(
            &db,
            &VersionFilter {
                import_status: Some(ImportStatus::Done),
                ..VersionFilter::for_source(TEST_SOURCE)
            },
        )
        .await?;
        assert_eq!(done.len(), 2);

        let with_custom = list(
            &db,
            &VersionFilter {
                include_custom: true,
                ..VersionFilter::for_source(TEST_SOURCE)
            },
        )
        .await?;
        assert_eq!(with_custom.len(), 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_activate_keeps_single_active_version() -> Result<()> {
        let db = setup_test_db().await?;
        let mut ids = Vec::new();
        for label in ["2024-01", "2024-02", "2024-03"] {
            ids.push(create_done_version(&db, TEST_SOURCE, label).await?.id);
        }
        let other = create_done_version(&db, "other", "2024-01").await?;
        activate(&db, other.id).await?;

        for &id in ids.iter().chain(ids.iter().rev()) {
            activate(&db, id).await?;
            assert_eq!(active_count(&db, TEST_SOURCE).await?, 1);
            assert_eq!(get_current(&db, TEST_SOURCE).await?.id, id);
        }

        // Activations never touch another source
        assert_eq!(get_current(&db, "other").await?.id, other.id);
        assert_eq!(active_count(&db, "other").await?, 1);

        // A version that is not done cannot be activated
        let queued = create_queued(&db, TEST_SOURCE, "2024-04", None).await?;
        assert!(matches!(
            activate(&db, queued.id).await,
            Err(Error::InvalidTransition { .. })
        ));
        assert_eq!(active_count(&db, TEST_SOURCE).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_activation() -> Result<()> {
        let db = setup_test_db().await?;
        let first = create_done_version(&db, TEST_SOURCE, "2024-01").await?;
        let second = create_done_version(&db, TEST_SOURCE, "2024-02").await?;

        let (a, b) = tokio::join!(activate(&db, first.id), activate(&db, second.id));
        a?;
        b?;

        assert_eq!(active_count(&db, TEST_SOURCE).await?, 1);
        let current = get_current(&db, TEST_SOURCE).await?;
        assert!(current.current_active);
        Ok(())
    }

    #[tokio::test]
    async fn test_deactivate_promotes_newest_done_version() -> Result<()> {
        let db = setup_test_db().await?;
        let older = create_done_version(&db, TEST_SOURCE, "2024-01").await?;
        let newer = create_done_version(&db, TEST_SOURCE, "2024-02").await?;
        activate(&db, newer.id).await?;

        let deactivated = deactivate(&db, newer.id).await?;
        assert!(deactivated.deactivated);
        assert!(!deactivated.current_active);

        let current = get_current(&db, TEST_SOURCE).await?;
        assert_eq!(current.id, older.id);
        assert!(current.current_active);

        deactivate(&db, older.id).await?;
        assert!(find_current(&db, TEST_SOURCE).await?.is_none());
        assert_eq!(active_count(&db, TEST_SOURCE).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_and_purge_versions() -> Result<()> {
        let db = setup_test_db().await?;
        let schema = provision_test_metadata(&db).await?;

        let old = create_done_version(&db, TEST_SOURCE, "2024-01").await?;
        let failed = create_queued(&db, TEST_SOURCE, "2024-02", None).await?;
        mark_failed(&db, failed.id, "broken feed").await?;
        let current = create_version_with_drugs(&db, &schema, "2024-03", &["Aspirin"]).await?;
        activate(&db, current.id).await?;

        // Give the old version a drug so the cascade is exercised
        let running = create_queued(&db, TEST_SOURCE, "2023-12", None).await?;
        mark_running(&db, running.id).await?;
        crate::catalog::drug::create_bulk(&db, &schema, running.id, vec![test_drug("Old")])
            .await?;
        mark_done(&db, running.id).await?;

        assert!(matches!(
            delete_version(&db, current.id).await,
            Err(Error::InvalidTransition { .. })
        ));

        let mut purged = purge_obsolete(&db, TEST_SOURCE).await?;
        purged.sort_unstable();
        let mut expected = vec![old.id, failed.id, running.id];
        expected.sort_unstable();
        assert_eq!(purged, expected);

        assert!(matches!(
            get_by_id(&db, running.id).await,
            Err(Error::VersionNotFound { .. })
        ));
        let remaining_drugs = Drug::find().all(&db).await?;
        assert!(remaining_drugs.iter().all(|d| d.source_dataset_id == current.id));
        assert!(
            DrugAttr::find()
                .all(&db)
                .await?
                .iter()
                .all(|attr| remaining_drugs.iter().any(|d| d.id == attr.drug_id))
        );
        Ok(())
    }
}
