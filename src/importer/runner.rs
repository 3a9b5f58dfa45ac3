//! Import runner - drives one importer run through the dataset version lifecycle.
//!
//! `queued -> running -> {done, failed}`: the version is created before the plugin reads
//! anything, and its rows are committed in one transaction only after every row validated.
//! Re-running a release is safe. A `done` release is left alone, a `failed` one is
//! discarded and imported again.

use super::DrugImporter;
use crate::{
    catalog::{
        code_system::provision_code_systems,
        dataset_version::{
            activate, create_queued, delete_version, find_by_label, mark_done, mark_failed,
            mark_running,
        },
        drug::create_bulk,
        lookup::provision_lookup_values,
        schema::{SourceSchema, provision_field_definitions},
    },
    entities::{ImportStatus, dataset_version},
    errors::{Error, Result},
};
use sea_orm::DatabaseConnection;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// How [`run_import`] finishes a successful import.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunImportOptions {
    /// Make the imported version the current one
    pub activate: bool,
    /// Give up and mark the version `failed` after this long
    pub timeout: Option<Duration>,
}

/// Inserts the importer's field definitions, lookup values and code systems once.
#[instrument(skip_all, fields(importer = importer.name()))]
pub async fn provision_metadata(db: &DatabaseConnection, importer: &dyn DrugImporter) -> Result<()> {
    let source_name = importer.dataset_name();
    let fields =
        provision_field_definitions(db, source_name, &importer.get_attr_field_definitions())
            .await?;
    let lookups = provision_lookup_values(db, source_name, &importer.get_lookup_values()).await?;
    let code_systems = provision_code_systems(db, &importer.get_code_definitions()).await?;
    info!(
        "Metadata for '{source_name}' provisioned ({fields} fields, {lookups} lookup values, {code_systems} code systems new)"
    );
    Ok(())
}

/// Imports the release found at `source` and returns its dataset version.
///
/// - a release that is already `done` is returned unchanged
/// - a release still `queued`/`running` fails with [`Error::ImportInProgress`]
/// - a `failed` release is deleted and imported again
///
/// On any failure after the version was queued, the version is marked `failed` and the
/// error is returned.
#[instrument(skip_all, fields(importer = importer.name(), source = %source.display()))]
pub async fn run_import(
    db: &DatabaseConnection,
    importer: &dyn DrugImporter,
    source: &Path,
    options: RunImportOptions,
) -> Result<dataset_version::Model> {
    let source_name = importer.dataset_name();
    let version_label = importer.version_label(source).await?;

    if let Some(existing) = find_by_label(db, source_name, &version_label).await? {
        match existing.import_status {
            ImportStatus::Done => {
                info!(
                    "Release '{version_label}' of '{source_name}' is already imported as version {}",
                    existing.id
                );
                return Ok(existing);
            }
            ImportStatus::Queued | ImportStatus::Running => {
                return Err(Error::ImportInProgress {
                    source_name: source_name.to_string(),
                    version_label,
                });
            }
            ImportStatus::Failed => {
                warn!(
                    "Discarding failed version {} of '{source_name}' before retrying",
                    existing.id
                );
                delete_version(db, existing.id).await?;
            }
        }
    }

    provision_metadata(db, importer).await?;
    let schema = SourceSchema::load(db, source_name).await?;

    let version = create_queued(
        db,
        source_name,
        &version_label,
        Some(source.display().to_string()),
    )
    .await?;
    mark_running(db, version.id).await?;

    let import = async {
        let drugs = importer.load_drugs(source).await?;
        create_bulk(db, &schema, version.id, drugs).await
    };
    let outcome = match options.timeout {
        Some(limit) => tokio::time::timeout(limit, import)
            .await
            .unwrap_or_else(|_| {
                Err(Error::ImportTimedOut {
                    version_id: version.id,
                    seconds: limit.as_secs(),
                })
            }),
        None => import.await,
    };

    match outcome {
        Ok(inserted) => {
            let done = mark_done(db, version.id).await?;
            info!("Imported {inserted} drugs as '{source_name}' {version_label}");
            if options.activate {
                return activate(db, done.id).await;
            }
            Ok(done)
        }
        Err(e) => {
            error!("Import of '{source_name}' {version_label} failed: {e}");
            mark_failed(db, version.id, &e.to_string()).await?;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::catalog::dataset_version::{get_by_id, get_current};
    use crate::catalog::drug::{DrugScope, count};
    use crate::test_utils::*;

    #[tokio::test]
    async fn test_run_import_happy_path() -> Result<()> {
        init_test_tracing();
        let db = setup_test_db().await?;
        let importer = InMemoryImporter::new("2024-01", &["Aspirin", "Ibuprofen"]);

        let options = RunImportOptions {
            activate: true,
            timeout: None,
        };
        let version = run_import(&db, &importer, Path::new("memory"), options).await?;
        assert_eq!(version.import_status, ImportStatus::Done);
        assert!(version.current_active);
        assert_eq!(version.import_source.as_deref(), Some("memory"));
        assert_eq!(get_current(&db, TEST_SOURCE).await?.id, version.id);
        assert_eq!(count(&db, DrugScope::Current(TEST_SOURCE)).await?, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_rerunning_done_release_is_a_no_op() -> Result<()> {
        let db = setup_test_db().await?;
        let importer = InMemoryImporter::new("2024-01", &["Aspirin"]);
        let options = RunImportOptions::default();

        let first = run_import(&db, &importer, Path::new("memory"), options).await?;
        let second = run_import(&db, &importer, Path::new("memory"), options).await?;
        assert_eq!(first.id, second.id);
        assert_eq!(count(&db, DrugScope::AnyVersion).await?, 1);

        // Not activated without the option
        assert!(!second.current_active);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_import_is_marked_and_retried() -> Result<()> {
        let db = setup_test_db().await?;
        let broken = InMemoryImporter::new("2024-01", &["Aspirin"]).with_drug(
            test_drug("Broken").with_attr("amount", "lots"),
        );

        let result = run_import(&db, &broken, Path::new("memory"), RunImportOptions::default()).await;
        assert!(matches!(result, Err(Error::BulkImport { row: 2, .. })));

        let failed = find_by_label(&db, TEST_SOURCE, "2024-01").await?.unwrap();
        assert_eq!(failed.import_status, ImportStatus::Failed);
        assert!(failed.import_error.unwrap().contains("row 2"));
        assert_eq!(count(&db, DrugScope::AnyVersion).await?, 0);

        let fixed = InMemoryImporter::new("2024-01", &["Aspirin"]);
        let retried = run_import(&db, &fixed, Path::new("memory"), RunImportOptions::default()).await?;
        assert_ne!(retried.id, failed.id);
        assert_eq!(retried.import_status, ImportStatus::Done);
        assert!(matches!(
            get_by_id(&db, failed.id).await,
            Err(Error::VersionNotFound { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_running_release_fails_loudly() -> Result<()> {
        let db = setup_test_db().await?;
        let running = create_queued(&db, TEST_SOURCE, "2024-01", None).await?;
        mark_running(&db, running.id).await?;

        let importer = InMemoryImporter::new("2024-01", &["Aspirin"]);
        let result = run_import(&db, &importer, Path::new("memory"), RunImportOptions::default()).await;
        assert!(matches!(result, Err(Error::ImportInProgress { .. })));
        assert!(result.unwrap_err().is_transient());
        Ok(())
    }

    #[tokio::test]
    async fn test_import_timeout_marks_version_failed() -> Result<()> {
        let db = setup_test_db().await?;
        let slow = InMemoryImporter::new("2024-01", &["Aspirin"]).with_delay(Duration::from_secs(5));
        let options = RunImportOptions {
            activate: true,
            timeout: Some(Duration::from_millis(20)),
        };

        let result = run_import(&db, &slow, Path::new("memory"), options).await;
        assert!(matches!(result, Err(Error::ImportTimedOut { .. })));

        let version = find_by_label(&db, TEST_SOURCE, "2024-01").await?.unwrap();
        assert_eq!(version.import_status, ImportStatus::Failed);
        assert!(!version.current_active);
        assert_eq!(count(&db, DrugScope::AnyVersion).await?, 0);
        Ok(())
    }
}
