use drug_catalog::{
    DrugSearch,
    catalog::dataset_version::{get_custom, purge_obsolete},
    config::{self, database},
    errors::Result,
    importer::{self, RunImportOptions},
    search::{self, EngineContext},
};
use dotenvy::dotenv;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file, non-fatal since env vars can be set externally
    dotenv().ok();
    info!("Attempted to load .env file.");

    // 3. Load the catalog configuration
    let app_config = config::load_app_configuration()?;
    info!(
        "Using importer '{}' and search engine '{}'",
        app_config.importer, app_config.search_engine
    );

    // 4. Connect and create missing tables
    let db = database::create_connection(&app_config.database_url())
        .await
        .inspect_err(|e| error!("Failed to connect to database: {}", e))?;
    database::create_tables(&db)
        .await
        .inspect(|_| info!("Database tables ready."))
        .inspect_err(|e| error!("Failed to create tables: {}", e))?;

    // 5. Provision the importer's metadata and the custom pseudo-version
    let importer = importer::importer_by_name(&app_config.importer)?;
    importer::provision_metadata(&db, importer.as_ref()).await?;
    let source_name = importer.dataset_name().to_string();
    get_custom(&db, &source_name).await?;

    // 6. Import the configured release, if any
    if let Some(source) = &app_config.import_source {
        let options = RunImportOptions {
            activate: app_config.activate_after_import,
            timeout: app_config.import_timeout(),
        };
        match importer::run_import(&db, importer.as_ref(), source, options).await {
            Ok(version) => {
                info!(
                    "Dataset version {} ({}) is {}",
                    version.id, version.version_label, version.import_status
                );
                if app_config.purge_obsolete_versions {
                    purge_obsolete(&db, &source_name).await?;
                }
            }
            Err(e) if e.is_transient() => warn!("Import skipped: {e}"),
            Err(e) => {
                error!("Import failed: {e}");
                return Err(e);
            }
        }
    }

    // 7. Release unselected engines and build the selected one
    let db = Arc::new(db);
    let context = EngineContext::new(Arc::clone(&db), &source_name);
    search::disable_unselected_engines(&app_config.search_engine, &context).await;
    let engine = search::engine_by_name(&app_config.search_engine, context)?;
    engine.build_index(false).await?;

    // 8. Report health through the facade callers use
    let catalog = DrugSearch::from_config(db, &app_config)?;
    if catalog.healthy().await {
        info!(
            "Catalog '{}' ready with {} searchable drugs",
            catalog.source_name(),
            catalog.total_drug_count().await?
        );
    } else {
        warn!(
            "Catalog '{}' is not ready for searches yet",
            catalog.source_name()
        );
    }

    Ok(())
}
