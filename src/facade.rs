//! Catalog facade - the single entry point for catalog reads, searches and custom drugs.
//!
//! [`DrugSearch`] resolves the current dataset version of its source once and keeps it for
//! its own lifetime, so every read through one facade sees the same version. Callers that
//! need a newer version after an activation create a new facade or call
//! [`DrugSearch::invalidate`].
//!
//! The search engine is resolved lazily on first use and searches the same cached versions.
//! Engine failures are reported as
//! [`Error::SearchEngineNotReady`] whatever the engine, configuration mistakes as
//! [`Error::SearchEngineNotConfigured`].

use crate::{
    catalog::{
        DrugRecord, GetMultipleOptions, NewDrug, PaginatedResult, Pagination, SchemaCache,
        SourceSchema,
        dataset_version::{get_current, get_custom},
        drug::{self, DrugScope},
    },
    config::CatalogConfig,
    entities::dataset_version,
    errors::{Error, Result},
    importer::importer_by_name,
    search::{EngineContext, ScoredDrug, SearchEngine, SearchQuery, engine_by_name},
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Catalog facade over one source and one search engine.
pub struct DrugSearch {
    db: Arc<DatabaseConnection>,
    source_name: String,
    engine_name: String,
    schema_cache: SchemaCache,
    current_version: OnceCell<dataset_version::Model>,
    scope_ids: OnceCell<Vec<i64>>,
    engine: OnceCell<Arc<dyn SearchEngine>>,
}

impl std::fmt::Debug for DrugSearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrugSearch")
            .field("source_name", &self.source_name)
            .field("engine_name", &self.engine_name)
            .field("current_version", &self.current_version.get().map(|v| v.id))
            .finish_non_exhaustive()
    }
}

impl DrugSearch {
    /// A facade over `source_name`, searching with the engine registered as `engine_name`.
    #[must_use]
    pub fn new(
        db: impl Into<Arc<DatabaseConnection>>,
        source_name: &str,
        engine_name: &str,
    ) -> Self {
        Self {
            db: db.into(),
            source_name: source_name.to_string(),
            engine_name: engine_name.to_string(),
            schema_cache: SchemaCache::new(),
            current_version: OnceCell::new(),
            scope_ids: OnceCell::new(),
            engine: OnceCell::new(),
        }
    }

    /// A facade over the configured importer's source and the configured engine.
    pub fn from_config(
        db: impl Into<Arc<DatabaseConnection>>,
        config: &CatalogConfig,
    ) -> Result<Self> {
        let importer = importer_by_name(&config.importer)?;
        Ok(Self::new(db, importer.dataset_name(), &config.search_engine))
    }

    fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Source this facade reads.
    #[must_use]
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// The current dataset version, resolved on first call and kept afterwards.
    pub async fn current_version(&self) -> Result<&dataset_version::Model> {
        self.current_version
            .get_or_try_init(|| async {
                let version = get_current(self.db(), &self.source_name).await?;
                debug!(
                    "Resolved current version of '{}': {} ({})",
                    self.source_name, version.id, version.version_label
                );
                Ok::<_, Error>(version)
            })
            .await
    }

    /// Current version plus the custom pseudo-version.
    async fn scope_ids(&self) -> Result<&[i64]> {
        let ids = self
            .scope_ids
            .get_or_try_init(|| async {
                let current = self.current_version().await?;
                let custom = get_custom(self.db(), &self.source_name).await?;
                Ok::<_, Error>(vec![current.id, custom.id])
            })
            .await?;
        Ok(ids)
    }

    async fn schema(&self) -> Result<Arc<SourceSchema>> {
        self.schema_cache.get(self.db(), &self.source_name).await
    }

    /// Resolves the configured engine, checks that it can answer queries and pins it to
    /// the cached versions.
    async fn engine(&self) -> Result<&Arc<dyn SearchEngine>> {
        self.engine
            .get_or_try_init(|| async {
                let context = EngineContext::new(Arc::clone(&self.db), &self.source_name)
                    .with_schema_cache(self.schema_cache.clone());
                let unpinned = engine_by_name(&self.engine_name, context.clone())?;
                if !unpinned.index_ready().await {
                    return Err(Error::SearchEngineNotReady {
                        reason: format!("index of '{}' is not ready", self.engine_name),
                    });
                }
                let scope = self.scope_ids().await.map_err(|e| self.engine_error(e))?;
                let engine = engine_by_name(&self.engine_name, context.with_pinned_versions(scope))?;
                info!(
                    "Search engine '{}' is ready, searching versions {scope:?}",
                    self.engine_name
                );
                Ok::<_, Error>(engine)
            })
            .await
    }

    /// Maps engine failures onto the facade's error vocabulary.
    fn engine_error(&self, error: Error) -> Error {
        match error {
            Error::SearchEngineNotConfigured { .. } | Error::SearchEngineNotReady { .. } => error,
            other => {
                if other.is_transient() {
                    debug!("Search engine '{}' not ready: {other}", self.engine_name);
                } else {
                    warn!("Search engine '{}' failed: {other}", self.engine_name);
                }
                Error::SearchEngineNotReady {
                    reason: other.to_string(),
                }
            }
        }
    }

    /// Searches the current catalog.
    #[instrument(skip(self), fields(source = %self.source_name))]
    pub async fn search(&self, query: &SearchQuery) -> Result<PaginatedResult<ScoredDrug>> {
        let engine = self.engine().await?;
        engine
            .search(query)
            .await
            .map_err(|e| self.engine_error(e))
    }

    /// Loads drugs of the current catalog in the order of `ids`, skipping unknown ids.
    pub async fn get_multiple(&self, ids: &[Uuid]) -> Result<Vec<DrugRecord>> {
        let schema = self.schema().await?;
        let scope = DrugScope::Versions(self.scope_ids().await?);
        drug::get_multiple(self.db(), &schema, ids, GetMultipleOptions::new(scope)).await
    }

    /// Loads one drug of the current catalog.
    pub async fn get(&self, drug_id: Uuid) -> Result<DrugRecord> {
        let schema = self.schema().await?;
        let scope = DrugScope::Versions(self.scope_ids().await?);
        drug::get(self.db(), &schema, drug_id, scope).await
    }

    /// Lists the current catalog by trade name.
    pub async fn list(&self, pagination: Pagination) -> Result<PaginatedResult<DrugRecord>> {
        let schema = self.schema().await?;
        let scope = DrugScope::Versions(self.scope_ids().await?);
        drug::list(self.db(), &schema, pagination, scope).await
    }

    /// Number of searchable drugs.
    pub async fn total_drug_count(&self) -> Result<u64> {
        let engine = self.engine().await?;
        engine
            .total_item_count()
            .await
            .map_err(|e| self.engine_error(e))
    }

    /// Whether searches can be served right now. Never fails.
    pub async fn healthy(&self) -> bool {
        match self.total_drug_count().await {
            Ok(count) => {
                debug!("Catalog healthy with {count} searchable drugs");
                true
            }
            Err(e) => {
                warn!("Catalog health check failed: {e}");
                false
            }
        }
    }

    /// Hands a written custom drug to the engine. Indexing failures do not fail the write.
    async fn index_custom_drug(&self, record: &DrugRecord) {
        match self.engine().await {
            Ok(engine) => {
                if let Err(e) = engine.insert_drug_to_index(record).await {
                    warn!("Custom drug {} not added to the search index: {e}", record.id());
                }
            }
            Err(e) => debug!("Search engine unavailable, custom drug not indexed: {e}"),
        }
    }

    /// Creates a custom drug and makes it searchable.
    #[instrument(skip(self, input), fields(trade_name = %input.trade_name))]
    pub async fn create_custom_drug(&self, input: &NewDrug) -> Result<DrugRecord> {
        let schema = self.schema().await?;
        let record = drug::create_custom(self.db(), &schema, input).await?;
        self.index_custom_drug(&record).await;
        Ok(record)
    }

    /// Replaces a custom drug and refreshes its search text.
    pub async fn update_custom_drug(&self, drug_id: Uuid, input: &NewDrug) -> Result<DrugRecord> {
        let schema = self.schema().await?;
        let record = drug::update_drug(self.db(), &schema, drug_id, input).await?;
        self.index_custom_drug(&record).await;
        Ok(record)
    }

    /// Deletes a custom drug.
    pub async fn delete_custom_drug(&self, drug_id: Uuid) -> Result<()> {
        drug::delete_drug(self.db(), drug_id).await
    }

    /// Forgets the cached version, schema and engine. The next call resolves them again.
    pub async fn invalidate(&mut self) {
        self.current_version.take();
        self.scope_ids.take();
        self.engine.take();
        self.schema_cache.invalidate(&self.source_name).await;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::catalog::dataset_version::activate;
    use crate::errors::ErrorKind;
    use crate::test_utils::*;

    async fn catalog_with(db: &Arc<DatabaseConnection>, names: &[&str]) -> Result<DrugSearch> {
        let schema = provision_test_metadata(db).await?;
        let version = create_version_with_drugs(db, &schema, "2024-01", names).await?;
        activate(db, version.id).await?;
        Ok(DrugSearch::new(Arc::clone(db), TEST_SOURCE, "generic_sql"))
    }

    fn trade_names(records: &[DrugRecord]) -> Vec<&str> {
        records.iter().map(|r| r.drug.trade_name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_unknown_engine_is_a_configuration_error() -> Result<()> {
        let db = setup_test_db().await?;
        provision_test_metadata(&db).await?;
        let catalog = DrugSearch::new(db, TEST_SOURCE, "elastic");

        let result = catalog.search(&SearchQuery::new("aspirin")).await;
        let error = result.unwrap_err();
        assert!(matches!(error, Error::SearchEngineNotConfigured { .. }));
        assert_eq!(error.kind(), ErrorKind::Configuration);
        assert!(!catalog.healthy().await);
        Ok(())
    }

    #[tokio::test]
    async fn test_not_ready_without_current_version() -> Result<()> {
        let db = setup_test_db().await?;
        provision_test_metadata(&db).await?;
        let catalog = DrugSearch::new(db, TEST_SOURCE, "generic_sql");

        let error = catalog.total_drug_count().await.unwrap_err();
        assert!(matches!(error, Error::SearchEngineNotReady { .. }));
        assert!(error.is_transient());
        assert!(!catalog.healthy().await);
        assert!(matches!(
            catalog.current_version().await,
            Err(Error::NoCurrentVersion { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_search_and_count() -> Result<()> {
        let db = setup_shared_test_db().await?;
        let catalog = catalog_with(&db, &["Aspirin Complex", "Aspirin", "Ibuprofen"]).await?;

        assert!(catalog.healthy().await);
        assert_eq!(catalog.total_drug_count().await?, 3);
        let result = catalog.search(&SearchQuery::new("aspirin")).await?;
        assert_eq!(result.total_count, 2);
        assert_eq!(result.items[0].item.drug.trade_name, "Aspirin");
        Ok(())
    }

    #[tokio::test]
    async fn test_current_version_is_cached_until_invalidated() -> Result<()> {
        let db = setup_shared_test_db().await?;
        let schema = provision_test_metadata(&db).await?;
        let old = create_version_with_drugs(&db, &schema, "2024-01", &["Old Aspirin"]).await?;
        activate(&db, old.id).await?;
        let mut catalog = DrugSearch::new(Arc::clone(&db), TEST_SOURCE, "generic_sql");
        assert_eq!(catalog.current_version().await?.id, old.id);

        let new = create_version_with_drugs(&db, &schema, "2024-02", &["New Aspirin"]).await?;
        activate(&db, new.id).await?;
        assert_eq!(catalog.current_version().await?.id, old.id);
        let listed = catalog.list(Pagination::default()).await?;
        assert_eq!(listed.items[0].drug.trade_name, "Old Aspirin");

        catalog.invalidate().await;
        assert_eq!(catalog.current_version().await?.id, new.id);
        let listed = catalog.list(Pagination::default()).await?;
        assert_eq!(listed.items[0].drug.trade_name, "New Aspirin");
        Ok(())
    }

    #[tokio::test]
    async fn test_search_and_reads_share_the_cached_version() -> Result<()> {
        let db = setup_shared_test_db().await?;
        let schema = provision_test_metadata(&db).await?;
        let mut catalog = catalog_with(&db, &["Old Aspirin"]).await?;
        assert_eq!(catalog.current_version().await?.version_label, "2024-01");

        let next = create_version_with_drugs(&db, &schema, "2024-02", &["New Aspirin"]).await?;
        activate(&db, next.id).await?;

        let found = catalog.search(&SearchQuery::new("aspirin")).await?;
        let hits: Vec<DrugRecord> = found.items.iter().map(|hit| hit.item.clone()).collect();
        assert_eq!(trade_names(&hits), vec!["Old Aspirin"]);
        let ids: Vec<Uuid> = found.items.iter().map(|hit| hit.drug_id).collect();
        assert_eq!(trade_names(&catalog.get_multiple(&ids).await?), vec!["Old Aspirin"]);
        assert_eq!(
            trade_names(&catalog.list(Pagination::default()).await?.items),
            vec!["Old Aspirin"]
        );
        assert_eq!(catalog.total_drug_count().await?, 1);

        catalog.invalidate().await;
        let found = catalog.search(&SearchQuery::new("aspirin")).await?;
        assert_eq!(found.items[0].item.drug.trade_name, "New Aspirin");
        assert_eq!(catalog.get_multiple(&[found.items[0].drug_id]).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_get_multiple_preserves_order() -> Result<()> {
        let db = setup_shared_test_db().await?;
        let catalog = catalog_with(&db, &["Alpha", "Beta", "Gamma"]).await?;
        let all = catalog.list(Pagination::default()).await?;
        let (a, b, c) = (all.items[0].id(), all.items[1].id(), all.items[2].id());

        assert_eq!(trade_names(&all.items), vec!["Alpha", "Beta", "Gamma"]);

        let records = catalog.get_multiple(&[c, a, b]).await?;
        assert_eq!(
            records.iter().map(DrugRecord::id).collect::<Vec<_>>(),
            vec![c, a, b]
        );
        assert_eq!(trade_names(&records), vec!["Gamma", "Alpha", "Beta"]);
        assert_eq!(catalog.get(b).await?.drug.trade_name, "Beta");
        assert!(matches!(
            catalog.get(Uuid::new_v4()).await,
            Err(Error::DrugNotFound { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_custom_drug_lifecycle() -> Result<()> {
        let db = setup_shared_test_db().await?;
        let catalog = catalog_with(&db, &["Aspirin"]).await?;
        let engine = crate::search::GenericSqlEngine::new(test_engine_context(&db));
        engine.build_index(false).await?;

        let custom = catalog.create_custom_drug(&test_drug("Grandma Remedy")).await?;
        let found = catalog.search(&SearchQuery::new("grandma")).await?;
        assert_eq!(found.items[0].drug_id, custom.id());
        assert_eq!(engine.state().await?.unwrap().item_count, Some(2));
        assert_eq!(catalog.get_multiple(&[custom.id()]).await?.len(), 1);

        let pzn = custom.code("PZN").unwrap().to_string();
        let renamed = NewDrug::new("Grandpa Remedy").with_code("PZN", &pzn);
        catalog.update_custom_drug(custom.id(), &renamed).await?;
        assert_eq!(
            catalog.get(custom.id()).await?.drug.trade_name,
            "Grandpa Remedy"
        );
        let renamed_hits = catalog.search(&SearchQuery::new("grandpa")).await?;
        assert_eq!(renamed_hits.items[0].drug_id, custom.id());
        assert_eq!(engine.state().await?.unwrap().item_count, Some(2));

        catalog.delete_custom_drug(custom.id()).await?;
        assert_eq!(catalog.total_drug_count().await?, 1);
        Ok(())
    }
}
