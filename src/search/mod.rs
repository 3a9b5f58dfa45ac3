//! Search engines - pluggable strategies answering catalog queries.
//!
//! Every engine implements [`SearchEngine`] and is registered by name in a static registry,
//! from which configuration selects one. An engine owns an index lifecycle
//! (`absent -> building -> ready`, `ready -> building` on refresh) and must refuse queries
//! with [`Error::IndexNotReady`] until it is ready.

pub mod generic_sql;
pub mod tokenize;

use crate::{
    catalog::{DrugRecord, PaginatedResult, Pagination, SchemaCache},
    errors::{Error, Result},
};
use async_trait::async_trait;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub use generic_sql::GenericSqlEngine;

/// Index lifecycle state of an engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IndexState {
    /// Nothing to search yet
    Absent,
    /// An index build is running
    Building,
    /// Queries can be answered
    Ready,
}

/// Structured constraints AND-ed to a search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilters {
    /// `(code_system_id, code)` pairs the drug must carry
    pub codes: Vec<(String, String)>,
    /// `(field_name, value)` attribute values the drug must carry
    pub attrs: Vec<(String, String)>,
    /// Drop drugs whose market exit date is today or earlier
    pub only_marketed: bool,
}

impl SearchFilters {
    /// Requires a code.
    #[must_use]
    pub fn with_code(mut self, code_system_id: &str, code: &str) -> Self {
        self.codes.push((code_system_id.to_string(), code.to_string()));
        self
    }

    /// Requires an attribute value, typically of a lookup field.
    #[must_use]
    pub fn with_attr(mut self, field_name: &str, value: &str) -> Self {
        self.attrs.push((field_name.to_string(), value.to_string()));
        self
    }

    /// Restricts to drugs still on the market.
    #[must_use]
    pub const fn only_marketed(mut self) -> Self {
        self.only_marketed = true;
        self
    }
}

/// A search request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    /// Free-text term, `None` lists everything
    pub term: Option<String>,
    /// Structured constraints
    pub filters: SearchFilters,
    /// Result window
    pub pagination: Pagination,
}

impl SearchQuery {
    /// Searches for `term` with default filters and pagination.
    #[must_use]
    pub fn new(term: &str) -> Self {
        Self {
            term: Some(term.to_string()),
            ..Self::default()
        }
    }

    /// Sets the structured filters.
    #[must_use]
    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }

    /// Sets the result window.
    #[must_use]
    pub const fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = pagination;
        self
    }
}

/// One search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredDrug {
    /// Id of the matched drug
    pub drug_id: Uuid,
    /// Higher is more relevant, comparable within one result set only
    pub relevance_score: f64,
    /// The matched drug
    pub item: DrugRecord,
}

/// Everything an engine needs to reach the catalog.
#[derive(Debug, Clone)]
pub struct EngineContext {
    /// Catalog database, shared with the caller
    pub db: Arc<DatabaseConnection>,
    /// Source whose current version is searched
    pub source_name: String,
    /// Shared schema cache for decoding attributes
    pub schema_cache: SchemaCache,
    /// Versions searched and counted. `None` resolves the current scope on every call.
    pub pinned_versions: Option<Vec<i64>>,
}

impl EngineContext {
    /// Context following the current version of `source_name`, with a fresh schema cache.
    #[must_use]
    pub fn new(db: Arc<DatabaseConnection>, source_name: &str) -> Self {
        Self {
            db,
            source_name: source_name.to_string(),
            schema_cache: SchemaCache::new(),
            pinned_versions: None,
        }
    }

    /// Shares an existing schema cache.
    #[must_use]
    pub fn with_schema_cache(mut self, schema_cache: SchemaCache) -> Self {
        self.schema_cache = schema_cache;
        self
    }

    /// Searches exactly these versions instead of resolving the current scope per call.
    #[must_use]
    pub fn with_pinned_versions(mut self, version_ids: &[i64]) -> Self {
        self.pinned_versions = Some(version_ids.to_vec());
        self
    }
}

/// Contract every search engine satisfies.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    /// Registry name.
    fn name(&self) -> &'static str;

    /// Current lifecycle state. Must be cheap.
    async fn index_state(&self) -> IndexState;

    /// Whether queries can be answered now.
    async fn index_ready(&self) -> bool {
        self.index_state().await == IndexState::Ready
    }

    /// Builds the index. A no-op when it is up to date and `force_rebuild` is false, or when
    /// another build is running. Missing prerequisites leave the index absent without error.
    async fn build_index(&self, force_rebuild: bool) -> Result<()>;

    /// Incremental refresh, for engines where it differs from a full build.
    async fn refresh_index(&self, force_rebuild: bool) -> Result<()> {
        let _ = force_rebuild;
        self.build_index(true).await
    }

    /// Makes a just-created custom drug searchable without a rebuild.
    async fn insert_drug_to_index(&self, drug: &DrugRecord) -> Result<()>;

    /// Releases engine resources when another engine is selected. Fails when they could
    /// not be released.
    async fn disable(&self) -> Result<()>;

    /// Answers a query, failing with [`Error::IndexNotReady`] when not ready.
    async fn search(&self, query: &SearchQuery) -> Result<PaginatedResult<ScoredDrug>>;

    /// Number of searchable drugs.
    async fn total_item_count(&self) -> Result<u64>;
}

type EngineConstructor = fn(EngineContext) -> Arc<dyn SearchEngine>;

fn generic_sql(context: EngineContext) -> Arc<dyn SearchEngine> {
    Arc::new(GenericSqlEngine::new(context))
}

const SEARCH_ENGINES: &[(&str, EngineConstructor)] = &[(GenericSqlEngine::NAME, generic_sql)];

/// Names of all registered engines.
pub fn engine_names() -> impl Iterator<Item = &'static str> {
    SEARCH_ENGINES.iter().map(|(name, _)| *name)
}

/// Instantiates the engine registered as `name`.
pub fn engine_by_name(name: &str, context: EngineContext) -> Result<Arc<dyn SearchEngine>> {
    SEARCH_ENGINES
        .iter()
        .find(|(registered, _)| *registered == name)
        .map(|(_, constructor)| constructor(context))
        .ok_or_else(|| Error::SearchEngineNotConfigured {
            name: name.to_string(),
        })
}

/// Calls [`SearchEngine::disable`] on every registered engine except `selected`.
///
/// Failures are logged and skipped. Returns the names of the engines that were disabled.
pub async fn disable_unselected_engines(
    selected: &str,
    context: &EngineContext,
) -> Vec<&'static str> {
    let mut disabled = Vec::new();
    for (name, constructor) in SEARCH_ENGINES {
        if *name == selected {
            continue;
        }
        match constructor(context.clone()).disable().await {
            Ok(()) => {
                info!("Disabled unselected search engine '{name}'");
                disabled.push(*name);
            }
            Err(e) => warn!("Failed to disable search engine '{name}': {e}"),
        }
    }
    disabled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    #[tokio::test]
    async fn test_engine_registry() -> Result<()> {
        let db = setup_shared_test_db().await?;
        let context = test_engine_context(&db);

        let engine = engine_by_name("generic_sql", context.clone())?;
        assert_eq!(engine.name(), "generic_sql");
        assert!(engine_names().any(|name| name == "generic_sql"));

        let unknown = engine_by_name("elastic", context);
        assert!(matches!(
            unknown,
            Err(Error::SearchEngineNotConfigured { ref name }) if name == "elastic"
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_disable_unselected_engines() -> Result<()> {
        let db = setup_shared_test_db().await?;
        let context = test_engine_context(&db);

        assert!(disable_unselected_engines("generic_sql", &context).await.is_empty());
        assert_eq!(
            disable_unselected_engines("elastic", &context).await,
            vec!["generic_sql"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_disable_is_skipped() -> Result<()> {
        let db = Arc::new(sea_orm::Database::connect("sqlite::memory:").await?);
        let context = test_engine_context(&db);

        // No tables, so releasing the generic SQL index fails and is only logged
        assert!(disable_unselected_engines("elastic", &context).await.is_empty());
        Ok(())
    }
}
