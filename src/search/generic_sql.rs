//! Generic SQL search engine - queries the catalog tables directly.
//!
//! The catalog store is the index: the engine is ready as soon as the source has a current
//! version. Builds add one lowercased search text per drug to `drug_search_texts`, because
//! `SQLite` only folds ASCII case in `LIKE`. A row in `search_engine_state` records builds,
//! which keeps `build_index` idempotent and lets concurrent builds detect each other.
//!
//! Searching narrows candidates in SQL (scope, filters, one `LIKE` group per token), then
//! verifies and scores the candidates in Rust. Drugs without a search text yet still match
//! through the catalog columns, in ASCII case only.

use super::{
    EngineContext, IndexState, ScoredDrug, SearchEngine, SearchFilters, SearchQuery,
    tokenize::tokenize,
};
use crate::{
    catalog::{
        DrugRecord, PaginatedResult, SourceSchema,
        dataset_version::find_current,
        drug::{DrugScope, count, insert_chunked, load_records, scoped},
    },
    entities::{
        DatasetVersion, Drug, DrugAttr, DrugCode, DrugSearchText, LookupValue, SearchEngineState,
        dataset_version, drug, drug_attr, drug_code, drug_search_text, lookup_value,
        search_engine_state,
    },
    errors::{Error, Result},
};
use async_trait::async_trait;
use chrono::{NaiveDate, TimeDelta, Utc};
use sea_orm::{
    Condition, QueryOrder, Select, Set, SqlErr, TransactionTrait,
    prelude::*,
    sea_query::{Expr, LikeExpr, OnConflict, Query, SelectStatement},
};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Score of a trade name equal to the whole search phrase.
const EXACT_NAME_SCORE: f64 = 2.0;
/// Score of searchable text starting with the phrase.
const PREFIX_SCORE: f64 = 1.2;
/// Score of searchable text containing the phrase, case matching.
const CONTAINS_SCORE: f64 = 1.1;
/// Score of searchable text containing the phrase in any case.
const ICONTAINS_SCORE: f64 = 1.0;
/// Bonus per token found with matching case.
const TOKEN_CASE_BONUS: f64 = 0.2;
/// Bonus per token found in any case.
const TOKEN_BONUS: f64 = 0.1;
/// A build claimed longer ago than this is taken to have died with its process.
const STALE_BUILD_MINUTES: i64 = 60;

/// Reference engine answering queries straight from the catalog tables.
#[derive(Debug, Clone)]
pub struct GenericSqlEngine {
    context: EngineContext,
}

impl GenericSqlEngine {
    /// Registry name of this engine.
    pub const NAME: &'static str = "generic_sql";

    /// Creates the engine for the context's source.
    #[must_use]
    pub const fn new(context: EngineContext) -> Self {
        Self { context }
    }

    fn db(&self) -> &DatabaseConnection {
        &self.context.db
    }

    /// Pinned versions, or the current scope of the source.
    fn scope(&self) -> DrugScope<'_> {
        self.context
            .pinned_versions
            .as_deref()
            .map_or(DrugScope::Current(&self.context.source_name), DrugScope::Versions)
    }

    /// Build bookkeeping, `None` before the first build.
    pub async fn state(&self) -> Result<Option<search_engine_state::Model>> {
        SearchEngineState::find_by_id(Self::NAME.to_string())
            .one(self.db())
            .await
            .map_err(Into::into)
    }

    async fn ensure_state_row(&self) -> Result<search_engine_state::Model> {
        if let Some(state) = self.state().await? {
            return Ok(state);
        }
        let fresh = search_engine_state::ActiveModel {
            engine_name: Set(Self::NAME.to_string()),
            building: Set(false),
            build_started_at: Set(None),
            build_count: Set(0),
            last_build_at: Set(None),
            last_build_version_id: Set(None),
            item_count: Set(None),
            last_error: Set(None),
        };
        match fresh.insert(self.db()).await {
            Ok(state) => Ok(state),
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                self.state().await?.ok_or_else(|| Error::from(e))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn load_schema(&self) -> Result<Arc<SourceSchema>> {
        self.context
            .schema_cache
            .get(self.db(), &self.context.source_name)
            .await
    }

    /// Sets the `building` flag unless a live build holds it. A claim older than
    /// [`STALE_BUILD_MINUTES`], or one without a start time, is taken over.
    async fn claim_build(&self) -> Result<bool> {
        let now = Utc::now();
        let stale_before = now - TimeDelta::minutes(STALE_BUILD_MINUTES);
        let claimed = SearchEngineState::update_many()
            .col_expr(search_engine_state::Column::Building, Expr::value(true))
            .col_expr(
                search_engine_state::Column::BuildStartedAt,
                Expr::value(Some(now)),
            )
            .filter(search_engine_state::Column::EngineName.eq(Self::NAME))
            .filter(
                Condition::any()
                    .add(search_engine_state::Column::Building.eq(false))
                    .add(search_engine_state::Column::BuildStartedAt.is_null())
                    .add(search_engine_state::Column::BuildStartedAt.lt(stale_before)),
            )
            .exec(self.db())
            .await?
            .rows_affected;
        Ok(claimed > 0)
    }

    /// Rewrites the search texts of the source in one transaction, after the `building`
    /// flag was claimed. Searches see the old or the new texts, never a mix.
    async fn run_build(&self, version_id: i64) -> Result<u64> {
        let schema = self.load_schema().await?;
        let version_ids = self.scope().version_ids(self.db()).await?;

        let txn = self.db().begin().await?;
        let source_versions = Query::select()
            .column(dataset_version::Column::Id)
            .from(DatasetVersion)
            .and_where(dataset_version::Column::SourceName.eq(self.context.source_name.as_str()))
            .to_owned();
        DrugSearchText::delete_many()
            .filter(drug_search_text::Column::SourceDatasetId.in_subquery(source_versions))
            .exec(&txn)
            .await?;

        let drugs = scoped(Drug::find(), version_ids.as_deref())
            .order_by_asc(drug::Column::Id)
            .all(&txn)
            .await?;
        let texts: Vec<drug_search_text::ActiveModel> = load_records(&txn, &schema, drugs)
            .await?
            .iter()
            .map(search_text)
            .collect();
        let item_count = texts.len() as u64;
        insert_chunked(&txn, texts).await?;

        SearchEngineState::update_many()
            .col_expr(search_engine_state::Column::Building, Expr::value(false))
            .col_expr(
                search_engine_state::Column::BuildStartedAt,
                Expr::value(Option::<DateTimeUtc>::None),
            )
            .col_expr(
                search_engine_state::Column::BuildCount,
                Expr::col(search_engine_state::Column::BuildCount).add(1),
            )
            .col_expr(
                search_engine_state::Column::LastBuildAt,
                Expr::value(Some(Utc::now())),
            )
            .col_expr(
                search_engine_state::Column::LastBuildVersionId,
                Expr::value(Some(version_id)),
            )
            .col_expr(
                search_engine_state::Column::ItemCount,
                Expr::value(Some(i64::try_from(item_count).unwrap_or(i64::MAX))),
            )
            .col_expr(
                search_engine_state::Column::LastError,
                Expr::value(Option::<String>::None),
            )
            .filter(search_engine_state::Column::EngineName.eq(Self::NAME))
            .exec(&txn)
            .await?;
        txn.commit().await?;
        Ok(item_count)
    }

    async fn release_failed_build(&self, error: &Error) -> Result<()> {
        SearchEngineState::update_many()
            .col_expr(search_engine_state::Column::Building, Expr::value(false))
            .col_expr(
                search_engine_state::Column::BuildStartedAt,
                Expr::value(Option::<DateTimeUtc>::None),
            )
            .col_expr(
                search_engine_state::Column::LastError,
                Expr::value(Some(error.to_string())),
            )
            .filter(search_engine_state::Column::EngineName.eq(Self::NAME))
            .exec(self.db())
            .await?;
        Ok(())
    }

    /// Names of the fields text search looks at.
    fn searchable_fields(schema: &SourceSchema) -> Vec<String> {
        let mut names: Vec<String> = schema
            .fields()
            .filter(|def| def.searchable)
            .map(|def| def.field_name.clone())
            .collect();
        names.sort_unstable();
        names
    }

    /// Drugs carrying a searchable attribute value, or lookup display, like `pattern`.
    fn attr_match_subqueries(&self, searchable: &[String], pattern: &str) -> [SelectStatement; 2] {
        let by_value = Query::select()
            .column(drug_attr::Column::DrugId)
            .from(DrugAttr)
            .and_where(Expr::col(drug_attr::Column::FieldName).is_in(searchable.iter().cloned()))
            .and_where(Expr::col(drug_attr::Column::Value).like(like_pattern(pattern)))
            .to_owned();

        let by_display = Query::select()
            .column((DrugAttr, drug_attr::Column::DrugId))
            .from(DrugAttr)
            .inner_join(
                LookupValue,
                Expr::col((LookupValue, lookup_value::Column::FieldName))
                    .equals((DrugAttr, drug_attr::Column::FieldName))
                    .and(
                        Expr::col((LookupValue, lookup_value::Column::Value))
                            .equals((DrugAttr, drug_attr::Column::Value)),
                    )
                    .and(
                        Expr::col((LookupValue, lookup_value::Column::SourceName))
                            .eq(self.context.source_name.as_str()),
                    ),
            )
            .and_where(
                Expr::col((DrugAttr, drug_attr::Column::FieldName))
                    .is_in(searchable.iter().cloned()),
            )
            .and_where(
                Expr::col((LookupValue, lookup_value::Column::Display)).like(like_pattern(pattern)),
            )
            .to_owned();

        [by_value, by_display]
    }

    /// SQL condition a drug must meet to possibly match `token`.
    fn token_condition(&self, searchable: &[String], token: &str) -> Condition {
        let [by_value, by_display] = self.attr_match_subqueries(searchable, token);
        let by_code = Query::select()
            .column(drug_code::Column::DrugId)
            .from(DrugCode)
            .and_where(Expr::col(drug_code::Column::Code).like(like_pattern(token)))
            .to_owned();
        let by_text = Query::select()
            .column(drug_search_text::Column::DrugId)
            .from(DrugSearchText)
            .and_where(
                Expr::col(drug_search_text::Column::Content)
                    .like(like_pattern(&token.to_lowercase())),
            )
            .to_owned();

        Condition::any()
            .add(drug::Column::Id.in_subquery(by_text))
            .add(Expr::col((Drug, drug::Column::TradeName)).like(like_pattern(token)))
            .add(drug::Column::Id.in_subquery(by_value))
            .add(drug::Column::Id.in_subquery(by_display))
            .add(drug::Column::Id.in_subquery(by_code))
    }

    fn apply_filters(query: Select<Drug>, filters: &SearchFilters, today: NaiveDate) -> Select<Drug> {
        let mut query = query;
        for (code_system_id, code) in &filters.codes {
            let with_code = Query::select()
                .column(drug_code::Column::DrugId)
                .from(DrugCode)
                .and_where(drug_code::Column::CodeSystemId.eq(code_system_id.as_str()))
                .and_where(drug_code::Column::Code.eq(code.as_str()))
                .to_owned();
            query = query.filter(drug::Column::Id.in_subquery(with_code));
        }
        for (field_name, value) in &filters.attrs {
            let with_attr = Query::select()
                .column(drug_attr::Column::DrugId)
                .from(DrugAttr)
                .and_where(drug_attr::Column::FieldName.eq(field_name.as_str()))
                .and_where(drug_attr::Column::Value.eq(value.as_str()))
                .to_owned();
            query = query.filter(drug::Column::Id.in_subquery(with_attr));
        }
        if filters.only_marketed {
            query = query.filter(
                Condition::any()
                    .add(drug::Column::MarketExitDate.is_null())
                    .add(drug::Column::MarketExitDate.gt(today)),
            );
        }
        query
    }
}

/// Search text row of a drug.
fn search_text(record: &DrugRecord) -> drug_search_text::ActiveModel {
    drug_search_text::ActiveModel {
        drug_id: Set(record.id()),
        source_dataset_id: Set(record.drug.source_dataset_id),
        content: Set(record.search_texts().join(" ").to_lowercase()),
    }
}

/// `%token%` with `LIKE` wildcards in the token escaped.
fn like_pattern(token: &str) -> LikeExpr {
    let escaped = token
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    LikeExpr::new(format!("%{escaped}%")).escape('\\')
}

/// Scores a candidate against the tokens, `None` when a token is not found.
///
/// The phrase (tokens joined by spaces) earns a base score: equal to the trade name beats a
/// prefix of the searchable text, which beats a case-matching substring, which beats any
/// substring. Every token then adds a bonus, larger when its case matches.
#[must_use]
pub fn score_record(record: &DrugRecord, tokens: &[String]) -> Option<f64> {
    let content = record.search_texts().join(" ");
    let content_lower = content.to_lowercase();
    let phrase = tokens.join(" ");
    let phrase_lower = phrase.to_lowercase();

    let mut score = if record.drug.trade_name.to_lowercase() == phrase_lower {
        EXACT_NAME_SCORE
    } else if content_lower.starts_with(&phrase_lower) {
        PREFIX_SCORE
    } else if content.contains(&phrase) {
        CONTAINS_SCORE
    } else if content_lower.contains(&phrase_lower) {
        ICONTAINS_SCORE
    } else {
        0.0
    };

    for token in tokens {
        if content.contains(token.as_str()) {
            score += TOKEN_CASE_BONUS;
        } else if content_lower.contains(&token.to_lowercase()) {
            score += TOKEN_BONUS;
        } else {
            return None;
        }
    }
    Some(score)
}

fn rank(a: &ScoredDrug, b: &ScoredDrug) -> Ordering {
    b.relevance_score
        .total_cmp(&a.relevance_score)
        .then_with(|| {
            a.item
                .drug
                .trade_name
                .chars()
                .count()
                .cmp(&b.item.drug.trade_name.chars().count())
        })
        .then_with(|| a.item.drug.trade_name.cmp(&b.item.drug.trade_name))
        .then_with(|| a.drug_id.cmp(&b.drug_id))
}

#[async_trait]
impl SearchEngine for GenericSqlEngine {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn index_state(&self) -> IndexState {
        match find_current(self.db(), &self.context.source_name).await {
            Ok(Some(_)) => IndexState::Ready,
            Ok(None) => IndexState::Absent,
            Err(e) => {
                debug!("Treating search index as absent: {e}");
                IndexState::Absent
            }
        }
    }

    #[instrument(skip(self))]
    async fn build_index(&self, force_rebuild: bool) -> Result<()> {
        let version = match find_current(self.db(), &self.context.source_name).await {
            Ok(Some(version)) => version,
            Ok(None) => {
                info!(
                    "No current version of '{}' yet, search index stays absent",
                    self.context.source_name
                );
                return Ok(());
            }
            Err(e) => {
                warn!("Catalog not ready for an index build, treating index as absent: {e}");
                return Ok(());
            }
        };

        let state = match self.ensure_state_row().await {
            Ok(state) => state,
            Err(e) => {
                warn!("Search engine state unavailable, treating index as absent: {e}");
                return Ok(());
            }
        };
        if !force_rebuild
            && !state.building
            && state.last_build_at.is_some()
            && state.last_build_version_id == Some(version.id)
        {
            info!("Search index is up to date with version {}, skipping build", version.id);
            return Ok(());
        }

        if !self.claim_build().await? {
            warn!("Search index build already in progress, not starting another one");
            return Ok(());
        }
        if state.building {
            warn!(
                "Took over a search index build claimed at {:?} that never finished",
                state.build_started_at
            );
        }

        info!("Building search index for version {}...", version.id);
        match self.run_build(version.id).await {
            Ok(item_count) => {
                info!("...search index built with {item_count} drugs");
                Ok(())
            }
            Err(e) => {
                warn!("Search index build failed: {e}");
                self.release_failed_build(&e).await?;
                Err(e)
            }
        }
    }

    async fn insert_drug_to_index(&self, drug: &DrugRecord) -> Result<()> {
        let db = self.db();
        let indexed = DrugSearchText::find_by_id(drug.id()).one(db).await?.is_some();
        DrugSearchText::insert(search_text(drug))
            .on_conflict(
                OnConflict::column(drug_search_text::Column::DrugId)
                    .update_columns([
                        drug_search_text::Column::SourceDatasetId,
                        drug_search_text::Column::Content,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(db)
            .await?;
        if !indexed {
            SearchEngineState::update_many()
                .col_expr(
                    search_engine_state::Column::ItemCount,
                    Expr::col(search_engine_state::Column::ItemCount).add(1),
                )
                .filter(search_engine_state::Column::EngineName.eq(Self::NAME))
                .filter(search_engine_state::Column::ItemCount.is_not_null())
                .exec(db)
                .await?;
        }
        debug!("Drug {} is searchable", drug.id());
        Ok(())
    }

    async fn disable(&self) -> Result<()> {
        let db = self.db();
        let texts = DrugSearchText::delete_many().exec(db).await?.rows_affected;
        SearchEngineState::delete_by_id(Self::NAME.to_string())
            .exec(db)
            .await?;
        debug!("Dropped state and {texts} search texts of '{}'", Self::NAME);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn search(&self, query: &SearchQuery) -> Result<PaginatedResult<ScoredDrug>> {
        if !self.index_ready().await {
            return Err(Error::IndexNotReady {
                engine: Self::NAME.to_string(),
            });
        }
        let db = self.db();
        let schema = self.load_schema().await?;
        let tokens = tokenize(query.term.as_deref().unwrap_or_default());

        let version_ids = self.scope().version_ids(db).await?;
        let today = Utc::now().date_naive();
        let candidates = Self::apply_filters(
            scoped(Drug::find(), version_ids.as_deref()),
            &query.filters,
            today,
        );
        let pagination = query.pagination;

        if tokens.is_empty() {
            debug!("No usable search tokens, listing all drugs");
            let total_count = candidates.clone().count(db).await?;
            let drugs = pagination
                .apply(
                    candidates
                        .order_by_asc(drug::Column::TradeName)
                        .order_by_asc(drug::Column::Id),
                )
                .all(db)
                .await?;
            let items = load_records(db, &schema, drugs)
                .await?
                .into_iter()
                .map(|item| ScoredDrug {
                    drug_id: item.id(),
                    relevance_score: 0.0,
                    item,
                })
                .collect();
            return Ok(PaginatedResult::new(items, total_count, pagination));
        }

        let searchable = Self::searchable_fields(&schema);
        let candidates = tokens.iter().fold(candidates, |select, token| {
            select.filter(self.token_condition(&searchable, token))
        });
        let drugs = candidates.all(db).await?;
        debug!("{} candidates for tokens {tokens:?}", drugs.len());

        let mut hits: Vec<ScoredDrug> = load_records(db, &schema, drugs)
            .await?
            .into_iter()
            .filter_map(|item| {
                score_record(&item, &tokens).map(|relevance_score| ScoredDrug {
                    drug_id: item.id(),
                    relevance_score,
                    item,
                })
            })
            .collect();
        hits.sort_by(rank);

        let total_count = hits.len() as u64;
        Ok(PaginatedResult::new(
            pagination.window(hits),
            total_count,
            pagination,
        ))
    }

    async fn total_item_count(&self) -> Result<u64> {
        count(self.db(), self.scope()).await
    }
}
