//! Drug catalog store - canonical drugs with their attributes and codes.
//!
//! Vendor drugs are written in bulk by an importer while their dataset version is `queued` or
//! `running`, and are immutable afterwards. User-authored drugs live in the source's custom
//! pseudo-version and can be created, updated and deleted one at a time.
//!
//! Every write validates against the source's [`SourceSchema`] first, then commits all rows in
//! one transaction. A rejected batch leaves no rows behind.

use super::{
    dataset_version as versions,
    pagination::{PaginatedResult, Pagination},
    schema::{AttrValue, SourceSchema},
};
use crate::{
    entities::{
        AttrKind, Drug, DrugAttr, DrugCode, DrugSearchText, attr_field_definition, drug,
        drug_attr, drug_code, drug_search_text,
    },
    errors::{Error, Result},
};
use chrono::{NaiveDate, Utc};
use sea_orm::{
    IntoActiveModel, QueryOrder, Select, Set, TransactionTrait,
    prelude::*,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, instrument};

/// Rows per multi-row `INSERT`, keeps statements below `SQLite`'s variable limit.
const INSERT_CHUNK: usize = 500;
/// Ids per `IN (...)` lookup.
const LOOKUP_CHUNK: usize = 500;

/// Attribute value as supplied by an importer or a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrInput {
    /// Value of a scalar or lookup field
    One(String),
    /// Values of a multi or multi-lookup field, in order
    Many(Vec<String>),
}

/// External identifier of a new drug.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NewCode {
    /// Code system id, e.g. `"PZN"`
    pub code_system_id: String,
    /// The code itself
    pub code: String,
}

/// Input for creating or replacing a drug.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDrug {
    /// Fixed id, generated when absent
    #[serde(default)]
    pub id: Option<Uuid>,
    /// Trade name
    pub trade_name: String,
    /// First day on the market
    #[serde(default)]
    pub market_access_date: Option<NaiveDate>,
    /// Day withdrawn from the market
    #[serde(default)]
    pub market_exit_date: Option<NaiveDate>,
    /// Attribute values by field name
    #[serde(default)]
    pub attrs: BTreeMap<String, AttrInput>,
    /// External identifiers
    #[serde(default)]
    pub codes: Vec<NewCode>,
}

impl NewDrug {
    /// A drug with just a trade name.
    #[must_use]
    pub fn new(trade_name: &str) -> Self {
        Self {
            trade_name: trade_name.to_string(),
            ..Self::default()
        }
    }

    /// Sets a single-valued attribute.
    #[must_use]
    pub fn with_attr(mut self, field_name: &str, value: &str) -> Self {
        self.attrs
            .insert(field_name.to_string(), AttrInput::One(value.to_string()));
        self
    }

    /// Sets a multi-valued attribute.
    #[must_use]
    pub fn with_attrs(mut self, field_name: &str, values: &[&str]) -> Self {
        self.attrs.insert(
            field_name.to_string(),
            AttrInput::Many(values.iter().map(ToString::to_string).collect()),
        );
        self
    }

    /// Adds an external identifier.
    #[must_use]
    pub fn with_code(mut self, code_system_id: &str, code: &str) -> Self {
        self.codes.push(NewCode {
            code_system_id: code_system_id.to_string(),
            code: code.to_string(),
        });
        self
    }
}

/// An attribute value decoded through its field definition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedAttr {
    /// Field name
    pub field_name: String,
    /// Storage shape
    pub kind: AttrKind,
    /// Position within a multi-valued field, 0 for single values
    pub value_index: i32,
    /// Stored text
    pub raw: String,
    /// Typed value
    pub value: AttrValue,
    /// Lookup display text, or the raw value for plain fields
    pub display: String,
    /// Whether text search matches against this attribute
    pub searchable: bool,
}

/// A drug with its decoded attributes and codes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrugRecord {
    /// The drug row
    pub drug: drug::Model,
    /// Attributes ordered by field name and value index
    pub attrs: Vec<ResolvedAttr>,
    /// Codes ordered by code system and code
    pub codes: Vec<drug_code::Model>,
}

impl DrugRecord {
    /// Drug id.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.drug.id
    }

    /// First value of `field_name`.
    #[must_use]
    pub fn attr(&self, field_name: &str) -> Option<&ResolvedAttr> {
        self.attrs.iter().find(|attr| attr.field_name == field_name)
    }

    /// All values of `field_name`, in order.
    pub fn attr_values<'a>(&'a self, field_name: &'a str) -> impl Iterator<Item = &'a ResolvedAttr> {
        self.attrs
            .iter()
            .filter(move |attr| attr.field_name == field_name)
    }

    /// First code of a code system.
    #[must_use]
    pub fn code(&self, code_system_id: &str) -> Option<&str> {
        self.codes
            .iter()
            .find(|code| code.code_system_id == code_system_id)
            .map(|code| code.code.as_str())
    }

    /// Whether the drug is on the market at `day`.
    #[must_use]
    pub fn is_marketed_on(&self, day: NaiveDate) -> bool {
        self.drug.market_access_date.is_none_or(|access| access <= day)
            && self.drug.market_exit_date.is_none_or(|exit| exit > day)
    }

    /// Texts a search term is matched against: trade name, searchable attribute displays, codes.
    #[must_use]
    pub fn search_texts(&self) -> Vec<&str> {
        std::iter::once(self.drug.trade_name.as_str())
            .chain(
                self.attrs
                    .iter()
                    .filter(|attr| attr.searchable)
                    .map(|attr| attr.display.as_str()),
            )
            .chain(self.codes.iter().map(|code| code.code.as_str()))
            .collect()
    }
}

/// Which dataset versions a read considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrugScope<'a> {
    /// The current vendor version of the source plus its custom pseudo-version
    Current(&'a str),
    /// Exactly these versions
    Versions(&'a [i64]),
    /// Every version
    AnyVersion,
}

impl DrugScope<'_> {
    /// Version ids of the scope, `None` when unrestricted.
    pub async fn version_ids<C>(&self, db: &C) -> Result<Option<Vec<i64>>>
    where
        C: ConnectionTrait,
    {
        match self {
            Self::Current(source_name) => current_scope_ids(db, source_name).await.map(Some),
            Self::Versions(ids) => Ok(Some(ids.to_vec())),
            Self::AnyVersion => Ok(None),
        }
    }
}

/// Ids of the current vendor version and the custom pseudo-version of a source.
pub async fn current_scope_ids<C>(db: &C, source_name: &str) -> Result<Vec<i64>>
where
    C: ConnectionTrait,
{
    let current = versions::find_current(db, source_name).await?;
    let custom = versions::find_custom(db, source_name).await?;
    Ok(current.into_iter().chain(custom).map(|version| version.id).collect())
}

/// Restricts a drug query to the given version ids.
#[must_use]
pub fn scoped(query: Select<Drug>, version_ids: Option<&[i64]>) -> Select<Drug> {
    match version_ids {
        Some(ids) => query.filter(drug::Column::SourceDatasetId.is_in(ids.iter().copied())),
        None => query,
    }
}

/// Options of [`get_multiple`].
#[derive(Debug, Clone, Copy)]
pub struct GetMultipleOptions<'a> {
    /// Versions to look in
    pub scope: DrugScope<'a>,
    /// Mirror the order (and repetitions) of the requested ids
    pub preserve_input_order: bool,
    /// Fail with [`Error::DrugNotFound`] instead of skipping missing ids
    pub strict: bool,
}

impl<'a> GetMultipleOptions<'a> {
    /// Input order preserved, missing ids skipped.
    #[must_use]
    pub const fn new(scope: DrugScope<'a>) -> Self {
        Self {
            scope,
            preserve_input_order: true,
            strict: false,
        }
    }

    /// Order results by trade name instead of input order.
    #[must_use]
    pub const fn unordered(mut self) -> Self {
        self.preserve_input_order = false;
        self
    }

    /// Fail on the first missing id.
    #[must_use]
    pub const fn strict(mut self) -> Self {
        self.strict = true;
        self
    }
}

#[derive(Debug)]
struct ValidatedAttr {
    field_name: String,
    kind: AttrKind,
    value_index: i32,
    value: String,
}

#[derive(Debug)]
struct ValidatedDrug {
    id: Uuid,
    trade_name: String,
    market_access_date: Option<NaiveDate>,
    market_exit_date: Option<NaiveDate>,
    attrs: Vec<ValidatedAttr>,
    codes: Vec<NewCode>,
}

impl ValidatedDrug {
    fn into_models(
        self,
        version_id: i64,
        is_custom: bool,
        now: DateTimeUtc,
    ) -> (
        drug::ActiveModel,
        Vec<drug_attr::ActiveModel>,
        Vec<drug_code::ActiveModel>,
    ) {
        let drug_id = self.id;
        let drug = drug::ActiveModel {
            id: Set(drug_id),
            source_dataset_id: Set(version_id),
            trade_name: Set(self.trade_name),
            market_access_date: Set(self.market_access_date),
            market_exit_date: Set(self.market_exit_date),
            is_custom: Set(is_custom),
            created_at: Set(now),
        };
        let attrs = self
            .attrs
            .into_iter()
            .map(|attr| drug_attr::ActiveModel {
                drug_id: Set(drug_id),
                field_name: Set(attr.field_name),
                value_index: Set(attr.value_index),
                kind: Set(attr.kind),
                value: Set(attr.value),
                ..Default::default()
            })
            .collect();
        let codes = self
            .codes
            .into_iter()
            .map(|code| drug_code::ActiveModel {
                drug_id: Set(drug_id),
                code_system_id: Set(code.code_system_id),
                code: Set(code.code),
                ..Default::default()
            })
            .collect();
        (drug, attrs, codes)
    }
}

fn push_values(
    schema: &SourceSchema,
    definition: &attr_field_definition::Model,
    values: &[&str],
    out: &mut Vec<ValidatedAttr>,
) -> std::result::Result<(), String> {
    let field_name = &definition.field_name;
    for (index, raw) in values.iter().enumerate() {
        definition
            .value_type
            .cast(raw)
            .map_err(|e| format!("field '{field_name}': {e}"))?;
        if definition.kind.has_list_of_values() && schema.lookup(field_name, raw).is_none() {
            return Err(format!("field '{field_name}': '{raw}' is not a known lookup value"));
        }
        out.push(ValidatedAttr {
            field_name: field_name.clone(),
            kind: definition.kind,
            value_index: i32::try_from(index)
                .map_err(|_| format!("field '{field_name}' has too many values"))?,
            value: (*raw).to_string(),
        });
    }
    Ok(())
}

/// Checks a drug against the source schema. The error message describes the first problem.
fn validate_drug(
    schema: &SourceSchema,
    input: &NewDrug,
) -> std::result::Result<ValidatedDrug, String> {
    let trade_name = input.trade_name.trim();
    if trade_name.is_empty() {
        return Err("trade name must not be empty".to_string());
    }
    if let (Some(access), Some(exit)) = (input.market_access_date, input.market_exit_date)
        && exit < access
    {
        return Err(format!(
            "market exit date {exit} is before market access date {access}"
        ));
    }

    let mut attrs = Vec::new();
    for (field_name, input_value) in &input.attrs {
        let definition = schema.field(field_name).ok_or_else(|| {
            format!(
                "unknown attribute field '{field_name}' (known: {})",
                schema.field_names().join(", ")
            )
        })?;
        let values: Vec<&str> = match (definition.kind.is_multi(), input_value) {
            (false, AttrInput::One(value)) => vec![value.as_str()],
            (true, AttrInput::Many(values)) => values.iter().map(String::as_str).collect(),
            (false, AttrInput::Many(_)) => {
                return Err(format!("field '{field_name}' takes a single value"));
            }
            (true, AttrInput::One(_)) => {
                return Err(format!("field '{field_name}' takes a list of values"));
            }
        };
        push_values(schema, definition, &values, &mut attrs)?;
    }

    for field_name in schema.field_names() {
        let Some(definition) = schema.field(field_name) else {
            continue;
        };
        if definition.optional || input.attrs.contains_key(field_name) {
            continue;
        }
        let default = definition
            .default_value
            .as_deref()
            .ok_or_else(|| format!("required field '{field_name}' is missing"))?;
        push_values(schema, definition, &[default], &mut attrs)?;
    }
    attrs.sort_by(|a, b| {
        (a.field_name.as_str(), a.value_index).cmp(&(b.field_name.as_str(), b.value_index))
    });

    let mut codes = Vec::with_capacity(input.codes.len());
    let mut seen = HashSet::new();
    for code in &input.codes {
        if schema.code_system(&code.code_system_id).is_none() {
            return Err(format!("unknown code system '{}'", code.code_system_id));
        }
        let value = code.code.trim();
        if value.is_empty() {
            return Err(format!("empty code for system '{}'", code.code_system_id));
        }
        if !seen.insert((code.code_system_id.as_str(), value)) {
            return Err(format!("code {}:{value} given twice", code.code_system_id));
        }
        codes.push(NewCode {
            code_system_id: code.code_system_id.clone(),
            code: value.to_string(),
        });
    }

    let mut required_systems: Vec<&str> = schema
        .code_systems()
        .filter(|system| !system.optional)
        .map(|system| system.id.as_str())
        .collect();
    required_systems.sort_unstable();
    if let Some(missing) = required_systems
        .into_iter()
        .find(|system| !codes.iter().any(|code| code.code_system_id == *system))
    {
        return Err(format!("required code of system '{missing}' is missing"));
    }

    Ok(ValidatedDrug {
        id: input.id.unwrap_or_else(Uuid::new_v4),
        trade_name: trade_name.to_string(),
        market_access_date: input.market_access_date,
        market_exit_date: input.market_exit_date,
        attrs,
        codes,
    })
}

pub(crate) async fn insert_chunked<A, C>(db: &C, models: Vec<A>) -> Result<()>
where
    A: ActiveModelTrait + Send,
    <A::Entity as EntityTrait>::Model: IntoActiveModel<A>,
    C: ConnectionTrait,
{
    let mut rows = models.into_iter().peekable();
    while rows.peek().is_some() {
        let chunk: Vec<A> = rows.by_ref().take(INSERT_CHUNK).collect();
        <A::Entity as EntityTrait>::insert_many(chunk)
            .exec_without_returning(db)
            .await?;
    }
    Ok(())
}

/// Rejects duplicate ids and repeated unique codes inside one batch.
fn check_batch_duplicates(schema: &SourceSchema, drugs: &[ValidatedDrug]) -> Result<()> {
    let mut ids: HashMap<Uuid, usize> = HashMap::with_capacity(drugs.len());
    let mut unique_codes: HashMap<(&str, &str), usize> = HashMap::new();

    for (index, drug) in drugs.iter().enumerate() {
        let row = index + 1;
        if let Some(first) = ids.insert(drug.id, row) {
            return Err(Error::BulkImport {
                row,
                reason: format!("drug id {} already used by row {first}", drug.id),
            });
        }
        for code in &drug.codes {
            let unique = schema
                .code_system(&code.code_system_id)
                .is_some_and(|system| system.unique_codes);
            if !unique {
                continue;
            }
            if let Some(first) =
                unique_codes.insert((code.code_system_id.as_str(), code.code.as_str()), row)
            {
                return Err(Error::BulkImport {
                    row,
                    reason: format!(
                        "code {}:{} already used by row {first}",
                        code.code_system_id, code.code
                    ),
                });
            }
        }
    }
    Ok(())
}

/// Rejects rows whose explicit id is already stored.
async fn check_existing_ids<C>(db: &C, drugs: &[ValidatedDrug]) -> Result<()>
where
    C: ConnectionTrait,
{
    let ids: Vec<Uuid> = drugs.iter().map(|drug| drug.id).collect();
    for chunk in ids.chunks(LOOKUP_CHUNK) {
        let existing = Drug::find()
            .filter(drug::Column::Id.is_in(chunk.iter().copied()))
            .one(db)
            .await?;
        if let Some(existing) = existing {
            let row = ids.iter().position(|id| *id == existing.id).map_or(0, |i| i + 1);
            return Err(Error::BulkImport {
                row,
                reason: format!("drug id {} already exists", existing.id),
            });
        }
    }
    Ok(())
}

/// Rejects codes of unique code systems already carried by another drug in `version_ids`.
async fn check_unique_codes<C>(
    db: &C,
    schema: &SourceSchema,
    version_ids: &[i64],
    codes: &[NewCode],
    exclude: Option<Uuid>,
) -> Result<()>
where
    C: ConnectionTrait,
{
    for code in codes {
        let unique = schema
            .code_system(&code.code_system_id)
            .is_some_and(|system| system.unique_codes);
        if !unique {
            continue;
        }
        let mut query = DrugCode::find()
            .inner_join(Drug)
            .filter(drug_code::Column::CodeSystemId.eq(code.code_system_id.as_str()))
            .filter(drug_code::Column::Code.eq(code.code.as_str()))
            .filter(drug::Column::SourceDatasetId.is_in(version_ids.iter().copied()));
        if let Some(drug_id) = exclude {
            query = query.filter(drug_code::Column::DrugId.ne(drug_id));
        }
        if let Some(existing) = query.one(db).await? {
            return Err(Error::DuplicateCode {
                code_system: code.code_system_id.clone(),
                code: code.code.clone(),
                drug_id: existing.drug_id,
            });
        }
    }
    Ok(())
}

/// Appends a validated batch of vendor drugs to a `queued`/`running` version.
///
/// All rows are validated before anything is written. Any failure rejects the whole batch
/// with [`Error::BulkImport`] naming the 1-based row. Returns the number of inserted drugs.
#[instrument(skip(db, schema, rows), fields(rows = rows.len()))]
pub async fn create_bulk(
    db: &DatabaseConnection,
    schema: &SourceSchema,
    version_id: i64,
    rows: Vec<NewDrug>,
) -> Result<usize> {
    let version = versions::get_by_id(db, version_id).await?;
    if !version.is_writable() {
        return Err(Error::ReadOnlyDataset {
            version_id,
            detail: format!("version is {} and accepts no new drugs", version.import_status),
        });
    }
    if version.source_name != schema.source_name {
        return Err(Error::Config {
            message: format!(
                "Version {version_id} belongs to '{}', not '{}'",
                version.source_name, schema.source_name
            ),
        });
    }

    let validated = rows
        .iter()
        .enumerate()
        .map(|(index, row)| {
            validate_drug(schema, row).map_err(|reason| Error::BulkImport {
                row: index + 1,
                reason,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    check_batch_duplicates(schema, &validated)?;
    check_existing_ids(db, &validated).await?;

    let now = Utc::now();
    let mut drugs = Vec::with_capacity(validated.len());
    let mut attrs = Vec::new();
    let mut codes = Vec::new();
    for drug in validated {
        let (drug, drug_attrs, drug_codes) = drug.into_models(version_id, version.is_custom, now);
        drugs.push(drug);
        attrs.extend(drug_attrs);
        codes.extend(drug_codes);
    }
    let inserted = drugs.len();

    let txn = db.begin().await?;
    insert_chunked(&txn, drugs).await?;
    insert_chunked(&txn, attrs).await?;
    insert_chunked(&txn, codes).await?;
    txn.commit().await?;

    info!("Inserted {inserted} drugs into dataset version {version_id}");
    Ok(inserted)
}

/// Creates a user-authored drug in the source's custom pseudo-version.
#[instrument(skip(db, schema, input), fields(trade_name = %input.trade_name))]
pub async fn create_custom(
    db: &DatabaseConnection,
    schema: &SourceSchema,
    input: &NewDrug,
) -> Result<DrugRecord> {
    let validated =
        validate_drug(schema, input).map_err(|message| Error::InvalidDrug { message })?;
    let custom = versions::get_custom(db, &schema.source_name).await?;
    let scope_ids = current_scope_ids(db, &schema.source_name).await?;

    let txn = db.begin().await?;
    if Drug::find_by_id(validated.id).one(&txn).await?.is_some() {
        return Err(Error::InvalidDrug {
            message: format!("drug id {} already exists", validated.id),
        });
    }
    check_unique_codes(&txn, schema, &scope_ids, &validated.codes, None).await?;

    let (drug, attrs, codes) = validated.into_models(custom.id, true, Utc::now());
    let drug = drug.insert(&txn).await?;
    insert_chunked(&txn, attrs).await?;
    insert_chunked(&txn, codes).await?;
    txn.commit().await?;

    info!("Created custom drug {} ('{}')", drug.id, drug.trade_name);
    let drug_id = drug.id;
    load_records(db, schema, vec![drug])
        .await?
        .pop()
        .ok_or(Error::DrugNotFound { drug_id })
}

/// Loads a drug and refuses anything outside the custom pseudo-version.
async fn find_mutable_drug(
    db: &DatabaseConnection,
    drug_id: Uuid,
    action: &str,
) -> Result<drug::Model> {
    let drug = Drug::find_by_id(drug_id)
        .one(db)
        .await?
        .ok_or(Error::DrugNotFound { drug_id })?;
    let version = versions::get_by_id(db, drug.source_dataset_id).await?;
    if !version.is_custom {
        return Err(Error::ReadOnlyDataset {
            version_id: version.id,
            detail: format!(
                "drug {drug_id} of vendor version '{}' cannot be {action}",
                version.version_label
            ),
        });
    }
    Ok(drug)
}

/// Replaces a custom drug's fields, attributes and codes.
#[instrument(skip(db, schema, input))]
pub async fn update_drug(
    db: &DatabaseConnection,
    schema: &SourceSchema,
    drug_id: Uuid,
    input: &NewDrug,
) -> Result<DrugRecord> {
    let existing = find_mutable_drug(db, drug_id, "updated").await?;
    let mut validated =
        validate_drug(schema, input).map_err(|message| Error::InvalidDrug { message })?;
    validated.id = drug_id;
    let scope_ids = current_scope_ids(db, &schema.source_name).await?;

    let txn = db.begin().await?;
    check_unique_codes(&txn, schema, &scope_ids, &validated.codes, Some(drug_id)).await?;
    DrugAttr::delete_many()
        .filter(drug_attr::Column::DrugId.eq(drug_id))
        .exec(&txn)
        .await?;
    DrugCode::delete_many()
        .filter(drug_code::Column::DrugId.eq(drug_id))
        .exec(&txn)
        .await?;

    let (changes, attrs, codes) =
        validated.into_models(existing.source_dataset_id, true, existing.created_at);
    let mut drug: drug::ActiveModel = existing.into();
    drug.trade_name = changes.trade_name;
    drug.market_access_date = changes.market_access_date;
    drug.market_exit_date = changes.market_exit_date;
    let drug = drug.update(&txn).await?;
    insert_chunked(&txn, attrs).await?;
    insert_chunked(&txn, codes).await?;
    txn.commit().await?;

    debug!("Updated custom drug {drug_id}");
    load_records(db, schema, vec![drug])
        .await?
        .pop()
        .ok_or(Error::DrugNotFound { drug_id })
}

/// Deletes a custom drug with its attributes, codes and search text.
#[instrument(skip(db))]
pub async fn delete_drug(db: &DatabaseConnection, drug_id: Uuid) -> Result<()> {
    find_mutable_drug(db, drug_id, "deleted").await?;

    let txn = db.begin().await?;
    DrugAttr::delete_many()
        .filter(drug_attr::Column::DrugId.eq(drug_id))
        .exec(&txn)
        .await?;
    DrugCode::delete_many()
        .filter(drug_code::Column::DrugId.eq(drug_id))
        .exec(&txn)
        .await?;
    DrugSearchText::delete_many()
        .filter(drug_search_text::Column::DrugId.eq(drug_id))
        .exec(&txn)
        .await?;
    Drug::delete_by_id(drug_id).exec(&txn).await?;
    txn.commit().await?;

    info!("Deleted custom drug {drug_id}");
    Ok(())
}

fn resolve_attr(schema: &SourceSchema, attr: drug_attr::Model) -> ResolvedAttr {
    let definition = schema.field(&attr.field_name);
    let value = definition
        .and_then(|def| def.value_type.cast(&attr.value).ok())
        .unwrap_or_else(|| AttrValue::Str(attr.value.clone()));
    let display = if attr.kind.has_list_of_values() {
        schema
            .lookup(&attr.field_name, &attr.value)
            .map_or_else(|| attr.value.clone(), |item| item.display.clone())
    } else {
        attr.value.clone()
    };
    ResolvedAttr {
        searchable: definition.is_some_and(|def| def.searchable),
        field_name: attr.field_name,
        kind: attr.kind,
        value_index: attr.value_index,
        raw: attr.value,
        value,
        display,
    }
}

/// Attaches attributes and codes to drug rows, keeping the order of `drugs`.
pub async fn load_records<C>(
    db: &C,
    schema: &SourceSchema,
    drugs: Vec<drug::Model>,
) -> Result<Vec<DrugRecord>>
where
    C: ConnectionTrait,
{
    let ids: Vec<Uuid> = drugs.iter().map(|drug| drug.id).collect();
    let mut attrs_by_drug: HashMap<Uuid, Vec<drug_attr::Model>> = HashMap::new();
    let mut codes_by_drug: HashMap<Uuid, Vec<drug_code::Model>> = HashMap::new();

    for chunk in ids.chunks(LOOKUP_CHUNK) {
        let attrs = DrugAttr::find()
            .filter(drug_attr::Column::DrugId.is_in(chunk.iter().copied()))
            .order_by_asc(drug_attr::Column::FieldName)
            .order_by_asc(drug_attr::Column::ValueIndex)
            .all(db)
            .await?;
        for attr in attrs {
            attrs_by_drug.entry(attr.drug_id).or_default().push(attr);
        }

        let codes = DrugCode::find()
            .filter(drug_code::Column::DrugId.is_in(chunk.iter().copied()))
            .order_by_asc(drug_code::Column::CodeSystemId)
            .order_by_asc(drug_code::Column::Code)
            .all(db)
            .await?;
        for code in codes {
            codes_by_drug.entry(code.drug_id).or_default().push(code);
        }
    }

    Ok(drugs
        .into_iter()
        .map(|drug| {
            let attrs = attrs_by_drug
                .remove(&drug.id)
                .unwrap_or_default()
                .into_iter()
                .map(|attr| resolve_attr(schema, attr))
                .collect();
            let codes = codes_by_drug.remove(&drug.id).unwrap_or_default();
            DrugRecord { drug, attrs, codes }
        })
        .collect())
}

/// Loads drugs by id.
///
/// With `preserve_input_order` the result mirrors `ids` exactly, repeated ids included.
/// Ids that do not exist in the scope are skipped, or fail in strict mode.
pub async fn get_multiple<C>(
    db: &C,
    schema: &SourceSchema,
    ids: &[Uuid],
    options: GetMultipleOptions<'_>,
) -> Result<Vec<DrugRecord>>
where
    C: ConnectionTrait,
{
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let version_ids = options.scope.version_ids(db).await?;

    let mut seen = HashSet::with_capacity(ids.len());
    let unique: Vec<Uuid> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();

    let mut found = Vec::with_capacity(unique.len());
    for chunk in unique.chunks(LOOKUP_CHUNK) {
        found.extend(
            scoped(Drug::find(), version_ids.as_deref())
                .filter(drug::Column::Id.is_in(chunk.iter().copied()))
                .all(db)
                .await?,
        );
    }

    if options.strict {
        let found_ids: HashSet<Uuid> = found.iter().map(|drug| drug.id).collect();
        if let Some(missing) = unique.iter().find(|id| !found_ids.contains(id)) {
            return Err(Error::DrugNotFound { drug_id: *missing });
        }
    }

    let mut records = load_records(db, schema, found).await?;
    if !options.preserve_input_order {
        records.sort_by(|a, b| {
            a.drug
                .trade_name
                .cmp(&b.drug.trade_name)
                .then_with(|| a.drug.id.cmp(&b.drug.id))
        });
        return Ok(records);
    }

    let by_id: HashMap<Uuid, DrugRecord> = records
        .into_iter()
        .map(|record| (record.id(), record))
        .collect();
    Ok(ids.iter().filter_map(|id| by_id.get(id).cloned()).collect())
}

/// Loads a single drug, failing with [`Error::DrugNotFound`].
pub async fn get<C>(
    db: &C,
    schema: &SourceSchema,
    drug_id: Uuid,
    scope: DrugScope<'_>,
) -> Result<DrugRecord>
where
    C: ConnectionTrait,
{
    get_multiple(db, schema, &[drug_id], GetMultipleOptions::new(scope).strict())
        .await?
        .pop()
        .ok_or(Error::DrugNotFound { drug_id })
}

/// Lists drugs ordered by trade name.
pub async fn list<C>(
    db: &C,
    schema: &SourceSchema,
    pagination: Pagination,
    scope: DrugScope<'_>,
) -> Result<PaginatedResult<DrugRecord>>
where
    C: ConnectionTrait,
{
    let version_ids = scope.version_ids(db).await?;
    let query = scoped(Drug::find(), version_ids.as_deref());
    let total_count = query.clone().count(db).await?;
    let drugs = pagination
        .apply(
            query
                .order_by_asc(drug::Column::TradeName)
                .order_by_asc(drug::Column::Id),
        )
        .all(db)
        .await?;
    let items = load_records(db, schema, drugs).await?;
    Ok(PaginatedResult::new(items, total_count, pagination))
}

/// Number of drugs in the scope.
pub async fn count<C>(db: &C, scope: DrugScope<'_>) -> Result<u64>
where
    C: ConnectionTrait,
{
    let version_ids = scope.version_ids(db).await?;
    scoped(Drug::find(), version_ids.as_deref())
        .count(db)
        .await
        .map_err(Into::into)
}
