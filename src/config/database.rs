//! Database configuration module for the drug catalog.
//!
//! This module handles `SQLite` connections and table creation using `SeaORM`.
//! Tables are generated from the entity definitions with `Schema::create_table_from_entity`,
//! so the database schema always matches the Rust structs. Composite unique constraints
//! that entities cannot express are created as explicit indexes.

use crate::entities::{
    AttrFieldDefinition, AttrFieldDefinitionColumn, CodeSystem, DatasetVersion,
    DatasetVersionColumn, Drug, DrugAttr, DrugAttrColumn, DrugCode, DrugCodeColumn,
    DrugSearchText, LookupValue, LookupValueColumn, SearchEngineState,
};
use crate::errors::Result;
use sea_orm::sea_query::{Index, IndexCreateStatement};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema};
use tracing::{debug, info, instrument};

/// Fallback when neither the config file nor `DATABASE_URL` names a database.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://data/drug_catalog.sqlite?mode=rwc";

/// Gets the database URL from the environment or returns the default `SQLite` path.
#[must_use]
pub fn get_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string())
}

/// Establishes a connection to the given database URL.
#[instrument]
pub async fn create_connection(database_url: &str) -> Result<DatabaseConnection> {
    debug!("Connecting to database");
    Database::connect(database_url).await.map_err(Into::into)
}

async fn create_table_for<E>(db: &DatabaseConnection, schema: &Schema, entity: E) -> Result<()>
where
    E: EntityTrait,
{
    let builder = db.get_database_backend();
    let mut table = schema.create_table_from_entity(entity);
    db.execute(builder.build(table.if_not_exists())).await?;

    for mut index in schema.create_index_from_entity(entity) {
        db.execute(builder.build(index.if_not_exists())).await?;
    }
    Ok(())
}

fn composite_indexes() -> Vec<IndexCreateStatement> {
    vec![
        Index::create()
            .name("idx_dataset_versions_source_label")
            .table(DatasetVersion)
            .col(DatasetVersionColumn::SourceName)
            .col(DatasetVersionColumn::VersionLabel)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_drug_attrs_drug_field_index")
            .table(DrugAttr)
            .col(DrugAttrColumn::DrugId)
            .col(DrugAttrColumn::FieldName)
            .col(DrugAttrColumn::ValueIndex)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_drug_attrs_field_value")
            .table(DrugAttr)
            .col(DrugAttrColumn::FieldName)
            .col(DrugAttrColumn::Value)
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_drug_codes_system_code")
            .table(DrugCode)
            .col(DrugCodeColumn::CodeSystemId)
            .col(DrugCodeColumn::Code)
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_attr_field_definitions_source_field")
            .table(AttrFieldDefinition)
            .col(AttrFieldDefinitionColumn::SourceName)
            .col(AttrFieldDefinitionColumn::FieldName)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_lookup_values_source_field_value")
            .table(LookupValue)
            .col(LookupValueColumn::SourceName)
            .col(LookupValueColumn::FieldName)
            .col(LookupValueColumn::Value)
            .unique()
            .if_not_exists()
            .to_owned(),
    ]
}

/// Creates all catalog tables and indexes. Safe to call on every startup.
///
/// Parent tables are created before the tables referencing them.
pub async fn create_tables(db: &DatabaseConnection) -> Result<()> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    create_table_for(db, &schema, DatasetVersion).await?;
    create_table_for(db, &schema, CodeSystem).await?;
    create_table_for(db, &schema, Drug).await?;
    create_table_for(db, &schema, DrugAttr).await?;
    create_table_for(db, &schema, DrugCode).await?;
    create_table_for(db, &schema, AttrFieldDefinition).await?;
    create_table_for(db, &schema, LookupValue).await?;
    create_table_for(db, &schema, SearchEngineState).await?;
    create_table_for(db, &schema, DrugSearchText).await?;

    for index in composite_indexes() {
        db.execute(builder.build(&index)).await?;
    }

    info!("Catalog tables ensured");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{
        DatasetVersionModel, DrugModel, DrugSearchTextModel, SearchEngineStateModel,
    };
    use sea_orm::QuerySelect;

    #[tokio::test]
    async fn test_create_tables() -> Result<()> {
        let db = Database::connect("sqlite::memory:").await?;
        create_tables(&db).await?;

        // Test that tables exist by querying them
        let _: Vec<DatasetVersionModel> = DatasetVersion::find().limit(1).all(&db).await?;
        let _: Vec<DrugModel> = Drug::find().limit(1).all(&db).await?;
        let _: Vec<SearchEngineStateModel> = SearchEngineState::find().limit(1).all(&db).await?;
        let _: Vec<DrugSearchTextModel> = DrugSearchText::find().limit(1).all(&db).await?;

        Ok(())
    }

    #[tokio::test]
    async fn test_create_tables_is_idempotent() -> Result<()> {
        let db = Database::connect("sqlite::memory:").await?;
        create_tables(&db).await?;
        create_tables(&db).await?;
        Ok(())
    }
}
