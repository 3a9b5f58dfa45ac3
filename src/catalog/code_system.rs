//! Code systems - external identifier schemes such as PZN or ATC.

use crate::{
    entities::{CodeSystem, code_system},
    errors::Result,
};
use sea_orm::{Set, prelude::*};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Importer-side declaration of a code system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSystemDefinition {
    /// Short identifier (e.g. `"PZN"`)
    pub id: String,
    /// Long name
    pub name: String,
    /// Country or region using the system
    pub country: String,
    /// Free-text description
    pub description: Option<String>,
    /// A code may identify at most one drug
    pub unique: bool,
    /// Drugs may omit a code of this system
    pub optional: bool,
}

/// Inserts code systems that are not stored yet. Returns the number inserted.
#[instrument(skip(db, definitions))]
pub async fn provision_code_systems(
    db: &DatabaseConnection,
    definitions: &[CodeSystemDefinition],
) -> Result<usize> {
    let mut inserted = 0;
    for definition in definitions {
        if get_code_system(db, &definition.id).await?.is_some() {
            debug!("Code system '{}' already provisioned", definition.id);
            continue;
        }
        code_system::ActiveModel {
            id: Set(definition.id.clone()),
            name: Set(definition.name.clone()),
            country: Set(definition.country.clone()),
            description: Set(definition.description.clone()),
            unique_codes: Set(definition.unique),
            optional: Set(definition.optional),
        }
        .insert(db)
        .await?;
        inserted += 1;
    }
    Ok(inserted)
}

/// Looks up a code system by id.
pub async fn get_code_system<C>(db: &C, code_system_id: &str) -> Result<Option<code_system::Model>>
where
    C: ConnectionTrait,
{
    CodeSystem::find_by_id(code_system_id.to_string())
        .one(db)
        .await
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::*;

    #[tokio::test]
    async fn test_provision_code_systems() -> Result<()> {
        let db = setup_test_db().await?;
        let definitions = test_code_systems();

        assert_eq!(provision_code_systems(&db, &definitions).await?, 2);
        assert_eq!(provision_code_systems(&db, &definitions).await?, 0);

        assert_eq!(CodeSystem::find().count(&db).await?, 2);
        assert!(get_code_system(&db, "ATC").await?.is_some());
        let pzn = get_code_system(&db, "PZN").await?.unwrap();
        assert!(pzn.unique_codes);
        assert!(!pzn.optional);
        Ok(())
    }
}
