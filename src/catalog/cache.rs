//! Per-process cache of source schemas.
//!
//! Field definitions, lookup values and code systems are provisioned once per source and
//! read on every validation and search, so they are loaded once and shared. Invalidation is
//! explicit: call [`SchemaCache::invalidate`] after provisioning new metadata.

use super::schema::SourceSchema;
use crate::errors::Result;
use sea_orm::DatabaseConnection;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, trace};

/// Shared, cloneable schema cache keyed by source name.
#[derive(Debug, Clone, Default)]
pub struct SchemaCache {
    schemas: Arc<RwLock<HashMap<String, Arc<SourceSchema>>>>,
}

impl SchemaCache {
    /// An empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached schema of `source_name`, loading it on first use.
    pub async fn get(&self, db: &DatabaseConnection, source_name: &str) -> Result<Arc<SourceSchema>> {
        if let Some(schema) = self.schemas.read().await.get(source_name) {
            trace!("Schema cache hit for '{source_name}'");
            return Ok(Arc::clone(schema));
        }
        self.refresh(db, source_name).await
    }

    /// Reloads the schema of `source_name` from the database.
    pub async fn refresh(
        &self,
        db: &DatabaseConnection,
        source_name: &str,
    ) -> Result<Arc<SourceSchema>> {
        info!("Refreshing schema cache for '{source_name}'...");
        let schema = Arc::new(SourceSchema::load(db, source_name).await?);

        let mut cache_writer = self.schemas.write().await;
        cache_writer.insert(source_name.to_string(), Arc::clone(&schema));
        info!(
            "Schema cache for '{source_name}' refreshed with {} fields.",
            schema.fields().count()
        );
        Ok(schema)
    }

    /// Drops the cached schema of `source_name`.
    pub async fn invalidate(&self, source_name: &str) {
        self.schemas.write().await.remove(source_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::schema::provision_field_definitions;
    use crate::test_utils::*;

    #[tokio::test]
    async fn test_schema_cache_loads_once_until_invalidated() -> Result<()> {
        init_test_tracing();
        let db = setup_test_db().await?;
        let cache = SchemaCache::new();

        // Empty before provisioning, and the empty schema is what gets cached
        let empty = cache.get(&db, TEST_SOURCE).await?;
        assert_eq!(empty.fields().count(), 0);

        provision_field_definitions(&db, TEST_SOURCE, &test_field_definitions()).await?;
        assert_eq!(cache.get(&db, TEST_SOURCE).await?.fields().count(), 0);

        cache.invalidate(TEST_SOURCE).await;
        let reloaded = cache.get(&db, TEST_SOURCE).await?;
        assert_eq!(reloaded.fields().count(), test_field_definitions().len());

        // Clones share the same storage
        let clone = cache.clone();
        assert!(Arc::ptr_eq(&clone.get(&db, TEST_SOURCE).await?, &reloaded));
        Ok(())
    }
}
