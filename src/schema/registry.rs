//! Session-scoped schema cache with request coalescing.
//!
//! Each table identity owns one [`OnceCell`]; the first caller drives the
//! resolution and every concurrent caller awaits the same cell, so one unknown
//! table costs one resolver round trip no matter how many operations reference
//! it. Failures are cached too: a table that could not be resolved stays
//! unresolved for the rest of the session.

use super::resolver::{ResolverError, SchemaResolver};
use super::types::{TableId, TableSchema};
use crate::sync::retry::RetryPolicy;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// No schema could be obtained for a table
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Schema not found for table {table_id}: {reason}")]
pub struct SchemaNotFound {
    pub table_id: TableId,
    pub reason: String,
}

type SchemaCell = Arc<OnceCell<Result<Arc<TableSchema>, SchemaNotFound>>>;

pub struct SchemaRegistry {
    resolver: Arc<dyn SchemaResolver>,
    retry: RetryPolicy,
    cells: Mutex<HashMap<TableId, SchemaCell>>,
}

impl SchemaRegistry {
    pub fn new(resolver: Arc<dyn SchemaResolver>, retry: RetryPolicy) -> Self {
        Self {
            resolver,
            retry,
            cells: Mutex::new(HashMap::new()),
        }
    }

    fn cell(&self, table_id: TableId) -> SchemaCell {
        let mut cells = self.cells.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        cells.entry(table_id).or_default().clone()
    }

    /// Resolved schema if one is already cached.
    pub fn try_get(&self, table_id: &TableId) -> Option<Arc<TableSchema>> {
        let cells = self.cells.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        cells
            .get(table_id)
            .and_then(|cell| cell.get())
            .and_then(|result| result.as_ref().ok().cloned())
    }

    /// Resolve a table's schema, asking the resolver on the first miss.
    pub async fn resolve(&self, table_id: TableId) -> Result<Arc<TableSchema>, SchemaNotFound> {
        let cell = self.cell(table_id);
        cell.get_or_init(|| self.fetch(table_id)).await.clone()
    }

    /// Seed the cache with a known schema.
    ///
    /// A table keeps the first schema it was resolved to; a conflicting
    /// registration is ignored with a warning and the cached schema returned.
    pub async fn register(&self, schema: TableSchema) -> Result<Arc<TableSchema>, SchemaNotFound> {
        let table_id = schema.table_id;
        schema.validate().map_err(|e| SchemaNotFound {
            table_id,
            reason: e.to_string(),
        })?;

        let schema = Arc::new(schema);
        let cell = self.cell(table_id);
        let cached = cell.get_or_init(|| async { Ok(schema.clone()) }).await.clone()?;
        if cached != schema {
            warn!(
                "Ignoring conflicting schema registration for table {}; keeping the cached schema",
                table_id
            );
            return Ok(cached);
        }

        if let Err(e) = self.resolver.register_tables(&[table_id]).await {
            warn!("Resolver {} rejected registration of {}: {}", self.resolver.name(), table_id, e);
        }
        Ok(cached)
    }

    /// Every successfully resolved schema.
    pub fn known_tables(&self) -> Vec<Arc<TableSchema>> {
        let cells = self.cells.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut tables = cells
            .values()
            .filter_map(|cell| cell.get())
            .filter_map(|result| result.as_ref().ok().cloned())
            .collect::<Vec<_>>();
        tables.sort_by_key(|t| t.table_id);
        tables
    }

    async fn fetch(&self, table_id: TableId) -> Result<Arc<TableSchema>, SchemaNotFound> {
        debug!("Resolving schema for table {}", table_id);
        let resolver = self.resolver.clone();

        let schema = self
            .retry
            .run("getTables", move || {
                let resolver = resolver.clone();
                async move {
                    resolver
                        .get_tables(&[table_id])
                        .await?
                        .into_iter()
                        .find(|schema| schema.table_id == table_id)
                        .ok_or(ResolverError::NotFound(table_id))
                }
            })
            .await
            .map_err(|e| SchemaNotFound {
                table_id,
                reason: e.to_string(),
            })?;

        schema.validate().map_err(|e| SchemaNotFound {
            table_id,
            reason: e.to_string(),
        })?;

        if let Err(e) = self.resolver.register_tables(&[table_id]).await {
            warn!("Resolver {} rejected registration of {}: {}", self.resolver.name(), table_id, e);
        }
        info!("Resolved schema for table {}", table_id);
        Ok(Arc::new(schema))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::mock::{CountingResolver, inventory_schema};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts,
            initial_interval_ms: 1,
            max_interval_ms: 2,
            multiplier: 1.0,
            request_timeout_ms: 1_000,
        })
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_request() {
        let resolver = Arc::new(CountingResolver::new([inventory_schema()]).with_delay_ms(20));
        let registry = Arc::new(SchemaRegistry::new(resolver.clone(), policy(3)));
        let table_id = inventory_schema().table_id;

        let lookups = (0..100).map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move { registry.resolve(table_id).await })
        });
        for result in futures::future::join_all(lookups).await {
            assert_eq!(*result.unwrap().unwrap(), inventory_schema());
        }

        assert_eq!(resolver.calls(), 1);
        assert!(registry.try_get(&table_id).is_some());
    }

    #[tokio::test]
    async fn unknown_tables_fail_after_bounded_attempts_and_stay_failed() {
        let resolver = Arc::new(CountingResolver::new([]));
        let registry = SchemaRegistry::new(resolver.clone(), policy(3));
        let table_id = TableId::new("", "Missing").unwrap();

        let err = registry.resolve(table_id).await.unwrap_err();
        assert_eq!(err.table_id, table_id);
        assert_eq!(resolver.calls(), 3);

        assert!(registry.resolve(table_id).await.is_err());
        assert_eq!(resolver.calls(), 3);
        assert!(registry.try_get(&table_id).is_none());
    }

    #[tokio::test]
    async fn registered_schemas_skip_the_resolver() {
        let resolver = Arc::new(CountingResolver::new([]));
        let registry = SchemaRegistry::new(resolver.clone(), policy(3));

        registry.register(inventory_schema()).await.unwrap();
        let schema = registry.resolve(inventory_schema().table_id).await.unwrap();

        assert_eq!(*schema, inventory_schema());
        assert_eq!(resolver.calls(), 0);
        assert_eq!(resolver.registered(), vec![inventory_schema().table_id]);
        assert_eq!(registry.known_tables().len(), 1);
    }

    #[tokio::test]
    async fn first_resolution_wins() {
        let registry = SchemaRegistry::new(Arc::new(CountingResolver::new([])), policy(1));
        registry.register(inventory_schema()).await.unwrap();

        let mut changed = inventory_schema();
        changed.value_schema[0].ty = "uint64".parse().unwrap();
        let kept = registry.register(changed).await.unwrap();
        assert_eq!(*kept, inventory_schema());
    }
}
