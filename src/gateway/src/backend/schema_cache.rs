//! TTL'd cache of `database.table → auto-increment column`, used to bolt a
//! `RETURNING <id>` onto client INSERTs. Shared by every session; races on
//! refresh resolve to last-writer-wins, which is fine because every writer
//! computes the same canonical value.

use crate::backend::pg_session::PgSession;
use crate::translate::errors::GatewayError;
use crate::translate::types::quote_literal;

use common::metrics::metric_def::{GATEWAY_SCHEMA_CACHE_HITS, GATEWAY_SCHEMA_CACHE_MISSES};
use common::metrics::{common_labels, counter_inc};
use dashmap::DashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct TableKey {
    database: String,
    table: String,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    /// `None` caches the fact that the table has no identity column.
    column: Option<String>,
    refreshed_at: Instant,
}

pub struct SchemaCache {
    entries: DashMap<TableKey, CacheEntry>,
    ttl: Duration,
}

impl SchemaCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// The table's identity column name, from cache or a fresh
    /// information_schema probe. An expired entry counts as absent.
    pub async fn auto_increment_column(
        &self,
        pg: &mut PgSession,
        database: &str,
        table: &str,
    ) -> Result<Option<String>, GatewayError> {
        let key = TableKey {
            database: database.to_string(),
            table: table.to_string(),
        };
        if let Some(entry) = self.entries.get(&key) {
            if entry.refreshed_at.elapsed() < self.ttl {
                counter_inc(GATEWAY_SCHEMA_CACHE_HITS, Some(common_labels()));
                return Ok(entry.column.clone());
            }
        }
        counter_inc(GATEWAY_SCHEMA_CACHE_MISSES, Some(common_labels()));
        let column = Self::probe(pg, database, table).await?;
        self.entries.insert(
            key,
            CacheEntry {
                column: column.clone(),
                refreshed_at: Instant::now(),
            },
        );
        Ok(column)
    }

    async fn probe(
        pg: &mut PgSession,
        database: &str,
        table: &str,
    ) -> Result<Option<String>, GatewayError> {
        let schema_expr = if database.is_empty() {
            "current_schema()".to_string()
        } else {
            quote_literal(database)
        };
        let sql = format!(
            "SELECT column_name FROM information_schema.columns \
             WHERE table_schema = {schema_expr} AND table_name = {table} \
             AND (column_default LIKE 'nextval(%' OR is_identity = 'YES') \
             ORDER BY ordinal_position LIMIT 1",
            table = quote_literal(table),
        );
        let outcome = pg.simple_query(&sql).await?;
        Ok(outcome
            .rows
            .first()
            .and_then(|row| row.first())
            .and_then(Clone::clone))
    }

    /// Eager invalidation on DDL against the table.
    pub fn invalidate(&self, database: &str, table: &str) {
        self.entries.remove(&TableKey {
            database: database.to_string(),
            table: table.to_string(),
        });
    }

    /// Evict expired entries; driven by the periodic sweeper task.
    pub fn sweep(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, e| e.refreshed_at.elapsed() < ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    fn insert_raw(&self, database: &str, table: &str, column: Option<&str>, refreshed_at: Instant) {
        self.entries.insert(
            TableKey {
                database: database.to_string(),
                table: table.to_string(),
            },
            CacheEntry {
                column: column.map(str::to_string),
                refreshed_at,
            },
        );
    }

    #[cfg(test)]
    fn peek(&self, database: &str, table: &str) -> Option<Option<String>> {
        let key = TableKey {
            database: database.to_string(),
            table: table.to_string(),
        };
        let entry = self.entries.get(&key)?;
        if entry.refreshed_at.elapsed() < self.ttl {
            Some(entry.column.clone())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_entry_is_served() {
        let cache = SchemaCache::new(Duration::from_secs(30));
        cache.insert_raw("shop", "orders", Some("id"), Instant::now());
        assert_eq!(cache.peek("shop", "orders"), Some(Some("id".to_string())));
        // cached absence is a value too
        cache.insert_raw("shop", "audit", None, Instant::now());
        assert_eq!(cache.peek("shop", "audit"), Some(None));
    }

    #[test]
    fn test_expired_entry_counts_as_absent() {
        let cache = SchemaCache::new(Duration::ZERO);
        cache.insert_raw("shop", "orders", Some("id"), Instant::now());
        assert_eq!(cache.peek("shop", "orders"), None);
    }

    #[test]
    fn test_invalidate_and_sweep() {
        let cache = SchemaCache::new(Duration::from_secs(30));
        cache.insert_raw("shop", "orders", Some("id"), Instant::now());
        cache.invalidate("shop", "orders");
        assert!(cache.is_empty());

        let expired = SchemaCache::new(Duration::ZERO);
        expired.insert_raw("a", "b", Some("id"), Instant::now());
        assert_eq!(expired.len(), 1);
        expired.sweep();
        assert!(expired.is_empty());
    }
}
