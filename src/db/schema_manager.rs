use super::{sql, Database, DbError};
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// A table or view the model may query, with its columns in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<String>,
}

struct CachedTables {
    tables: Vec<TableInfo>,
    refreshed_at: Instant,
}

/// Caches the list of queryable tables used to build prompts
pub struct SchemaManager {
    db: Database,
    ttl: Duration,
    cache: RwLock<Option<CachedTables>>,
}

impl SchemaManager {
    pub fn new(db: Database, refresh_secs: u64) -> Self {
        Self {
            db,
            ttl: Duration::from_secs(refresh_secs),
            cache: RwLock::new(None),
        }
    }

    /// Tables from the cache, refreshed when older than the configured interval.
    pub async fn tables(&self) -> Result<Vec<TableInfo>, DbError> {
        if let Some(cached) = self.cache.read().await.as_ref() {
            if cached.refreshed_at.elapsed() < self.ttl {
                return Ok(cached.tables.clone());
            }
        }
        self.refresh_cache().await
    }

    pub async fn refresh_cache(&self) -> Result<Vec<TableInfo>, DbError> {
        debug!("Refreshing schema cache");
        let columns = self
            .db
            .with_conn(|conn| {
                let mut stmt = conn.prepare(sql::SELECT_TABLE_COLUMNS_SQL)?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;
                rows.collect::<Result<Vec<_>, _>>()
            })
            .await?;

        let tables = group_columns(columns);
        info!("Schema cache holds {} tables", tables.len());

        let mut cache = self.cache.write().await;
        *cache = Some(CachedTables {
            tables: tables.clone(),
            refreshed_at: Instant::now(),
        });
        Ok(tables)
    }
}

fn is_internal(table: &str) -> bool {
    table == sql::SETTINGS_TABLE || table == sql::QUESTIONS_TABLE
}

/// Folds ordered (table, column) pairs into one entry per table.
fn group_columns(columns: Vec<(String, String)>) -> Vec<TableInfo> {
    let mut tables: Vec<TableInfo> = Vec::new();
    for (table, column) in columns {
        if is_internal(&table) {
            continue;
        }
        match tables.last_mut() {
            Some(last) if last.name == table => last.columns.push(column),
            _ => tables.push(TableInfo {
                name: table,
                columns: vec![column],
            }),
        }
    }
    tables
}
