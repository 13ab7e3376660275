pub mod db_pool;
pub mod executor;
pub mod questions;
pub mod schema_manager;
pub mod settings;
pub mod sql;

use crate::config::DatabaseConfig;
use db_pool::DuckDBConnectionManager;
use duckdb::Connection;
use r2d2::Pool;
use std::error::Error;
use std::fmt;
use tracing::{debug, info};

#[derive(Debug)]
pub enum DbError {
    Pool(r2d2::Error),
    Query(duckdb::Error),
    Task(tokio::task::JoinError),
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbError::Pool(e) => write!(f, "Database pool error: {}", e),
            // Raw engine message, shown to the asking user as-is
            DbError::Query(e) => write!(f, "{}", e),
            DbError::Task(e) => write!(f, "Database task failed: {}", e),
        }
    }
}

impl Error for DbError {}

impl From<r2d2::Error> for DbError {
    fn from(err: r2d2::Error) -> Self {
        DbError::Pool(err)
    }
}

impl From<duckdb::Error> for DbError {
    fn from(err: duckdb::Error) -> Self {
        DbError::Query(err)
    }
}

impl From<tokio::task::JoinError> for DbError {
    fn from(err: tokio::task::JoinError) -> Self {
        DbError::Task(err)
    }
}

/// Handle over the DuckDB pool shared by the cache tables and the user data.
#[derive(Clone)]
pub struct Database {
    pool: Pool<DuckDBConnectionManager>,
}

impl Database {
    pub fn connect(config: &DatabaseConfig) -> Result<Self, DbError> {
        info!(
            "Initializing DuckDB connection pool for {} (size {})",
            config.connection_string, config.pool_size
        );
        let manager = DuckDBConnectionManager::new(config.connection_string.clone())?;
        let pool = Pool::builder()
            .max_size(config.pool_size as u32)
            .build(manager)?;
        Ok(Self { pool })
    }

    /// Creates the settings and questions tables if they are missing.
    pub async fn setup(&self) -> Result<(), DbError> {
        self.with_conn(|conn| {
            for statement in sql::SETUP_SQL {
                conn.execute_batch(statement)?;
            }
            Ok(())
        })
        .await?;
        debug!("DataTalk tables ensured");
        Ok(())
    }

    /// Runs blocking DuckDB work on a pooled connection off the async runtime.
    pub(crate) async fn with_conn<T, F>(&self, f: F) -> Result<T, DbError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, duckdb::Error> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<T, DbError> {
            let mut conn = pool.get()?;
            Ok(f(&mut conn)?)
        })
        .await?
    }
}

#[cfg(test)]
pub(crate) async fn test_database() -> Database {
    let config = DatabaseConfig {
        connection_string: db_pool::IN_MEMORY.to_string(),
        pool_size: 1,
        schema_refresh_secs: 0,
    };
    let db = Database::connect(&config).expect("in-memory pool");
    db.setup().await.expect("setup");
    db
}

#[cfg(test)]
pub(crate) async fn seed_orders(db: &Database) {
    db.with_conn(|conn| {
        conn.execute_batch(
            "CREATE TABLE customers (id INTEGER, name VARCHAR);
             CREATE TABLE orders (id INTEGER, customer_id INTEGER, amount DOUBLE, placed_on DATE);
             INSERT INTO customers VALUES (1, 'Ada'), (2, 'Grace');
             INSERT INTO orders VALUES
                (1, 1, 10.5, DATE '2024-01-02'),
                (2, 1, 4.5, DATE '2024-01-03'),
                (3, 2, 99.0, NULL);",
        )
    })
    .await
    .expect("seed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn setup_is_idempotent() {
        let db = test_database().await;
        db.setup().await.unwrap();
        let count: i64 = db
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM information_schema.tables WHERE table_name LIKE 'datatalk%'",
                    [],
                    |row| row.get(0),
                )
            })
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn query_errors_display_the_engine_message() {
        let db = test_database().await;
        let err = db
            .with_conn(|conn| conn.execute_batch("SELECT * FROM no_such_table"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Query(_)));
        assert!(err.to_string().contains("no_such_table"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn in_memory_pool_connections_share_one_catalog() {
        let config = DatabaseConfig {
            connection_string: db_pool::IN_MEMORY.to_string(),
            ..DatabaseConfig::default()
        };
        assert!(config.pool_size > 1);
        let db = Database::connect(&config).unwrap();
        db.setup().await.unwrap();
        db.set_setting("greeting", "hello").await.unwrap();

        for _ in 0..20 {
            let handles: Vec<_> = (0..3)
                .map(|_| {
                    let db = db.clone();
                    tokio::spawn(async move { db.setting("greeting").await })
                })
                .collect();
            for handle in handles {
                let value = handle.await.unwrap().unwrap();
                assert_eq!(value.as_deref(), Some("hello"));
            }
        }
    }
}
