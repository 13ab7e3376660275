use duckdb::Connection;
use r2d2::ManageConnection;
use std::sync::Mutex;

pub const IN_MEMORY: &str = ":memory:";

pub struct DuckDBConnectionManager {
    connection_string: String,
    // Every `open_in_memory` call is a fresh empty database. Pooled handles
    // over ":memory:" are cloned from this one so they share its catalog.
    shared: Option<Mutex<Connection>>,
}

impl DuckDBConnectionManager {
    pub fn new(connection_string: String) -> Result<Self, duckdb::Error> {
        let shared = if connection_string == IN_MEMORY {
            Some(Mutex::new(Connection::open_in_memory()?))
        } else {
            None
        };
        Ok(Self {
            connection_string,
            shared,
        })
    }
}

impl ManageConnection for DuckDBConnectionManager {
    type Connection = Connection;
    type Error = duckdb::Error;

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        match &self.shared {
            Some(shared) => shared
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .try_clone(),
            None => Connection::open(&self.connection_string),
        }
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.execute_batch("SELECT 1")?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}
