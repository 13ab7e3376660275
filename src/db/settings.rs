use super::{sql, Database, DbError};
use duckdb::{params, OptionalExt};

impl Database {
    /// Stored value of a setting. Blank values count as unset.
    pub async fn setting(&self, name: &str) -> Result<Option<String>, DbError> {
        let name = name.to_string();
        let value = self
            .with_conn(move |conn| {
                conn.query_row(sql::SELECT_SETTING_SQL, params![name], |row| {
                    row.get::<_, Option<String>>(0)
                })
                .optional()
            })
            .await?;

        Ok(value
            .flatten()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()))
    }

    pub async fn set_setting(&self, name: &str, value: &str) -> Result<(), DbError> {
        let name = name.to_string();
        let value = value.trim().to_string();
        self.with_conn(move |conn| conn.execute(sql::UPSERT_SETTING_SQL, params![name, value]))
            .await?;
        Ok(())
    }
}
