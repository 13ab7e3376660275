use super::{Database, DbError};
use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat};
use duckdb::arrow::datatypes::DataType;
use duckdb::types::{TimeUnit, Value as DuckValue};
use duckdb::Connection;
use serde_json::{Number, Value};
use tracing::debug;

/// One result row, column name to value, in select-list order.
pub type ResultRow = serde_json::Map<String, Value>;

/// Days from 0001-01-01 to 1970-01-01, DuckDB dates count from the latter.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

impl Database {
    /// Runs a read-only query and materializes every row.
    ///
    /// The statement runs inside a transaction that is always rolled back.
    pub async fn run_select(&self, query: &str) -> Result<Vec<ResultRow>, DbError> {
        let query = query.to_string();
        let rows = self
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                let rows = collect_rows(&tx, &query);
                if let Err(e) = tx.rollback() {
                    if rows.is_ok() {
                        return Err(e);
                    }
                }
                rows
            })
            .await?;
        debug!("Query returned {} rows", rows.len());
        Ok(rows)
    }
}

fn collect_rows(conn: &Connection, query: &str) -> Result<Vec<ResultRow>, duckdb::Error> {
    let mut stmt = conn.prepare(query)?;
    let mut rows = stmt.query([])?;
    let (columns, zoned): (Vec<String>, Vec<bool>) = rows
        .as_ref()
        .map(|stmt| {
            let zoned = (0..stmt.column_count())
                .map(|i| matches!(stmt.column_type(i), DataType::Timestamp(_, Some(_))))
                .collect();
            (stmt.column_names(), zoned)
        })
        .unwrap_or_default();

    let mut dataset = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = ResultRow::with_capacity(columns.len());
        for (i, name) in columns.iter().enumerate() {
            let value: DuckValue = row.get(i)?;
            let json = match value {
                DuckValue::Timestamp(unit, v) if zoned[i] => zoned_timestamp(unit, v),
                other => to_json(other),
            };
            record.insert(name.clone(), json);
        }
        dataset.push(record);
    }
    Ok(dataset)
}

fn float(value: f64) -> Value {
    Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
}

fn timestamp_micros(unit: TimeUnit, value: i64) -> i64 {
    match unit {
        TimeUnit::Second => value.saturating_mul(1_000_000),
        TimeUnit::Millisecond => value.saturating_mul(1_000),
        TimeUnit::Microsecond => value,
        TimeUnit::Nanosecond => value / 1_000,
    }
}

/// TIMESTAMPTZ values are stored as UTC instants.
fn zoned_timestamp(unit: TimeUnit, value: i64) -> Value {
    DateTime::from_timestamp_micros(timestamp_micros(unit, value))
        .map(|t| Value::String(t.to_rfc3339_opts(SecondsFormat::AutoSi, false)))
        .unwrap_or(Value::Null)
}

fn time_of_day(unit: TimeUnit, value: i64) -> Value {
    let micros = timestamp_micros(unit, value);
    let secs = u32::try_from(micros.div_euclid(1_000_000)).ok();
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    secs.and_then(|s| NaiveTime::from_num_seconds_from_midnight_opt(s, nanos))
        .map(|t| Value::String(t.to_string()))
        .unwrap_or(Value::Null)
}

/// ISO-8601 duration, e.g. `P1M3D`, `PT1H30M`, `PT0.25S`.
fn iso_interval(months: i32, days: i32, nanos: i64) -> String {
    let mut out = String::from("P");
    if months != 0 {
        out.push_str(&format!("{}M", months));
    }
    if days != 0 {
        out.push_str(&format!("{}D", days));
    }
    if nanos != 0 {
        let sign = if nanos < 0 { "-" } else { "" };
        let abs = nanos.unsigned_abs();
        let secs = abs / 1_000_000_000;
        let frac = abs % 1_000_000_000;
        out.push('T');
        if secs >= 3_600 {
            out.push_str(&format!("{}{}H", sign, secs / 3_600));
        }
        if secs % 3_600 >= 60 {
            out.push_str(&format!("{}{}M", sign, secs % 3_600 / 60));
        }
        if secs % 60 != 0 || frac != 0 {
            out.push_str(&format!("{}{}", sign, secs % 60));
            if frac != 0 {
                let digits = format!("{:09}", frac);
                out.push('.');
                out.push_str(digits.trim_end_matches('0'));
            }
            out.push('S');
        }
    }
    if out == "P" {
        out.push_str("T0S");
    }
    out
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Map keys become object keys; non-text keys use their JSON rendering.
fn object_key(key: DuckValue) -> String {
    match to_json(key) {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn to_json(value: DuckValue) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(b) => Value::Bool(b),
        DuckValue::TinyInt(n) => n.into(),
        DuckValue::SmallInt(n) => n.into(),
        DuckValue::Int(n) => n.into(),
        DuckValue::BigInt(n) => n.into(),
        DuckValue::UTinyInt(n) => n.into(),
        DuckValue::USmallInt(n) => n.into(),
        DuckValue::UInt(n) => n.into(),
        DuckValue::UBigInt(n) => n.into(),
        DuckValue::HugeInt(n) => i64::try_from(n)
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(n.to_string())),
        DuckValue::Float(f) => float(f64::from(f)),
        DuckValue::Double(f) => float(f),
        DuckValue::Decimal(d) => Value::String(d.to_string()),
        DuckValue::Text(s) | DuckValue::Enum(s) => Value::String(s),
        DuckValue::Blob(bytes) => Value::String(hex(&bytes)),
        DuckValue::Date32(days) => days
            .checked_add(UNIX_EPOCH_DAYS_FROM_CE)
            .and_then(NaiveDate::from_num_days_from_ce_opt)
            .map(|d| Value::String(d.to_string()))
            .unwrap_or(Value::Null),
        DuckValue::Time64(unit, v) => time_of_day(unit, v),
        DuckValue::Timestamp(unit, v) => DateTime::from_timestamp_micros(timestamp_micros(unit, v))
            .map(|t| Value::String(t.naive_utc().to_string()))
            .unwrap_or(Value::Null),
        DuckValue::Interval {
            months,
            days,
            nanos,
        } => Value::String(iso_interval(months, days, nanos)),
        DuckValue::List(items) | DuckValue::Array(items) => {
            Value::Array(items.into_iter().map(to_json).collect())
        }
        DuckValue::Struct(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), to_json(v.clone())))
                .collect(),
        ),
        DuckValue::Map(entries) => Value::Object(
            entries
                .iter()
                .map(|(k, v)| (object_key(k.clone()), to_json(v.clone())))
                .collect(),
        ),
        DuckValue::Union(inner) => to_json(*inner),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{seed_orders, test_database};
    use serde_json::json;

    #[tokio::test]
    async fn rows_keep_column_order_and_types() {
        let db = test_database().await;
        seed_orders(&db).await;

        let rows = db
            .run_select(
                "SELECT o.id AS order_id, c.name AS customer, o.amount, o.placed_on \
                 FROM orders o JOIN customers c ON c.id = o.customer_id ORDER BY o.id",
            )
            .await
            .unwrap();

        assert_eq!(rows.len(), 3);
        let columns: Vec<_> = rows[0].keys().cloned().collect();
        assert_eq!(columns, vec!["order_id", "customer", "amount", "placed_on"]);
        assert_eq!(
            Value::Object(rows[0].clone()),
            json!({"order_id": 1, "customer": "Ada", "amount": 10.5, "placed_on": "2024-01-02"})
        );
        assert_eq!(rows[2]["placed_on"], Value::Null);
    }

    #[tokio::test]
    async fn aggregates_are_materialized() {
        let db = test_database().await;
        seed_orders(&db).await;

        let rows = db
            .run_select("SELECT COUNT(*) AS orders, SUM(customer_id) AS ids FROM orders")
            .await
            .unwrap();
        assert_eq!(rows[0]["orders"], json!(3));
        assert_eq!(rows[0]["ids"], json!(4));
    }

    #[tokio::test]
    async fn empty_result_is_an_empty_list() {
        let db = test_database().await;
        seed_orders(&db).await;
        let rows = db.run_select("SELECT * FROM orders WHERE id < 0").await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn failures_carry_the_database_message() {
        let db = test_database().await;
        seed_orders(&db).await;
        let err = db.run_select("SELECT missing_column FROM orders").await.unwrap_err();
        assert!(err.to_string().contains("missing_column"));

        // the connection stays usable after the rolled back failure
        let rows = db.run_select("SELECT 1 AS one").await.unwrap();
        assert_eq!(rows[0]["one"], json!(1));
    }

    #[test]
    fn timestamps_are_normalized_to_micros() {
        assert_eq!(timestamp_micros(TimeUnit::Second, 2), 2_000_000);
        assert_eq!(timestamp_micros(TimeUnit::Nanosecond, 5_000), 5);
        assert_eq!(
            to_json(DuckValue::Timestamp(TimeUnit::Microsecond, 0)),
            json!("1970-01-01 00:00:00")
        );
        assert_eq!(to_json(DuckValue::Date32(0)), json!("1970-01-01"));
    }

    #[tokio::test]
    async fn temporal_and_nested_columns_become_json() {
        let db = test_database().await;
        let rows = db
            .run_select(
                "SELECT TIME '12:34:56' AS t, INTERVAL 3 DAY AS i, [1, 2, 3] AS l, \
                 'x'::ENUM('x', 'y') AS e, {'a': 1, 'b': 'two'} AS s",
            )
            .await
            .unwrap();
        assert_eq!(
            Value::Object(rows[0].clone()),
            json!({"t": "12:34:56", "i": "P3D", "l": [1, 2, 3], "e": "x", "s": {"a": 1, "b": "two"}})
        );
    }

    #[tokio::test]
    async fn blobs_are_hex_and_zoned_timestamps_carry_an_offset() {
        let db = test_database().await;
        let rows = db
            .run_select(
                "SELECT '\\xCA\\xFE'::BLOB AS b, \
                 TIMESTAMPTZ '2024-01-02 03:04:05+00' AS tz, \
                 TIMESTAMP '2024-01-02 03:04:05' AS ts",
            )
            .await
            .unwrap();
        assert_eq!(rows[0]["b"], json!("cafe"));
        assert_eq!(rows[0]["tz"], json!("2024-01-02T03:04:05+00:00"));
        assert_eq!(rows[0]["ts"], json!("2024-01-02 03:04:05"));
    }

    #[test]
    fn intervals_use_iso_durations() {
        assert_eq!(iso_interval(0, 0, 0), "PT0S");
        assert_eq!(iso_interval(14, 0, 0), "P14M");
        assert_eq!(iso_interval(0, 3, 0), "P3D");
        assert_eq!(iso_interval(0, 0, 5_400_000_000_000), "PT1H30M");
        assert_eq!(iso_interval(1, 2, 250_000_000), "P1M2DT0.25S");
    }

    #[test]
    fn times_keep_fractional_seconds() {
        assert_eq!(time_of_day(TimeUnit::Microsecond, 45_296_000_000), json!("12:34:56"));
        assert_eq!(time_of_day(TimeUnit::Microsecond, 45_296_500_000), json!("12:34:56.500"));
    }
}
