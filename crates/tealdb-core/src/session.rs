use std::sync::Arc;

use chrono::{DateTime, NaiveDate};
use duckdb::types::Value;
use duckdb::Connection;

use crate::error::Result;
use crate::pool::{ConnectionPool, PooledConnection};

/// The execution context of one wire session.
///
/// Every component above the pool reaches the engine through this adapter,
/// so the "which driver connection" decision lives in exactly one place.
#[derive(Clone)]
pub struct SessionContext {
    pool: Arc<ConnectionPool>,
    connection_id: u32,
}

impl SessionContext {
    pub fn new(pool: Arc<ConnectionPool>, connection_id: u32) -> Self {
        SessionContext {
            pool,
            connection_id,
        }
    }

    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn connection(&self) -> Result<PooledConnection> {
        self.pool.get_connection(self.connection_id)
    }

    /// Run `f` with the session's driver connection held for the duration.
    /// Used for multi-statement work such as transactions.
    pub fn with_connection<R>(&self, f: impl FnOnce(&Connection) -> Result<R>) -> Result<R> {
        let conn = self.connection()?;
        let guard = conn.lock();
        f(&guard)
    }

    /// Like [`with_connection`], for driver APIs that need exclusive access
    /// (explicit transactions).
    ///
    /// [`with_connection`]: SessionContext::with_connection
    pub fn with_connection_mut<R>(&self, f: impl FnOnce(&mut Connection) -> Result<R>) -> Result<R> {
        let conn = self.connection()?;
        let mut guard = conn.lock();
        f(&mut guard)
    }

    /// Execute a single statement, returning the affected-row count.
    pub fn exec(&self, sql: &str) -> Result<usize> {
        self.with_connection(|conn| Ok(conn.execute(sql, [])?))
    }

    /// Execute a batch of statements with no result.
    pub fn exec_batch(&self, sql: &str) -> Result<()> {
        self.with_connection(|conn| Ok(conn.execute_batch(sql)?))
    }

    /// First column of the first row, as text.
    pub fn query_row_text(&self, sql: &str) -> Result<Option<String>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let mut rows = stmt.query([])?;
            match rows.next()? {
                Some(row) => Ok(value_to_text(&row.get::<_, Value>(0)?)),
                None => Ok(None),
            }
        })
    }

    /// All rows of a parameterised query, every column rendered as text.
    pub fn query_strings(
        &self,
        sql: &str,
        params: &[&dyn duckdb::ToSql],
    ) -> Result<Vec<Vec<Option<String>>>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let mut rows = stmt.query(params)?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let column_count = row.as_ref().column_count();
                let mut record = Vec::with_capacity(column_count);
                for i in 0..column_count {
                    record.push(value_to_text(&row.get::<_, Value>(i)?));
                }
                out.push(record);
            }
            Ok(out)
        })
    }
}

/// Render a driver value as MySQL-style text; `None` is SQL NULL.
pub fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Boolean(b) => Some(if *b { "1".to_string() } else { "0".to_string() }),
        Value::TinyInt(v) => Some(v.to_string()),
        Value::SmallInt(v) => Some(v.to_string()),
        Value::Int(v) => Some(v.to_string()),
        Value::BigInt(v) => Some(v.to_string()),
        Value::HugeInt(v) => Some(v.to_string()),
        Value::UTinyInt(v) => Some(v.to_string()),
        Value::USmallInt(v) => Some(v.to_string()),
        Value::UInt(v) => Some(v.to_string()),
        Value::UBigInt(v) => Some(v.to_string()),
        Value::Float(v) => Some(v.to_string()),
        Value::Double(v) => Some(v.to_string()),
        Value::Decimal(d) => Some(d.to_string()),
        Value::Text(s) => Some(s.clone()),
        Value::Enum(s) => Some(s.clone()),
        Value::Blob(b) => Some(String::from_utf8_lossy(b).into_owned()),
        Value::Date32(days) => NaiveDate::from_num_days_from_ce_opt(days + 719_163)
            .map(|d| d.to_string()),
        Value::Timestamp(unit, raw) => {
            let micros = match unit {
                duckdb::types::TimeUnit::Second => raw.saturating_mul(1_000_000),
                duckdb::types::TimeUnit::Millisecond => raw.saturating_mul(1_000),
                duckdb::types::TimeUnit::Microsecond => *raw,
                duckdb::types::TimeUnit::Nanosecond => raw / 1_000,
            };
            DateTime::from_timestamp_micros(micros)
                .map(|ts| ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string())
        }
        Value::Time64(unit, raw) => {
            let micros = match unit {
                duckdb::types::TimeUnit::Second => raw.saturating_mul(1_000_000),
                duckdb::types::TimeUnit::Millisecond => raw.saturating_mul(1_000),
                duckdb::types::TimeUnit::Microsecond => *raw,
                duckdb::types::TimeUnit::Nanosecond => raw / 1_000,
            };
            let secs = micros / 1_000_000;
            Some(format!(
                "{:02}:{:02}:{:02}.{:06}",
                secs / 3600,
                (secs % 3600) / 60,
                secs % 60,
                micros % 1_000_000
            ))
        }
        other => Some(format!("{other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineDsn;

    fn session() -> SessionContext {
        let pool = Arc::new(ConnectionPool::open(&EngineDsn::in_memory()).unwrap());
        SessionContext::new(pool, 1)
    }

    #[test]
    fn exec_and_query_ride_the_same_pinned_connection() {
        let session = session();
        session
            .exec_batch("CREATE TEMPORARY TABLE scratch (v INTEGER)")
            .unwrap();
        assert_eq!(session.exec("INSERT INTO scratch VALUES (1), (2)").unwrap(), 2);

        // Temporary tables are connection-local; seeing the rows proves the
        // second statement resolved to the same driver connection.
        let count = session
            .query_row_text("SELECT count(*) FROM scratch")
            .unwrap()
            .unwrap();
        assert_eq!(count, "2");
    }

    #[test]
    fn query_strings_renders_nulls_as_none() {
        let session = session();
        let rows = session
            .query_strings("SELECT 1, NULL, 'x'", &[])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0].as_deref(), Some("1"));
        assert_eq!(rows[0][1], None);
        assert_eq!(rows[0][2].as_deref(), Some("x"));
    }

    #[test]
    fn value_rendering_covers_temporal_types() {
        assert_eq!(value_to_text(&Value::Null), None);
        assert_eq!(value_to_text(&Value::Boolean(true)).unwrap(), "1");
        assert_eq!(value_to_text(&Value::Date32(0)).unwrap(), "1970-01-01");
        assert_eq!(
            value_to_text(&Value::Timestamp(duckdb::types::TimeUnit::Microsecond, 0)).unwrap(),
            "1970-01-01 00:00:00.000000"
        );
        assert_eq!(
            value_to_text(&Value::Time64(duckdb::types::TimeUnit::Microsecond, 3_723_000_001))
                .unwrap(),
            "01:02:03.000001"
        );
    }
}
