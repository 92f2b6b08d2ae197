use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arrow_array::RecordBatch;
use arrow_ipc::writer::StreamWriter;
use duckdb::Connection;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::catalog::{join, quote};
use crate::delta::{DeltaAppender, META_COLUMNS};
use crate::error::{FrontendError, Result};
use crate::replication::ColumnDef;
use crate::session::SessionContext;

/// Identifies one replicated table. Case-sensitive; case-insensitive lookup
/// is the caller's responsibility.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableKey {
    pub database: String,
    pub table: String,
}

impl TableKey {
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        TableKey {
            database: database.into(),
            table: table.into(),
        }
    }

    fn qualified(&self) -> String {
        join(&[&self.database, &self.table])
    }
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.table)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Delete,
    Insert,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Delete => "D",
            Phase::Insert => "I",
        })
    }
}

/// Registry of per-table delta appenders and the two-phase flush that
/// transports them into the engine.
///
/// One mutex serialises appender registration against flushes and is held
/// for the whole flush.
#[derive(Default)]
pub struct DeltaController {
    tables: Mutex<HashMap<TableKey, Arc<Mutex<DeltaAppender>>>>,
}

impl DeltaController {
    pub fn new() -> Self {
        Self::default()
    }

    /// The appender registered for (`database`, `table`), creating one with
    /// the meta-columns prepended on first encounter. A newly created
    /// appender is visible to subsequent callers immediately.
    ///
    /// Passing a schema that differs from an existing appender's is a
    /// contract violation of the replication layer, which must flush before
    /// applying a schema change; the existing appender is returned
    /// unchecked.
    pub fn get_or_create_appender(
        &self,
        database: &str,
        table: &str,
        schema: &[ColumnDef],
    ) -> Result<Arc<Mutex<DeltaAppender>>> {
        let mut tables = self.tables.lock();
        let key = TableKey::new(database, table);
        if let Some(appender) = tables.get(&key) {
            return Ok(appender.clone());
        }
        let appender = Arc::new(Mutex::new(DeltaAppender::new(schema.to_vec())?));
        tables.insert(key, appender.clone());
        Ok(appender)
    }

    /// Number of tables with a registered appender.
    pub fn pending_tables(&self) -> usize {
        self.tables.lock().len()
    }

    /// Apply every buffered delta to the engine and empty the registry.
    ///
    /// The flush runs as two sequential transactions on the session's
    /// pinned connection: phase D deletes the primary keys of every
    /// buffered row, phase I inserts the post-image rows (`action <> 0`).
    /// The engine's eager unique-constraint checking makes a single
    /// delete-then-insert transaction report spurious violations, hence the
    /// split; a crash between the phases leaves phase D applied without
    /// phase I, and recovery relies on replication catch-up re-applying
    /// the delta.
    pub fn flush(&self, session: &SessionContext) -> Result<()> {
        let mut tables = self.tables.lock();
        if tables.is_empty() {
            return Ok(());
        }

        let mut batches: Vec<(TableKey, Vec<ColumnDef>, RecordBatch)> = Vec::new();
        for (key, appender) in tables.iter() {
            let mut appender = appender.lock();
            let batch = appender.build()?;
            if batch.num_rows() == 0 {
                continue;
            }
            batches.push((key.clone(), appender.base_schema().to_vec(), batch));
        }

        if !batches.is_empty() {
            session.with_connection_mut(|conn| {
                run_phase(conn, Phase::Delete, &batches)?;
                run_phase(conn, Phase::Insert, &batches)
            })?;
        }

        let flushed = tables.len();
        tables.clear();
        info!(tables = flushed, "delta flush committed");
        Ok(())
    }
}

fn run_phase(
    conn: &mut Connection,
    phase: Phase,
    batches: &[(TableKey, Vec<ColumnDef>, RecordBatch)],
) -> Result<()> {
    info!(phase = %phase, tables = batches.len(), "applying delta flush phase");
    let tx = conn.transaction().map_err(|e| {
        FrontendError::Engine(format!("delta flush phase {phase} could not begin: {e}"))
    })?;

    // The IPC buffer is reused across tables but must stay untouched while
    // the statement referencing its pointer runs.
    let mut buf: Vec<u8> = Vec::new();
    for (key, base, batch) in batches {
        buf.clear();
        serialize_ipc(&mut buf, batch)?;
        let ptr = buf.as_ptr() as usize;
        let size = buf.len();

        let sql = match phase {
            Phase::Delete => delete_statement(key, base, ptr, size)?,
            Phase::Insert => insert_statement(key, ptr, size),
        };
        debug!(table = %key, phase = %phase, sql = %sql, "delta flush statement");
        tx.execute(&sql, []).map_err(|e| {
            FrontendError::Engine(format!(
                "delta flush phase {phase} failed for table {key}: {e}"
            ))
        })?;
    }

    tx.commit().map_err(|e| {
        FrontendError::Engine(format!("delta flush phase {phase} commit failed: {e}"))
    })
}

fn serialize_ipc(buf: &mut Vec<u8>, batch: &RecordBatch) -> Result<()> {
    let mut writer = StreamWriter::try_new(&mut *buf, batch.schema().as_ref())?;
    writer.write(batch)?;
    writer.finish()?;
    Ok(())
}

fn scan_clause(ptr: usize, size: usize) -> String {
    format!(" FROM scan_arrow_ipc([{{ptr: {ptr}::ubigint, size: {size}::ubigint}}])")
}

/// Phase-D statement for one table.
///
/// A single-column primary key uses the `IN` form, which the engine plans
/// as a semi-join. The engine does not accept multiple columns in `IN`, so
/// composite keys fall back to an equivalent `USING` join.
pub fn delete_statement(
    key: &TableKey,
    base: &[ColumnDef],
    ptr: usize,
    size: usize,
) -> Result<String> {
    let pk: Vec<&ColumnDef> = base.iter().filter(|c| c.primary_key).collect();
    if pk.is_empty() {
        return Err(FrontendError::Protocol(format!(
            "table {key} has no primary key for delta flush"
        )));
    }

    let pk_list = pk
        .iter()
        .map(|c| quote(&c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let pk_sql = format!("SELECT {pk_list}{}", scan_clause(ptr, size));
    let qualified = key.qualified();

    if pk.len() == 1 {
        return Ok(format!(
            "DELETE FROM {qualified} WHERE {pk_list} IN ({pk_sql})"
        ));
    }

    let mut sql = format!("DELETE FROM {qualified} AS base USING ({pk_sql}) AS del WHERE ");
    for (i, col) in pk.iter().enumerate() {
        if i > 0 {
            sql.push_str(" AND ");
        }
        let column = quote(&col.name);
        sql.push_str(&format!("base.{column} = del.{column}"));
    }
    Ok(sql)
}

/// Phase-I statement for one table: keep only the post-image rows and strip
/// the meta-columns.
pub fn insert_statement(key: &TableKey, ptr: usize, size: usize) -> String {
    format!(
        "INSERT INTO {} SELECT * EXCLUDE ({}){} WHERE action <> 0",
        key.qualified(),
        META_COLUMNS.join(", "),
        scan_clause(ptr, size)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineDsn;
    use crate::pool::ConnectionPool;
    use crate::replication::{ColumnKind, DeltaAction, EventValue, TxnPosition};

    fn keyed_schema() -> Vec<ColumnDef> {
        vec![
            ColumnDef::new("id", ColumnKind::Int64).primary_key(),
            ColumnDef::new("value", ColumnKind::Text),
        ]
    }

    fn composite_schema() -> Vec<ColumnDef> {
        vec![
            ColumnDef::new("a", ColumnKind::Int64).primary_key(),
            ColumnDef::new("b", ColumnKind::Int64).primary_key(),
            ColumnDef::new("value", ColumnKind::Text),
        ]
    }

    fn session() -> SessionContext {
        let pool = Arc::new(ConnectionPool::open(&EngineDsn::in_memory()).unwrap());
        SessionContext::new(pool, 1)
    }

    #[test]
    fn appenders_are_registered_once_per_table() {
        let controller = DeltaController::new();
        let a = controller
            .get_or_create_appender("db", "t", &keyed_schema())
            .unwrap();
        let b = controller
            .get_or_create_appender("db", "t", &keyed_schema())
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(controller.pending_tables(), 1);

        controller
            .get_or_create_appender("db", "other", &keyed_schema())
            .unwrap();
        assert_eq!(controller.pending_tables(), 2);
    }

    #[test]
    fn single_column_key_deletes_with_in() {
        let key = TableKey::new("db", "t");
        let sql = delete_statement(&key, &keyed_schema(), 0xdead, 128).unwrap();
        assert_eq!(
            sql,
            format!(
                "DELETE FROM \"db\".\"t\" WHERE \"id\" IN (SELECT \"id\" FROM \
                 scan_arrow_ipc([{{ptr: {}::ubigint, size: 128::ubigint}}]))",
                0xdead_usize
            )
        );
    }

    #[test]
    fn composite_key_deletes_with_using_join() {
        let key = TableKey::new("db", "t");
        let sql = delete_statement(&key, &composite_schema(), 1, 2).unwrap();
        assert!(sql.contains("DELETE FROM \"db\".\"t\" AS base USING (SELECT \"a\", \"b\" FROM"));
        assert!(sql.contains("base.\"a\" = del.\"a\" AND base.\"b\" = del.\"b\""));
        assert!(!sql.contains(" IN ("));
    }

    #[test]
    fn keyless_table_cannot_be_flushed() {
        let key = TableKey::new("db", "t");
        let keyless = vec![ColumnDef::new("v", ColumnKind::Text)];
        assert!(delete_statement(&key, &keyless, 0, 0).is_err());
    }

    #[test]
    fn insert_keeps_post_images_and_strips_meta_columns() {
        let key = TableKey::new("db", "t");
        let sql = insert_statement(&key, 7, 9);
        assert_eq!(
            sql,
            "INSERT INTO \"db\".\"t\" SELECT * EXCLUDE (action, txn_domain, txn_server, \
             txn_group, txn_seq) FROM scan_arrow_ipc([{ptr: 7::ubigint, size: 9::ubigint}]) \
             WHERE action <> 0"
        );
    }

    #[test]
    fn flush_of_empty_registry_is_a_no_op() {
        let controller = DeltaController::new();
        controller.flush(&session()).unwrap();
    }

    #[test]
    fn flush_with_only_empty_appenders_clears_the_registry() {
        let controller = DeltaController::new();
        controller
            .get_or_create_appender("db", "t", &keyed_schema())
            .unwrap();
        assert_eq!(controller.pending_tables(), 1);
        controller.flush(&session()).unwrap();
        assert_eq!(controller.pending_tables(), 0);
    }

    #[test]
    fn failed_flush_names_phase_and_table_and_keeps_the_registry() {
        // The offline engine has no arrow-scan extension, so phase D is
        // guaranteed to fail at the first statement.
        let controller = DeltaController::new();
        let appender = controller
            .get_or_create_appender("memory", "t", &keyed_schema())
            .unwrap();
        appender
            .lock()
            .append_row(
                DeltaAction::Delete,
                &TxnPosition::default(),
                &[EventValue::Int(1), EventValue::Null],
            )
            .unwrap();

        let err = controller.flush(&session()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("phase D"), "unexpected error: {msg}");
        assert!(msg.contains("memory.t"), "unexpected error: {msg}");
        assert_eq!(controller.pending_tables(), 1);
    }
}
