use std::collections::HashMap;
use std::sync::Arc;

use duckdb::Connection;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::catalog::full_schema_name;
use crate::config::EngineDsn;
use crate::error::{self, FrontendError, Result};

/// A pinned driver connection. The mutex enforces the single in-flight
/// request invariant: a second concurrent statement on the same wire
/// connection serialises here.
pub type PooledConnection = Arc<Mutex<Connection>>;

/// One driver connection per wire connection id.
///
/// Driver connections carry per-connection mutable state (current schema,
/// temporary tables, prepared statements), so they are never shared across
/// client connections and never run concurrent statements for one client.
pub struct ConnectionPool {
    catalog: String,
    root: Mutex<Connection>,
    conns: RwLock<HashMap<u32, PooledConnection>>,
}

impl ConnectionPool {
    pub fn open(dsn: &EngineDsn) -> Result<Self> {
        let root = match &dsn.path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        Ok(ConnectionPool {
            catalog: dsn.catalog.clone(),
            root: Mutex::new(root),
            conns: RwLock::new(HashMap::new()),
        })
    }

    pub fn catalog(&self) -> &str {
        &self.catalog
    }

    /// The driver connection for `id`, created on first use. For a fixed id
    /// every caller observes the same connection until it is closed.
    pub fn get_connection(&self, id: u32) -> Result<PooledConnection> {
        if let Some(conn) = self.conns.read().get(&id) {
            return Ok(conn.clone());
        }
        let mut conns = self.conns.write();
        if let Some(conn) = conns.get(&id) {
            return Ok(conn.clone());
        }
        let conn = self.root.lock().try_clone()?;
        let conn = Arc::new(Mutex::new(conn));
        conns.insert(id, conn.clone());
        debug!(connection_id = id, "created driver connection");
        Ok(conn)
    }

    /// Like [`get_connection`], and additionally switches the connection to
    /// `schema` when it is non-empty and differs from the current one.
    ///
    /// [`get_connection`]: ConnectionPool::get_connection
    pub fn get_connection_for_schema(&self, id: u32, schema: &str) -> Result<PooledConnection> {
        let conn = self.get_connection(id)?;
        if schema.is_empty() {
            return Ok(conn);
        }

        let guard = conn.lock();
        let current: String = guard
            .query_row("SELECT current_schema()", [], |row| row.get(0))
            .map_err(|e| {
                warn!(error = %e, "failed to get current schema");
                FrontendError::from(e)
            })?;
        if current != schema {
            let use_sql = format!("USE {}", full_schema_name(&self.catalog, schema));
            if let Err(e) = guard.execute_batch(&use_sql) {
                if error::is_schema_not_found(&e) {
                    return Err(FrontendError::DatabaseNotFound(schema.to_string()));
                }
                warn!(schema, error = %e, "failed to switch schema");
                return Err(e.into());
            }
        }
        drop(guard);
        Ok(conn)
    }

    /// Close and remove the connection for `id`. Unknown ids are a no-op.
    pub fn close_connection(&self, id: u32) {
        if self.conns.write().remove(&id).is_some() {
            debug!(connection_id = id, "closed driver connection");
        }
    }

    /// Tear down every pinned connection.
    pub fn close_all(&self) {
        self.conns.write().clear();
    }
}
