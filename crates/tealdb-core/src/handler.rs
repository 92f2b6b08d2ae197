use std::sync::Arc;
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::error::Result;
use crate::pool::ConnectionPool;
use crate::session::SessionContext;

/// One column of a spooled result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultField {
    pub name: String,
}

/// One chunk of a spooled result, as handed to the wire framework. A
/// statement without a row set carries only the OK-packet counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultChunk {
    pub fields: Vec<ResultField>,
    pub rows: Vec<Vec<Option<String>>>,
    pub affected_rows: u64,
    pub last_insert_id: u64,
}

/// Transforms one result chunk before it reaches the spool. `None`
/// short-circuits the rest of the pipeline.
pub type ResultModifier = fn(Option<ResultChunk>, bool) -> Option<ResultChunk>;

/// Apply modifiers in order; a `None` chunk stops the pipeline.
pub fn apply_modifiers(
    modifiers: &[ResultModifier],
    chunk: Option<ResultChunk>,
    more: bool,
) -> Option<ResultChunk> {
    let mut current = chunk;
    for modifier in modifiers {
        if current.is_none() {
            return None;
        }
        current = modifier(current, more);
    }
    current
}

/// Callback the framework uses to spool result chunks back to the client.
pub type ResultSpool<'a> = &'a mut dyn FnMut(Option<ResultChunk>, bool) -> Result<()>;

/// The callbacks of the wire-protocol framework that the shim intercepts.
pub trait WireHandler {
    fn com_query(
        &mut self,
        session: &SessionContext,
        query: &str,
        spool: ResultSpool<'_>,
    ) -> Result<()>;

    fn com_init_db(&mut self, session: &SessionContext, schema: &str) -> Result<()>;

    fn connection_closed(&mut self, session: &SessionContext);
}

/// Wraps the framework-facing handler, rewriting queries and result field
/// names for MySQL-client compatibility and mirroring the connection
/// lifecycle into the pool. Every statement it does not recognise passes
/// through untouched.
pub struct HandlerShim<H> {
    inner: H,
    pool: Arc<ConnectionPool>,
}

impl<H: WireHandler> HandlerShim<H> {
    pub fn new(inner: H, pool: Arc<ConnectionPool>) -> Self {
        HandlerShim { inner, pool }
    }

    pub fn into_inner(self) -> H {
        self.inner
    }
}

impl<H: WireHandler> WireHandler for HandlerShim<H> {
    fn com_query(
        &mut self,
        session: &SessionContext,
        query: &str,
        spool: ResultSpool<'_>,
    ) -> Result<()> {
        let (query, modifiers) = rewrite_query(query);
        if modifiers.is_empty() {
            return self.inner.com_query(session, &query, spool);
        }
        debug!(rewritten = %query, "rewrote client query");
        let mut wrapped = |chunk: Option<ResultChunk>, more: bool| -> Result<()> {
            spool(apply_modifiers(&modifiers, chunk, more), more)
        };
        self.inner.com_query(session, &query, &mut wrapped)
    }

    fn com_init_db(&mut self, session: &SessionContext, schema: &str) -> Result<()> {
        self.pool
            .get_connection_for_schema(session.connection_id(), schema)?;
        self.inner.com_init_db(session, schema)
    }

    fn connection_closed(&mut self, session: &SessionContext) {
        self.pool.close_connection(session.connection_id());
        self.inner.connection_closed(session);
    }
}

fn auto_increment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)AUTO_INCREMENT=\d+").unwrap())
}

fn show_slave_status_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^show\s+slave\s+status\s*;?$").unwrap())
}

/// Pre-dispatch rewriting. Strips `AUTO_INCREMENT=<n>` table options (noise
/// from MySQL dumps the engine rejects) and maps the deprecated
/// `SHOW SLAVE STATUS` onto `SHOW REPLICA STATUS`, returning the modifiers
/// that translate the result back for old clients. Rewriting an already
/// rewritten query yields the same string.
pub fn rewrite_query(query: &str) -> (String, Vec<ResultModifier>) {
    let mut modifiers: Vec<ResultModifier> = Vec::new();
    let query = auto_increment_re().replace_all(query, "").into_owned();
    let query = if show_slave_status_re().is_match(&query) {
        modifiers.push(replace_show_slave_status_field_names);
        "SHOW REPLICA STATUS;".to_string()
    } else {
        query
    };
    (query, modifiers)
}

/// Rename `Replica_*`/`*Source*` result fields to the pre-8.0 spellings
/// (`Slave_*`/`*Master*`) expected by older MySQL clients.
pub fn replace_show_slave_status_field_names(
    chunk: Option<ResultChunk>,
    _more: bool,
) -> Option<ResultChunk> {
    let mut chunk = chunk?;
    for field in &mut chunk.fields {
        if let Some(rest) = field.name.strip_prefix("Replica_") {
            field.name = format!("Slave_{rest}");
        }
        if field.name.contains("Source") {
            field.name = field.name.replace("Source", "Master");
        }
    }
    Some(chunk)
}
