use std::fs::File;
use std::io;
use std::io::Read;
use std::sync::OnceLock;

use async_trait::async_trait;
use duckdb::types::Value;
use opensrv_mysql::{
    AsyncMysqlShim, Column, ColumnFlags, ColumnType, ErrorKind, InitWriter, OkResponse,
    ParamParser, QueryResultWriter, StatementMetaWriter,
};
use regex::Regex;
use tokio::io::AsyncWrite;
use tracing::debug;

use tealdb_core::{
    load, value_to_text, BulkLoad, Catalog, DataDir, DuplicateHandling, FrontendError,
    HandlerShim, ResultChunk, ResultField, SessionContext, WireHandler,
};

use crate::SharedVars;

/// The client byte stream behind a `LOAD DATA LOCAL INFILE` statement, as
/// the wire layer hands it over. This is the seam a relaying framework
/// plugs into; the statement names the file, the source produces its
/// bytes.
pub trait LocalInfileSource: Send + Sync {
    fn open(&self, file: &str) -> tealdb_core::Result<Box<dyn Read + Send>>;
}

/// Resolves the named path directly. The MySQL framework on this endpoint
/// carries no in-band local-infile channel, so the relay degenerates to
/// opening the client's path on this host, which is exact for clients
/// colocated with the server. LOCAL semantics still apply: the read is
/// gated by `local_infile`, not by `secure_file_priv`.
pub struct PathLocalInfile;

impl LocalInfileSource for PathLocalInfile {
    fn open(&self, file: &str) -> tealdb_core::Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(file)?))
    }
}

/// The engine-facing handler the shim wraps: dispatches queries on the
/// session's pinned driver connection and translates the statements the
/// engine does not speak natively (`USE`, `LOAD DATA INFILE`).
pub struct DuckHandler {
    catalog: Catalog,
    vars: SharedVars,
    dirs: DataDir,
    infile: Box<dyn LocalInfileSource>,
}

impl DuckHandler {
    pub fn new(
        catalog: Catalog,
        vars: SharedVars,
        dirs: DataDir,
        infile: Box<dyn LocalInfileSource>,
    ) -> Self {
        DuckHandler {
            catalog,
            vars,
            dirs,
            infile,
        }
    }

    fn run_result_set(
        &self,
        session: &SessionContext,
        query: &str,
        spool: tealdb_core::handler::ResultSpool<'_>,
    ) -> tealdb_core::Result<()> {
        let chunk = session.with_connection(|conn| {
            let mut stmt = conn.prepare(query)?;
            let mut fields: Vec<ResultField> = Vec::new();
            let mut out_rows: Vec<Vec<Option<String>>> = Vec::new();
            {
                let mut rows = stmt.query([])?;
                while let Some(row) = rows.next()? {
                    let st = row.as_ref();
                    if fields.is_empty() {
                        for i in 0..st.column_count() {
                            let name = st
                                .column_name(i)
                                .map(|n| n.to_string())
                                .unwrap_or_else(|_| format!("col{i}"));
                            fields.push(ResultField { name });
                        }
                    }
                    let mut record = Vec::with_capacity(fields.len());
                    for i in 0..fields.len() {
                        record.push(value_to_text(&row.get::<_, Value>(i)?));
                    }
                    out_rows.push(record);
                }
            }
            if fields.is_empty() {
                for i in 0..stmt.column_count() {
                    let name = stmt
                        .column_name(i)
                        .map(|n| n.to_string())
                        .unwrap_or_else(|_| format!("col{i}"));
                    fields.push(ResultField { name });
                }
            }
            Ok(ResultChunk {
                fields,
                rows: out_rows,
                affected_rows: 0,
                last_insert_id: 0,
            })
        })?;
        spool(Some(chunk), false)
    }

    fn run_exec(
        &self,
        session: &SessionContext,
        query: &str,
        spool: tealdb_core::handler::ResultSpool<'_>,
    ) -> tealdb_core::Result<()> {
        let affected = session.exec(query)?;
        spool(
            Some(ResultChunk {
                affected_rows: affected as u64,
                ..Default::default()
            }),
            false,
        )
    }

    fn run_load(
        &self,
        session: &SessionContext,
        mut statement: BulkLoad,
        spool: tealdb_core::handler::ResultSpool<'_>,
    ) -> tealdb_core::Result<()> {
        if statement.local && !self.vars.local_infile() {
            return Err(FrontendError::LocalInfileDisabled);
        }
        if statement.schema.is_empty() {
            statement.schema = session
                .query_row_text("SELECT current_schema()")?
                .unwrap_or_else(|| "main".to_string());
        }
        let target = self
            .catalog
            .table_definition(session, &statement.schema, &statement.table)?;

        let result = if statement.local {
            let reader = self.infile.open(&statement.file)?;
            load::execute_client_side(session, &self.vars, &self.dirs, &statement, &target, reader)?
        } else {
            load::execute_server_side(session, &self.vars, &statement, &target)?
        };

        spool(
            Some(ResultChunk {
                affected_rows: result.rows_affected,
                last_insert_id: result.last_insert_id,
                ..Default::default()
            }),
            false,
        )
    }
}

impl WireHandler for DuckHandler {
    fn com_query(
        &mut self,
        session: &SessionContext,
        query: &str,
        spool: tealdb_core::handler::ResultSpool<'_>,
    ) -> tealdb_core::Result<()> {
        let trimmed = query.trim().trim_end_matches(';').trim();

        if let Some(schema) = parse_use(trimmed) {
            session
                .pool()
                .get_connection_for_schema(session.connection_id(), &schema)?;
            return spool(Some(ResultChunk::default()), false);
        }

        if let Some(statement) = parse_load_data(trimmed) {
            return self.run_load(session, statement, spool);
        }

        // The engine has no replication status source; answer the shape
        // clients expect with an empty row set.
        if trimmed.eq_ignore_ascii_case("SHOW REPLICA STATUS") {
            return spool(Some(replica_status_chunk()), false);
        }

        if returns_result_set(trimmed) {
            self.run_result_set(session, query, spool)
        } else {
            self.run_exec(session, query, spool)
        }
    }

    fn com_init_db(&mut self, _session: &SessionContext, schema: &str) -> tealdb_core::Result<()> {
        debug!(schema, "selected initial database");
        Ok(())
    }

    fn connection_closed(&mut self, session: &SessionContext) {
        debug!(connection_id = session.connection_id(), "wire connection closed");
    }
}

/// The field layout of MySQL 8.x `SHOW REPLICA STATUS`, trimmed to the
/// columns monitoring tools read. The shim's result modifier turns these
/// into the pre-8.0 `Slave_*`/`Master_*` spellings for old clients.
fn replica_status_chunk() -> ResultChunk {
    let names = [
        "Replica_IO_State",
        "Source_Host",
        "Source_User",
        "Source_Port",
        "Connect_Retry",
        "Source_Log_File",
        "Read_Source_Log_Pos",
        "Relay_Log_File",
        "Relay_Log_Pos",
        "Relay_Source_Log_File",
        "Replica_IO_Running",
        "Replica_SQL_Running",
        "Source_SSL_Allowed",
        "Seconds_Behind_Source",
        "Source_Server_Id",
        "Source_UUID",
    ];
    ResultChunk {
        fields: names
            .iter()
            .map(|n| ResultField {
                name: n.to_string(),
            })
            .collect(),
        ..Default::default()
    }
}

fn returns_result_set(query: &str) -> bool {
    let first = query
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();
    matches!(
        first.as_str(),
        "select" | "show" | "describe" | "desc" | "pragma" | "with" | "values" | "from"
            | "explain" | "call" | "table"
    )
}

fn unquote_ident(ident: &str) -> String {
    ident
        .trim()
        .trim_matches('`')
        .trim_matches('"')
        .to_string()
}

fn parse_use(query: &str) -> Option<String> {
    let (first, rest) = query.split_once(char::is_whitespace)?;
    if !first.eq_ignore_ascii_case("use") {
        return None;
    }
    let ident = unquote_ident(rest);
    if ident.is_empty() {
        return None;
    }
    Some(ident)
}

fn load_data_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?is)^LOAD\s+DATA\s+(?P<local>LOCAL\s+)?INFILE\s+'(?P<file>[^']*)'\s+(?P<dup>REPLACE\s+|IGNORE\s+)?INTO\s+TABLE\s+(?P<table>[^\s(]+)(?P<rest>.*)$"#,
        )
        .unwrap()
    })
}

fn clause_re(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap()
}

fn unescape_clause_literal(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Recognise a `LOAD DATA [LOCAL] INFILE` statement and lift its clauses
/// into the bulk-load model. Statements that are not LOAD DATA return
/// `None` and flow to the engine untouched.
pub fn parse_load_data(query: &str) -> Option<BulkLoad> {
    let caps = load_data_re().captures(query)?;

    let table_ref = unquote_ident(&caps["table"]);
    let (schema, table) = match table_ref.split_once('.') {
        Some((schema, table)) => (
            unquote_ident(schema),
            unquote_ident(table),
        ),
        None => (String::new(), table_ref),
    };

    let mut statement = BulkLoad::new(schema, table);
    statement.local = caps.name("local").is_some();
    statement.file = caps["file"].to_string();
    statement.duplicates = match caps.name("dup").map(|m| m.as_str().trim().to_ascii_uppercase()) {
        Some(ref d) if d == "REPLACE" => DuplicateHandling::Replace,
        Some(ref d) if d == "IGNORE" => DuplicateHandling::Ignore,
        _ => DuplicateHandling::Error,
    };

    let rest = &caps["rest"];
    let grab = |pattern: &str| -> Option<String> {
        clause_re(pattern)
            .captures(rest)
            .map(|c| unescape_clause_literal(&c[1]))
    };

    if let Some(v) = grab(r"(?is)(?:FIELDS|COLUMNS)\s+TERMINATED\s+BY\s+'([^']*)'") {
        statement.fields_terminated_by = v;
    }
    if let Some(v) = grab(r"(?is)ENCLOSED\s+BY\s+'([^']*)'") {
        statement.fields_enclosed_by = v;
    }
    if let Some(v) = grab(r"(?is)ESCAPED\s+BY\s+'([^']*)'") {
        statement.fields_escaped_by = v;
    }
    if let Some(v) = grab(r"(?is)LINES\s+STARTING\s+BY\s+'([^']*)'") {
        statement.lines_starting_by = v;
    }
    if let Some(v) = grab(r"(?is)LINES(?:\s+STARTING\s+BY\s+'[^']*')?\s+TERMINATED\s+BY\s+'([^']*)'") {
        statement.lines_terminated_by = v;
    }
    if let Some(c) = clause_re(r"(?is)IGNORE\s+(\d+)\s+(?:LINES|ROWS)").captures(rest) {
        statement.ignore_rows = c[1].parse().unwrap_or(0);
    }
    if let Some(c) = clause_re(r"(?is)CHARACTER\s+SET\s+(\w+)").captures(rest) {
        statement.charset = c[1].to_string();
    }
    if let Some(c) = clause_re(r"(?is)\(([^)]*)\)\s*$").captures(rest) {
        statement.columns = c[1]
            .split(',')
            .map(|part| unquote_ident(part))
            .filter(|s| !s.is_empty())
            .collect();
    }

    Some(statement)
}

/// One wire session: the shim-wrapped handler plus the session context the
/// pool key rides in.
pub struct MysqlSession {
    shim: HandlerShim<DuckHandler>,
    session: SessionContext,
}

impl MysqlSession {
    pub fn new(shim: HandlerShim<DuckHandler>, session: SessionContext) -> Self {
        MysqlSession { shim, session }
    }
}

impl Drop for MysqlSession {
    fn drop(&mut self) {
        self.shim.connection_closed(&self.session);
    }
}

fn error_kind(e: &FrontendError) -> ErrorKind {
    match e {
        FrontendError::DatabaseNotFound(_) => ErrorKind::ER_BAD_DB_ERROR,
        FrontendError::TableNotFound(_) => ErrorKind::ER_NO_SUCH_TABLE,
        FrontendError::TableAlreadyExists(_) => ErrorKind::ER_TABLE_EXISTS_ERROR,
        FrontendError::ViewNotFound(_) => ErrorKind::ER_NO_SUCH_TABLE,
        FrontendError::SecureFilePriv(_) | FrontendError::LocalInfileDisabled => {
            ErrorKind::ER_OPTION_PREVENTS_STATEMENT
        }
        FrontendError::UnsupportedLoadOption(_) => ErrorKind::ER_NOT_SUPPORTED_YET,
        _ => ErrorKind::ER_UNKNOWN_ERROR,
    }
}

async fn write_chunks<W: AsyncWrite + Send + Unpin>(
    results: QueryResultWriter<'_, W>,
    mut chunks: Vec<ResultChunk>,
) -> io::Result<()> {
    let Some(chunk) = (if chunks.is_empty() {
        None
    } else {
        Some(chunks.remove(0))
    }) else {
        return results.completed(OkResponse::default()).await;
    };

    if chunk.fields.is_empty() {
        let ok = OkResponse {
            affected_rows: chunk.affected_rows,
            last_insert_id: chunk.last_insert_id,
            ..Default::default()
        };
        return results.completed(ok).await;
    }

    let columns: Vec<Column> = chunk
        .fields
        .iter()
        .map(|f| Column {
            table: String::new(),
            column: f.name.clone(),
            coltype: ColumnType::MYSQL_TYPE_VAR_STRING,
            colflags: ColumnFlags::empty(),
        })
        .collect();

    let mut writer = results.start(&columns).await?;
    for row in chunk.rows {
        for cell in row {
            match cell {
                Some(value) => writer.write_col(value)?,
                None => writer.write_col(None::<String>)?,
            }
        }
        writer.end_row().await?;
    }
    writer.finish().await
}

#[async_trait]
impl<W: AsyncWrite + Send + Unpin> AsyncMysqlShim<W> for MysqlSession {
    type Error = io::Error;

    async fn on_prepare<'a>(
        &'a mut self,
        _query: &'a str,
        info: StatementMetaWriter<'a, W>,
    ) -> io::Result<()> {
        info.error(
            ErrorKind::ER_NOT_SUPPORTED_YET,
            b"prepared statements are not supported",
        )
        .await
    }

    async fn on_execute<'a>(
        &'a mut self,
        _id: u32,
        _params: ParamParser<'a>,
        results: QueryResultWriter<'a, W>,
    ) -> io::Result<()> {
        results
            .error(
                ErrorKind::ER_NOT_SUPPORTED_YET,
                b"prepared statements are not supported",
            )
            .await
    }

    async fn on_close(&mut self, _stmt: u32) {}

    async fn on_init<'a>(
        &'a mut self,
        database: &'a str,
        writer: InitWriter<'a, W>,
    ) -> io::Result<()> {
        let outcome =
            tokio::task::block_in_place(|| self.shim.com_init_db(&self.session, database));
        match outcome {
            Ok(()) => writer.ok().await,
            Err(e) => writer.error(error_kind(&e), e.to_string().as_bytes()).await,
        }
    }

    async fn on_query<'a>(
        &'a mut self,
        sql: &'a str,
        results: QueryResultWriter<'a, W>,
    ) -> io::Result<()> {
        debug!(sql, "client query");
        let mut chunks: Vec<ResultChunk> = Vec::new();
        let outcome = tokio::task::block_in_place(|| {
            let mut spool = |chunk: Option<ResultChunk>, _more: bool| -> tealdb_core::Result<()> {
                if let Some(chunk) = chunk {
                    chunks.push(chunk);
                }
                Ok(())
            };
            self.shim.com_query(&self.session, sql, &mut spool)
        });
        match outcome {
            Ok(()) => write_chunks(results, chunks).await,
            Err(e) => {
                results
                    .error(error_kind(&e), e.to_string().as_bytes())
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::Arc;
    use tealdb_core::{ConnectionPool, EngineDsn, SystemVariables};
    use tempfile::TempDir;

    /// A relay source standing in for a wire framework that carries the
    /// client byte stream in-band.
    struct StaticInfile(Vec<u8>);

    impl LocalInfileSource for StaticInfile {
        fn open(&self, _file: &str) -> tealdb_core::Result<Box<dyn Read + Send>> {
            Ok(Box::new(Cursor::new(self.0.clone())))
        }
    }

    struct Fixture {
        shim: HandlerShim<DuckHandler>,
        session: SessionContext,
        vars: Arc<SystemVariables>,
        data_dir: TempDir,
    }

    fn fixture_with_infile(infile: Box<dyn LocalInfileSource>) -> Fixture {
        let pool = Arc::new(ConnectionPool::open(&EngineDsn::in_memory()).unwrap());
        let session = SessionContext::new(pool.clone(), 1);
        let vars = Arc::new(SystemVariables::new());
        let data_dir = tempfile::tempdir().unwrap();
        let handler = DuckHandler::new(
            Catalog::new(pool.catalog()),
            vars.clone(),
            DataDir::new(data_dir.path()),
            infile,
        );
        Fixture {
            shim: HandlerShim::new(handler, pool),
            session,
            vars,
            data_dir,
        }
    }

    fn shim_fixture() -> Fixture {
        fixture_with_infile(Box::new(PathLocalInfile))
    }

    fn run_query(
        shim: &mut HandlerShim<DuckHandler>,
        session: &SessionContext,
        query: &str,
    ) -> tealdb_core::Result<Vec<ResultChunk>> {
        let mut chunks = Vec::new();
        let mut spool = |chunk: Option<ResultChunk>, _more: bool| -> tealdb_core::Result<()> {
            if let Some(chunk) = chunk {
                chunks.push(chunk);
            }
            Ok(())
        };
        shim.com_query(session, query, &mut spool)?;
        Ok(chunks)
    }

    #[test]
    fn show_slave_status_answers_with_legacy_field_names() {
        let mut fixture = shim_fixture();
        let (shim, session) = (&mut fixture.shim, &fixture.session);
        let chunks = run_query(shim, session, "show slave status;").unwrap();
        assert_eq!(chunks.len(), 1);

        let names: Vec<&str> = chunks[0].fields.iter().map(|f| f.name.as_str()).collect();
        assert!(names.contains(&"Slave_IO_Running"));
        assert!(names.contains(&"Master_Host"));
        assert!(names
            .iter()
            .all(|n| !n.starts_with("Replica_") && !n.contains("Source")));
        assert!(chunks[0].rows.is_empty());
    }

    #[test]
    fn auto_increment_noise_is_stripped_before_the_engine() {
        let mut fixture = shim_fixture();
        let (shim, session) = (&mut fixture.shim, &fixture.session);
        run_query(
            shim,
            session,
            "CREATE TABLE dumped (id INTEGER) AUTO_INCREMENT=1000",
        )
        .unwrap();

        let chunks = run_query(shim, session, "SELECT count(*) FROM dumped").unwrap();
        assert_eq!(chunks[0].rows[0][0].as_deref(), Some("0"));
    }

    #[test]
    fn use_statement_switches_the_pinned_connection() {
        let mut fixture = shim_fixture();
        let (shim, session) = (&mut fixture.shim, &fixture.session);
        session.exec_batch("CREATE SCHEMA sales").unwrap();
        run_query(shim, session, "USE sales").unwrap();
        let chunks = run_query(shim, session, "SELECT current_schema()").unwrap();
        assert_eq!(chunks[0].rows[0][0].as_deref(), Some("sales"));

        let err = run_query(shim, session, "USE nosuch").unwrap_err();
        assert!(matches!(err, FrontendError::DatabaseNotFound(_)));
        let chunks = run_query(shim, session, "SELECT current_schema()").unwrap();
        assert_eq!(chunks[0].rows[0][0].as_deref(), Some("sales"));
    }

    #[test]
    fn local_load_streams_client_bytes_through_the_fifo() {
        let mut fixture =
            fixture_with_infile(Box::new(StaticInfile(b"1,a\n2,b\n3,c\n4,d\n".to_vec())));
        fixture.vars.set_local_infile(1);
        let (shim, session) = (&mut fixture.shim, &fixture.session);
        session
            .exec_batch("CREATE TABLE t (a BIGINT, b VARCHAR)")
            .unwrap();

        let chunks = run_query(
            shim,
            session,
            "LOAD DATA LOCAL INFILE 'client.csv' INTO TABLE t FIELDS TERMINATED BY ','",
        )
        .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].affected_rows, 4);
        assert!(chunks[0].fields.is_empty());

        let count = run_query(shim, session, "SELECT count(*) FROM t").unwrap();
        assert_eq!(count[0].rows[0][0].as_deref(), Some("4"));

        // The per-connection FIFO is gone once the load completes.
        let pipe_dir = fixture.data_dir.path().join("pipes").join("load-data");
        let leftovers: Vec<_> = std::fs::read_dir(&pipe_dir).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn local_load_is_refused_while_local_infile_is_off() {
        let mut fixture =
            fixture_with_infile(Box::new(StaticInfile(b"1,a\n".to_vec())));
        let (shim, session) = (&mut fixture.shim, &fixture.session);
        session
            .exec_batch("CREATE TABLE t (a BIGINT, b VARCHAR)")
            .unwrap();

        let err = run_query(
            shim,
            session,
            "LOAD DATA LOCAL INFILE 'client.csv' INTO TABLE t FIELDS TERMINATED BY ','",
        )
        .unwrap_err();
        assert!(matches!(err, FrontendError::LocalInfileDisabled));
        assert_eq!(error_kind(&err), ErrorKind::ER_OPTION_PREVENTS_STATEMENT);

        // No FIFO directory is created for a refused load.
        assert!(!fixture.data_dir.path().join("pipes").exists());
        let count = run_query(shim, session, "SELECT count(*) FROM t").unwrap();
        assert_eq!(count[0].rows[0][0].as_deref(), Some("0"));
    }

    #[test]
    fn load_data_statement_is_recognised() {
        let statement = parse_load_data(
            "LOAD DATA INFILE '/var/lib/dump.csv' IGNORE INTO TABLE sales.orders \
             FIELDS TERMINATED BY ',' ENCLOSED BY '\"' LINES TERMINATED BY '\\n' \
             IGNORE 1 LINES (id, note)",
        )
        .unwrap();
        assert!(!statement.local);
        assert_eq!(statement.file, "/var/lib/dump.csv");
        assert_eq!(statement.schema, "sales");
        assert_eq!(statement.table, "orders");
        assert_eq!(statement.duplicates, DuplicateHandling::Ignore);
        assert_eq!(statement.fields_terminated_by, ",");
        assert_eq!(statement.fields_enclosed_by, "\"");
        assert_eq!(statement.lines_terminated_by, "\n");
        assert_eq!(statement.ignore_rows, 1);
        assert_eq!(statement.columns, vec!["id", "note"]);
    }

    #[test]
    fn local_variant_and_escapes_parse() {
        let statement = parse_load_data(
            "load data local infile 'x.csv' into table t fields terminated by '\\t'",
        )
        .unwrap();
        assert!(statement.local);
        assert_eq!(statement.schema, "");
        assert_eq!(statement.table, "t");
        assert_eq!(statement.fields_terminated_by, "\t");
    }

    #[test]
    fn non_load_statements_are_ignored() {
        assert!(parse_load_data("SELECT 1").is_none());
        assert!(parse_load_data("INSERT INTO t VALUES (1)").is_none());
    }

    #[test]
    fn use_statement_parses_quoted_identifiers() {
        assert_eq!(parse_use("USE sales").unwrap(), "sales");
        assert_eq!(parse_use("use `sales`").unwrap(), "sales");
        assert!(parse_use("USELESS").is_none());
        assert!(parse_use("SELECT 1").is_none());
    }

    #[test]
    fn result_set_statements_are_classified() {
        assert!(returns_result_set("SELECT 1"));
        assert!(returns_result_set("show replica status"));
        assert!(returns_result_set("WITH x AS (SELECT 1) SELECT * FROM x"));
        assert!(!returns_result_set("INSERT INTO t VALUES (1)"));
        assert!(!returns_result_set("CREATE TABLE t (v INTEGER)"));
    }
}
