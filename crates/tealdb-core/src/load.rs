use std::fs;
use std::io::{self, Read};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use tracing::{debug, warn};

use crate::catalog::{join, quote};
use crate::config::{DataDir, SystemVariables};
use crate::error::{FrontendError, Result};
use crate::replication::ColumnDef;
use crate::session::SessionContext;

/// Conflict handling requested by the bulk-load statement
/// (`LOAD DATA [IGNORE|REPLACE]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateHandling {
    #[default]
    Error,
    Ignore,
    Replace,
}

/// A bulk-load statement (MySQL `LOAD DATA` or the file-backed subset of
/// PostgreSQL `COPY`), reduced to the options that matter for translation.
#[derive(Debug, Clone)]
pub struct BulkLoad {
    pub schema: String,
    pub table: String,
    /// Explicit column list; empty means all table columns in order.
    pub columns: Vec<String>,
    pub local: bool,
    pub file: String,
    pub duplicates: DuplicateHandling,
    pub fields_terminated_by: String,
    pub fields_enclosed_by: String,
    pub fields_escaped_by: String,
    pub lines_starting_by: String,
    pub lines_terminated_by: String,
    pub ignore_rows: u64,
    pub charset: String,
    pub has_set_exprs: bool,
    pub has_user_vars: bool,
}

impl BulkLoad {
    /// A statement with MySQL's documented clause defaults.
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        BulkLoad {
            schema: schema.into(),
            table: table.into(),
            columns: Vec::new(),
            local: false,
            file: String::new(),
            duplicates: DuplicateHandling::Error,
            fields_terminated_by: "\t".to_string(),
            fields_enclosed_by: String::new(),
            fields_escaped_by: "\\".to_string(),
            lines_starting_by: String::new(),
            lines_terminated_by: "\n".to_string(),
            ignore_rows: 0,
            charset: String::new(),
            has_set_exprs: false,
            has_user_vars: false,
        }
    }
}

/// The table the load inserts into, with enough type information to build
/// `read_csv` column hints and to suppress conflict clauses for keyless
/// tables.
#[derive(Debug, Clone)]
pub struct TargetTable {
    pub schema: String,
    pub table: String,
    pub columns: Vec<ColumnDef>,
}

impl TargetTable {
    pub fn keyless(&self) -> bool {
        !self.columns.iter().any(|c| c.primary_key)
    }
}

/// Counters for the client-visible OK packet. The engine driver reports no
/// insert id, so it is always 0 here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadResult {
    pub rows_affected: u64,
    pub last_insert_id: u64,
}

/// Reject any statement whose options the CSV translation cannot express.
/// Every branch names the offending option so the client sees a clear
/// "unsupported option" error rather than silently misread data.
pub fn ensure_rewritable(load: &BulkLoad) -> Result<()> {
    if load.fields_terminated_by.chars().count() != 1 {
        return Err(FrontendError::UnsupportedLoadOption(
            "FIELDS TERMINATED BY must be exactly one character".to_string(),
        ));
    }
    if load.fields_enclosed_by.chars().count() > 1 {
        return Err(FrontendError::UnsupportedLoadOption(
            "FIELDS ENCLOSED BY must be at most one character".to_string(),
        ));
    }
    if load.fields_escaped_by.chars().count() > 1 {
        return Err(FrontendError::UnsupportedLoadOption(
            "FIELDS ESCAPED BY must be at most one character".to_string(),
        ));
    }
    if !load.lines_starting_by.is_empty() {
        return Err(FrontendError::UnsupportedLoadOption(
            "LINES STARTING BY is not supported".to_string(),
        ));
    }
    if load.lines_terminated_by.chars().count() > 2
        || load
            .lines_terminated_by
            .chars()
            .any(|c| c != '\r' && c != '\n')
    {
        return Err(FrontendError::UnsupportedLoadOption(
            "LINES TERMINATED BY must be at most two characters, each \\r or \\n".to_string(),
        ));
    }
    if load.has_set_exprs {
        return Err(FrontendError::UnsupportedLoadOption(
            "SET expressions are not supported".to_string(),
        ));
    }
    if load.has_user_vars {
        return Err(FrontendError::UnsupportedLoadOption(
            "user variables are not supported".to_string(),
        ));
    }
    if !is_supported_charset(&load.charset) {
        return Err(FrontendError::UnsupportedLoadOption(format!(
            "character set '{}' is not supported",
            load.charset
        )));
    }
    Ok(())
}

fn is_supported_charset(charset: &str) -> bool {
    charset.is_empty()
        || charset.to_lowercase().starts_with("utf8")
        || charset.eq_ignore_ascii_case("ascii")
        || charset.eq_ignore_ascii_case("binary")
}

/// An explicit column list must mirror the table schema column-for-column.
pub fn validate_column_list(target: &TargetTable, columns: &[String]) -> Result<()> {
    if columns.is_empty() {
        return Ok(());
    }
    if columns.len() != target.columns.len()
        || columns
            .iter()
            .zip(&target.columns)
            .any(|(name, col)| name.trim_matches('"') != col.name)
    {
        return Err(FrontendError::UnsupportedLoadOption(format!(
            "invalid column name list for table {}: {:?}",
            target.table, columns
        )));
    }
    Ok(())
}

/// Server-side path: the file must live under the secure-file-priv sandbox
/// when one is configured. Passes when the parent directory is the sandbox
/// itself (same-file check) or when the absolute path is a descendant.
pub fn check_secure_file_dir(secure_dir: Option<&Path>, file: &str) -> Result<()> {
    let Some(dir) = secure_dir else {
        return Ok(());
    };
    if dir.as_os_str().is_empty() {
        return Ok(());
    }
    let dir_meta = fs::metadata(dir)?;
    let parent = Path::new(file).parent().unwrap_or_else(|| Path::new("."));
    if let Ok(parent_meta) = fs::metadata(parent) {
        if dir_meta.dev() == parent_meta.dev() && dir_meta.ino() == parent_meta.ino() {
            return Ok(());
        }
    }
    let file_abs = std::path::absolute(file)?;
    let dir_abs = std::path::absolute(dir)?;
    if file_abs.starts_with(&dir_abs) {
        return Ok(());
    }
    Err(FrontendError::SecureFilePriv(file.to_string()))
}

fn quote_sql_string(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Render a zero-or-one character clause value as an engine string literal.
/// The engine understands C-style escapes for the control characters MySQL
/// clauses commonly carry.
fn single_quoted_char(s: &str) -> String {
    let Some(c) = s.chars().next() else {
        return "''".to_string();
    };
    match c {
        '\\' => r"'\'".to_string(),
        '\t' => r"'\t'".to_string(),
        '\n' => r"'\n'".to_string(),
        '\r' => r"'\r'".to_string(),
        '\'' => "''''".to_string(),
        c => format!("'{c}'"),
    }
}

/// `{'col': 'TYPE', …}` hints so the engine's reader needs no sniffing pass
/// (the FIFO can only be read once).
fn column_type_hints(load: &BulkLoad, target: &TargetTable) -> Result<String> {
    let hinted: Vec<(&str, String)> = if load.columns.is_empty() {
        target
            .columns
            .iter()
            .map(|c| (c.name.as_str(), c.kind.engine_type()))
            .collect()
    } else {
        load.columns
            .iter()
            .map(|name| {
                target
                    .columns
                    .iter()
                    .find(|c| c.name.eq_ignore_ascii_case(name))
                    .map(|c| (name.as_str(), c.kind.engine_type()))
                    .ok_or_else(|| {
                        FrontendError::Protocol(format!(
                            "unknown column {name} in load column list for table {}",
                            target.table
                        ))
                    })
            })
            .collect::<Result<_>>()?
    };

    let mut out = String::from("{");
    for (i, (name, ty)) in hinted.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&quote_sql_string(name));
        out.push_str(": ");
        out.push_str(&quote_sql_string(ty));
    }
    out.push('}');
    Ok(out)
}

/// Build the engine statement that pulls the CSV byte stream at `path` into
/// the target table.
pub fn build_statement(load: &BulkLoad, target: &TargetTable, path: &str) -> Result<String> {
    ensure_rewritable(load)?;

    let mut b = String::with_capacity(256);
    b.push_str("INSERT");
    let keyless = target.keyless();
    match load.duplicates {
        DuplicateHandling::Ignore if !keyless => b.push_str(" OR IGNORE"),
        DuplicateHandling::Replace if !keyless => b.push_str(" OR REPLACE"),
        _ => {}
    }
    b.push_str(" INTO ");
    b.push_str(&join(&[&load.schema, &load.table]));

    if !load.columns.is_empty() {
        b.push_str(" (");
        for (i, col) in load.columns.iter().enumerate() {
            if i > 0 {
                b.push_str(", ");
            }
            b.push_str(&quote(col));
        }
        b.push(')');
    }

    b.push_str(" FROM read_csv(");
    b.push_str(&quote_sql_string(path));
    b.push_str(", auto_detect = false");
    b.push_str(", header = false");
    b.push_str(", null_padding = true");

    b.push_str(", new_line = ");
    if load.lines_terminated_by.chars().count() == 1 {
        b.push_str(&single_quoted_char(&load.lines_terminated_by));
    } else {
        b.push_str(r"'\r\n'");
    }

    b.push_str(", sep = ");
    b.push_str(&single_quoted_char(&load.fields_terminated_by));

    b.push_str(", quote = ");
    b.push_str(&single_quoted_char(&load.fields_enclosed_by));

    // The engine's reader has no equivalent of MySQL's `\` escape mode;
    // an empty escape is the closest translation it accepts.
    b.push_str(", escape = ");
    if load.fields_escaped_by == "\\" {
        b.push_str("''");
    } else {
        b.push_str(&single_quoted_char(&load.fields_escaped_by));
    }

    // If FIELDS ENCLOSED BY is not empty, a field containing the literal
    // word NULL is read as a NULL value. If FIELDS ESCAPED BY is empty,
    // NULL is written as the word NULL.
    b.push_str(", allow_quoted_nulls = false, nullstr = ");
    if !load.fields_enclosed_by.is_empty() || load.fields_escaped_by.is_empty() {
        b.push_str("'NULL'");
    } else {
        b.push_str(r"'\N'");
    }

    if load.ignore_rows > 0 {
        b.push_str(", skip = ");
        b.push_str(&load.ignore_rows.to_string());
    }

    b.push_str(", columns = ");
    b.push_str(&column_type_hints(load, target)?);
    b.push(')');

    Ok(b)
}

/// A FIFO created for one client-side load. The file is unlinked on every
/// exit path, including engine failures before the reader end was opened.
#[derive(Debug)]
pub struct FifoJob {
    path: PathBuf,
}

impl FifoJob {
    pub fn create(dirs: &DataDir, connection_id: u32) -> Result<Self> {
        let pipe_dir = dirs.load_pipe_dir();
        fs::create_dir_all(&pipe_dir)?;
        let path = pipe_dir.join(connection_id.to_string());
        mkfifo(&path, Mode::S_IRUSR | Mode::S_IWUSR).map_err(io::Error::from)?;
        Ok(FifoJob { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Detach a worker that copies the client byte stream into the pipe.
    /// Worker failures are logged, never propagated: the engine observes
    /// EOF or partial data and fails the statement, which is the
    /// authoritative error path.
    pub fn spawn_writer(&self, mut reader: Box<dyn Read + Send>) {
        let path = self.path.clone();
        std::thread::spawn(move || {
            let mut pipe = match fs::OpenOptions::new().write(true).open(&path) {
                Ok(pipe) => pipe,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to open load pipe for writing");
                    return;
                }
            };
            if let Err(e) = io::copy(&mut reader, &mut pipe) {
                warn!(path = %path.display(), error = %e, "failed to stream load data into pipe");
            }
        });
    }
}

impl Drop for FifoJob {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to unlink load pipe");
            }
        }
    }
}

/// Server-side load: the data already lives on the server filesystem,
/// subject to the secure-file-priv sandbox.
pub fn execute_server_side(
    session: &SessionContext,
    vars: &SystemVariables,
    load: &BulkLoad,
    target: &TargetTable,
) -> Result<LoadResult> {
    ensure_rewritable(load)?;
    let secure = vars.secure_file_priv();
    check_secure_file_dir(secure.as_deref(), &load.file)?;
    execute_with_path(session, load, target, &load.file)
}

/// Client-side load: bytes stream from the wire through a FIFO that the
/// engine's CSV reader pulls directly.
pub fn execute_client_side(
    session: &SessionContext,
    vars: &SystemVariables,
    dirs: &DataDir,
    load: &BulkLoad,
    target: &TargetTable,
    reader: Box<dyn Read + Send>,
) -> Result<LoadResult> {
    ensure_rewritable(load)?;
    if !vars.local_infile() {
        return Err(FrontendError::LocalInfileDisabled);
    }

    let job = FifoJob::create(dirs, session.connection_id())?;
    job.spawn_writer(reader);

    let path = job.path().to_string_lossy().into_owned();
    let result = execute_with_path(session, load, target, &path);
    drop(job);
    result
}

fn execute_with_path(
    session: &SessionContext,
    load: &BulkLoad,
    target: &TargetTable,
    path: &str,
) -> Result<LoadResult> {
    validate_column_list(target, &load.columns)?;
    let sql = build_statement(load, target, path)?;
    debug!(sql = %sql, "executing bulk load");
    let affected = session.exec(&sql)?;
    Ok(LoadResult {
        rows_affected: affected as u64,
        last_insert_id: 0,
    })
}
