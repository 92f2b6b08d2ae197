use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrontendError {
    #[error("database not found: {0}")]
    DatabaseNotFound(String),
    #[error("table not found: {0}")]
    TableNotFound(String),
    #[error("table already exists: {0}")]
    TableAlreadyExists(String),
    #[error("view not found: {0}")]
    ViewNotFound(String),
    #[error("path is not allowed by secure_file_priv: {0}")]
    SecureFilePriv(String),
    #[error("local_infile needs to be set to 1 to use LOAD DATA LOCAL")]
    LocalInfileDisabled,
    #[error("unsupported load option: {0}")]
    UnsupportedLoadOption(String),
    #[error("engine: {0}")]
    Engine(String),
    #[error("arrow: {0}")]
    Arrow(String),
    #[error("protocol: {0}")]
    Protocol(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FrontendError>;

impl From<duckdb::Error> for FrontendError {
    fn from(e: duckdb::Error) -> Self {
        FrontendError::Engine(e.to_string())
    }
}

impl From<arrow_schema::ArrowError> for FrontendError {
    fn from(e: arrow_schema::ArrowError) -> Self {
        FrontendError::Arrow(e.to_string())
    }
}

/// The engine reports catalog misses only through its message text, so the
/// classification below is string matching on the driver error, mirroring
/// the messages DuckDB produces for `USE`, `DROP TABLE` and `DROP VIEW`.
pub fn is_schema_not_found(e: &duckdb::Error) -> bool {
    let msg = e.to_string().to_lowercase();
    msg.contains("no catalog + schema named")
        || (msg.contains("schema") && msg.contains("not found"))
}

pub fn is_table_not_found(e: &duckdb::Error) -> bool {
    let msg = e.to_string().to_lowercase();
    msg.contains("table with name") && msg.contains("does not exist")
}

pub fn is_table_already_exists(e: &duckdb::Error) -> bool {
    let msg = e.to_string().to_lowercase();
    msg.contains("already exists")
}

pub fn is_view_not_found(e: &duckdb::Error) -> bool {
    let msg = e.to_string().to_lowercase();
    msg.contains("view with name") && msg.contains("does not exist")
}
