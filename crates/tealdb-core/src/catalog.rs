use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{self, FrontendError, Result};
use crate::load::TargetTable;
use crate::replication::{ColumnDef, ColumnKind};
use crate::session::SessionContext;

/// ANSI-quote an identifier, doubling embedded quotes.
pub fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Dot-join a list of identifiers, quoting each part.
pub fn join(parts: &[&str]) -> String {
    parts.iter().map(|p| quote(p)).collect::<Vec<_>>().join(".")
}

pub fn full_schema_name(catalog: &str, schema: &str) -> String {
    if catalog.is_empty() {
        return quote(schema);
    }
    if schema.is_empty() {
        return quote(catalog);
    }
    format!("{}.{}", quote(catalog), quote(schema))
}

pub fn full_table_name(catalog: &str, schema: &str, table: &str) -> String {
    format!("{}.{}", full_schema_name(catalog, schema), quote(table))
}

pub fn full_column_name(catalog: &str, schema: &str, table: &str, column: &str) -> String {
    format!("{}.{}", full_table_name(catalog, schema, table), quote(column))
}

/// Index names are stored in the engine as `table$$index` for better
/// visibility when debugging against the engine's own catalog views.
pub fn encode_index_name(table: &str, index: &str) -> String {
    format!("{table}$${index}")
}

/// Inverse of [`encode_index_name`]. A name without the separator is the
/// index name itself, with an empty table part.
pub fn decode_index_name(encoded: &str) -> (String, String) {
    match encoded.split_once("$$") {
        Some((table, index)) => (table.to_string(), index.to_string()),
        None => (String::new(), encoded.to_string()),
    }
}

/// A structured comment stored in the engine's comment field: the
/// user-supplied text plus optional type metadata that must survive a round
/// trip through the engine catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment<T> {
    pub text: String,
    #[serde(default = "Option::default", skip_serializing_if = "Option::is_none")]
    pub meta: Option<T>,
}

impl<T: Serialize + DeserializeOwned> Comment<T> {
    pub fn new(text: impl Into<String>) -> Self {
        Comment {
            text: text.into(),
            meta: None,
        }
    }

    pub fn with_meta(text: impl Into<String>, meta: T) -> Self {
        Comment {
            text: text.into(),
            meta: Some(meta),
        }
    }

    /// Wire form: base64 of the JSON encoding, safe to embed in a quoted
    /// SQL string literal.
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        BASE64.encode(json)
    }

    /// Tolerant decoder: anything that is not a valid encoded comment is
    /// treated as plain text with no metadata.
    pub fn decode(encoded: &str) -> Self {
        if let Ok(raw) = BASE64.decode(encoded) {
            if let Ok(comment) = serde_json::from_slice::<Comment<T>>(&raw) {
                return comment;
            }
        }
        Comment {
            text: encoded.to_string(),
            meta: None,
        }
    }
}

/// Engine-side type descriptor carried in column comments so that the
/// MySQL-visible type can be reconstructed from the engine catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeMeta {
    pub mysql_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TableInfo {
    pub name: String,
    pub comment: Comment<TypeMeta>,
}

/// Catalog operations against one engine catalog (the outermost namespace).
/// All calls go through the session adapter; the catalog holds no driver
/// state of its own.
#[derive(Debug, Clone)]
pub struct Catalog {
    name: String,
}

impl Catalog {
    pub fn new(name: impl Into<String>) -> Self {
        Catalog { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn create_schema(&self, session: &SessionContext, schema: &str) -> Result<()> {
        session.exec(&format!("CREATE SCHEMA {}", quote(schema)))?;
        Ok(())
    }

    pub fn drop_schema(&self, session: &SessionContext, schema: &str) -> Result<()> {
        session.exec(&format!("DROP SCHEMA {} CASCADE", quote(schema)))?;
        Ok(())
    }

    pub fn schema_exists(&self, session: &SessionContext, schema: &str) -> Result<bool> {
        let rows = session.query_strings(
            "SELECT schema_name FROM information_schema.schemata \
             WHERE catalog_name = ? AND schema_name = ?",
            &[&self.name, &schema.to_string()],
        )?;
        Ok(!rows.is_empty())
    }

    /// Schemas of this catalog, hiding the engine's internal namespaces.
    pub fn list_schemas(&self, session: &SessionContext) -> Result<Vec<String>> {
        let rows = session.query_strings(
            "SELECT DISTINCT schema_name FROM information_schema.schemata \
             WHERE catalog_name = ? ORDER BY schema_name",
            &[&self.name],
        )?;
        Ok(rows
            .into_iter()
            .filter_map(|mut r| r.remove(0))
            .filter(|s| !matches!(s.as_str(), "information_schema" | "main" | "pg_catalog"))
            .collect())
    }

    /// Tables of a schema matching an `ILIKE` pattern, with their decoded
    /// structured comments.
    pub fn list_tables(
        &self,
        session: &SessionContext,
        schema: &str,
        pattern: &str,
    ) -> Result<Vec<TableInfo>> {
        let rows = session.query_strings(
            "SELECT DISTINCT table_name, comment FROM duckdb_tables() \
             WHERE database_name = ? AND schema_name = ? AND table_name ILIKE ?",
            &[&self.name, &schema.to_string(), &pattern.to_string()],
        )?;
        Ok(rows
            .into_iter()
            .map(|mut r| {
                let comment = r.pop().flatten().unwrap_or_default();
                let name = r.pop().flatten().unwrap_or_default();
                TableInfo {
                    name,
                    comment: Comment::decode(&comment),
                }
            })
            .collect())
    }

    pub fn drop_table(&self, session: &SessionContext, schema: &str, table: &str) -> Result<()> {
        let sql = format!(
            "DROP TABLE {}",
            full_table_name(&self.name, schema, table)
        );
        session.with_connection(|conn| match conn.execute_batch(&sql) {
            Ok(()) => Ok(()),
            Err(e) if error::is_table_not_found(&e) => {
                Err(FrontendError::TableNotFound(table.to_string()))
            }
            Err(e) => Err(e.into()),
        })
    }

    /// Views are created in the schema's namespace; the `USE` rides on the
    /// session's pinned connection, as every other statement does.
    pub fn create_view(
        &self,
        session: &SessionContext,
        schema: &str,
        name: &str,
        select: &str,
    ) -> Result<()> {
        session.exec_batch(&format!(
            "USE {}; CREATE VIEW {} AS {}",
            full_schema_name(&self.name, schema),
            quote(name),
            select
        ))
    }

    pub fn drop_view(&self, session: &SessionContext, schema: &str, name: &str) -> Result<()> {
        let sql = format!(
            "USE {}; DROP VIEW {}",
            full_schema_name(&self.name, schema),
            quote(name)
        );
        session.with_connection(|conn| match conn.execute_batch(&sql) {
            Ok(()) => Ok(()),
            Err(e) if error::is_view_not_found(&e) => {
                Err(FrontendError::ViewNotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        })
    }

    pub fn rename_table(
        &self,
        session: &SessionContext,
        schema: &str,
        old: &str,
        new: &str,
    ) -> Result<()> {
        let sql = format!(
            "ALTER TABLE {} RENAME TO {}",
            full_table_name(&self.name, schema, old),
            quote(new)
        );
        session.with_connection(|conn| match conn.execute_batch(&sql) {
            Ok(()) => Ok(()),
            Err(e) if error::is_table_not_found(&e) => {
                Err(FrontendError::TableNotFound(old.to_string()))
            }
            Err(e) if error::is_table_already_exists(&e) => {
                Err(FrontendError::TableAlreadyExists(new.to_string()))
            }
            Err(e) => Err(e.into()),
        })
    }

    /// Column definitions and primary-key membership for one table, read
    /// from the engine's information schema and constraint catalog.
    pub fn table_definition(
        &self,
        session: &SessionContext,
        schema: &str,
        table: &str,
    ) -> Result<TargetTable> {
        let rows = session.query_strings(
            "SELECT column_name, data_type, is_nullable FROM information_schema.columns \
             WHERE table_catalog = ? AND table_schema = ? AND table_name = ? \
             ORDER BY ordinal_position",
            &[&self.name, &schema.to_string(), &table.to_string()],
        )?;
        if rows.is_empty() {
            return Err(FrontendError::TableNotFound(table.to_string()));
        }

        let pk = self.primary_key_columns(session, schema, table)?;
        let columns = rows
            .into_iter()
            .map(|row| {
                let name = row[0].clone().unwrap_or_default();
                let kind = parse_engine_type(row[1].as_deref().unwrap_or(""));
                let nullable = row[2].as_deref() == Some("YES");
                let primary_key = pk.iter().any(|p| p.eq_ignore_ascii_case(&name));
                ColumnDef {
                    name,
                    kind,
                    nullable,
                    primary_key,
                }
            })
            .collect();

        Ok(TargetTable {
            schema: schema.to_string(),
            table: table.to_string(),
            columns,
        })
    }

    fn primary_key_columns(
        &self,
        session: &SessionContext,
        schema: &str,
        table: &str,
    ) -> Result<Vec<String>> {
        let rows = session.query_strings(
            "SELECT unnest(constraint_column_names) FROM duckdb_constraints() \
             WHERE database_name = ? AND schema_name = ? AND table_name = ? \
             AND constraint_type = 'PRIMARY KEY'",
            &[&self.name, &schema.to_string(), &table.to_string()],
        )?;
        Ok(rows.into_iter().filter_map(|mut r| r.remove(0)).collect())
    }
}

/// Map an engine type name (as reported by `information_schema.columns`)
/// onto the replication column model. Unrecognised types degrade to text,
/// which the CSV reader and the appender both accept.
pub fn parse_engine_type(name: &str) -> ColumnKind {
    let upper = name.trim().to_ascii_uppercase();
    if let Some(args) = upper
        .strip_prefix("DECIMAL(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        let mut parts = args.splitn(2, ',');
        let precision = parts
            .next()
            .and_then(|p| p.trim().parse::<u8>().ok())
            .unwrap_or(18);
        let scale = parts
            .next()
            .and_then(|s| s.trim().parse::<i8>().ok())
            .unwrap_or(3);
        return ColumnKind::Decimal { precision, scale };
    }
    match upper.as_str() {
        "TINYINT" => ColumnKind::Int8,
        "SMALLINT" => ColumnKind::Int16,
        "INTEGER" | "INT" => ColumnKind::Int32,
        "BIGINT" => ColumnKind::Int64,
        "UTINYINT" => ColumnKind::UInt8,
        "USMALLINT" => ColumnKind::UInt16,
        "UINTEGER" => ColumnKind::UInt32,
        "UBIGINT" => ColumnKind::UInt64,
        "FLOAT" | "REAL" => ColumnKind::Float32,
        "DOUBLE" => ColumnKind::Float64,
        "BLOB" => ColumnKind::Binary,
        "DATE" => ColumnKind::Date,
        "TIME" => ColumnKind::Time,
        "TIMESTAMP" | "DATETIME" | "TIMESTAMP WITH TIME ZONE" => {
            ColumnKind::Timestamp(arrow_schema::TimeUnit::Microsecond)
        }
        _ => ColumnKind::Text,
    }
}
