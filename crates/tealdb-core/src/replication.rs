use std::fmt;
use std::sync::Arc;

use arrow_schema::{DataType, Field, Schema, TimeUnit};
use chrono::{NaiveDate, NaiveDateTime};

use crate::error::{FrontendError, Result};

/// Row-level change classification.
///
/// The numeric order matters: UPDATE is translated into DELETE + INSERT, and
/// sorting buffered rows by action must place the deletes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i8)]
pub enum DeltaAction {
    Delete = 0,
    Update = 1,
    Insert = 2,
}

impl fmt::Display for DeltaAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeltaAction::Delete => "DELETE",
            DeltaAction::Update => "UPDATE",
            DeltaAction::Insert => "INSERT",
        };
        f.write_str(s)
    }
}

/// Coordinates of the source transaction a change event belongs to.
/// Domain/server/group identify the transaction stream; `seq` orders events
/// within one transaction group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxnPosition {
    pub domain: String,
    pub server: String,
    pub group: String,
    pub seq: u64,
}

/// Logical column type of a replicated table, independent of any wire
/// protocol. This is the vocabulary the appender converts into Arrow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnKind {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Decimal { precision: u8, scale: i8 },
    Text,
    Binary,
    Timestamp(TimeUnit),
    Date,
    Time,
}

impl ColumnKind {
    pub fn arrow_type(&self) -> DataType {
        match self {
            ColumnKind::Int8 => DataType::Int8,
            ColumnKind::Int16 => DataType::Int16,
            ColumnKind::Int32 => DataType::Int32,
            ColumnKind::Int64 => DataType::Int64,
            ColumnKind::UInt8 => DataType::UInt8,
            ColumnKind::UInt16 => DataType::UInt16,
            ColumnKind::UInt32 => DataType::UInt32,
            ColumnKind::UInt64 => DataType::UInt64,
            ColumnKind::Float32 => DataType::Float32,
            ColumnKind::Float64 => DataType::Float64,
            ColumnKind::Decimal { precision, scale } => DataType::Decimal128(*precision, *scale),
            ColumnKind::Text => DataType::Utf8,
            ColumnKind::Binary => DataType::Binary,
            ColumnKind::Timestamp(unit) => DataType::Timestamp(*unit, None),
            ColumnKind::Date => DataType::Date32,
            ColumnKind::Time => DataType::Duration(TimeUnit::Microsecond),
        }
    }

    /// The engine's type name, used for `read_csv` column hints.
    pub fn engine_type(&self) -> String {
        match self {
            ColumnKind::Int8 => "TINYINT".to_string(),
            ColumnKind::Int16 => "SMALLINT".to_string(),
            ColumnKind::Int32 => "INTEGER".to_string(),
            ColumnKind::Int64 => "BIGINT".to_string(),
            ColumnKind::UInt8 => "UTINYINT".to_string(),
            ColumnKind::UInt16 => "USMALLINT".to_string(),
            ColumnKind::UInt32 => "UINTEGER".to_string(),
            ColumnKind::UInt64 => "UBIGINT".to_string(),
            ColumnKind::Float32 => "FLOAT".to_string(),
            ColumnKind::Float64 => "DOUBLE".to_string(),
            ColumnKind::Decimal { precision, scale } => {
                format!("DECIMAL({precision},{scale})")
            }
            ColumnKind::Text => "VARCHAR".to_string(),
            ColumnKind::Binary => "BLOB".to_string(),
            ColumnKind::Timestamp(_) => "TIMESTAMP".to_string(),
            ColumnKind::Date => "DATE".to_string(),
            ColumnKind::Time => "TIME".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub kind: ColumnKind,
    pub nullable: bool,
    pub primary_key: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        ColumnDef {
            name: name.into(),
            kind,
            nullable: true,
            primary_key: false,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }
}

pub fn arrow_schema(columns: &[ColumnDef]) -> Arc<Schema> {
    let fields: Vec<Field> = columns
        .iter()
        .map(|c| Field::new(&c.name, c.kind.arrow_type(), c.nullable))
        .collect();
    Arc::new(Schema::new(fields))
}

/// A decoded replication value. Integers travel at full width and are
/// narrowed (checked) against the column type on append; everything else
/// matches a column kind directly or goes through the textual fallback.
#[derive(Debug, Clone, PartialEq)]
pub enum EventValue {
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Decimal(String),
    Timestamp(NaiveDateTime),
    Date(NaiveDate),
    /// MySQL TIME literal, e.g. `-838:59:59.000001`.
    Time(String),
}

/// Parse a MySQL TIME literal into signed microseconds.
pub fn parse_time_micros(literal: &str) -> Result<i64> {
    let (negative, body) = match literal.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, literal),
    };
    let mut parts = body.splitn(3, ':');
    let (h, m, rest) = match (parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(m), Some(s)) => (h, m, s),
        _ => {
            return Err(FrontendError::Protocol(format!(
                "malformed TIME literal: {literal}"
            )))
        }
    };
    let (s, frac) = match rest.split_once('.') {
        Some((s, frac)) => (s, frac),
        None => (rest, ""),
    };
    let parse_part = |part: &str| {
        part.parse::<i64>().map_err(|_| {
            FrontendError::Protocol(format!("malformed TIME literal: {literal}"))
        })
    };
    let hours = parse_part(h)?;
    let minutes = parse_part(m)?;
    let seconds = parse_part(s)?;
    let mut micros = (hours * 3600 + minutes * 60 + seconds) * 1_000_000;
    if !frac.is_empty() {
        let digits: String = frac.chars().take(6).collect();
        let scale = 10_i64.pow(6 - digits.len() as u32);
        micros += parse_part(&digits)? * scale;
    }
    Ok(if negative { -micros } else { micros })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_order_places_deletes_first() {
        let mut actions = vec![DeltaAction::Insert, DeltaAction::Delete, DeltaAction::Update];
        actions.sort();
        assert_eq!(
            actions,
            vec![DeltaAction::Delete, DeltaAction::Update, DeltaAction::Insert]
        );
        assert_eq!(DeltaAction::Delete as i8, 0);
        assert_eq!(DeltaAction::Update as i8, 1);
        assert_eq!(DeltaAction::Insert as i8, 2);
    }

    #[test]
    fn time_literal_parses_to_micros() {
        assert_eq!(parse_time_micros("00:00:01").unwrap(), 1_000_000);
        assert_eq!(parse_time_micros("01:02:03").unwrap(), 3_723_000_000);
        assert_eq!(parse_time_micros("00:00:00.5").unwrap(), 500_000);
        assert_eq!(parse_time_micros("-00:00:01.000001").unwrap(), -1_000_001);
        assert!(parse_time_micros("oops").is_err());
    }

    #[test]
    fn schema_maps_kinds_to_arrow() {
        let schema = arrow_schema(&[
            ColumnDef::new("id", ColumnKind::Int64).primary_key(),
            ColumnDef::new("name", ColumnKind::Text),
        ]);
        assert_eq!(schema.field(0).data_type(), &DataType::Int64);
        assert!(!schema.field(0).is_nullable());
        assert_eq!(schema.field(1).data_type(), &DataType::Utf8);
    }
}
