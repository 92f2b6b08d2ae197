use std::sync::Arc;

use arrow_array::builder::{
    ArrayBuilder, BinaryBuilder, BinaryDictionaryBuilder, Date32Builder, Decimal128Builder,
    DurationMicrosecondBuilder, Float32Builder, Float64Builder, Int16Builder, Int32Builder,
    Int64Builder, Int8Builder, StringBuilder, TimestampMicrosecondBuilder,
    TimestampMillisecondBuilder, TimestampNanosecondBuilder, TimestampSecondBuilder,
    UInt16Builder, UInt32Builder, UInt64Builder, UInt8Builder,
};
use arrow_array::types::Int16Type;
use arrow_array::{ArrayRef, RecordBatch};
use arrow_schema::{DataType, Field, Schema, TimeUnit};
use chrono::{NaiveDate, NaiveDateTime};

use crate::error::{FrontendError, Result};
use crate::replication::{parse_time_micros, ColumnDef, ColumnKind, DeltaAction, EventValue};

/// Names of the meta-columns prepended to every delta schema; the flush
/// statements exclude exactly this list.
pub const META_COLUMNS: [&str; 5] = ["action", "txn_domain", "txn_server", "txn_group", "txn_seq"];

/// Columnar buffer of change events for one table.
///
/// The logical schema is the five meta-columns followed by the table's user
/// schema. Appends are not thread-safe; each appender is driven by a single
/// replication worker, and concurrency is serialised above in the
/// controller.
pub struct DeltaAppender {
    base: Vec<ColumnDef>,
    schema: Arc<Schema>,
    action: Int8Builder,
    txn_domain: BinaryDictionaryBuilder<Int16Type>,
    txn_server: BinaryDictionaryBuilder<Int16Type>,
    txn_group: BinaryDictionaryBuilder<Int16Type>,
    txn_seq: UInt64Builder,
    fields: Vec<Box<dyn ArrayBuilder>>,
}

impl DeltaAppender {
    pub fn new(base: Vec<ColumnDef>) -> Result<Self> {
        let dict = DataType::Dictionary(Box::new(DataType::Int16), Box::new(DataType::Binary));
        let mut schema_fields = vec![
            Field::new("action", DataType::Int8, false),
            Field::new("txn_domain", dict.clone(), false),
            Field::new("txn_server", dict.clone(), false),
            Field::new("txn_group", dict, false),
            Field::new("txn_seq", DataType::UInt64, false),
        ];
        schema_fields.extend(
            base.iter()
                .map(|c| Field::new(&c.name, c.kind.arrow_type(), c.nullable)),
        );

        let fields = base
            .iter()
            .map(|c| make_builder(&c.kind))
            .collect::<Result<Vec<_>>>()?;

        Ok(DeltaAppender {
            schema: Arc::new(Schema::new(schema_fields)),
            base,
            action: Int8Builder::new(),
            txn_domain: BinaryDictionaryBuilder::new(),
            txn_server: BinaryDictionaryBuilder::new(),
            txn_group: BinaryDictionaryBuilder::new(),
            txn_seq: UInt64Builder::new(),
            fields,
        })
    }

    /// The user schema without meta-columns; the flusher discovers primary
    /// keys here.
    pub fn base_schema(&self) -> &[ColumnDef] {
        &self.base
    }

    /// Full schema including the meta-columns.
    pub fn schema(&self) -> Arc<Schema> {
        self.schema.clone()
    }

    /// The user-column builders only; the meta-columns are driven by
    /// [`append_row`].
    ///
    /// [`append_row`]: DeltaAppender::append_row
    pub fn fields(&mut self) -> &mut [Box<dyn ArrayBuilder>] {
        &mut self.fields
    }

    pub fn num_buffered(&self) -> usize {
        self.action.len()
    }

    /// Append one row under the given action, dictionary-encoding the
    /// transaction coordinates.
    pub fn append_row(
        &mut self,
        action: DeltaAction,
        txn: &crate::replication::TxnPosition,
        row: &[EventValue],
    ) -> Result<()> {
        if row.len() != self.base.len() {
            return Err(FrontendError::Protocol(format!(
                "delta row has {} values but the table schema has {} columns",
                row.len(),
                self.base.len()
            )));
        }
        self.action.append_value(action as i8);
        self.txn_domain
            .append(txn.domain.as_bytes())
            .map_err(FrontendError::from)?;
        self.txn_server
            .append(txn.server.as_bytes())
            .map_err(FrontendError::from)?;
        self.txn_group
            .append(txn.group.as_bytes())
            .map_err(FrontendError::from)?;
        self.txn_seq.append_value(txn.seq);

        for ((builder, col), value) in self.fields.iter_mut().zip(&self.base).zip(row) {
            append_value(builder.as_mut(), col, value)?;
        }
        Ok(())
    }

    /// An UPDATE event is two rows: the pre-image under the DELETE action
    /// and the post-image under the INSERT action.
    pub fn append_update(
        &mut self,
        txn: &crate::replication::TxnPosition,
        before: &[EventValue],
        after: &[EventValue],
    ) -> Result<()> {
        self.append_row(DeltaAction::Delete, txn, before)?;
        self.append_row(DeltaAction::Insert, txn, after)
    }

    /// Finalise the accumulated rows into an immutable record batch,
    /// resetting the internal builders.
    pub fn build(&mut self) -> Result<RecordBatch> {
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(5 + self.fields.len());
        arrays.push(Arc::new(self.action.finish()));
        arrays.push(Arc::new(self.txn_domain.finish()));
        arrays.push(Arc::new(self.txn_server.finish()));
        arrays.push(Arc::new(self.txn_group.finish()));
        arrays.push(Arc::new(self.txn_seq.finish()));
        for builder in &mut self.fields {
            arrays.push(builder.finish());
        }
        Ok(RecordBatch::try_new(self.schema.clone(), arrays)?)
    }
}

fn make_builder(kind: &ColumnKind) -> Result<Box<dyn ArrayBuilder>> {
    Ok(match kind {
        ColumnKind::Int8 => Box::new(Int8Builder::new()),
        ColumnKind::Int16 => Box::new(Int16Builder::new()),
        ColumnKind::Int32 => Box::new(Int32Builder::new()),
        ColumnKind::Int64 => Box::new(Int64Builder::new()),
        ColumnKind::UInt8 => Box::new(UInt8Builder::new()),
        ColumnKind::UInt16 => Box::new(UInt16Builder::new()),
        ColumnKind::UInt32 => Box::new(UInt32Builder::new()),
        ColumnKind::UInt64 => Box::new(UInt64Builder::new()),
        ColumnKind::Float32 => Box::new(Float32Builder::new()),
        ColumnKind::Float64 => Box::new(Float64Builder::new()),
        ColumnKind::Decimal { precision, scale } => Box::new(
            Decimal128Builder::new()
                .with_data_type(DataType::Decimal128(*precision, *scale)),
        ),
        ColumnKind::Text => Box::new(StringBuilder::new()),
        ColumnKind::Binary => Box::new(BinaryBuilder::new()),
        ColumnKind::Timestamp(TimeUnit::Second) => Box::new(TimestampSecondBuilder::new()),
        ColumnKind::Timestamp(TimeUnit::Millisecond) => {
            Box::new(TimestampMillisecondBuilder::new())
        }
        ColumnKind::Timestamp(TimeUnit::Microsecond) => {
            Box::new(TimestampMicrosecondBuilder::new())
        }
        ColumnKind::Timestamp(TimeUnit::Nanosecond) => Box::new(TimestampNanosecondBuilder::new()),
        ColumnKind::Date => Box::new(Date32Builder::new()),
        ColumnKind::Time => Box::new(DurationMicrosecondBuilder::new()),
    })
}

fn mismatch(col: &ColumnDef, value: &EventValue) -> FrontendError {
    FrontendError::Protocol(format!(
        "value {value:?} does not match column \"{}\" of type {:?}",
        col.name, col.kind
    ))
}

fn downcast<'a, B: ArrayBuilder>(
    builder: &'a mut dyn ArrayBuilder,
    col: &ColumnDef,
) -> Result<&'a mut B> {
    builder.as_any_mut().downcast_mut::<B>().ok_or_else(|| {
        FrontendError::Protocol(format!(
            "builder type mismatch for column \"{}\"",
            col.name
        ))
    })
}

fn to_i64(col: &ColumnDef, value: &EventValue) -> Result<i64> {
    match value {
        EventValue::Int(v) => Ok(*v),
        EventValue::UInt(v) => i64::try_from(*v).map_err(|_| mismatch(col, value)),
        EventValue::Text(s) => s.parse().map_err(|_| mismatch(col, value)),
        _ => Err(mismatch(col, value)),
    }
}

fn to_u64(col: &ColumnDef, value: &EventValue) -> Result<u64> {
    match value {
        EventValue::UInt(v) => Ok(*v),
        EventValue::Int(v) => u64::try_from(*v).map_err(|_| mismatch(col, value)),
        EventValue::Text(s) => s.parse().map_err(|_| mismatch(col, value)),
        _ => Err(mismatch(col, value)),
    }
}

fn to_f64(col: &ColumnDef, value: &EventValue) -> Result<f64> {
    match value {
        EventValue::Float(v) => Ok(*v),
        EventValue::Text(s) => s.parse().map_err(|_| mismatch(col, value)),
        _ => Err(mismatch(col, value)),
    }
}

/// Parse a canonical decimal string (optional sign, digits, optional
/// fraction) into the unscaled integer representation for the given scale.
pub fn parse_decimal(text: &str, scale: i8) -> Option<i128> {
    let text = text.trim();
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (int_part, frac_part) = match body.split_once('.') {
        Some((i, f)) => (i, f),
        None => (body, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.chars().all(|c| c.is_ascii_digit())
        || !frac_part.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }
    let scale = scale.max(0) as usize;
    if frac_part.len() > scale {
        return None;
    }
    let mut unscaled: i128 = 0;
    for c in int_part.chars().chain(frac_part.chars()) {
        unscaled = unscaled
            .checked_mul(10)?
            .checked_add((c as u8 - b'0') as i128)?;
    }
    for _ in 0..(scale - frac_part.len()) {
        unscaled = unscaled.checked_mul(10)?;
    }
    Some(if negative { -unscaled } else { unscaled })
}

fn timestamp_value(col: &ColumnDef, value: &EventValue) -> Result<NaiveDateTime> {
    match value {
        EventValue::Timestamp(ts) => Ok(*ts),
        EventValue::Text(s) => NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
            .map_err(|_| mismatch(col, value)),
        _ => Err(mismatch(col, value)),
    }
}

fn append_value(builder: &mut dyn ArrayBuilder, col: &ColumnDef, value: &EventValue) -> Result<()> {
    if matches!(value, EventValue::Null) {
        return append_null(builder, col);
    }
    match &col.kind {
        ColumnKind::Int8 => {
            let v = i8::try_from(to_i64(col, value)?).map_err(|_| mismatch(col, value))?;
            downcast::<Int8Builder>(builder, col)?.append_value(v);
        }
        ColumnKind::Int16 => {
            let v = i16::try_from(to_i64(col, value)?).map_err(|_| mismatch(col, value))?;
            downcast::<Int16Builder>(builder, col)?.append_value(v);
        }
        ColumnKind::Int32 => {
            let v = i32::try_from(to_i64(col, value)?).map_err(|_| mismatch(col, value))?;
            downcast::<Int32Builder>(builder, col)?.append_value(v);
        }
        ColumnKind::Int64 => {
            let v = to_i64(col, value)?;
            downcast::<Int64Builder>(builder, col)?.append_value(v);
        }
        ColumnKind::UInt8 => {
            let v = u8::try_from(to_u64(col, value)?).map_err(|_| mismatch(col, value))?;
            downcast::<UInt8Builder>(builder, col)?.append_value(v);
        }
        ColumnKind::UInt16 => {
            let v = u16::try_from(to_u64(col, value)?).map_err(|_| mismatch(col, value))?;
            downcast::<UInt16Builder>(builder, col)?.append_value(v);
        }
        ColumnKind::UInt32 => {
            let v = u32::try_from(to_u64(col, value)?).map_err(|_| mismatch(col, value))?;
            downcast::<UInt32Builder>(builder, col)?.append_value(v);
        }
        ColumnKind::UInt64 => {
            let v = to_u64(col, value)?;
            downcast::<UInt64Builder>(builder, col)?.append_value(v);
        }
        ColumnKind::Float32 => {
            let v = to_f64(col, value)? as f32;
            downcast::<Float32Builder>(builder, col)?.append_value(v);
        }
        ColumnKind::Float64 => {
            let v = to_f64(col, value)?;
            downcast::<Float64Builder>(builder, col)?.append_value(v);
        }
        ColumnKind::Decimal { scale, .. } => {
            let text = match value {
                EventValue::Decimal(s) | EventValue::Text(s) => s.as_str(),
                _ => return Err(mismatch(col, value)),
            };
            let unscaled = parse_decimal(text, *scale).ok_or_else(|| mismatch(col, value))?;
            downcast::<Decimal128Builder>(builder, col)?.append_value(unscaled);
        }
        ColumnKind::Text => match value {
            EventValue::Text(s) => downcast::<StringBuilder>(builder, col)?.append_value(s),
            _ => return Err(mismatch(col, value)),
        },
        ColumnKind::Binary => match value {
            EventValue::Bytes(b) => downcast::<BinaryBuilder>(builder, col)?.append_value(b),
            EventValue::Text(s) => {
                downcast::<BinaryBuilder>(builder, col)?.append_value(s.as_bytes())
            }
            _ => return Err(mismatch(col, value)),
        },
        ColumnKind::Timestamp(unit) => {
            let ts = timestamp_value(col, value)?;
            let utc = ts.and_utc();
            match unit {
                TimeUnit::Second => downcast::<TimestampSecondBuilder>(builder, col)?
                    .append_value(utc.timestamp()),
                TimeUnit::Millisecond => downcast::<TimestampMillisecondBuilder>(builder, col)?
                    .append_value(utc.timestamp_millis()),
                TimeUnit::Microsecond => downcast::<TimestampMicrosecondBuilder>(builder, col)?
                    .append_value(utc.timestamp_micros()),
                TimeUnit::Nanosecond => downcast::<TimestampNanosecondBuilder>(builder, col)?
                    .append_value(utc.timestamp_nanos_opt().ok_or_else(|| mismatch(col, value))?),
            }
        }
        ColumnKind::Date => {
            let date = match value {
                EventValue::Date(d) => *d,
                EventValue::Text(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .map_err(|_| mismatch(col, value))?,
                _ => return Err(mismatch(col, value)),
            };
            let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).ok_or_else(|| {
                FrontendError::Protocol("epoch construction failed".to_string())
            })?;
            let days = (date - epoch).num_days();
            let days = i32::try_from(days).map_err(|_| mismatch(col, value))?;
            downcast::<Date32Builder>(builder, col)?.append_value(days);
        }
        ColumnKind::Time => {
            let literal = match value {
                EventValue::Time(s) | EventValue::Text(s) => s.as_str(),
                _ => return Err(mismatch(col, value)),
            };
            let micros = parse_time_micros(literal)?;
            downcast::<DurationMicrosecondBuilder>(builder, col)?.append_value(micros);
        }
    }
    Ok(())
}

fn append_null(builder: &mut dyn ArrayBuilder, col: &ColumnDef) -> Result<()> {
    match &col.kind {
        ColumnKind::Int8 => downcast::<Int8Builder>(builder, col)?.append_null(),
        ColumnKind::Int16 => downcast::<Int16Builder>(builder, col)?.append_null(),
        ColumnKind::Int32 => downcast::<Int32Builder>(builder, col)?.append_null(),
        ColumnKind::Int64 => downcast::<Int64Builder>(builder, col)?.append_null(),
        ColumnKind::UInt8 => downcast::<UInt8Builder>(builder, col)?.append_null(),
        ColumnKind::UInt16 => downcast::<UInt16Builder>(builder, col)?.append_null(),
        ColumnKind::UInt32 => downcast::<UInt32Builder>(builder, col)?.append_null(),
        ColumnKind::UInt64 => downcast::<UInt64Builder>(builder, col)?.append_null(),
        ColumnKind::Float32 => downcast::<Float32Builder>(builder, col)?.append_null(),
        ColumnKind::Float64 => downcast::<Float64Builder>(builder, col)?.append_null(),
        ColumnKind::Decimal { .. } => downcast::<Decimal128Builder>(builder, col)?.append_null(),
        ColumnKind::Text => downcast::<StringBuilder>(builder, col)?.append_null(),
        ColumnKind::Binary => downcast::<BinaryBuilder>(builder, col)?.append_null(),
        ColumnKind::Timestamp(TimeUnit::Second) => {
            downcast::<TimestampSecondBuilder>(builder, col)?.append_null()
        }
        ColumnKind::Timestamp(TimeUnit::Millisecond) => {
            downcast::<TimestampMillisecondBuilder>(builder, col)?.append_null()
        }
        ColumnKind::Timestamp(TimeUnit::Microsecond) => {
            downcast::<TimestampMicrosecondBuilder>(builder, col)?.append_null()
        }
        ColumnKind::Timestamp(TimeUnit::Nanosecond) => {
            downcast::<TimestampNanosecondBuilder>(builder, col)?.append_null()
        }
        ColumnKind::Date => downcast::<Date32Builder>(builder, col)?.append_null(),
        ColumnKind::Time => downcast::<DurationMicrosecondBuilder>(builder, col)?.append_null(),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::TxnPosition;
    use arrow_array::cast::AsArray;
    use arrow_array::types::{Int64Type, Int8Type};
    use arrow_array::Array;

    fn user_schema() -> Vec<ColumnDef> {
        vec![
            ColumnDef::new("id", ColumnKind::Int64).primary_key(),
            ColumnDef::new("name", ColumnKind::Text),
        ]
    }

    fn txn() -> TxnPosition {
        TxnPosition {
            domain: "0".to_string(),
            server: "server-1".to_string(),
            group: "3E11FA47-71CA-11E1-9E33-C80AA9429562:23".to_string(),
            seq: 7,
        }
    }

    #[test]
    fn schema_prepends_the_meta_columns() {
        let appender = DeltaAppender::new(user_schema()).unwrap();
        let schema = appender.schema();
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(
            names,
            vec!["action", "txn_domain", "txn_server", "txn_group", "txn_seq", "id", "name"]
        );
        assert_eq!(appender.base_schema().len(), 2);
    }

    #[test]
    fn update_appends_pre_image_delete_and_post_image_insert() {
        let mut appender = DeltaAppender::new(user_schema()).unwrap();
        appender
            .append_update(
                &txn(),
                &[EventValue::Int(1), EventValue::Text("old".to_string())],
                &[EventValue::Int(1), EventValue::Text("new".to_string())],
            )
            .unwrap();

        let batch = appender.build().unwrap();
        assert_eq!(batch.num_rows(), 2);

        let actions = batch.column(0).as_primitive::<Int8Type>();
        assert_eq!(actions.value(0), DeltaAction::Delete as i8);
        assert_eq!(actions.value(1), DeltaAction::Insert as i8);

        let ids = batch.column(5).as_primitive::<Int64Type>();
        assert_eq!(ids.value(0), 1);
        assert_eq!(ids.value(1), 1);

        let names = batch.column(6).as_string::<i32>();
        assert_eq!(names.value(0), "old");
        assert_eq!(names.value(1), "new");
    }

    #[test]
    fn txn_coordinates_are_dictionary_encoded() {
        let mut appender = DeltaAppender::new(user_schema()).unwrap();
        for seq in 0..4 {
            let mut txn = txn();
            txn.seq = seq;
            appender
                .append_row(
                    DeltaAction::Insert,
                    &txn,
                    &[EventValue::Int(seq as i64), EventValue::Null],
                )
                .unwrap();
        }
        let batch = appender.build().unwrap();
        let domains = batch.column(1).as_dictionary::<Int16Type>();
        // Four rows, one distinct domain value.
        assert_eq!(domains.len(), 4);
        assert_eq!(domains.values().len(), 1);
    }

    #[test]
    fn build_resets_the_buffers() {
        let mut appender = DeltaAppender::new(user_schema()).unwrap();
        appender
            .append_row(
                DeltaAction::Insert,
                &txn(),
                &[EventValue::Int(1), EventValue::Null],
            )
            .unwrap();
        assert_eq!(appender.num_buffered(), 1);

        let batch = appender.build().unwrap();
        assert_eq!(batch.num_rows(), 1);
        assert_eq!(appender.num_buffered(), 0);

        let empty = appender.build().unwrap();
        assert_eq!(empty.num_rows(), 0);
    }

    #[test]
    fn type_mismatches_are_errors_not_coercions() {
        let mut appender = DeltaAppender::new(user_schema()).unwrap();
        let err = appender
            .append_row(
                DeltaAction::Insert,
                &txn(),
                &[
                    EventValue::Bytes(vec![1, 2, 3]),
                    EventValue::Text("x".to_string()),
                ],
            )
            .unwrap_err();
        assert!(matches!(err, FrontendError::Protocol(_)));

        let err = appender
            .append_row(DeltaAction::Insert, &txn(), &[EventValue::Int(1)])
            .unwrap_err();
        assert!(matches!(err, FrontendError::Protocol(_)));
    }

    #[test]
    fn unsigned_overflow_is_rejected() {
        let schema = vec![ColumnDef::new("v", ColumnKind::UInt8)];
        let mut appender = DeltaAppender::new(schema).unwrap();
        assert!(appender
            .append_row(DeltaAction::Insert, &txn(), &[EventValue::UInt(255)])
            .is_ok());
        assert!(appender
            .append_row(DeltaAction::Insert, &txn(), &[EventValue::UInt(256)])
            .is_err());
        assert!(appender
            .append_row(DeltaAction::Insert, &txn(), &[EventValue::Int(-1)])
            .is_err());
    }

    #[test]
    fn decimal_strings_parse_against_the_declared_scale() {
        assert_eq!(parse_decimal("123.45", 2), Some(12345));
        assert_eq!(parse_decimal("-1.5", 2), Some(-150));
        assert_eq!(parse_decimal("7", 3), Some(7000));
        assert_eq!(parse_decimal("1.234", 2), None);
        assert_eq!(parse_decimal("abc", 2), None);

        let schema = vec![ColumnDef::new(
            "amount",
            ColumnKind::Decimal {
                precision: 10,
                scale: 2,
            },
        )];
        let mut appender = DeltaAppender::new(schema).unwrap();
        appender
            .append_row(
                DeltaAction::Insert,
                &txn(),
                &[EventValue::Decimal("42.10".to_string())],
            )
            .unwrap();
        let batch = appender.build().unwrap();
        assert_eq!(batch.num_rows(), 1);
    }

    #[test]
    fn temporal_values_convert_by_declared_unit() {
        let schema = vec![
            ColumnDef::new("ts", ColumnKind::Timestamp(TimeUnit::Microsecond)),
            ColumnDef::new("d", ColumnKind::Date),
            ColumnDef::new("t", ColumnKind::Time),
        ];
        let mut appender = DeltaAppender::new(schema).unwrap();
        let ts = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_micro_opt(12, 30, 0, 250)
            .unwrap();
        appender
            .append_row(
                DeltaAction::Insert,
                &txn(),
                &[
                    EventValue::Timestamp(ts),
                    EventValue::Date(NaiveDate::from_ymd_opt(1970, 1, 2).unwrap()),
                    EventValue::Time("01:00:00".to_string()),
                ],
            )
            .unwrap();
        let batch = appender.build().unwrap();
        assert_eq!(batch.num_rows(), 1);

        let dates = batch
            .column(6)
            .as_primitive::<arrow_array::types::Date32Type>();
        assert_eq!(dates.value(0), 1);
        let times = batch
            .column(7)
            .as_primitive::<arrow_array::types::DurationMicrosecondType>();
        assert_eq!(times.value(0), 3_600_000_000);
    }
}
