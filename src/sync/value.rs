// ABOUTME: Store-neutral column values shared by the MySQL source and PostgreSQL destination
// ABOUTME: Provides the canonical string form used for diffing and PostgreSQL parameter binding

use std::fmt;

use bytes::BytesMut;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};

/// One column value, independent of which store produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
}

impl ColumnValue {
    /// Canonical text used when comparing source and destination values.
    ///
    /// Both stores represent the same logical value with different native
    /// types (a MySQL `TINYINT(1)` flag against a PostgreSQL `BOOLEAN`, a
    /// `DECIMAL(10,2)` against `NUMERIC`). The canonical form folds those
    /// together:
    ///
    /// - NULL → `NULL` (for display; compare with [`ColumnValue::same_as`])
    /// - booleans → `1` / `0`
    /// - decimals are normalized (`12.50` → `12.5`)
    /// - timestamps → `YYYY-MM-DD HH:MM:SS[.fraction]`
    /// - bytes that are valid UTF-8 compare as text, others as lowercase hex
    pub fn canonical(&self) -> String {
        match self {
            ColumnValue::Null => "NULL".to_string(),
            ColumnValue::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            ColumnValue::Int(i) => i.to_string(),
            ColumnValue::Float(f) => {
                if f.fract() == 0.0 && f.is_finite() && f.abs() < 1e15 {
                    format!("{}", *f as i64)
                } else {
                    f.to_string()
                }
            }
            ColumnValue::Decimal(d) => d.normalize().to_string(),
            ColumnValue::Text(s) => s.clone(),
            ColumnValue::Bytes(b) => match std::str::from_utf8(b) {
                Ok(s) => s.to_string(),
                Err(_) => b.iter().map(|byte| format!("{:02x}", byte)).collect(),
            },
            ColumnValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            ColumnValue::Time(t) => t.to_string(),
            ColumnValue::Timestamp(ts) => ts.to_string(),
        }
    }

    /// Whether two values are the same logical value.
    ///
    /// NULL only equals NULL; the text `NULL` is a value like any other.
    pub fn same_as(&self, other: &ColumnValue) -> bool {
        match (self, other) {
            (ColumnValue::Null, ColumnValue::Null) => true,
            (ColumnValue::Null, _) | (_, ColumnValue::Null) => false,
            _ => self.canonical() == other.canonical(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ColumnValue::Null => "null",
            ColumnValue::Bool(_) => "bool",
            ColumnValue::Int(_) => "int",
            ColumnValue::Float(_) => "float",
            ColumnValue::Decimal(_) => "decimal",
            ColumnValue::Text(_) => "text",
            ColumnValue::Bytes(_) => "bytes",
            ColumnValue::Date(_) => "date",
            ColumnValue::Time(_) => "time",
            ColumnValue::Timestamp(_) => "timestamp",
        }
    }
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl From<i64> for ColumnValue {
    fn from(value: i64) -> Self {
        ColumnValue::Int(value)
    }
}

impl From<&str> for ColumnValue {
    fn from(value: &str) -> Self {
        ColumnValue::Text(value.to_string())
    }
}

impl From<String> for ColumnValue {
    fn from(value: String) -> Self {
        ColumnValue::Text(value)
    }
}

impl From<bool> for ColumnValue {
    fn from(value: bool) -> Self {
        ColumnValue::Bool(value)
    }
}

impl From<NaiveDateTime> for ColumnValue {
    fn from(value: NaiveDateTime) -> Self {
        ColumnValue::Timestamp(value)
    }
}

impl<T: Into<ColumnValue>> From<Option<T>> for ColumnValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(ColumnValue::Null)
    }
}

/// An ordered set of named column values, as read from one table row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowData {
    columns: Vec<(String, ColumnValue)>,
}

impl RowData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a column by name, ignoring ASCII case.
    ///
    /// MySQL reports column names as declared while PostgreSQL folds
    /// unquoted identifiers to lowercase, so lookups across stores must not
    /// depend on case.
    pub fn get(&self, name: &str) -> Option<&ColumnValue> {
        self.columns
            .iter()
            .find(|(col, _)| col.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    /// Set a column, replacing an existing one of the same name.
    pub fn set(&mut self, name: &str, value: ColumnValue) {
        match self
            .columns
            .iter_mut()
            .find(|(col, _)| col.eq_ignore_ascii_case(name))
        {
            Some((_, existing)) => *existing = value,
            None => self.columns.push((name.to_string(), value)),
        }
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ColumnValue)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, ColumnValue)> for RowData {
    fn from_iter<I: IntoIterator<Item = (S, ColumnValue)>>(iter: I) -> Self {
        let mut row = RowData::new();
        for (name, value) in iter {
            row.set(&name.into(), value);
        }
        row
    }
}

fn mismatch(value: &ColumnValue, ty: &Type) -> Box<dyn std::error::Error + Sync + Send> {
    format!(
        "cannot bind {} value '{}' to PostgreSQL column of type {}",
        value.kind(),
        value.canonical(),
        ty
    )
    .into()
}

// Binding adapts each value to the declared destination column type, so the
// same projected row can land in a BOOLEAN or SMALLINT flag column.
impl ToSql for ColumnValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            ColumnValue::Null => Ok(IsNull::Yes),
            ColumnValue::Bool(b) => match *ty {
                Type::BOOL => b.to_sql(ty, out),
                Type::INT2 => (*b as i16).to_sql(ty, out),
                Type::INT4 => (*b as i32).to_sql(ty, out),
                Type::INT8 => (*b as i64).to_sql(ty, out),
                Type::NUMERIC => Decimal::from(*b as i64).to_sql(ty, out),
                Type::TEXT | Type::VARCHAR | Type::BPCHAR => self.canonical().to_sql(ty, out),
                _ => Err(mismatch(self, ty)),
            },
            ColumnValue::Int(i) => match *ty {
                Type::INT8 => i.to_sql(ty, out),
                Type::INT4 => i32::try_from(*i)?.to_sql(ty, out),
                Type::INT2 => i16::try_from(*i)?.to_sql(ty, out),
                Type::BOOL => (*i != 0).to_sql(ty, out),
                Type::FLOAT8 => (*i as f64).to_sql(ty, out),
                Type::FLOAT4 => (*i as f32).to_sql(ty, out),
                Type::NUMERIC => Decimal::from(*i).to_sql(ty, out),
                Type::TEXT | Type::VARCHAR | Type::BPCHAR => i.to_string().to_sql(ty, out),
                _ => Err(mismatch(self, ty)),
            },
            ColumnValue::Float(f) => match *ty {
                Type::FLOAT8 => f.to_sql(ty, out),
                Type::FLOAT4 => (*f as f32).to_sql(ty, out),
                Type::NUMERIC => Decimal::from_f64_retain(*f)
                    .ok_or_else(|| mismatch(self, ty))?
                    .to_sql(ty, out),
                Type::TEXT | Type::VARCHAR | Type::BPCHAR => f.to_string().to_sql(ty, out),
                _ => Err(mismatch(self, ty)),
            },
            ColumnValue::Decimal(d) => match *ty {
                Type::NUMERIC => d.to_sql(ty, out),
                Type::FLOAT8 => f64::try_from(*d)?.to_sql(ty, out),
                Type::FLOAT4 => f32::try_from(*d)?.to_sql(ty, out),
                Type::INT8 => i64::try_from(*d)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*d)?.to_sql(ty, out),
                Type::INT2 => i16::try_from(*d)?.to_sql(ty, out),
                Type::TEXT | Type::VARCHAR | Type::BPCHAR => d.to_string().to_sql(ty, out),
                _ => Err(mismatch(self, ty)),
            },
            ColumnValue::Text(s) => match *ty {
                Type::JSON | Type::JSONB => {
                    serde_json::from_str::<serde_json::Value>(s)?.to_sql(ty, out)
                }
                Type::INT8 => s.trim().parse::<i64>()?.to_sql(ty, out),
                Type::INT4 => s.trim().parse::<i32>()?.to_sql(ty, out),
                Type::INT2 => s.trim().parse::<i16>()?.to_sql(ty, out),
                Type::NUMERIC => s.trim().parse::<Decimal>()?.to_sql(ty, out),
                Type::UUID => uuid::Uuid::parse_str(s.trim())?.to_sql(ty, out),
                _ => s.to_sql(ty, out),
            },
            ColumnValue::Bytes(b) => match *ty {
                Type::BYTEA => b.to_sql(ty, out),
                _ => String::from_utf8(b.clone())
                    .map_err(|_| mismatch(self, ty))?
                    .to_sql(ty, out),
            },
            ColumnValue::Date(d) => match *ty {
                Type::DATE => d.to_sql(ty, out),
                Type::TIMESTAMP => d.and_time(NaiveTime::MIN).to_sql(ty, out),
                Type::TIMESTAMPTZ => d.and_time(NaiveTime::MIN).and_utc().to_sql(ty, out),
                Type::TEXT | Type::VARCHAR | Type::BPCHAR => self.canonical().to_sql(ty, out),
                _ => Err(mismatch(self, ty)),
            },
            ColumnValue::Time(t) => match *ty {
                Type::TIME => t.to_sql(ty, out),
                Type::TEXT | Type::VARCHAR | Type::BPCHAR => t.to_string().to_sql(ty, out),
                _ => Err(mismatch(self, ty)),
            },
            ColumnValue::Timestamp(ts) => match *ty {
                Type::TIMESTAMP => ts.to_sql(ty, out),
                // Naive timestamps are treated as UTC when the destination is zoned
                Type::TIMESTAMPTZ => ts.and_utc().to_sql(ty, out),
                Type::DATE => ts.date().to_sql(ty, out),
                Type::TEXT | Type::VARCHAR | Type::BPCHAR => ts.to_string().to_sql(ty, out),
                _ => Err(mismatch(self, ty)),
            },
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}
