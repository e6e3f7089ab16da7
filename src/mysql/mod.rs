// ABOUTME: MySQL side of the replicator - connections and value conversion
// ABOUTME: Holds the business source table and the local change log

pub mod store;

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use mysql_async::consts::ColumnType;
use mysql_async::{Conn, Opts, Value};
use rust_decimal::Decimal;

use crate::sync::ColumnValue;
use crate::utils::strip_password_from_url;

pub use store::{LogQueries, MySqlStore};

/// Open a single MySQL connection.
pub async fn connect(url: &str) -> Result<Conn> {
    let opts = Opts::from_url(url).with_context(|| {
        format!(
            "Invalid MySQL connection string {}",
            strip_password_from_url(url)
        )
    })?;
    Conn::new(opts).await.with_context(|| {
        format!(
            "Failed to connect to MySQL at {}",
            strip_password_from_url(url)
        )
    })
}

/// Convert a value read with the binary protocol into a [`ColumnValue`].
///
/// DECIMAL arrives as text and is parsed; zero dates (`0000-00-00`) become
/// NULL; bytes that are not UTF-8 stay binary.
pub fn from_mysql_value(value: &Value, column_type: ColumnType) -> ColumnValue {
    match value {
        Value::NULL => ColumnValue::Null,
        Value::Bytes(bytes) => match column_type {
            ColumnType::MYSQL_TYPE_NEWDECIMAL | ColumnType::MYSQL_TYPE_DECIMAL => {
                let s = String::from_utf8_lossy(bytes);
                s.trim()
                    .parse::<Decimal>()
                    .map(ColumnValue::Decimal)
                    .unwrap_or_else(|_| ColumnValue::Text(s.to_string()))
            }
            _ => match String::from_utf8(bytes.clone()) {
                Ok(s) => ColumnValue::Text(s),
                Err(_) => ColumnValue::Bytes(bytes.clone()),
            },
        },
        Value::Int(i) => ColumnValue::Int(*i),
        Value::UInt(u) => match i64::try_from(*u) {
            Ok(i) => ColumnValue::Int(i),
            Err(_) => ColumnValue::Decimal(Decimal::from(*u)),
        },
        Value::Float(f) => ColumnValue::Float(f64::from(*f)),
        Value::Double(d) => ColumnValue::Float(*d),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            let Some(date) = NaiveDate::from_ymd_opt(i32::from(*year), u32::from(*month), u32::from(*day))
            else {
                return ColumnValue::Null;
            };
            if column_type == ColumnType::MYSQL_TYPE_DATE {
                return ColumnValue::Date(date);
            }
            match date.and_hms_micro_opt(
                u32::from(*hour),
                u32::from(*minute),
                u32::from(*second),
                *micros,
            ) {
                Some(ts) => ColumnValue::Timestamp(ts),
                None => ColumnValue::Null,
            }
        }
        Value::Time(negative, days, hours, minutes, seconds, micros) => {
            let time = (!negative && *days == 0)
                .then(|| {
                    NaiveTime::from_hms_micro_opt(
                        u32::from(*hours),
                        u32::from(*minutes),
                        u32::from(*seconds),
                        *micros,
                    )
                })
                .flatten();
            match time {
                Some(t) => ColumnValue::Time(t),
                None => {
                    // TIME is an interval in MySQL and may exceed a day
                    let total_hours = u64::from(*days) * 24 + u64::from(*hours);
                    ColumnValue::Text(format!(
                        "{}{:02}:{:02}:{:02}",
                        if *negative { "-" } else { "" },
                        total_hours,
                        minutes,
                        seconds
                    ))
                }
            }
        }
    }
}

/// Convert a [`ColumnValue`] into a MySQL statement parameter.
pub fn to_mysql_value(value: &ColumnValue) -> Value {
    match value {
        ColumnValue::Null => Value::NULL,
        ColumnValue::Bool(b) => Value::Int(i64::from(*b)),
        ColumnValue::Int(i) => Value::Int(*i),
        ColumnValue::Float(f) => Value::Double(*f),
        ColumnValue::Decimal(d) => Value::Bytes(d.to_string().into_bytes()),
        ColumnValue::Text(s) => Value::Bytes(s.clone().into_bytes()),
        ColumnValue::Bytes(b) => Value::Bytes(b.clone()),
        ColumnValue::Date(d) => datetime_value(d.and_time(NaiveTime::MIN)),
        ColumnValue::Time(t) => Value::Time(
            false,
            0,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
            t.nanosecond().min(999_999_999) / 1_000,
        ),
        ColumnValue::Timestamp(ts) => datetime_value(*ts),
    }
}

fn datetime_value(ts: NaiveDateTime) -> Value {
    Value::Date(
        u16::try_from(ts.year()).unwrap_or(0),
        ts.month() as u8,
        ts.day() as u8,
        ts.hour() as u8,
        ts.minute() as u8,
        ts.second() as u8,
        ts.nanosecond().min(999_999_999) / 1_000,
    )
}
