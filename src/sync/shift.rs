// ABOUTME: Shift-date derivation - buckets a raw event timestamp into a business shift day
// ABOUTME: Pure and total: bad input yields NULL plus a warning, never an error

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use super::value::ColumnValue;
use crate::error::SyncError;

/// Which half of the working day a timestamp belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shift {
    /// 07:00:00 – 18:59:59
    Day,
    /// 19:00:00 – 06:59:59, attributed to the evening's calendar date
    Night,
}

impl Shift {
    /// Seconds past midnight used to encode the shift in the stored value.
    fn marker_seconds(self) -> u32 {
        match self {
            Shift::Day => 1,
            Shift::Night => 2,
        }
    }
}

/// A business-day bucket: the shift's calendar date plus which shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShiftDate {
    pub date: NaiveDate,
    pub shift: Shift,
}

impl ShiftDate {
    /// The stored representation: the bucket date at 00:00:01 for the day
    /// shift or 00:00:02 for the night shift.
    pub fn to_timestamp(self) -> NaiveDateTime {
        let marker = NaiveTime::from_num_seconds_from_midnight_opt(self.shift.marker_seconds(), 0)
            .unwrap_or(NaiveTime::MIN);
        self.date.and_time(marker)
    }
}

/// Bucket a timestamp into its shift.
///
/// Returns `None` only when the previous calendar day cannot be represented.
pub fn shift_date(ts: NaiveDateTime) -> Option<ShiftDate> {
    let hour = ts.hour();
    let date = ts.date();
    match hour {
        7..=18 => Some(ShiftDate {
            date,
            shift: Shift::Day,
        }),
        19..=23 => Some(ShiftDate {
            date,
            shift: Shift::Night,
        }),
        _ => date.pred_opt().map(|prev| ShiftDate {
            date: prev,
            shift: Shift::Night,
        }),
    }
}

/// Derive the shift-date column value from the raw event-time column.
///
/// NULL in gives NULL out. Values that are not timestamps are parsed as
/// text when possible; anything else is logged and mapped to NULL so the
/// caller's row projection always completes.
pub fn derive_shift_date(raw: Option<&ColumnValue>) -> ColumnValue {
    match try_derive_shift_date(raw) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!("{}", err);
            ColumnValue::Null
        }
    }
}

fn try_derive_shift_date(raw: Option<&ColumnValue>) -> Result<ColumnValue, SyncError> {
    let ts = match raw {
        None | Some(ColumnValue::Null) => return Ok(ColumnValue::Null),
        Some(ColumnValue::Timestamp(ts)) => *ts,
        Some(ColumnValue::Text(s)) => {
            parse_timestamp(s).ok_or_else(|| derived_fault(s, "malformed timestamp"))?
        }
        Some(other) => return Err(derived_fault(&other.canonical(), "not a timestamp")),
    };

    shift_date(ts)
        .map(|bucket| ColumnValue::Timestamp(bucket.to_timestamp()))
        .ok_or_else(|| derived_fault(&ts.to_string(), "previous day is out of range"))
}

fn derived_fault(raw: &str, reason: &str) -> SyncError {
    SyncError::DerivedField {
        column: "shift date",
        raw: raw.to_string(),
        reason: reason.to_string(),
    }
}

/// Parse `YYYY-MM-DD HH:MM:SS[.f]`, with either a space or `T` separator.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}
