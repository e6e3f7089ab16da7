// ABOUTME: shift-date command - shows which business shift a timestamp falls into
// ABOUTME: Uses the same bucketing as the sync engine's projection

use anyhow::{anyhow, Result};
use clap::Args;

use crate::sync::{parse_timestamp, shift_date as bucket, Shift, ShiftDate};

#[derive(Args)]
pub struct ShiftDateArgs {
    /// Event timestamp, e.g. "2024-01-01 20:15:00"
    pub timestamp: String,
}

pub fn describe(shift: &ShiftDate) -> String {
    let name = match shift.shift {
        Shift::Day => "day",
        Shift::Night => "night",
    };
    format!(
        "{} ({} shift of {})",
        shift.to_timestamp().format("%Y-%m-%d %H:%M:%S"),
        name,
        shift.date
    )
}

pub fn shift_date(args: ShiftDateArgs) -> Result<()> {
    let ts = parse_timestamp(&args.timestamp)
        .ok_or_else(|| anyhow!("Invalid timestamp '{}'", args.timestamp))?;
    let shift = bucket(ts).ok_or_else(|| anyhow!("No shift date for {}", ts))?;
    println!("{}", describe(&shift));
    Ok(())
}
