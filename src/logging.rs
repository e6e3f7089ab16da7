// ABOUTME: Tracing subscriber setup - per-run log file or console output
// ABOUTME: RUST_LOG takes precedence over the --log level

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use tracing_subscriber::EnvFilter;

/// Log file for a run started at `started`: `<dir>/log_YYYY-MM-DD_HH-MM-SS.txt`.
pub fn log_file_path(dir: &Path, started: NaiveDateTime) -> PathBuf {
    dir.join(format!("log_{}.txt", started.format("%Y-%m-%d_%H-%M-%S")))
}

/// Install the global subscriber.
///
/// Returns the log file in use, or `None` when logging to stdout.
pub fn init(level: &str, log_dir: &Path, to_stdout: bool) -> Result<Option<PathBuf>> {
    // 1. RUST_LOG environment variable has highest precedence
    // 2. --log flag is used if RUST_LOG is not set
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if to_stdout {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
        return Ok(None);
    }

    fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;
    let path = log_file_path(log_dir, chrono::Local::now().naive_local());
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .init();

    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_log_file_path_format() {
        let started = NaiveDate::from_ymd_opt(2024, 7, 3)
            .unwrap()
            .and_hms_opt(6, 5, 4)
            .unwrap();
        assert_eq!(
            log_file_path(Path::new("logs"), started),
            PathBuf::from("logs/log_2024-07-03_06-05-04.txt")
        );
    }
}
