// ABOUTME: Log suppression for recurring failures and notices
// ABOUTME: Single-slot channels re-arm on recovery; seen-sets never forget

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

static HEX_ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"0x[0-9a-f]+").expect("hex pattern is valid"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));
static HOST_FRAGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"host='[^']*'").expect("host pattern is valid"));
static URL_AUTHORITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([a-z][a-z0-9+.-]*://)[^/\s)]+").expect("url pattern is valid")
});
static TIMEOUT_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"timeout=[0-9]+").expect("timeout pattern is valid"));

/// Reduce an error message to a form that is stable across repeats of the
/// same underlying failure.
///
/// Lowercases, then replaces memory addresses, connection hosts and timeout
/// values with placeholders and collapses whitespace runs.
pub fn normalize_error(raw: &str) -> String {
    let err = raw.to_lowercase();
    let err = HEX_ADDRESS.replace_all(&err, "0xADDR");
    let err = WHITESPACE.replace_all(&err, " ");
    let err = HOST_FRAGMENT.replace_all(&err, "host='X'");
    let err = URL_AUTHORITY.replace_all(&err, "${1}X");
    let err = TIMEOUT_VALUE.replace_all(&err, "timeout=X");
    err.trim().to_string()
}

/// Remembers the last failure seen on one channel (main loop, heartbeat, ...).
///
/// A failure is emitted only when its normalized form differs from the
/// previous one. Recording a success clears the slot, so the next failure is
/// emitted again even if it matches one from before the recovery.
#[derive(Debug, Default)]
pub struct DedupChannel {
    last: Option<String>,
}

impl DedupChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure. Returns true when it should be logged.
    pub fn should_emit(&mut self, raw: &str) -> bool {
        let normalized = normalize_error(raw);
        if self.last.as_deref() == Some(normalized.as_str()) {
            return false;
        }
        self.last = Some(normalized);
        true
    }

    /// Record a success. Returns true if a failure was being suppressed.
    pub fn clear(&mut self) -> bool {
        self.last.take().is_some()
    }
}

/// Remembers every normalized message emitted for the lifetime of the
/// process and never emits the same one twice.
#[derive(Debug, Default)]
pub struct DedupSet {
    seen: HashSet<String>,
}

impl DedupSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true the first time a message (after normalization) is seen.
    pub fn first_time(&mut self, raw: &str) -> bool {
        self.seen.insert(normalize_error(raw))
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
