// ABOUTME: Idempotency & ack tracker - per-key attempt counters and compare-and-swap status writes
// ABOUTME: Maps each sync outcome onto the change log transition that records it

use anyhow::{Context, Result};

use super::entry::{
    diagnostic_suffix, Action, ChangeLogEntry, CompositeKey, EntryStatus, SyncOutcome,
    RECONCILE_TAG,
};
use super::store::{ChangeLogStore, MessageUpdate, StatusTransition};
use crate::error::SyncError;

/// What became of a status write.
#[derive(Debug, Clone, PartialEq)]
pub enum AckResult {
    /// The entry moved to its final status at this attempt. Carries the
    /// write so the caller can tell which other entries it claimed.
    Recorded(StatusTransition),
    /// The expected attempt no longer matched; another pass got there first.
    Superseded,
}

pub struct AckTracker<'a> {
    log: &'a dyn ChangeLogStore,
    processed_by: &'a str,
}

impl<'a> AckTracker<'a> {
    pub fn new(log: &'a dyn ChangeLogStore, processed_by: &'a str) -> Self {
        Self { log, processed_by }
    }

    /// The attempt number this pass will record for `key`.
    pub async fn next_attempt(&self, key: &CompositeKey) -> Result<i64> {
        let latest = self
            .log
            .latest_attempt(key)
            .await
            .with_context(|| format!("Failed to read attempt counter for {}", key))?;
        Ok(latest + 1)
    }

    /// Record the outcome of processing `entry` as attempt `next_attempt`.
    pub async fn acknowledge(
        &self,
        entry: &ChangeLogEntry,
        outcome: &SyncOutcome,
        next_attempt: i64,
    ) -> Result<AckResult> {
        let transition = build_transition(entry, outcome, next_attempt, self.processed_by);
        let matched = self
            .log
            .transition(&transition)
            .await
            .with_context(|| format!("Failed to record status for {}", entry.key))?;
        if matched == 0 {
            Ok(AckResult::Superseded)
        } else {
            Ok(AckResult::Recorded(transition))
        }
    }

    /// Leave `entry` PENDING but note why it could not be processed.
    pub async fn defer(&self, entry: &ChangeLogEntry, diagnostic: &str) -> Result<()> {
        self.log
            .annotate(
                entry,
                &diagnostic_suffix(RECONCILE_TAG, diagnostic),
                self.processed_by,
            )
            .await
            .with_context(|| format!("Failed to annotate {}", entry.key))
    }
}

/// Build the compare-and-swap transition recording `outcome`.
///
/// The write only matches PENDING log rows logged no later than the entry and
/// still at the attempt the entry was read with. A revival widens the
/// eligible actions to include INSERT.
pub fn build_transition(
    entry: &ChangeLogEntry,
    outcome: &SyncOutcome,
    next_attempt: i64,
    processed_by: &str,
) -> StatusTransition {
    let mut eligible_actions = vec![entry.action.clone()];
    if let SyncOutcome::Applied { revived: true, .. } = outcome {
        if entry.action != Action::Insert {
            eligible_actions.push(Action::Insert);
        }
    }

    let (status, message) = match failure(entry, outcome) {
        None => (
            EntryStatus::Success,
            MessageUpdate::Replace(success_message(entry, outcome, next_attempt)),
        ),
        Some(err) => (
            EntryStatus::Failed,
            MessageUpdate::Append(diagnostic_suffix(RECONCILE_TAG, &err.to_string())),
        ),
    };

    StatusTransition {
        key: entry.key.clone(),
        eligible_actions,
        logged_until: entry.logged_at,
        expected_attempt: entry.attempt,
        next_attempt,
        status,
        message,
        processed_by: processed_by.to_string(),
    }
}

/// The fault a failed outcome represents, if any.
pub fn failure(entry: &ChangeLogEntry, outcome: &SyncOutcome) -> Option<SyncError> {
    let key = entry.key.to_string();
    match outcome {
        SyncOutcome::Applied { .. } | SyncOutcome::NoChange => None,
        SyncOutcome::NotFound => Some(SyncError::RowNotFound { key }),
        SyncOutcome::ApplyFailed(reason) => Some(SyncError::Apply {
            action: entry.action.to_string(),
            key,
            reason: reason.clone(),
        }),
        SyncOutcome::UnknownAction(action) => Some(SyncError::UnknownAction {
            action: action.clone(),
            key,
        }),
    }
}

fn success_message(entry: &ChangeLogEntry, outcome: &SyncOutcome, next_attempt: i64) -> String {
    match (outcome, &entry.action) {
        (SyncOutcome::NoChange, _) => {
            format!("No changes for {} (attempt {})", entry.key, next_attempt)
        }
        (_, Action::Delete) => format!("Data deleted successfully {}", entry.key),
        (SyncOutcome::Applied { revived: true, .. }, _) => {
            format!("Data restored successfully {}", entry.key)
        }
        (SyncOutcome::Applied { columns, .. }, Action::Update) => format!(
            "Data updated successfully {} ({} column(s))",
            entry.key,
            columns.len()
        ),
        _ => format!("Data synced successfully {}", entry.key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::entry::ForwardStatus;
    use chrono::NaiveDate;

    fn entry(action: Action, attempt: i64) -> ChangeLogEntry {
        ChangeLogEntry {
            key: CompositeKey::new(1001i64, "P01"),
            action,
            status: EntryStatus::Pending,
            attempt,
            message: None,
            logged_at: NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(8, 0, 0)
                .unwrap(),
            forward_status: ForwardStatus::Unset,
            processed_by: None,
        }
    }

    #[test]
    fn test_success_transition_is_cas_on_read_attempt() {
        let outcome = SyncOutcome::Applied {
            columns: vec!["berat".to_string()],
            revived: false,
        };
        let t = build_transition(&entry(Action::Update, 0), &outcome, 3, "wb01");
        assert_eq!(t.expected_attempt, 0);
        assert_eq!(t.next_attempt, 3);
        assert_eq!(t.logged_until, entry(Action::Update, 0).logged_at);
        assert_eq!(t.status, EntryStatus::Success);
        assert_eq!(t.eligible_actions, vec![Action::Update]);
        assert_eq!(
            t.message,
            MessageUpdate::Replace("Data updated successfully 1001-P01 (1 column(s))".to_string())
        );
        assert_eq!(t.processed_by, "wb01");
    }

    #[test]
    fn test_transition_covers_only_earlier_pending_entries() {
        let outcome = SyncOutcome::Applied {
            columns: vec!["berat".to_string()],
            revived: false,
        };
        let first = entry(Action::Update, 0);
        let t = build_transition(&first, &outcome, 1, "wb01");
        assert!(t.covers(&first));

        let mut later = entry(Action::Update, 0);
        later.logged_at += chrono::Duration::hours(2);
        assert!(!t.covers(&later));

        let mut settled = entry(Action::Update, 0);
        settled.status = EntryStatus::Success;
        assert!(!t.covers(&settled));

        assert!(!t.covers(&entry(Action::Delete, 0)));
        assert!(!t.covers(&entry(Action::Update, 1)));
    }

    #[test]
    fn test_revival_widens_eligible_actions() {
        let outcome = SyncOutcome::Applied {
            columns: vec!["deleted".to_string()],
            revived: true,
        };
        let t = build_transition(&entry(Action::Update, 0), &outcome, 1, "wb01");
        assert_eq!(t.eligible_actions, vec![Action::Update, Action::Insert]);

        let t = build_transition(&entry(Action::Insert, 0), &outcome, 1, "wb01");
        assert_eq!(t.eligible_actions, vec![Action::Insert]);
    }

    #[test]
    fn test_no_change_is_success_with_distinct_message() {
        let t = build_transition(&entry(Action::Update, 0), &SyncOutcome::NoChange, 2, "wb01");
        assert_eq!(t.status, EntryStatus::Success);
        assert_eq!(
            t.message,
            MessageUpdate::Replace("No changes for 1001-P01 (attempt 2)".to_string())
        );
    }

    #[test]
    fn test_failures_append_tagged_diagnostic() {
        let t = build_transition(&entry(Action::Insert, 0), &SyncOutcome::NotFound, 1, "wb01");
        assert_eq!(t.status, EntryStatus::Failed);
        assert_eq!(
            t.message,
            MessageUpdate::Append(" | [reconcile] : Source row 1001-P01 not found".to_string())
        );

        let t = build_transition(
            &entry(Action::Unknown("MERGE".to_string()), 0),
            &SyncOutcome::UnknownAction("MERGE".to_string()),
            1,
            "wb01",
        );
        assert_eq!(t.status, EntryStatus::Failed);
        assert_eq!(
            t.eligible_actions,
            vec![Action::Unknown("MERGE".to_string())]
        );
    }

    #[test]
    fn test_apply_failure_names_action() {
        let err = failure(
            &entry(Action::Delete, 0),
            &SyncOutcome::ApplyFailed("no destination row 1001-P01 to flag as deleted".to_string()),
        )
        .unwrap();
        assert_eq!(
            err.to_string(),
            "DELETE failed for 1001-P01: no destination row 1001-P01 to flag as deleted"
        );
    }
}
