// ABOUTME: Column-level diff between a projected source row and the destination row
// ABOUTME: Compares canonical string forms and honours a case-insensitive skip-list

use std::collections::BTreeSet;

use super::value::{ColumnValue, RowData};
use crate::config::{ColumnLayout, DiffPolicy};

/// Columns never compared or written by a partial update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SkipList {
    columns: BTreeSet<String>,
}

impl SkipList {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            columns: columns
                .into_iter()
                .map(|c| c.as_ref().to_lowercase())
                .collect(),
        }
    }

    pub fn from_policy(policy: &DiffPolicy, columns: &ColumnLayout) -> Self {
        Self {
            columns: policy.skip_list(columns),
        }
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.contains(&column.to_lowercase())
    }
}

/// Names of projected columns whose canonical value differs at the destination.
///
/// Order follows the source row. A column the destination row lacks is
/// compared against NULL.
pub fn changed_columns(source: &RowData, destination: &RowData, skip: &SkipList) -> Vec<String> {
    source
        .iter()
        .filter(|(name, _)| !skip.contains(name))
        .filter(|(name, value)| {
            let current = destination.get(name).unwrap_or(&ColumnValue::Null);
            !value.same_as(current)
        })
        .map(|(name, _)| name.to_string())
        .collect()
}
