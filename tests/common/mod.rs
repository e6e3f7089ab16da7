// ABOUTME: In-memory change log, source, destination and central log stores for engine tests
// ABOUTME: Each store has switches to simulate read, write and connection failures

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};

use changelog_replicator::config::{ColumnLayout, DiffPolicy};
use changelog_replicator::error::SyncError;
use changelog_replicator::sync::{
    Action, CentralLogStore, ChangeLogEntry, ChangeLogStore, ColumnValue, CompositeKey, Connector,
    DestinationStore, EngineSettings, EntryStatus, ForwardStatus, LogSummary, MessageUpdate,
    RowData, Session, SkipList, SourceStore, StatusTransition,
};

pub fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, day)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

pub fn key(id: i64, partition: &str) -> CompositeKey {
    CompositeKey::new(id, partition)
}

pub fn entry(id: i64, partition: &str, action: Action, logged_at: NaiveDateTime) -> ChangeLogEntry {
    ChangeLogEntry {
        key: key(id, partition),
        action,
        status: EntryStatus::Pending,
        attempt: 0,
        message: None,
        logged_at,
        forward_status: ForwardStatus::Unset,
        processed_by: None,
    }
}

/// A weighbridge ticket row as the source stores it.
pub fn ticket(id: i64, partition: &str, weight: i64, weighed_at: NaiveDateTime) -> RowData {
    vec![
        ("NOURUT1", ColumnValue::Int(id)),
        ("PLANT_ID", ColumnValue::from(partition)),
        ("NOPOL", ColumnValue::from("B 1234 XY")),
        ("BERAT", ColumnValue::Int(weight)),
        ("TANGGAL2", ColumnValue::Timestamp(weighed_at)),
    ]
    .into_iter()
    .collect()
}

pub fn settings() -> EngineSettings {
    let columns = ColumnLayout::default();
    EngineSettings {
        skip: SkipList::from_policy(&DiffPolicy::default(), &columns),
        columns,
        provenance_tag: "WB01".to_string(),
        processed_by: "wb01-pc".to_string(),
        batch_size: None,
    }
}

fn same_key(row: &RowData, key: &CompositeKey) -> bool {
    let id = row.get("nourut1").map(ColumnValue::canonical);
    let partition = row.get("plant_id").map(ColumnValue::canonical);
    id.as_deref() == Some(key.id.canonical().as_str())
        && partition.as_deref() == Some(key.partition.canonical().as_str())
}

#[derive(Default)]
pub struct MemoryLog {
    entries: Mutex<Vec<ChangeLogEntry>>,
    pub transitions: Mutex<Vec<StatusTransition>>,
    pub fail_fetch: AtomicBool,
    pub fail_attempt_lookup: AtomicBool,
}

impl MemoryLog {
    pub fn push(&self, entry: ChangeLogEntry) {
        self.entries.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<ChangeLogEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn get(&self, index: usize) -> ChangeLogEntry {
        self.entries.lock().unwrap()[index].clone()
    }

    /// Change a stored entry behind the engine's back.
    pub fn update(&self, index: usize, f: impl FnOnce(&mut ChangeLogEntry)) {
        f(&mut self.entries.lock().unwrap()[index]);
    }

    fn select(&self, f: impl Fn(&ChangeLogEntry) -> bool, limit: Option<usize>) -> Vec<ChangeLogEntry> {
        let mut selected: Vec<ChangeLogEntry> =
            self.entries().into_iter().filter(|e| f(e)).collect();
        selected.sort_by_key(|e| e.logged_at);
        if let Some(limit) = limit {
            selected.truncate(limit);
        }
        selected
    }

    fn same_entry(stored: &ChangeLogEntry, entry: &ChangeLogEntry) -> bool {
        stored.key == entry.key
            && stored.logged_at == entry.logged_at
            && stored.action == entry.action
            && stored.attempt == entry.attempt
    }
}

#[async_trait]
impl ChangeLogStore for MemoryLog {
    async fn fetch_pending(&self, limit: Option<usize>) -> Result<Vec<ChangeLogEntry>> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            bail!("Lost connection to MySQL server during query");
        }
        Ok(self.select(|e| e.status == EntryStatus::Pending, limit))
    }

    async fn latest_attempt(&self, key: &CompositeKey) -> Result<i64> {
        if self.fail_attempt_lookup.load(Ordering::SeqCst) {
            bail!("Lock wait timeout exceeded; try restarting transaction");
        }
        Ok(self
            .entries()
            .iter()
            .filter(|e| &e.key == key)
            .map(|e| e.attempt)
            .max()
            .unwrap_or(0))
    }

    async fn transition(&self, transition: &StatusTransition) -> Result<u64> {
        self.transitions.lock().unwrap().push(transition.clone());
        let mut matched = 0;
        for stored in self.entries.lock().unwrap().iter_mut() {
            if !transition.covers(stored) {
                continue;
            }
            stored.status = transition.status;
            stored.attempt = transition.next_attempt;
            stored.message = Some(match &transition.message {
                MessageUpdate::Replace(m) => m.clone(),
                MessageUpdate::Append(m) => {
                    format!("{}{}", stored.message.clone().unwrap_or_default(), m)
                }
            });
            stored.processed_by = Some(transition.processed_by.clone());
            matched += 1;
        }
        Ok(matched)
    }

    async fn annotate(
        &self,
        entry: &ChangeLogEntry,
        suffix: &str,
        processed_by: &str,
    ) -> Result<()> {
        for stored in self.entries.lock().unwrap().iter_mut() {
            if Self::same_entry(stored, entry) && stored.status == EntryStatus::Pending {
                stored.message = Some(format!(
                    "{}{}",
                    stored.message.clone().unwrap_or_default(),
                    suffix
                ));
                stored.processed_by = Some(processed_by.to_string());
            }
        }
        Ok(())
    }

    async fn fetch_unforwarded(&self, limit: usize) -> Result<Vec<ChangeLogEntry>> {
        Ok(self.select(|e| e.forward_status != ForwardStatus::Sent, Some(limit)))
    }

    async fn mark_forwarded(&self, entry: &ChangeLogEntry) -> Result<()> {
        for stored in self.entries.lock().unwrap().iter_mut() {
            if Self::same_entry(stored, entry) {
                stored.forward_status = ForwardStatus::Sent;
            }
        }
        Ok(())
    }

    async fn mark_forward_failed(&self, entry: &ChangeLogEntry, suffix: &str) -> Result<()> {
        for stored in self.entries.lock().unwrap().iter_mut() {
            if Self::same_entry(stored, entry) {
                stored.forward_status = ForwardStatus::Retry;
                stored.message = Some(format!(
                    "{}{}",
                    stored.message.clone().unwrap_or_default(),
                    suffix
                ));
            }
        }
        Ok(())
    }

    async fn summary(&self) -> Result<LogSummary> {
        let entries = self.entries();
        let mut counts: HashMap<&'static str, i64> = HashMap::new();
        for e in &entries {
            *counts.entry(e.status.as_str()).or_default() += 1;
        }
        let mut by_status: Vec<(String, i64)> = counts
            .into_iter()
            .map(|(status, count)| (status.to_string(), count))
            .collect();
        by_status.sort();
        Ok(LogSummary {
            by_status,
            unforwarded: entries
                .iter()
                .filter(|e| e.forward_status != ForwardStatus::Sent)
                .count() as i64,
        })
    }
}

#[derive(Default)]
pub struct MemorySource {
    rows: Mutex<Vec<RowData>>,
    pub fail_reads: AtomicBool,
}

impl MemorySource {
    pub fn put(&self, row: RowData) {
        let mut rows = self.rows.lock().unwrap();
        rows.retain(|r| {
            !(r.get("nourut1") == row.get("nourut1") && r.get("plant_id") == row.get("plant_id"))
        });
        rows.push(row);
    }

    pub fn remove(&self, key: &CompositeKey) {
        self.rows.lock().unwrap().retain(|r| !same_key(r, key));
    }
}

#[async_trait]
impl SourceStore for MemorySource {
    async fn fetch_row(&self, key: &CompositeKey) -> Result<Option<RowData>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            bail!("Lost connection to MySQL server at 'reading initial communication packet'");
        }
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| same_key(r, key))
            .cloned())
    }
}

#[derive(Default)]
pub struct MemoryDestination {
    rows: Mutex<Vec<RowData>>,
    /// Every partial update issued, in order.
    pub updates: Mutex<Vec<RowData>>,
    pub inserts: AtomicUsize,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
}

impl MemoryDestination {
    pub fn put(&self, row: RowData) {
        self.rows.lock().unwrap().push(row);
    }

    pub fn row(&self, key: &CompositeKey) -> Option<RowData> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| same_key(r, key))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn update_count(&self) -> usize {
        self.updates.lock().unwrap().len()
    }
}

#[async_trait]
impl DestinationStore for MemoryDestination {
    async fn fetch_row(&self, key: &CompositeKey) -> Result<Option<RowData>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            bail!("canceling statement due to statement timeout");
        }
        Ok(self.row(key))
    }

    async fn insert_row(&self, row: &RowData) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("permission denied for table data_timbang");
        }
        let mut rows = self.rows.lock().unwrap();
        let duplicate = rows.iter().any(|r| {
            r.get("nourut1").map(ColumnValue::canonical) == row.get("nourut1").map(ColumnValue::canonical)
                && r.get("plant_id").map(ColumnValue::canonical)
                    == row.get("plant_id").map(ColumnValue::canonical)
        });
        if duplicate {
            bail!("duplicate key value violates unique constraint \"data_timbang_pkey\"");
        }
        // PostgreSQL folds the unquoted column names to lowercase
        rows.push(
            row.iter()
                .map(|(name, value)| (name.to_lowercase(), value.clone()))
                .collect(),
        );
        self.inserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update_row(&self, key: &CompositeKey, values: &RowData) -> Result<u64> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("permission denied for table data_timbang");
        }
        self.updates.lock().unwrap().push(values.clone());
        let mut rows = self.rows.lock().unwrap();
        let Some(row) = rows.iter_mut().find(|r| same_key(r, key)) else {
            return Ok(0);
        };
        for (name, value) in values.iter() {
            row.set(&name.to_lowercase(), value.clone());
        }
        Ok(1)
    }
}

#[derive(Default)]
pub struct MemoryCentral {
    entries: Mutex<Vec<ChangeLogEntry>>,
    /// Inserts for this key fail.
    pub reject: Mutex<Option<CompositeKey>>,
}

impl MemoryCentral {
    pub fn entries(&self) -> Vec<ChangeLogEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl CentralLogStore for MemoryCentral {
    async fn insert_entry(&self, entry: &ChangeLogEntry) -> Result<()> {
        if self.reject.lock().unwrap().as_ref() == Some(&entry.key) {
            bail!("value too long for type character varying(255)");
        }
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

/// All four stores plus connection bookkeeping, shared with every session.
#[derive(Default)]
pub struct Stores {
    pub log: MemoryLog,
    pub source: MemorySource,
    pub destination: MemoryDestination,
    pub central: MemoryCentral,
    pub refuse_connections: AtomicBool,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
}

impl Stores {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

pub struct MemorySession {
    stores: Arc<Stores>,
}

#[async_trait]
impl Session for MemorySession {
    fn log(&self) -> &dyn ChangeLogStore {
        &self.stores.log
    }

    fn source(&self) -> &dyn SourceStore {
        &self.stores.source
    }

    fn destination(&self) -> &dyn DestinationStore {
        &self.stores.destination
    }

    fn central(&self) -> &dyn CentralLogStore {
        &self.stores.central
    }

    async fn close(self: Box<Self>) {
        self.stores.closed.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MemoryConnector {
    pub stores: Arc<Stores>,
}

impl MemoryConnector {
    pub fn new(stores: &Arc<Stores>) -> Self {
        Self {
            stores: Arc::clone(stores),
        }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Box<dyn Session>, SyncError> {
        if self.stores.refuse_connections.load(Ordering::SeqCst) {
            return Err(SyncError::connection(
                "source MySQL",
                anyhow!("Connection refused (os error 111)"),
            ));
        }
        self.stores.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession {
            stores: Arc::clone(&self.stores),
        }))
    }
}
