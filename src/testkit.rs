//! In-memory collaborators for tests: a counting connection pool, a
//! BTreeMap-backed record store, and an event producer that collects into a
//! vector. Shipped in the library (not behind `cfg(test)`) so integration
//! tests and downstream wiring tests can use them too.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crate::entity::Entity;
use crate::error::{BusError, StoreError};
use crate::events::producer::EventProducer;
use crate::events::InconsistencyEvent;
use crate::store::{ConnPool, ExecOutcome, RecordStore, SqlRow, SqlValue, Tx};

// ---------------------------------------------------------------------------
// RecordingPool — a ConnPool fake that counts calls and injects failures
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct RecordingState {
    execs: AtomicU64,
    queries: AtomicU64,
    begins: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    tx_execs: AtomicU64,
    fail_exec: AtomicBool,
    fail_begin: AtomicBool,
    fail_commit: AtomicBool,
}

/// Counts every call per store so routing tests can assert the dispatch
/// matrix pattern by pattern.
#[derive(Debug, Clone, Default)]
pub struct RecordingPool {
    state: Arc<RecordingState>,
}

impl RecordingPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_exec(&self, fail: bool) {
        self.state.fail_exec.store(fail, Ordering::Relaxed);
    }

    pub fn fail_begin(&self, fail: bool) {
        self.state.fail_begin.store(fail, Ordering::Relaxed);
    }

    pub fn fail_commit(&self, fail: bool) {
        self.state.fail_commit.store(fail, Ordering::Relaxed);
    }

    pub fn exec_count(&self) -> u64 {
        self.state.execs.load(Ordering::Relaxed)
    }

    pub fn query_count(&self) -> u64 {
        self.state.queries.load(Ordering::Relaxed)
    }

    pub fn begin_count(&self) -> u64 {
        self.state.begins.load(Ordering::Relaxed)
    }

    pub fn commit_count(&self) -> u64 {
        self.state.commits.load(Ordering::Relaxed)
    }

    pub fn rollback_count(&self) -> u64 {
        self.state.rollbacks.load(Ordering::Relaxed)
    }

    pub fn tx_exec_count(&self) -> u64 {
        self.state.tx_execs.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ConnPool for RecordingPool {
    async fn exec(&self, _sql: &str, _args: &[SqlValue]) -> Result<ExecOutcome, StoreError> {
        self.state.execs.fetch_add(1, Ordering::Relaxed);
        if self.state.fail_exec.load(Ordering::Relaxed) {
            return Err(StoreError::Backend("induced exec failure".into()));
        }
        Ok(ExecOutcome::new(1))
    }

    async fn query(&self, _sql: &str, _args: &[SqlValue]) -> Result<Vec<SqlRow>, StoreError> {
        self.state.queries.fetch_add(1, Ordering::Relaxed);
        Ok(Vec::new())
    }

    async fn query_row(&self, _sql: &str, _args: &[SqlValue]) -> Result<SqlRow, StoreError> {
        self.state.queries.fetch_add(1, Ordering::Relaxed);
        Err(StoreError::RowNotFound)
    }

    async fn begin(&self) -> Result<Box<dyn Tx>, StoreError> {
        self.state.begins.fetch_add(1, Ordering::Relaxed);
        if self.state.fail_begin.load(Ordering::Relaxed) {
            return Err(StoreError::Backend("induced begin failure".into()));
        }
        Ok(Box::new(RecordingTx {
            state: Arc::clone(&self.state),
        }))
    }
}

struct RecordingTx {
    state: Arc<RecordingState>,
}

#[async_trait]
impl Tx for RecordingTx {
    async fn exec(&mut self, _sql: &str, _args: &[SqlValue]) -> Result<ExecOutcome, StoreError> {
        self.state.tx_execs.fetch_add(1, Ordering::Relaxed);
        if self.state.fail_exec.load(Ordering::Relaxed) {
            return Err(StoreError::Backend("induced tx exec failure".into()));
        }
        Ok(ExecOutcome::new(1))
    }

    async fn query(&mut self, _sql: &str, _args: &[SqlValue]) -> Result<Vec<SqlRow>, StoreError> {
        self.state.queries.fetch_add(1, Ordering::Relaxed);
        Ok(Vec::new())
    }

    async fn query_row(&mut self, _sql: &str, _args: &[SqlValue]) -> Result<SqlRow, StoreError> {
        self.state.queries.fetch_add(1, Ordering::Relaxed);
        Err(StoreError::RowNotFound)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.state.commits.fetch_add(1, Ordering::Relaxed);
        if self.state.fail_commit.load(Ordering::Relaxed) {
            return Err(StoreError::Backend("induced commit failure".into()));
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.state.rollbacks.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemStore — a RecordStore over a BTreeMap
// ---------------------------------------------------------------------------

/// BTreeMap-backed record store; iteration order doubles as id order.
/// Each row carries an update timestamp for watermark filtering.
pub struct MemStore<T> {
    rows: Mutex<BTreeMap<i64, (T, i64)>>,
    find_errors: AtomicBool,
    sweep_reads: AtomicU64,
    read_delay_ms: AtomicU64,
}

impl<T: Entity + Clone> MemStore<T> {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(BTreeMap::new()),
            find_errors: AtomicBool::new(false),
            sweep_reads: AtomicU64::new(0),
            read_delay_ms: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<i64, (T, i64)>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, row: T) {
        self.insert_at(row, 0);
    }

    pub fn insert_at(&self, row: T, utime_ms: i64) {
        self.lock().insert(row.id(), (row, utime_ms));
    }

    pub fn get(&self, id: i64) -> Option<T> {
        self.lock().get(&id).map(|(row, _)| row.clone())
    }

    pub fn ids(&self) -> Vec<i64> {
        self.lock().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Make subsequent lookups fail with a backend error.
    pub fn fail_finds(&self, fail: bool) {
        self.find_errors.store(fail, Ordering::Relaxed);
    }

    /// How many forward-sweep page reads have hit this store. Lets tests
    /// observe whether a validation run is still alive.
    pub fn sweep_read_count(&self) -> u64 {
        self.sweep_reads.load(Ordering::Relaxed)
    }

    /// Slow every forward-sweep page read down, keeping a run alive long
    /// enough for lifecycle tests to watch it.
    pub fn read_delay(&self, delay: std::time::Duration) {
        self.read_delay_ms
            .store(delay.as_millis() as u64, Ordering::Relaxed);
    }
}

impl<T: Entity + Clone> Default for MemStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Entity + Clone> RecordStore<T> for MemStore<T> {
    async fn find_by_id(&self, id: i64) -> Result<Option<T>, StoreError> {
        if self.find_errors.load(Ordering::Relaxed) {
            return Err(StoreError::Backend("induced find failure".into()));
        }
        Ok(self.get(id))
    }

    async fn nth_updated_since(
        &self,
        offset: u64,
        watermark_ms: i64,
    ) -> Result<Option<T>, StoreError> {
        self.sweep_reads.fetch_add(1, Ordering::Relaxed);
        let delay_ms = self.read_delay_ms.load(Ordering::Relaxed);
        if delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
        }
        Ok(self
            .lock()
            .values()
            .filter(|(_, utime)| *utime >= watermark_ms)
            .nth(offset as usize)
            .map(|(row, _)| row.clone()))
    }

    async fn id_batch(&self, offset: u64, limit: u64) -> Result<Vec<i64>, StoreError> {
        Ok(self
            .lock()
            .keys()
            .skip(offset as usize)
            .take(limit as usize)
            .copied()
            .collect())
    }

    async fn existing_ids(&self, ids: &[i64]) -> Result<Vec<i64>, StoreError> {
        let rows = self.lock();
        Ok(ids.iter().copied().filter(|id| rows.contains_key(id)).collect())
    }

    async fn upsert(&self, row: &T, columns: &[&'static str]) -> Result<(), StoreError> {
        let id = row.id();
        let mut rows = self.lock();
        match rows.get(&id) {
            None => {
                rows.insert(id, (row.clone(), 0));
            }
            Some((existing, utime)) => {
                // overwrite only the listed columns, as the SQL upsert does
                let mut merged = serde_json::to_value(existing)
                    .map_err(|e| StoreError::Decode(e.to_string()))?;
                let incoming =
                    serde_json::to_value(row).map_err(|e| StoreError::Decode(e.to_string()))?;
                if let (Some(merged), Some(incoming)) =
                    (merged.as_object_mut(), incoming.as_object())
                {
                    for column in columns {
                        if let Some(value) = incoming.get(*column) {
                            merged.insert((*column).to_string(), value.clone());
                        }
                    }
                }
                let updated: T = serde_json::from_value(merged)
                    .map_err(|e| StoreError::Decode(e.to_string()))?;
                let utime = *utime;
                rows.insert(id, (updated, utime));
            }
        }
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        self.lock().remove(&id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CollectingProducer — records published events for assertions
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct CollectingProducer {
    events: Mutex<Vec<InconsistencyEvent>>,
}

impl CollectingProducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<InconsistencyEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl EventProducer for CollectingProducer {
    async fn publish(&self, event: InconsistencyEvent) -> Result<(), BusError> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        Ok(())
    }
}
