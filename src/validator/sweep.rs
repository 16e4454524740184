//! The sweeping validator: two concurrent directional passes over one table.
//!
//! The forward pass walks `base` in id order and checks each row against
//! `target`; it can only see rows the base has. The reverse pass walks
//! `target` in id batches and bulk-checks existence in `base`, catching rows
//! that exist only in the target (orphans from partial rollbacks). Both
//! passes share a cursor discipline: primary-key ordering keeps pagination
//! stable while writers move the table underneath.
//!
//! Full mode ends on exhaustion. Incremental mode (a positive sleep interval
//! plus an optional update-time watermark) sleeps and retries instead,
//! because new rows keep arriving.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use crate::entity::Entity;
use crate::error::StoreError;
use crate::events::{Direction, EventCounters, EventProducer, InconsistencyKind};
use crate::shutdown::CancelSignal;
use crate::store::RecordStore;
use crate::validator::Reporter;

const DEFAULT_BATCH_SIZE: u64 = 100;
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(1);

pub struct Validator<T: Entity> {
    base: Arc<dyn RecordStore<T>>,
    target: Arc<dyn RecordStore<T>>,
    reporter: Reporter,
    batch_size: u64,
    watermark_ms: i64,
    sleep_interval: Option<Duration>,
    call_timeout: Duration,
}

impl<T: Entity> Validator<T> {
    /// Defaults to a full validation: no watermark, terminate on exhaustion.
    pub fn new(
        base: Arc<dyn RecordStore<T>>,
        target: Arc<dyn RecordStore<T>>,
        direction: Direction,
        producer: Arc<dyn EventProducer>,
    ) -> Self {
        Self {
            base,
            target,
            reporter: Reporter::new(direction, producer),
            batch_size: DEFAULT_BATCH_SIZE,
            watermark_ms: 0,
            sleep_interval: None,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Only consider base rows updated at or after this timestamp.
    pub fn watermark(mut self, watermark_ms: i64) -> Self {
        self.watermark_ms = watermark_ms;
        self
    }

    /// Switch to incremental mode: sleep this long on exhaustion and retry
    /// instead of terminating.
    pub fn sleep_interval(mut self, interval: Duration) -> Self {
        self.sleep_interval = Some(interval);
        self
    }

    pub fn batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Share a counter set across runs (the scheduler passes its own).
    pub fn counters(mut self, counters: Arc<EventCounters>) -> Self {
        self.reporter = self.reporter.with_counters(counters);
        self
    }

    pub fn counter_handle(&self) -> Arc<EventCounters> {
        self.reporter.counters()
    }

    /// Run both sweeps to completion. First failure cancels the sibling;
    /// cancellation and per-call deadline expiry end a sweep cleanly.
    pub async fn validate(&self, cancel: CancelSignal) -> Result<(), StoreError> {
        tracing::info!(
            direction = %self.reporter.direction(),
            watermark_ms = self.watermark_ms,
            incremental = self.sleep_interval.is_some(),
            "validation run starting"
        );
        tokio::try_join!(
            self.base_to_target(cancel.clone()),
            self.target_to_base(cancel)
        )?;
        Ok(())
    }

    /// Sleep for the incremental interval, waking early on cancellation.
    /// Returns false when the run should stop.
    async fn pause(&self, cancel: &mut CancelSignal, interval: Duration) -> bool {
        tokio::select! {
            _ = cancel.canceled() => false,
            _ = tokio::time::sleep(interval) => true,
        }
    }

    async fn base_to_target(&self, mut cancel: CancelSignal) -> Result<(), StoreError> {
        let mut offset = 0u64;
        loop {
            if cancel.is_canceled() {
                return Ok(());
            }
            let page = timeout(
                self.call_timeout,
                self.base.nth_updated_since(offset, self.watermark_ms),
            )
            .await;
            match page {
                Err(_) => {
                    // deadline mid-page ends the sweep cleanly
                    tracing::debug!(offset, "base sweep page timed out; ending sweep");
                    return Ok(());
                }
                Ok(Ok(Some(row))) => {
                    self.check_against_target(&row).await;
                    offset += 1;
                }
                Ok(Ok(None)) => match self.sleep_interval {
                    None => return Ok(()),
                    Some(interval) => {
                        if !self.pause(&mut cancel, interval).await {
                            return Ok(());
                        }
                        // same offset: new rows will appear at or after it
                    }
                },
                Ok(Err(err)) => {
                    tracing::warn!(%err, offset, "base sweep read failed; skipping row");
                    offset += 1;
                }
            }
        }
    }

    async fn check_against_target(&self, base_row: &T) {
        let id = base_row.id();
        match timeout(self.call_timeout, self.target.find_by_id(id)).await {
            Ok(Ok(Some(target_row))) => {
                if !base_row.equals(&target_row) {
                    self.reporter.report(id, InconsistencyKind::NotEqual).await;
                }
            }
            Ok(Ok(None)) => {
                self.reporter
                    .report(id, InconsistencyKind::TargetMissing)
                    .await;
            }
            Ok(Err(err)) => {
                tracing::warn!(%err, id, "target lookup failed during base sweep");
            }
            Err(_) => {
                tracing::warn!(id, "target lookup timed out during base sweep");
            }
        }
    }

    async fn target_to_base(&self, mut cancel: CancelSignal) -> Result<(), StoreError> {
        let mut offset = 0u64;
        loop {
            if cancel.is_canceled() {
                return Ok(());
            }
            let batch = timeout(
                self.call_timeout,
                self.target.id_batch(offset, self.batch_size),
            )
            .await;
            let ids = match batch {
                Err(_) => {
                    tracing::debug!(offset, "reverse sweep page timed out; ending sweep");
                    return Ok(());
                }
                Ok(Err(err)) => {
                    tracing::warn!(%err, offset, "reverse sweep read failed; skipping page");
                    offset += self.batch_size;
                    continue;
                }
                Ok(Ok(ids)) => ids,
            };
            if !ids.is_empty() {
                self.report_base_missing(&ids).await;
            }
            if (ids.len() as u64) < self.batch_size {
                match self.sleep_interval {
                    None => return Ok(()),
                    Some(interval) => {
                        offset += ids.len() as u64;
                        if !self.pause(&mut cancel, interval).await {
                            return Ok(());
                        }
                    }
                }
            } else {
                offset += self.batch_size;
            }
        }
    }

    /// Bulk existence check: ids in `target` but absent from `base` are
    /// orphans to report.
    async fn report_base_missing(&self, ids: &[i64]) {
        match timeout(self.call_timeout, self.base.existing_ids(ids)).await {
            Ok(Ok(present)) => {
                for id in ids {
                    if !present.contains(id) {
                        self.reporter
                            .report(*id, InconsistencyKind::BaseMissing)
                            .await;
                    }
                }
            }
            Ok(Err(err)) => {
                tracing::warn!(%err, batch = ids.len(), "base existence check failed");
            }
            Err(_) => {
                tracing::warn!(batch = ids.len(), "base existence check timed out");
            }
        }
    }
}
