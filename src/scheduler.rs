//! The control plane: one object an operator drives a migration through.
//!
//! Owns the only mutable shared state in the engine — the routing pattern and
//! the two cancellation handles (full, incremental) — behind a single mutex.
//! Starting a run of a kind cancels and replaces the previous one, so at most
//! one full and one incremental run are ever active. Nothing here transitions
//! automatically: every phase change is an explicit operator command.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;

use crate::config::EngineConfig;
use crate::entity::Entity;
use crate::events::{Direction, EventCounters, EventCountersSnapshot, EventProducer};
use crate::pattern::{Pattern, SharedPattern};
use crate::shutdown::{cancel_pair, CancelHandle};
use crate::store::RecordStore;
use crate::validator::Validator;

#[derive(Debug, Default)]
struct RunHandles {
    full: Option<CancelHandle>,
    incremental: Option<CancelHandle>,
}

/// Operator-facing view of the control plane.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub pattern: Pattern,
    pub full_running: bool,
    pub incremental_running: bool,
    pub events: EventCountersSnapshot,
}

pub struct Scheduler<T: Entity> {
    src: Arc<dyn RecordStore<T>>,
    dst: Arc<dyn RecordStore<T>>,
    pattern: SharedPattern,
    producer: Arc<dyn EventProducer>,
    config: EngineConfig,
    counters: Arc<EventCounters>,
    runs: Mutex<RunHandles>,
}

impl<T: Entity> Scheduler<T> {
    /// `pattern` must be the same handle the dual-write pool routes on.
    pub fn new(
        src: Arc<dyn RecordStore<T>>,
        dst: Arc<dyn RecordStore<T>>,
        pattern: SharedPattern,
        producer: Arc<dyn EventProducer>,
    ) -> Self {
        Self {
            src,
            dst,
            pattern,
            producer,
            config: EngineConfig::default(),
            counters: Arc::new(EventCounters::default()),
            runs: Mutex::new(RunHandles::default()),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    fn runs(&self) -> MutexGuard<'_, RunHandles> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Switch the routing pattern seen by the dual-write pool.
    pub fn set_pattern(&self, pattern: Pattern) {
        let _guard = self.runs();
        self.pattern.store(pattern);
        tracing::info!(%pattern, "routing pattern changed");
    }

    pub fn pattern(&self) -> Pattern {
        self.pattern.load()
    }

    /// Build a validator oriented by the current pattern: source-authoritative
    /// patterns validate source→destination, destination-authoritative ones
    /// the reverse. Callers hold the `runs` lock so the single pattern load
    /// here cannot interleave with `set_pattern`; orientation and the
    /// direction stamped on events always agree.
    fn validator(&self) -> Validator<T> {
        let authority = self.pattern.load().authority();
        let (base, target) = match authority {
            Direction::Src => (Arc::clone(&self.src), Arc::clone(&self.dst)),
            Direction::Dst => (Arc::clone(&self.dst), Arc::clone(&self.src)),
        };
        Validator::new(base, target, authority, Arc::clone(&self.producer))
            .batch_size(self.config.batch_size)
            .call_timeout(self.config.call_timeout)
            .counters(Arc::clone(&self.counters))
    }

    /// Start a full validation run, superseding any prior full run.
    pub fn start_full(&self) {
        let mut runs = self.runs();
        let validator = self.validator();
        if let Some(previous) = runs.full.take() {
            previous.cancel();
        }
        let (handle, signal) = cancel_pair();
        runs.full = Some(handle);
        tokio::spawn(async move {
            if let Err(err) = validator.validate(signal).await {
                tracing::warn!(%err, "full validation run ended with error");
            } else {
                tracing::info!("full validation run finished");
            }
        });
    }

    pub fn stop_full(&self) {
        if let Some(handle) = self.runs().full.take() {
            handle.cancel();
        }
    }

    /// Start an incremental run: watermark-filtered, sleeping on exhaustion
    /// instead of terminating. Supersedes any prior incremental run.
    pub fn start_incremental(&self, watermark_ms: i64, interval: Duration) {
        let mut runs = self.runs();
        let validator = self
            .validator()
            .watermark(watermark_ms)
            .sleep_interval(interval);
        if let Some(previous) = runs.incremental.take() {
            previous.cancel();
        }
        let (handle, signal) = cancel_pair();
        runs.incremental = Some(handle);
        tokio::spawn(async move {
            if let Err(err) = validator.validate(signal).await {
                tracing::warn!(%err, "incremental validation run ended with error");
            } else {
                tracing::info!("incremental validation run stopped");
            }
        });
    }

    pub fn stop_incremental(&self) {
        if let Some(handle) = self.runs().incremental.take() {
            handle.cancel();
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        let runs = self.runs();
        SchedulerStatus {
            pattern: self.pattern.load(),
            full_running: runs.full.as_ref().is_some_and(|h| !h.is_canceled()),
            incremental_running: runs.incremental.as_ref().is_some_and(|h| !h.is_canceled()),
            events: self.counters.snapshot(),
        }
    }

    pub fn counters(&self) -> Arc<EventCounters> {
        Arc::clone(&self.counters)
    }
}
