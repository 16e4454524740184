//! The write-routing proxy: one pool-shaped front over two stores.
//!
//! Every operation loads the shared [`Pattern`] afresh and dispatches:
//! single-store patterns touch exactly one pool, dual patterns execute on the
//! primary and then best-effort replicate to the secondary. The primary's
//! result is always the call's result; a secondary failure is logged, counted
//! and carried in [`ExecOutcome::secondary_error`] for the validator/fixer
//! loop to reconcile. The destination store (still under validation) can
//! therefore never destabilize the source of truth.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::pattern::{Pattern, SharedPattern};
use crate::store::{ConnPool, ExecOutcome, SqlRow, SqlValue, Tx};

/// Counters for swallowed secondary-side failures.
#[derive(Debug, Default)]
pub struct PoolStats {
    secondary_exec_failures: AtomicU64,
    secondary_begin_failures: AtomicU64,
    secondary_commit_failures: AtomicU64,
    secondary_rollback_failures: AtomicU64,
}

impl PoolStats {
    pub fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            secondary_exec_failures: self.secondary_exec_failures.load(Ordering::Relaxed),
            secondary_begin_failures: self.secondary_begin_failures.load(Ordering::Relaxed),
            secondary_commit_failures: self.secondary_commit_failures.load(Ordering::Relaxed),
            secondary_rollback_failures: self.secondary_rollback_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatsSnapshot {
    pub secondary_exec_failures: u64,
    pub secondary_begin_failures: u64,
    pub secondary_commit_failures: u64,
    pub secondary_rollback_failures: u64,
}

/// Dual-write connection pool. Implements [`ConnPool`] so application code
/// and the generic record store are oblivious to the migration.
pub struct DoubleWritePool {
    src: Arc<dyn ConnPool>,
    dst: Arc<dyn ConnPool>,
    pattern: SharedPattern,
    stats: Arc<PoolStats>,
}

impl DoubleWritePool {
    pub fn new(src: Arc<dyn ConnPool>, dst: Arc<dyn ConnPool>, pattern: SharedPattern) -> Self {
        Self {
            src,
            dst,
            pattern,
            stats: Arc::new(PoolStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<PoolStats> {
        Arc::clone(&self.stats)
    }

    /// Primary lane plus the secondary lane if the pattern is dual.
    fn lanes(&self, pattern: Pattern) -> (&Arc<dyn ConnPool>, Option<&Arc<dyn ConnPool>>) {
        match pattern {
            Pattern::SrcOnly => (&self.src, None),
            Pattern::SrcFirst => (&self.src, Some(&self.dst)),
            Pattern::DstFirst => (&self.dst, Some(&self.src)),
            Pattern::DstOnly => (&self.dst, None),
        }
    }
}

#[async_trait]
impl ConnPool for DoubleWritePool {
    async fn exec(&self, sql: &str, args: &[SqlValue]) -> Result<ExecOutcome, StoreError> {
        let pattern = self.pattern.load();
        let (primary, secondary) = self.lanes(pattern);
        let mut outcome = primary.exec(sql, args).await?;
        if let Some(secondary) = secondary {
            if let Err(err) = secondary.exec(sql, args).await {
                self.stats
                    .secondary_exec_failures
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    %err,
                    %pattern,
                    sql,
                    "secondary write failed; left for the validation loop"
                );
                outcome.secondary_error = Some(err);
            }
        }
        Ok(outcome)
    }

    async fn query(&self, sql: &str, args: &[SqlValue]) -> Result<Vec<SqlRow>, StoreError> {
        // Reads go to the primary only: one consistent snapshot.
        let (primary, _) = self.lanes(self.pattern.load());
        primary.query(sql, args).await
    }

    async fn query_row(&self, sql: &str, args: &[SqlValue]) -> Result<SqlRow, StoreError> {
        let (primary, _) = self.lanes(self.pattern.load());
        primary.query_row(sql, args).await
    }

    async fn begin(&self) -> Result<Box<dyn Tx>, StoreError> {
        let pattern = self.pattern.load();
        let (primary, secondary) = self.lanes(pattern);
        let primary_tx = primary.begin().await?;
        let secondary_tx = match secondary {
            None => None,
            Some(pool) => match pool.begin().await {
                Ok(tx) => Some(tx),
                Err(err) => {
                    // Never hand back a half-open dual transaction.
                    self.stats
                        .secondary_begin_failures
                        .fetch_add(1, Ordering::Relaxed);
                    if let Err(rollback_err) = primary_tx.rollback().await {
                        tracing::error!(
                            %rollback_err,
                            %pattern,
                            "primary rollback failed after secondary begin failure"
                        );
                    }
                    return Err(err);
                }
            },
        };
        Ok(Box::new(DoubleWriteTx {
            primary: primary_tx,
            secondary: secondary_tx,
            pattern,
            stats: Arc::clone(&self.stats),
        }))
    }

    async fn prepare(&self, sql: &str) -> Result<(), StoreError> {
        let pattern = self.pattern.load();
        if pattern.is_dual() {
            // A driver-cached statement would silently bind to one store.
            return Err(StoreError::Unsupported(
                "driver-level prepared statements in dual-write mode",
            ));
        }
        let (primary, _) = self.lanes(pattern);
        primary.prepare(sql).await
    }
}

/// A begun dual transaction. The lanes are captured at begin time, so a
/// pattern change mid-transaction does not reroute statements already in
/// flight — validation runs between phase transitions absorb that window.
pub struct DoubleWriteTx {
    primary: Box<dyn Tx>,
    secondary: Option<Box<dyn Tx>>,
    pattern: Pattern,
    stats: Arc<PoolStats>,
}

#[async_trait]
impl Tx for DoubleWriteTx {
    async fn exec(&mut self, sql: &str, args: &[SqlValue]) -> Result<ExecOutcome, StoreError> {
        let mut outcome = self.primary.exec(sql, args).await?;
        if let Some(secondary) = self.secondary.as_mut() {
            if let Err(err) = secondary.exec(sql, args).await {
                self.stats
                    .secondary_exec_failures
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    %err,
                    pattern = %self.pattern,
                    sql,
                    "secondary transactional write failed; left for the validation loop"
                );
                outcome.secondary_error = Some(err);
            }
        }
        Ok(outcome)
    }

    async fn query(&mut self, sql: &str, args: &[SqlValue]) -> Result<Vec<SqlRow>, StoreError> {
        self.primary.query(sql, args).await
    }

    async fn query_row(&mut self, sql: &str, args: &[SqlValue]) -> Result<SqlRow, StoreError> {
        self.primary.query_row(sql, args).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        let result = this.primary.commit().await;
        if let Some(secondary) = this.secondary {
            if let Err(err) = secondary.commit().await {
                this.stats
                    .secondary_commit_failures
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%err, pattern = %this.pattern, "secondary commit failed");
            }
        }
        result
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        let result = this.primary.rollback().await;
        if let Some(secondary) = this.secondary {
            if let Err(err) = secondary.rollback().await {
                this.stats
                    .secondary_rollback_failures
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%err, pattern = %this.pattern, "secondary rollback failed");
            }
        }
        result
    }
}
