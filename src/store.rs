//! Collaborator interfaces for the two datastores.
//!
//! The engine never talks to a driver directly. It needs exactly two shapes:
//! a connection pool (`ConnPool`/`Tx`) that the dual-write proxy wraps, and a
//! typed per-entity view (`RecordStore`) that the validator and fixer read
//! and repair through. Rows cross these seams as JSON object maps so the
//! engine stays generic over the concrete driver.

use async_trait::async_trait;

use crate::entity::Entity;
use crate::error::StoreError;

/// A bind parameter.
pub type SqlValue = serde_json::Value;

/// One row, keyed by column name.
pub type SqlRow = serde_json::Map<String, serde_json::Value>;

/// Result of a write, including the named best-effort outcome of a dual
/// write: a secondary replication failure never fails the call, but it is
/// carried here so callers and tests can see it without parsing logs.
#[derive(Debug, Default)]
pub struct ExecOutcome {
    pub rows_affected: u64,
    pub secondary_error: Option<StoreError>,
}

impl ExecOutcome {
    pub fn new(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            secondary_error: None,
        }
    }
}

/// The pool-shaped abstraction over one store.
///
/// Safe for concurrent use; the engine only ever reads through it.
#[async_trait]
pub trait ConnPool: Send + Sync {
    async fn exec(&self, sql: &str, args: &[SqlValue]) -> Result<ExecOutcome, StoreError>;

    async fn query(&self, sql: &str, args: &[SqlValue]) -> Result<Vec<SqlRow>, StoreError>;

    /// Single-row query. Returns `StoreError::RowNotFound` when no row
    /// matches — callers that treat absence as data map it back to `None`.
    async fn query_row(&self, sql: &str, args: &[SqlValue]) -> Result<SqlRow, StoreError>;

    async fn begin(&self) -> Result<Box<dyn Tx>, StoreError>;

    /// Warm a driver-level prepared statement. Single-store pools may treat
    /// this as a no-op; the dual-write pool rejects it under dual patterns
    /// because a cached statement would bind to only one store.
    async fn prepare(&self, _sql: &str) -> Result<(), StoreError> {
        Ok(())
    }
}

/// An open transaction on one (or, behind the dual-write pool, two) stores.
#[async_trait]
pub trait Tx: Send {
    async fn exec(&mut self, sql: &str, args: &[SqlValue]) -> Result<ExecOutcome, StoreError>;

    async fn query(&mut self, sql: &str, args: &[SqlValue]) -> Result<Vec<SqlRow>, StoreError>;

    async fn query_row(&mut self, sql: &str, args: &[SqlValue]) -> Result<SqlRow, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Typed view of one entity table, the surface the validator and fixer work
/// against. `SqlRecordStore` implements it over any `ConnPool`; tests use an
/// in-memory implementation.
///
/// Exhaustion is `Ok(None)` / a short batch, never an error.
#[async_trait]
pub trait RecordStore<T: Entity>: Send + Sync {
    async fn find_by_id(&self, id: i64) -> Result<Option<T>, StoreError>;

    /// The row at position `offset` when the table is ordered by id and
    /// filtered to rows updated at or after `watermark_ms` (0 = everything).
    /// Primary-key ordering keeps the pagination stable while the table
    /// moves underneath the sweep.
    async fn nth_updated_since(
        &self,
        offset: u64,
        watermark_ms: i64,
    ) -> Result<Option<T>, StoreError>;

    /// Up to `limit` ids starting at `offset`, ordered by id.
    async fn id_batch(&self, offset: u64, limit: u64) -> Result<Vec<i64>, StoreError>;

    /// Which of `ids` exist here. One bulk call, not one lookup per id.
    async fn existing_ids(&self, ids: &[i64]) -> Result<Vec<i64>, StoreError>;

    /// Insert or overwrite, touching only `columns`. Idempotent.
    async fn upsert(&self, row: &T, columns: &[&'static str]) -> Result<(), StoreError>;

    /// Remove by id. Deleting an absent row is not an error.
    async fn delete(&self, id: i64) -> Result<(), StoreError>;
}
