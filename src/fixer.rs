//! Repair of a single detected divergence.

use std::sync::Arc;

use crate::entity::Entity;
use crate::error::StoreError;
use crate::store::RecordStore;

/// Makes the authoritative store's state win for one id: copy the row over,
/// or delete the orphan. Both paths are idempotent, so redelivered events are
/// safe to replay.
pub struct Fixer<T: Entity> {
    base: Arc<dyn RecordStore<T>>,
    target: Arc<dyn RecordStore<T>>,
    columns: Vec<&'static str>,
}

impl<T: Entity> Fixer<T> {
    /// `base` is the authoritative store. The overwrite list defaults to the
    /// entity's full column set.
    pub fn new(base: Arc<dyn RecordStore<T>>, target: Arc<dyn RecordStore<T>>) -> Self {
        Self {
            base,
            target,
            columns: T::COLUMNS.to_vec(),
        }
    }

    /// Restrict the overwrite to these columns, preserving machine-assigned
    /// columns that exist only in the target schema.
    pub fn columns(mut self, columns: &[&'static str]) -> Self {
        self.columns = columns.to_vec();
        self
    }

    pub async fn fix(&self, id: i64) -> Result<(), StoreError> {
        match self.base.find_by_id(id).await? {
            Some(row) => self.target.upsert(&row, &self.columns).await,
            None => self.target.delete(id).await,
        }
    }
}
