//! [`RecordStore`] over any [`ConnPool`], statements generated from the
//! entity's table metadata.
//!
//! Works equally against a plain pool or the dual-write pool, which is how
//! the fixer writes repairs through whatever routing is active on the
//! authoritative side's own pool. SQL uses Postgres-style placeholders and
//! `ON CONFLICT` upserts.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::entity::Entity;
use crate::error::StoreError;
use crate::store::{ConnPool, RecordStore, SqlRow, SqlValue};

const DEFAULT_UPDATED_AT_COLUMN: &str = "utime";

pub struct SqlRecordStore<T: Entity> {
    pool: Arc<dyn ConnPool>,
    updated_at_column: &'static str,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> SqlRecordStore<T> {
    pub fn new(pool: Arc<dyn ConnPool>) -> Self {
        Self {
            pool,
            updated_at_column: DEFAULT_UPDATED_AT_COLUMN,
            _entity: PhantomData,
        }
    }

    /// Column holding the row's last-update timestamp in epoch milliseconds,
    /// used by the incremental watermark filter.
    pub fn updated_at_column(mut self, column: &'static str) -> Self {
        self.updated_at_column = column;
        self
    }

    fn column_list() -> String {
        T::COLUMNS.join(", ")
    }

    fn decode(row: SqlRow) -> Result<T, StoreError> {
        serde_json::from_value(serde_json::Value::Object(row))
            .map_err(|e| StoreError::Decode(e.to_string()))
    }

    fn id_from(row: &SqlRow) -> Result<i64, StoreError> {
        row.get("id")
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| StoreError::Decode("id column missing or not an integer".into()))
    }
}

#[async_trait]
impl<T: Entity> RecordStore<T> for SqlRecordStore<T> {
    async fn find_by_id(&self, id: i64) -> Result<Option<T>, StoreError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = $1",
            Self::column_list(),
            T::TABLE
        );
        match self.pool.query_row(&sql, &[json!(id)]).await {
            Ok(row) => Ok(Some(Self::decode(row)?)),
            Err(StoreError::RowNotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn nth_updated_since(
        &self,
        offset: u64,
        watermark_ms: i64,
    ) -> Result<Option<T>, StoreError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} >= $1 ORDER BY id LIMIT 1 OFFSET $2",
            Self::column_list(),
            T::TABLE,
            self.updated_at_column
        );
        match self.pool.query_row(&sql, &[json!(watermark_ms), json!(offset)]).await {
            Ok(row) => Ok(Some(Self::decode(row)?)),
            Err(StoreError::RowNotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn id_batch(&self, offset: u64, limit: u64) -> Result<Vec<i64>, StoreError> {
        let sql = format!(
            "SELECT id FROM {} ORDER BY id LIMIT $1 OFFSET $2",
            T::TABLE
        );
        let rows = self.pool.query(&sql, &[json!(limit), json!(offset)]).await?;
        rows.iter().map(Self::id_from).collect()
    }

    async fn existing_ids(&self, ids: &[i64]) -> Result<Vec<i64>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!("SELECT id FROM {} WHERE id = ANY($1)", T::TABLE);
        let rows = self.pool.query(&sql, &[json!(ids)]).await?;
        rows.iter().map(Self::id_from).collect()
    }

    async fn upsert(&self, row: &T, columns: &[&'static str]) -> Result<(), StoreError> {
        let value = serde_json::to_value(row).map_err(|e| StoreError::Decode(e.to_string()))?;
        let object = value
            .as_object()
            .ok_or_else(|| StoreError::Decode("entity did not serialize to an object".into()))?;
        let placeholders: Vec<String> = (1..=T::COLUMNS.len()).map(|i| format!("${i}")).collect();
        let assignments: Vec<String> = columns
            .iter()
            .filter(|c| **c != "id")
            .map(|c| format!("{c} = EXCLUDED.{c}"))
            .collect();
        // an id-only column list leaves nothing to overwrite
        let conflict_action = if assignments.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", assignments.join(", "))
        };
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT (id) {}",
            T::TABLE,
            Self::column_list(),
            placeholders.join(", "),
            conflict_action
        );
        let args: Vec<SqlValue> = T::COLUMNS
            .iter()
            .map(|c| object.get(*c).cloned().unwrap_or(serde_json::Value::Null))
            .collect();
        self.pool.exec(&sql, &args).await?;
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        let sql = format!("DELETE FROM {} WHERE id = $1", T::TABLE);
        self.pool.exec(&sql, &[json!(id)]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ExecOutcome, Tx};
    use serde::{Deserialize, Serialize};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Gadget {
        id: i64,
        name: String,
        utime: i64,
    }

    impl Entity for Gadget {
        const TABLE: &'static str = "gadgets";
        const COLUMNS: &'static [&'static str] = &["id", "name", "utime"];

        fn id(&self) -> i64 {
            self.id
        }

        fn equals(&self, other: &Self) -> bool {
            self.id == other.id && self.name == other.name
        }
    }

    /// Captures statements and replays canned rows.
    #[derive(Default)]
    struct ScriptedPool {
        calls: Mutex<Vec<(String, Vec<SqlValue>)>>,
        rows: Mutex<Vec<SqlRow>>,
    }

    impl ScriptedPool {
        fn push_row(&self, row: serde_json::Value) {
            if let serde_json::Value::Object(map) = row {
                self.rows.lock().expect("lock").push(map);
            }
        }

        fn calls(&self) -> Vec<(String, Vec<SqlValue>)> {
            self.calls.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl ConnPool for ScriptedPool {
        async fn exec(&self, sql: &str, args: &[SqlValue]) -> Result<ExecOutcome, StoreError> {
            self.calls
                .lock()
                .expect("lock")
                .push((sql.to_string(), args.to_vec()));
            Ok(ExecOutcome::new(1))
        }

        async fn query(&self, sql: &str, args: &[SqlValue]) -> Result<Vec<SqlRow>, StoreError> {
            self.calls
                .lock()
                .expect("lock")
                .push((sql.to_string(), args.to_vec()));
            Ok(self.rows.lock().expect("lock").drain(..).collect())
        }

        async fn query_row(&self, sql: &str, args: &[SqlValue]) -> Result<SqlRow, StoreError> {
            self.calls
                .lock()
                .expect("lock")
                .push((sql.to_string(), args.to_vec()));
            self.rows
                .lock()
                .expect("lock")
                .pop()
                .ok_or(StoreError::RowNotFound)
        }

        async fn begin(&self) -> Result<Box<dyn Tx>, StoreError> {
            Err(StoreError::Unsupported("no transactions in the fake"))
        }
    }

    fn store(pool: &Arc<ScriptedPool>) -> SqlRecordStore<Gadget> {
        SqlRecordStore::new(pool.clone() as Arc<dyn ConnPool>)
    }

    #[tokio::test]
    async fn find_by_id_decodes_or_maps_not_found() {
        let pool = Arc::new(ScriptedPool::default());
        let s = store(&pool);
        assert!(s.find_by_id(1).await.expect("absent row").is_none());

        pool.push_row(json!({"id": 1, "name": "a", "utime": 5}));
        let found = s.find_by_id(1).await.expect("present row").expect("some");
        assert_eq!(found.name, "a");

        let (sql, args) = &pool.calls()[0];
        assert_eq!(sql, "SELECT id, name, utime FROM gadgets WHERE id = $1");
        assert_eq!(args, &vec![json!(1)]);
    }

    #[tokio::test]
    async fn sweep_query_orders_by_id_and_filters_on_watermark() {
        let pool = Arc::new(ScriptedPool::default());
        let s = store(&pool);
        let none = s.nth_updated_since(3, 1_000).await.expect("query");
        assert!(none.is_none());
        let (sql, args) = &pool.calls()[0];
        assert_eq!(
            sql,
            "SELECT id, name, utime FROM gadgets WHERE utime >= $1 ORDER BY id LIMIT 1 OFFSET $2"
        );
        assert_eq!(args, &vec![json!(1_000), json!(3)]);
    }

    #[tokio::test]
    async fn upsert_overwrites_only_listed_columns() {
        let pool = Arc::new(ScriptedPool::default());
        let s = store(&pool);
        s.upsert(
            &Gadget {
                id: 7,
                name: "g".into(),
                utime: 1,
            },
            &["id", "name"],
        )
        .await
        .expect("upsert");
        let (sql, args) = &pool.calls()[0];
        assert_eq!(
            sql,
            "INSERT INTO gadgets (id, name, utime) VALUES ($1, $2, $3) \
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name"
        );
        assert_eq!(args, &vec![json!(7), json!("g"), json!(1)]);
    }

    #[tokio::test]
    async fn id_only_upsert_inserts_without_an_update_clause() {
        let pool = Arc::new(ScriptedPool::default());
        let s = store(&pool);
        s.upsert(
            &Gadget {
                id: 8,
                name: "g".into(),
                utime: 1,
            },
            &["id"],
        )
        .await
        .expect("upsert");
        let (sql, _) = &pool.calls()[0];
        assert_eq!(
            sql,
            "INSERT INTO gadgets (id, name, utime) VALUES ($1, $2, $3) \
             ON CONFLICT (id) DO NOTHING"
        );
    }

    #[tokio::test]
    async fn existing_ids_is_one_bulk_call() {
        let pool = Arc::new(ScriptedPool::default());
        let s = store(&pool);
        pool.push_row(json!({"id": 2}));
        let present = s.existing_ids(&[1, 2, 3]).await.expect("query");
        assert_eq!(present, vec![2]);
        let calls = pool.calls();
        assert_eq!(calls.len(), 1, "bulk lookup, not one call per id");
        assert_eq!(calls[0].0, "SELECT id FROM gadgets WHERE id = ANY($1)");

        assert!(s.existing_ids(&[]).await.expect("empty").is_empty());
        assert_eq!(pool.calls().len(), 1, "empty id set skips the round trip");
    }

    #[tokio::test]
    async fn delete_targets_the_id() {
        let pool = Arc::new(ScriptedPool::default());
        let s = store(&pool);
        s.delete(9).await.expect("delete");
        let (sql, args) = &pool.calls()[0];
        assert_eq!(sql, "DELETE FROM gadgets WHERE id = $1");
        assert_eq!(args, &vec![json!(9)]);
    }
}
