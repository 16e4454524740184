//! sqlx-backed [`ConnPool`] for Postgres. Enabled by the `database` feature.
//!
//! Bridges the engine's JSON row representation onto `sqlx::PgPool`. Covers
//! the scalar column types migrated tables actually carry (integers, floats,
//! booleans, text, timestamps, json); anything else surfaces as a decode
//! error rather than a silently mangled value.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::postgres::{PgArguments, PgPool, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Postgres, Row, TypeInfo};

use crate::error::StoreError;
use crate::store::{ConnPool, ExecOutcome, SqlRow, SqlValue, Tx};

pub struct PostgresPool {
    pool: PgPool,
}

impl PostgresPool {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Convenience: wrap as the trait object the engine wires with.
    pub fn shared(pool: PgPool) -> Arc<dyn ConnPool> {
        Arc::new(Self::new(pool))
    }
}

fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::RowNotFound => StoreError::RowNotFound,
        other => StoreError::Backend(other.to_string()),
    }
}

fn bind_args<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    args: &[SqlValue],
) -> Query<'q, Postgres, PgArguments> {
    for arg in args {
        query = match arg {
            SqlValue::Null => query.bind(Option::<String>::None),
            SqlValue::Bool(b) => query.bind(*b),
            SqlValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    query.bind(i)
                } else {
                    query.bind(n.as_f64().unwrap_or_default())
                }
            }
            SqlValue::String(s) => query.bind(s.clone()),
            // arrays of integers (bulk id lookups) get a typed binding;
            // everything else rides the driver's json support
            SqlValue::Array(items) if items.iter().all(SqlValue::is_i64) => {
                let ids: Vec<i64> = items.iter().filter_map(SqlValue::as_i64).collect();
                query.bind(ids)
            }
            other => query.bind(other.clone()),
        };
    }
    query
}

fn row_to_json(row: &PgRow) -> Result<SqlRow, StoreError> {
    let mut out = SqlRow::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let name = column.name().to_string();
        let type_name = column.type_info().name();
        let value = match type_name {
            "INT2" => row
                .try_get::<Option<i16>, _>(idx)
                .map(|v| v.map(|v| serde_json::json!(v))),
            "INT4" => row
                .try_get::<Option<i32>, _>(idx)
                .map(|v| v.map(|v| serde_json::json!(v))),
            "INT8" => row
                .try_get::<Option<i64>, _>(idx)
                .map(|v| v.map(|v| serde_json::json!(v))),
            "FLOAT4" => row
                .try_get::<Option<f32>, _>(idx)
                .map(|v| v.map(|v| serde_json::json!(v))),
            "FLOAT8" => row
                .try_get::<Option<f64>, _>(idx)
                .map(|v| v.map(|v| serde_json::json!(v))),
            "BOOL" => row
                .try_get::<Option<bool>, _>(idx)
                .map(|v| v.map(|v| serde_json::json!(v))),
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => row
                .try_get::<Option<String>, _>(idx)
                .map(|v| v.map(|v| serde_json::json!(v))),
            "TIMESTAMPTZ" => row
                .try_get::<Option<DateTime<Utc>>, _>(idx)
                .map(|v| v.map(|v| serde_json::json!(v.to_rfc3339()))),
            "TIMESTAMP" => row
                .try_get::<Option<NaiveDateTime>, _>(idx)
                .map(|v| v.map(|v| serde_json::json!(v.to_string()))),
            "DATE" => row
                .try_get::<Option<NaiveDate>, _>(idx)
                .map(|v| v.map(|v| serde_json::json!(v.to_string()))),
            "JSON" | "JSONB" => row.try_get::<Option<serde_json::Value>, _>(idx),
            other => {
                return Err(StoreError::Decode(format!(
                    "unsupported column type {other} for column {name}"
                )))
            }
        }
        .map_err(map_sqlx_error)?;
        out.insert(name, value.unwrap_or(serde_json::Value::Null));
    }
    Ok(out)
}

#[async_trait]
impl ConnPool for PostgresPool {
    async fn exec(&self, sql: &str, args: &[SqlValue]) -> Result<ExecOutcome, StoreError> {
        let result = bind_args(sqlx::query(sql), args)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(ExecOutcome::new(result.rows_affected()))
    }

    async fn query(&self, sql: &str, args: &[SqlValue]) -> Result<Vec<SqlRow>, StoreError> {
        let rows = bind_args(sqlx::query(sql), args)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        rows.iter().map(row_to_json).collect()
    }

    async fn query_row(&self, sql: &str, args: &[SqlValue]) -> Result<SqlRow, StoreError> {
        let row = bind_args(sqlx::query(sql), args)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .ok_or(StoreError::RowNotFound)?;
        row_to_json(&row)
    }

    async fn begin(&self) -> Result<Box<dyn Tx>, StoreError> {
        let tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        Ok(Box::new(PostgresTx { tx }))
    }
}

pub struct PostgresTx {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl Tx for PostgresTx {
    async fn exec(&mut self, sql: &str, args: &[SqlValue]) -> Result<ExecOutcome, StoreError> {
        let result = bind_args(sqlx::query(sql), args)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(ExecOutcome::new(result.rows_affected()))
    }

    async fn query(&mut self, sql: &str, args: &[SqlValue]) -> Result<Vec<SqlRow>, StoreError> {
        let rows = bind_args(sqlx::query(sql), args)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        rows.iter().map(row_to_json).collect()
    }

    async fn query_row(&mut self, sql: &str, args: &[SqlValue]) -> Result<SqlRow, StoreError> {
        let row = bind_args(sqlx::query(sql), args)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?
            .ok_or(StoreError::RowNotFound)?;
        row_to_json(&row)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(map_sqlx_error)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(map_sqlx_error)
    }
}
