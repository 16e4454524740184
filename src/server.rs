//! HTTP control plane for the migration scheduler. Enabled by the `server`
//! feature.
//!
//! One POST per operator command, mirroring the four-phase walk plus the
//! validation lifecycle, and a GET for status. Replies use a small
//! code/message envelope.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::entity::Entity;
use crate::error::SchedulerError;
use crate::pattern::Pattern;
use crate::scheduler::{Scheduler, SchedulerStatus};

#[derive(Debug, Serialize)]
pub struct ApiReply {
    pub code: i32,
    pub msg: String,
}

impl ApiReply {
    fn ok() -> Json<Self> {
        Json(Self {
            code: 0,
            msg: "OK".into(),
        })
    }

    fn bad_request(msg: impl Into<String>) -> Json<Self> {
        Json(Self {
            code: 4,
            msg: msg.into(),
        })
    }
}

/// Body of `POST /migration/incr/start`; both values are milliseconds.
#[derive(Debug, Deserialize)]
pub struct StartIncrementalRequest {
    pub utime: i64,
    pub interval: i64,
}

/// Build the control-plane router for one migrated entity type.
pub fn router<T: Entity>(scheduler: Arc<Scheduler<T>>) -> Router {
    Router::new()
        .route("/migration/src_only", post(src_only::<T>))
        .route("/migration/src_first", post(src_first::<T>))
        .route("/migration/dst_first", post(dst_first::<T>))
        .route("/migration/dst_only", post(dst_only::<T>))
        .route("/migration/full/start", post(start_full::<T>))
        .route("/migration/full/stop", post(stop_full::<T>))
        .route("/migration/incr/start", post(start_incremental::<T>))
        .route("/migration/incr/stop", post(stop_incremental::<T>))
        .route("/migration/status", get(status::<T>))
        .layer(TraceLayer::new_for_http())
        .with_state(scheduler)
}

async fn src_only<T: Entity>(State(scheduler): State<Arc<Scheduler<T>>>) -> Json<ApiReply> {
    scheduler.set_pattern(Pattern::SrcOnly);
    ApiReply::ok()
}

async fn src_first<T: Entity>(State(scheduler): State<Arc<Scheduler<T>>>) -> Json<ApiReply> {
    scheduler.set_pattern(Pattern::SrcFirst);
    ApiReply::ok()
}

async fn dst_first<T: Entity>(State(scheduler): State<Arc<Scheduler<T>>>) -> Json<ApiReply> {
    scheduler.set_pattern(Pattern::DstFirst);
    ApiReply::ok()
}

async fn dst_only<T: Entity>(State(scheduler): State<Arc<Scheduler<T>>>) -> Json<ApiReply> {
    scheduler.set_pattern(Pattern::DstOnly);
    ApiReply::ok()
}

async fn start_full<T: Entity>(State(scheduler): State<Arc<Scheduler<T>>>) -> Json<ApiReply> {
    scheduler.start_full();
    ApiReply::ok()
}

async fn stop_full<T: Entity>(State(scheduler): State<Arc<Scheduler<T>>>) -> Json<ApiReply> {
    scheduler.stop_full();
    ApiReply::ok()
}

async fn start_incremental<T: Entity>(
    State(scheduler): State<Arc<Scheduler<T>>>,
    Json(req): Json<StartIncrementalRequest>,
) -> Json<ApiReply> {
    if req.interval <= 0 {
        return ApiReply::bad_request(SchedulerError::NonPositiveInterval.to_string());
    }
    scheduler.start_incremental(req.utime, Duration::from_millis(req.interval as u64));
    ApiReply::ok()
}

async fn stop_incremental<T: Entity>(
    State(scheduler): State<Arc<Scheduler<T>>>,
) -> Json<ApiReply> {
    scheduler.stop_incremental();
    ApiReply::ok()
}

async fn status<T: Entity>(State(scheduler): State<Arc<Scheduler<T>>>) -> Json<SchedulerStatus> {
    Json(scheduler.status())
}
