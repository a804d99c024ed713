//! Demo HTTP handlers that exercise the request deadline.
//!
//! Every handler takes the [`RequestContext`] installed by the deadline layer
//! (or a background context when no deadline applies).

use std::time::Duration;

use axum::Json;
use axum::extract::Query;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::context::RequestContext;
use crate::error::{AppError, AppResult};
use crate::middleware::format_deadline;

/// Upper bound for `/work?ms=`.
pub const MAX_WORK_MS: u64 = 60_000;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Liveness probe. Always succeeds.
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// The deadline the server installed for this request.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeadlineResponse {
    pub deadline: Option<String>,
    pub remaining_ms: Option<u64>,
}

#[instrument(skip(ctx))]
pub async fn deadline_info(ctx: RequestContext) -> Json<DeadlineResponse> {
    Json(DeadlineResponse {
        deadline: ctx.deadline().map(format_deadline),
        remaining_ms: ctx
            .remaining()
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
    })
}

#[derive(Debug, Deserialize)]
pub struct WorkParams {
    pub ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WorkResponse {
    pub slept_ms: u64,
}

/// Simulate `ms` milliseconds of deadline-aware work.
///
/// Fails with 504 when the request deadline passes first.
#[instrument(skip(ctx))]
pub async fn work(
    ctx: RequestContext,
    Query(params): Query<WorkParams>,
) -> AppResult<Json<WorkResponse>> {
    if params.ms > MAX_WORK_MS {
        return Err(AppError::BadRequest(format!(
            "ms must be at most {MAX_WORK_MS}"
        )));
    }

    ctx.run(tokio::time::sleep(Duration::from_millis(params.ms)))
        .await?;
    debug!(ms = params.ms, "Work finished within deadline");

    Ok(Json(WorkResponse {
        slept_ms: params.ms,
    }))
}
