//! Sync trigger handler
//!
//! `GET|POST /sync` starts one reconciliation pass. The trigger is guarded
//! by the shared cron secret when one is configured, and by the pass gate:
//! an overlapping trigger is a logged no-op answered with 409.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{error, info, warn};
use utoipa::{IntoParams, ToSchema};

use crate::config::AppConfig;
use crate::error::{ApiError, unauthorized};
use crate::server::AppState;
use crate::sync::PassSummary;

/// Header carrying the shared trigger secret.
pub const CRON_SECRET_HEADER: &str = "X-Cron-Secret";

/// Query options for the sync trigger.
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct SyncQuery {
    /// Run the pass inline and return its summary instead of 202.
    #[serde(default)]
    pub wait: bool,
}

/// Response for a fire-and-forget trigger.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SyncStartedResponse {
    pub status: String,
}

/// Response for a blocking (`?wait=true`) trigger.
#[derive(Debug, Serialize, ToSchema)]
pub struct SyncCompletedResponse {
    pub status: String,
    pub summary: PassSummary,
}

/// Trigger one reconciliation pass.
#[utoipa::path(
    post,
    path = "/sync",
    params(SyncQuery),
    responses(
        (status = 202, description = "Pass started in the background", body = SyncStartedResponse),
        (status = 200, description = "Pass completed (wait=true)", body = SyncCompletedResponse),
        (status = 401, description = "Missing or invalid trigger secret", body = ApiError),
        (status = 409, description = "A pass is already running", body = ApiError),
        (status = 502, description = "Source feed unavailable (wait=true)", body = ApiError)
    ),
    tag = "sync"
)]
pub async fn trigger_sync(
    State(state): State<AppState>,
    Query(query): Query<SyncQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    verify_cron_secret(&state.config, &headers)?;

    let Some(permit) = state.gate.try_acquire() else {
        warn!("sync trigger ignored; a pass is already running");
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            "SYNC_IN_PROGRESS",
            "a sync pass is already running",
        ));
    };

    if query.wait {
        let summary = {
            let _permit = permit;
            state.engine.run_pass().await?
        };
        return Ok((
            StatusCode::OK,
            axum::Json(SyncCompletedResponse {
                status: "completed".to_string(),
                summary,
            }),
        )
            .into_response());
    }

    let engine = state.engine.clone();
    tokio::spawn(async move {
        let _permit = permit;
        match engine.run_pass().await {
            Ok(summary) => info!(
                created = summary.created,
                skipped = summary.skipped,
                failed = summary.failed,
                "triggered sync pass finished"
            ),
            Err(err) => error!(error = %err, "triggered sync pass aborted"),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        axum::Json(SyncStartedResponse {
            status: "sync started".to_string(),
        }),
    )
        .into_response())
}

/// Constant-time check of the shared trigger secret. No configured secret
/// means the endpoint is open (degraded, logged at startup).
fn verify_cron_secret(config: &AppConfig, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = config.cron_secret.as_deref() else {
        return Ok(());
    };

    let provided = headers
        .get(CRON_SECRET_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    let matches: bool = ConstantTimeEq::ct_eq(provided.as_bytes(), expected.as_bytes()).into();
    if matches {
        Ok(())
    } else {
        Err(unauthorized(Some(
            "Missing or invalid X-Cron-Secret header",
        )))
    }
}
