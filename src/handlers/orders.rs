//! Single-order push handler
//!
//! `POST /orders` ingests one order pushed by an external caller
//! (webhook-style) through the same validate/dedup/create path the sync
//! pass uses. Duplicates are acknowledged, not re-created.

use axum::{
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use utoipa::ToSchema;

use crate::error::{ApiError, validation_error};
use crate::server::AppState;
use crate::sync::{OrderError, OrderOutcome};
use crate::trendyol::Order;

/// Push acknowledgement payload.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PushResponse {
    /// "success" when a row was created, "skipped" for a duplicate.
    pub status: String,
}

/// Ingest a single order.
#[utoipa::path(
    post,
    path = "/orders",
    request_body = serde_json::Value,
    responses(
        (status = 201, description = "Order row created", body = PushResponse),
        (status = 200, description = "Duplicate order skipped", body = PushResponse),
        (status = 400, description = "Malformed order payload", body = ApiError),
        (status = 502, description = "Destination store rejected the write", body = ApiError)
    ),
    tag = "orders"
)]
pub async fn push_order(
    State(state): State<AppState>,
    payload: Result<Json<Order>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(order) = payload.map_err(ApiError::from)?;

    match state.engine.push_order(order).await {
        Ok(OrderOutcome::Created) => Ok((
            StatusCode::CREATED,
            Json(PushResponse {
                status: "success".to_string(),
            }),
        )
            .into_response()),
        Ok(OrderOutcome::Duplicate) => {
            info!("pushed order already synced; skipping");
            Ok((
                StatusCode::OK,
                Json(PushResponse {
                    status: "skipped".to_string(),
                }),
            )
                .into_response())
        }
        Err(OrderError::Validation(err)) => Err(validation_error(
            "Order payload is missing required fields",
            json!({ "order": err.to_string() }),
        )),
        Err(OrderError::Store(err)) => Err(err.into()),
    }
}
