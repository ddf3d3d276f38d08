//! Thin HTTP surface over the accept API
//!
//! Request validation, authentication, and response shaping beyond the
//! minimum live in the boundary layer in front of this service; these
//! handlers only parse, delegate, and map errors.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tarn_core::MessageId;

use crate::error::SmscError;
use crate::lifecycle::{MessageService, SendRequest};
use crate::routing::RoutingEngine;
use crate::store::{GatewayStore, Operator, Route};
use crate::throttle::CapacityGate;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<MessageService>,
    pub routing: Arc<RoutingEngine>,
    pub store: Arc<dyn GatewayStore>,
    pub gate: Arc<CapacityGate>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/ready", get(|| async { "OK" }))
        .route("/v1/messages", post(send))
        .route("/v1/messages/bulk", post(send_bulk))
        .route("/v1/messages/{message_id}", get(status).delete(cancel))
        .route(
            "/v1/messages/{message_id}/delivery-report",
            post(delivery_report),
        )
        .route("/v1/routes", put(replace_routes))
        .route("/v1/operators", put(upsert_operator))
        .route("/v1/operators/{id}/tps", get(operator_tps))
        .with_state(state)
}

impl IntoResponse for SmscError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(json!({
            "status": "error",
            "code": self.error_code(),
            "error": self.to_string(),
        }));
        (status, body).into_response()
    }
}

async fn send(
    State(state): State<AppState>,
    Json(request): Json<SendRequest>,
) -> Result<Response, SmscError> {
    let message = state.service.send(request).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "success",
            "message_id": message.message_id,
            "message_status": message.status,
        })),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
struct BulkRequest {
    messages: Vec<SendRequest>,
    #[serde(default)]
    #[allow(dead_code)]
    callback_url: Option<String>,
}

async fn send_bulk(
    State(state): State<AppState>,
    Json(request): Json<BulkRequest>,
) -> Response {
    if !(1..=1000).contains(&request.messages.len()) {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({
                "status": "error",
                "error": "messages must contain between 1 and 1000 items",
            })),
        )
            .into_response();
    }

    let results = state.service.send_bulk(request.messages).await;
    Json(json!({
        "status": "success",
        "total": results.len(),
        "messages": results,
    }))
    .into_response()
}

async fn status(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
) -> Result<Response, SmscError> {
    match state.service.status(&MessageId(message_id)).await? {
        Some(message) => Ok(Json(message).into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            Json(json!({ "status": "error", "error": "message not found" })),
        )
            .into_response()),
    }
}

async fn cancel(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
) -> Result<Response, SmscError> {
    let cancelled = state.service.cancel(&MessageId(message_id)).await?;
    Ok(Json(json!({ "cancelled": cancelled })).into_response())
}

async fn delivery_report(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
) -> Result<Response, SmscError> {
    let delivered = state.service.confirm_delivery(&MessageId(message_id)).await?;
    Ok(Json(json!({ "delivered": delivered })).into_response())
}

async fn replace_routes(
    State(state): State<AppState>,
    Json(routes): Json<Vec<Route>>,
) -> Result<Response, SmscError> {
    state.routing.replace_routes(&routes).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn upsert_operator(
    State(state): State<AppState>,
    Json(operator): Json<Operator>,
) -> Result<Response, SmscError> {
    let id = state.store.upsert_operator(&operator).await?;
    Ok(Json(json!({ "id": id })).into_response())
}

async fn operator_tps(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, SmscError> {
    let current_tps = state.gate.current_tps(id).await?;
    Ok(Json(json!({ "operator_id": id, "current_tps": current_tps })).into_response())
}
