//! Control API route handlers.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use qrcode::QrCode;
use qrcode::render::{svg, unicode};
use serde::Deserialize;

use nudge_core::NudgeError;
use nudge_core::types::ConnectionState;

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

/// Health check endpoint.
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "nudge-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Connection status, no side effects.
pub async fn status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let snapshot = state.connection.snapshot();
    Json(serde_json::json!({
        "ok": true,
        "status": snapshot.state.as_str(),
        "since": snapshot.since.to_rfc3339(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "dispatch": state.dispatcher.stats(),
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct QrQuery {
    #[serde(default)]
    pub format: Option<String>,
}

/// Current provisioning code as an SVG image, or a terminal rendering
/// with `?format=text`.
pub async fn qr(State(state): State<Arc<AppState>>, Query(query): Query<QrQuery>) -> Response {
    let code = match state.connection.provisioning_code() {
        Ok(code) => code,
        Err(NudgeError::ProvisioningUnavailable(s)) => {
            let error = if s == ConnectionState::Connected { "already connected" } else { "not ready" };
            return (
                StatusCode::CONFLICT,
                Json(serde_json::json!({"ok": false, "error": error, "status": s.as_str()})),
            )
                .into_response();
        }
        Err(e) => return ApiError(e).into_response(),
    };

    let qr = match QrCode::new(code.value.as_bytes()) {
        Ok(qr) => qr,
        Err(e) => return ApiError(NudgeError::Other(format!("QR encode: {e}"))).into_response(),
    };

    if query.format.as_deref() == Some("text") {
        let text = qr
            .render::<unicode::Dense1x2>()
            .dark_color(unicode::Dense1x2::Dark)
            .light_color(unicode::Dense1x2::Light)
            .build();
        return (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8"), (header::CACHE_CONTROL, "no-store")],
            text,
        )
            .into_response();
    }

    let image = qr.render::<svg::Color>().min_dimensions(256, 256).build();
    (
        [(header::CONTENT_TYPE, "image/svg+xml"), (header::CACHE_CONTROL, "no-store")],
        image,
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    #[serde(default)]
    pub recipient: String,
    #[serde(default)]
    pub message: String,
}

pub async fn send(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SendRequest>, JsonRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let Json(req) = body.map_err(bad_body)?;
    if req.recipient.trim().is_empty() || req.message.trim().is_empty() {
        return Err(NudgeError::invalid_request("recipient and message are required").into());
    }

    let to = state.dispatcher.send_one(req.recipient, req.message).await?;
    Ok(Json(serde_json::json!({"ok": true, "to": to})))
}

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub message: String,
}

pub async fn broadcast(
    State(state): State<Arc<AppState>>,
    body: Result<Json<BroadcastRequest>, JsonRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let Json(req) = body.map_err(bad_body)?;
    if req.recipients.is_empty() || req.message.trim().is_empty() {
        return Err(NudgeError::invalid_request("recipients and message are required").into());
    }

    let summary = state.dispatcher.broadcast(req.recipients, req.message).await?;
    Ok(Json(serde_json::json!({
        "ok": true,
        "sent": summary.sent,
        "failed": summary.failed,
    })))
}

/// Restart the connection cycle after a logout or an exhausted retry budget.
pub async fn reconnect(State(state): State<Arc<AppState>>) -> ApiResult<Json<serde_json::Value>> {
    state.connection.request_reconnect()?;
    Ok(Json(serde_json::json!({"ok": true, "status": state.connection.state().as_str()})))
}

#[derive(Debug, Default, Deserialize)]
pub struct RunRemindersRequest {
    #[serde(default)]
    pub force: bool,
}

/// Run the reminder job now. The body is optional.
pub async fn run_reminders(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    let req: RunRemindersRequest = if body.iter().all(u8::is_ascii_whitespace) {
        RunRemindersRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| NudgeError::invalid_request(format!("invalid body: {e}")))?
    };

    let outcome = state.reminders.run_now(req.force).await;
    Ok(Json(serde_json::json!({"ok": true, "result": outcome})))
}

fn bad_body(rejection: JsonRejection) -> ApiError {
    NudgeError::invalid_request(rejection.body_text()).into()
}
