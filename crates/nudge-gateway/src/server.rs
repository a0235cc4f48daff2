//! HTTP server implementation using Axum.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use axum::extract::{Query, Request, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use nudge_channels::{ConnectionHandle, DispatcherHandle};
use nudge_core::config::GatewayConfig;
use nudge_scheduler::ReminderScheduler;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub connection: ConnectionHandle,
    pub dispatcher: DispatcherHandle,
    pub reminders: Arc<ReminderScheduler>,
    /// When set, every route except `/health` needs it.
    pub api_key: Option<String>,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(
        connection: ConnectionHandle,
        dispatcher: DispatcherHandle,
        reminders: Arc<ReminderScheduler>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            connection,
            dispatcher,
            reminders,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            start_time: std::time::Instant::now(),
        }
    }
}

/// `NUDGE_API_KEY` wins over the config file.
pub fn resolve_api_key(config: &GatewayConfig) -> Option<String> {
    std::env::var("NUDGE_API_KEY")
        .ok()
        .or_else(|| config.api_key.clone())
        .filter(|k| !k.trim().is_empty())
}

/// API key middleware: validates the X-Api-Key header or ?key= query.
async fn require_api_key(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(expected) = &state.api_key else {
        return next.run(req).await;
    };

    let from_header = req
        .headers()
        .get("X-Api-Key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if from_header == expected {
        return next.run(req).await;
    }

    // Percent-decoded, so keys with reserved characters work here too.
    if let Ok(Query(params)) = Query::<HashMap<String, String>>::try_from_uri(req.uri())
        && params.get("key") == Some(expected)
    {
        return next.run(req).await;
    }

    tracing::warn!("🔒 Rejected {} {}: missing or invalid API key", req.method(), req.uri().path());
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"ok": false, "error": "Unauthorized — invalid or missing API key"})),
    )
        .into_response()
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let shared = Arc::new(state);

    let protected = Router::new()
        .route("/status", get(super::routes::status))
        .route("/qr", get(super::routes::qr))
        .route("/send", post(super::routes::send))
        .route("/broadcast", post(super::routes::broadcast))
        .route("/reconnect", post(super::routes::reconnect))
        .route("/reminders/run", post(super::routes::run_reminders))
        .route_layer(axum::middleware::from_fn_with_state(
            shared.clone(),
            require_api_key,
        ));

    let public = Router::new().route("/health", get(super::routes::health_check));

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

fn cors_layer() -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .max_age(std::time::Duration::from_secs(3600));

    // Example: NUDGE_CORS_ORIGINS=https://records.example.org,https://admin.example.org
    if let Ok(origins) = std::env::var("NUDGE_CORS_ORIGINS") {
        let origins: Vec<HeaderValue> = origins
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        cors.allow_origin(origins)
    } else {
        cors.allow_origin(Any)
    }
}

/// Serve the control API until `shutdown` resolves.
pub async fn start(
    config: &GatewayConfig,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let protected = state.api_key.is_some();
    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🌐 Control API listening on http://{addr}");
    if !protected {
        tracing::warn!("⚠️ No API key configured — the control API is open to anyone who can reach {addr}");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    tracing::info!("👋 Control API stopped");
    Ok(())
}
