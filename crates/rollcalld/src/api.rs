//! HTTP routes: `POST /register`, `POST /verify`, `GET /health`.

use crate::engine::EngineHandle;
use crate::error::ApiError;
use crate::matching::{MatchOutcome, MatchStrategy};
use crate::payload::{
    decode_image, RegisterRequest, RegisterResponse, VerifyRequest, VerifyResponse,
};
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::Request;
use axum::routing::{get, post};
use axum::{Json, Router};
use rollcall_core::{DistanceMetric, FaceModel, FaceStore};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

/// Fixed facts reported by `/health`.
#[derive(Debug, Clone, Copy)]
pub struct ServiceInfo {
    pub model: FaceModel,
    pub metric: DistanceMetric,
    pub threshold: f32,
    pub strategy: MatchStrategy,
}

#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub store: Arc<dyn FaceStore>,
    pub info: ServiceInfo,
}

pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/verify", post(verify))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http().make_span_with(|req: &Request<_>| {
            tracing::info_span!(
                "request",
                request_id = %Uuid::new_v4(),
                method = %req.method(),
                uri = %req.uri(),
            )
        }))
        .with_state(state)
}

async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let Json(req) = payload?;
    let student_id = req.student_id.validate()?;
    let image = decode_image(&req.image)?;
    tracing::info!(student_id = %student_id, bytes = image.len(), "register requested");

    let face = state.engine.register(student_id, image).await?;
    tracing::debug!(student_id = %face.id, path = %face.path.display(), "register complete");
    Ok(Json(RegisterResponse::registered(req.student_id)))
}

async fn verify(
    State(state): State<AppState>,
    payload: Result<Json<VerifyRequest>, JsonRejection>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let Json(req) = payload?;
    let image = decode_image(&req.image)?;
    tracing::info!(bytes = image.len(), "verify requested");

    let outcome = state.engine.verify(image).await?;
    Ok(Json(verify_response(outcome)))
}

fn verify_response(outcome: MatchOutcome) -> VerifyResponse {
    match outcome.strategy {
        MatchStrategy::Scan => match outcome.matched {
            Some(m) => VerifyResponse::Scan {
                status: "success",
                verified: true,
                student_id: Some(m.student_id),
                confidence: Some(m.distance),
                message: None,
            },
            None => VerifyResponse::Scan {
                status: "success",
                verified: false,
                student_id: None,
                confidence: None,
                message: Some("No matching face found"),
            },
        },
        MatchStrategy::Search => VerifyResponse::Search {
            status: "success",
            matched: outcome.matched.is_some(),
            student_id: outcome.matched.map(|m| m.student_id),
        },
    }
}

async fn health(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let store = state.store.clone();
    let registered = tokio::task::spawn_blocking(move || store.faces().map(|f| f.len()))
        .await
        .map_err(|e| ApiError::Unavailable(e.to_string()))?
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;

    let info = state.info;
    Ok(Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "model": info.model.name(),
        "metric": info.metric,
        "threshold": info.threshold,
        "strategy": info.strategy,
        "registered": registered,
    })))
}
