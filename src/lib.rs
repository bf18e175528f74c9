//! Memoria service: a small HTTP backend that exchanges GitHub OAuth
//! codes for signed session tokens and stores per-user "memory" records
//! behind an ownership/visibility policy.

pub mod api_envelope;
pub mod config;
pub mod identity;
pub mod observability;
pub mod policy;
pub mod session;
pub mod store;

mod auth_routes;
mod memories_routes;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::extract::{Path, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::api_envelope::{
    ApiErrorCode, ApiErrorTuple, error_response, forbidden_error, not_found_error,
    unauthenticated_error, validation_error,
};
use crate::config::Config;
use crate::identity::{
    ExternalIdentity, IdentityError, IdentityProvider, provider_from_config,
};
use crate::observability::{AuditEvent, Observability};
use crate::session::{SessionError, SessionIssuer, SessionVerifier, Subject};
use crate::store::{
    CreateMemoryInput, CreateUserInput, Store, StoreError, UpdateMemoryInput, UserRecord,
};

pub const SERVICE_NAME: &str = "memoria-service";

#[derive(Clone)]
pub struct AppState {
    identity: Arc<dyn IdentityProvider>,
    session_issuer: SessionIssuer,
    session_verifier: SessionVerifier,
    store: Store,
    observability: Observability,
    started_at: SystemTime,
}

pub fn build_router(config: Config) -> Router {
    build_router_with_observability(config, Observability::default())
}

pub fn build_router_with_observability(config: Config, observability: Observability) -> Router {
    let identity = provider_from_config(&config);
    let session_issuer = SessionIssuer::from_config(&config);
    let session_verifier = SessionVerifier::from_config(&config);
    let store = Store::from_config(&config);
    let request_timeout = Duration::from_millis(config.request_timeout_ms);

    let state = AppState {
        identity,
        session_issuer,
        session_verifier,
        store,
        observability,
        started_at: SystemTime::now(),
    };

    Router::new()
        .route("/healthz", get(health))
        .route("/register", post(auth_routes::register))
        .route(
            "/memories",
            get(memories_routes::list_memories).post(memories_routes::create_memory),
        )
        .route(
            "/memories/:id",
            get(memories_routes::get_memory)
                .put(memories_routes::update_memory)
                .delete(memories_routes::delete_memory),
        )
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    request_timeout,
                )),
        )
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    uptime_seconds: u64,
    identity_provider: &'static str,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime_seconds = state
        .started_at
        .elapsed()
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0);

    Json(HealthResponse {
        status: "ok",
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds,
        identity_provider: state.identity.name(),
    })
}

/// Extracts and verifies the bearer credential. A missing token and an
/// invalid one both surface as unauthenticated to the caller.
fn require_subject(state: &AppState, headers: &HeaderMap) -> Result<Subject, ApiErrorTuple> {
    let token = bearer_token(headers)
        .ok_or_else(|| unauthenticated_error("Authentication is required."))?;
    state
        .session_verifier
        .verify(&token)
        .map_err(map_session_error)
}

/// Like [`require_subject`] but a missing credential yields an anonymous
/// caller. A credential that is present and bad is still rejected.
fn optional_subject(state: &AppState, headers: &HeaderMap) -> Result<Option<Subject>, ApiErrorTuple> {
    let Some(token) = bearer_token(headers) else {
        return Ok(None);
    };
    state
        .session_verifier
        .verify(&token)
        .map(Some)
        .map_err(map_session_error)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = header_string(headers, AUTHORIZATION.as_str())?;
    let token = raw.strip_prefix("Bearer ")?;
    non_empty(token.to_string())
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn request_id(headers: &HeaderMap) -> String {
    header_string(headers, "x-request-id").unwrap_or_else(|| "unknown".to_string())
}

fn map_identity_error(error: IdentityError) -> ApiErrorTuple {
    match error {
        IdentityError::Upstream { message } => error_response(ApiErrorCode::UpstreamAuth, message),
        IdentityError::MalformedResponse { message } => {
            error_response(ApiErrorCode::UpstreamContract, message)
        }
        IdentityError::Unavailable { message } => {
            error_response(ApiErrorCode::ServiceUnavailable, message)
        }
    }
}

fn map_session_error(error: SessionError) -> ApiErrorTuple {
    match error {
        SessionError::Invalid | SessionError::Expired => {
            unauthenticated_error("Session token is invalid or expired.")
        }
        SessionError::Unavailable { message } => {
            error_response(ApiErrorCode::ServiceUnavailable, message)
        }
    }
}

fn map_store_error(error: StoreError) -> ApiErrorTuple {
    match error {
        StoreError::NotFound => not_found_error("Record not found."),
        StoreError::Conflict { message } => error_response(ApiErrorCode::InternalError, message),
        StoreError::Persistence { message } => {
            tracing::error!(target: "memoria.store", %message, "persistence failure");
            error_response(ApiErrorCode::InternalError, "Failed to persist the change.")
        }
    }
}
