//! HTTP surface of the review service.

use crate::server_security::{AuthToken, AUTH_TOKEN_ENV};
use apiview_protocol::{ErrorEnvelope, ErrorKind, ReviewRequest};
use apiview_review::MentionRequest;
use apiview_service::{ServiceContext, ServiceError};
use axum::{
    extract::{Path, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct ApiState {
    pub ctx: ServiceContext,
    pub auth: Option<AuthToken>,
}

/// Every route except `/health` sits behind the bearer check.
pub fn router(state: ApiState) -> Router {
    let protected = Router::new()
        .route("/api-review", post(review))
        .route("/api-review/start", post(start_review))
        .route("/job/:id", get(get_job))
        .route("/job/:id/cancel", post(cancel_job))
        .route("/mention", post(mention))
        .route("/metrics", get(metrics))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));
    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .with_state(state)
}

pub(crate) fn is_authorized(headers: &HeaderMap, token: &AuthToken) -> bool {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return false;
    };
    let Ok(value) = value.to_str() else {
        return false;
    };
    token.accepts_bearer(value)
}

async fn require_auth(
    State(state): State<ApiState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    if let Some(token) = &state.auth {
        if !is_authorized(&headers, token) {
            return error_response(
                StatusCode::UNAUTHORIZED,
                ErrorEnvelope {
                    code: "unauthorized".to_string(),
                    message: "missing or invalid bearer token".to_string(),
                    details: None,
                    hint: Some(format!(
                        "The server was started with an auth token; send Authorization: Bearer <token> (see {AUTH_TOKEN_ENV})."
                    )),
                },
            );
        }
    }
    next.run(request).await
}

/// `{error, details}` with the envelope under `details`.
pub(crate) fn error_response(status: StatusCode, envelope: ErrorEnvelope) -> Response {
    let body = json!({ "error": envelope.message.clone(), "details": envelope });
    let mut response = (status, Json(body)).into_response();
    if status == StatusCode::UNAUTHORIZED {
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    }
    response
}

fn service_error(err: ServiceError) -> Response {
    let kind = err.kind();
    let status = match &err {
        ServiceError::JobNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::from_u16(kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
    };
    if status.is_server_error() {
        log::warn!("request failed: {err}");
    }
    let mut envelope = ErrorEnvelope::new(kind, err.to_string());
    if kind == ErrorKind::InputError {
        envelope = envelope.with_hint("Check the language and the request fields.");
    }
    error_response(status, envelope)
}

fn parse_body<T: DeserializeOwned>(body: &str) -> Result<T, Response> {
    serde_json::from_str(body).map_err(|err| {
        error_response(
            StatusCode::BAD_REQUEST,
            ErrorEnvelope::new(ErrorKind::InputError, format!("invalid request body: {err}"))
                .with_hint("Verify the request is valid JSON and matches the documented shape."),
        )
    })
}

async fn review(State(state): State<ApiState>, body: String) -> Response {
    let request: ReviewRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    // pending calls are dropped with the connection
    let cancel = CancellationToken::new();
    match state.ctx.engine.review(&request, &cancel).await {
        Ok(review) => (StatusCode::OK, Json(json!({ "result": review }))).into_response(),
        Err(err) => service_error(err.into()),
    }
}

async fn start_review(State(state): State<ApiState>, body: String) -> Response {
    let request: ReviewRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    match state.ctx.jobs.submit(request).await {
        Ok(job) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "job_id": job.id,
                "state": job.state,
                "status_url": format!("/job/{}", job.id),
            })),
        )
            .into_response(),
        Err(err) => service_error(err),
    }
}

async fn get_job(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.ctx.jobs.get(&id).await {
        Ok(Some(job)) => (StatusCode::OK, Json(job)).into_response(),
        Ok(None) => service_error(ServiceError::JobNotFound(id)),
        Err(err) => service_error(err),
    }
}

async fn cancel_job(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.ctx.jobs.cancel(&id).await {
        Ok(cancelled) => (StatusCode::OK, Json(json!({ "job_id": id, "cancelled": cancelled }))).into_response(),
        Err(err) => service_error(err),
    }
}

async fn mention(State(state): State<ApiState>, body: String) -> Response {
    let request: MentionRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let cancel = CancellationToken::new();
    match state.ctx.dispatcher.dispatch(&request, &cancel).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(err) => service_error(err.into()),
    }
}

async fn health(State(state): State<ApiState>) -> Response {
    let report = state.ctx.health().await;
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}

async fn metrics(State(state): State<ApiState>) -> Response {
    match state.ctx.metrics().render() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(err) => service_error(err.into()),
    }
}
