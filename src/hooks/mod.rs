//! Hook Ingestion Server (§4.4) — the daemon's sole inbound HTTP surface.
//! Agent CLI hook scripts `POST` a typed [`crate::event::Event`] here; the
//! handler resolves it to a channel and hands it to the [`Pipeline`], which
//! replies `200` long before any chat side effect happens.

pub mod auth;
pub mod ratelimit;

use crate::config::Config;
use crate::error::{Error, HookError};
use crate::event::Event;
use crate::pipeline::Pipeline;
use crate::state::StateStore;
use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use ratelimit::RateLimiter;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

#[derive(Clone)]
struct HookState {
    pipeline: Arc<Pipeline>,
    state: Arc<StateStore>,
    rate_limiter: Arc<RateLimiter>,
    token: Arc<str>,
}

/// Bind and serve the hook ingestion server, returning the task handle once
/// listening. Shuts down gracefully when `shutdown` observes `true`.
pub async fn serve(
    config: &Config,
    pipeline: Arc<Pipeline>,
    state: Arc<StateStore>,
    token: String,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> crate::Result<tokio::task::JoinHandle<()>> {
    let bind: SocketAddr = format!("{}:{}", config.hook.hostname, config.hook.port)
        .parse()
        .map_err(|error| crate::error::ConfigError::Invalid(format!("invalid hook bind address: {error}")))?;

    let hook_state = HookState {
        rate_limiter: Arc::new(RateLimiter::new(
            config.hook.rate_limit_capacity,
            config.hook.rate_limit_refill_per_sec,
        )),
        token: token.into(),
        pipeline,
        state,
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/opencode-event", post(opencode_event))
        .route("/reload", post(reload))
        .layer(RequestBodyLimitLayer::new(config.hook.max_body_bytes))
        .with_state(hook_state)
        .fallback(not_found)
        .method_not_allowed_fallback(method_not_allowed);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(%bind, "hook ingestion server listening");

    let handle = tokio::spawn(async move {
        let serve = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        );
        if let Err(error) = serve
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|v| *v).await;
            })
            .await
        {
            tracing::error!(%error, "hook ingestion server exited with error");
        }
    });

    Ok(handle)
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn method_not_allowed() -> StatusCode {
    StatusCode::METHOD_NOT_ALLOWED
}

fn authorize(headers: &HeaderMap, expected: &str) -> Result<(), Response> {
    let header = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    auth::verify_bearer(header, expected).map_err(|_| error_response(&Error::Hook(HookError::Unauthorized)))
}

async fn opencode_event(
    State(state): State<HookState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(response) = authorize(&headers, &state.token) {
        #[cfg(feature = "metrics")]
        crate::telemetry::Metrics::global()
            .hook_rejections_total
            .with_label_values(&["unauthorized"])
            .inc();
        return response;
    }

    let source = addr.ip().to_string();
    if let Err(retry_after) = state.rate_limiter.check(&source) {
        #[cfg(feature = "metrics")]
        crate::telemetry::Metrics::global()
            .hook_rejections_total
            .with_label_values(&["rate_limited"])
            .inc();
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, retry_after.as_secs().max(1).to_string())],
            "rate limit exceeded",
        )
            .into_response();
    }

    let event: Event = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(error) => {
            #[cfg(feature = "metrics")]
            crate::telemetry::Metrics::global()
                .hook_rejections_total
                .with_label_values(&["invalid_payload"])
                .inc();
            return error_response(&Error::Hook(HookError::InvalidPayload(error.to_string())));
        }
    };

    #[cfg(feature = "metrics")]
    crate::telemetry::Metrics::global()
        .hook_events_total
        .with_label_values(&[event.kind()])
        .inc();

    match state.pipeline.submit(event) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(error) => {
            #[cfg(feature = "metrics")]
            crate::telemetry::Metrics::global()
                .hook_rejections_total
                .with_label_values(&["unknown_project"])
                .inc();
            error_response(&error)
        }
    }
}

async fn reload(State(state): State<HookState>, headers: HeaderMap) -> Response {
    if let Err(response) = authorize(&headers, &state.token) {
        return response;
    }

    match state.state.reload() {
        Ok(()) => Json(serde_json::json!({ "reloaded": true })).into_response(),
        Err(error) => error_response(&error),
    }
}

/// Translate a crate [`Error`] into the HTTP status the contract in §4.4
/// assigns it: `401` for auth failures, `400` for malformed or unresolvable
/// payloads, `500` for anything else (disk I/O, etc).
fn error_response(error: &Error) -> Response {
    let status = match error {
        Error::Hook(HookError::Unauthorized) => StatusCode::UNAUTHORIZED,
        Error::Hook(HookError::InvalidPayload(_)) | Error::Hook(HookError::UnknownProject(_)) => {
            StatusCode::BAD_REQUEST
        }
        Error::Hook(HookError::BodyTooLarge(_)) => StatusCode::PAYLOAD_TOO_LARGE,
        Error::Hook(HookError::RateLimited { .. }) => StatusCode::TOO_MANY_REQUESTS,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, error.to_string()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_response_maps_hook_errors_to_their_status_codes() {
        assert_eq!(
            error_response(&Error::Hook(HookError::Unauthorized)).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            error_response(&Error::Hook(HookError::UnknownProject("p".into()))).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_response(&Error::Hook(HookError::InvalidPayload("bad json".into()))).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_response(&Error::Hook(HookError::BodyTooLarge(1024))).status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }
}
