//! Prometheus metrics registry and `/metrics` HTTP endpoint (feature `metrics`).
//!
//! Grounded on the teacher's `telemetry/registry.rs` + `telemetry/server.rs`
//! split: a global lazily-initialized [`Metrics`] handle, gathered by a small
//! axum server kept off the hook ingestion port per the teacher's convention
//! of not mixing telemetry with the primary API surface.

use axum::Router;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use prometheus::{Encoder as _, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use tokio::sync::watch;

use std::net::SocketAddr;
use std::sync::LazyLock;

static METRICS: LazyLock<Metrics> = LazyLock::new(Metrics::new);

/// All Prometheus metric handles for the discode daemon process.
///
/// Access via [`Metrics::global`]. Metric handles are cheap to clone (`Arc`
/// internally), so call sites can grab a reference without threading state
/// through every handler signature.
pub struct Metrics {
    registry: Registry,

    /// Hook events accepted by the ingestion server, labeled by event type.
    pub hook_events_total: IntCounterVec,

    /// Hook requests rejected before dispatch, labeled by status
    /// ("unauthorized", "rate_limited", "invalid_payload", "unknown_project").
    pub hook_rejections_total: IntCounterVec,

    /// Turns currently ACTIVE in the pending-turn tracker.
    pub turns_active: IntGauge,

    /// Streaming-updater edits actually sent to the messaging platform
    /// (post-debounce, post-rate-cap).
    pub streaming_edits_total: IntCounter,

    /// Terminal-buffer fallback watchdog activations that posted a buffer.
    pub fallback_triggers_total: IntCounter,

    /// Inbound chat messages delivered to the router, labeled by platform.
    pub messages_routed_total: IntCounterVec,

    /// `!shell` escape-hatch invocations, labeled by outcome ("ok", "failed", "timeout").
    pub shell_commands_total: IntCounterVec,
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();

        let hook_events_total = IntCounterVec::new(
            Opts::new("discode_hook_events_total", "Hook events accepted by the ingestion server"),
            &["event_type"],
        )
        .expect("hardcoded metric descriptor");

        let hook_rejections_total = IntCounterVec::new(
            Opts::new("discode_hook_rejections_total", "Hook requests rejected before dispatch"),
            &["status"],
        )
        .expect("hardcoded metric descriptor");

        let turns_active = IntGauge::new("discode_turns_active", "Turns currently active in the pending-turn tracker")
            .expect("hardcoded metric descriptor");

        let streaming_edits_total = IntCounter::new(
            "discode_streaming_edits_total",
            "Streaming-updater edits sent to the messaging platform",
        )
        .expect("hardcoded metric descriptor");

        let fallback_triggers_total = IntCounter::new(
            "discode_fallback_triggers_total",
            "Terminal-buffer fallback activations that posted a buffer",
        )
        .expect("hardcoded metric descriptor");

        let messages_routed_total = IntCounterVec::new(
            Opts::new("discode_messages_routed_total", "Inbound chat messages delivered to the router"),
            &["platform"],
        )
        .expect("hardcoded metric descriptor");

        let shell_commands_total = IntCounterVec::new(
            Opts::new("discode_shell_commands_total", "Shell escape-hatch invocations"),
            &["outcome"],
        )
        .expect("hardcoded metric descriptor");

        registry
            .register(Box::new(hook_events_total.clone()))
            .expect("hardcoded metric");
        registry
            .register(Box::new(hook_rejections_total.clone()))
            .expect("hardcoded metric");
        registry
            .register(Box::new(turns_active.clone()))
            .expect("hardcoded metric");
        registry
            .register(Box::new(streaming_edits_total.clone()))
            .expect("hardcoded metric");
        registry
            .register(Box::new(fallback_triggers_total.clone()))
            .expect("hardcoded metric");
        registry
            .register(Box::new(messages_routed_total.clone()))
            .expect("hardcoded metric");
        registry
            .register(Box::new(shell_commands_total.clone()))
            .expect("hardcoded metric");

        Self {
            registry,
            hook_events_total,
            hook_rejections_total,
            turns_active,
            streaming_edits_total,
            fallback_triggers_total,
            messages_routed_total,
            shell_commands_total,
        }
    }

    /// Access the global metrics instance.
    pub fn global() -> &'static Self {
        &METRICS
    }
}

/// Spawn the metrics HTTP server as a background tokio task, bound to
/// localhost only — the hook server is the daemon's one surface meant to be
/// reachable from agent-side hook scripts; metrics stay off that port.
///
/// Returns the `JoinHandle` so the caller can hold it for lifetime
/// management. Shuts down when `shutdown_rx` observes `true`.
pub async fn start_metrics_server(
    port: u16,
    shutdown_rx: watch::Receiver<bool>,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let bind: SocketAddr = format!("127.0.0.1:{port}")
        .parse()
        .map_err(|error| anyhow::anyhow!("invalid metrics bind address: {error}"))?;

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler));

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|error| anyhow::anyhow!("failed to bind metrics server to {bind}: {error}"))?;

    tracing::info!(address = %bind, "metrics server started");

    let handle = tokio::spawn(async move {
        let mut shutdown_rx = shutdown_rx;
        let shutdown_signal = async move {
            let _ = shutdown_rx.wait_for(|shutdown| *shutdown).await;
        };

        if let Err(error) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
        {
            tracing::error!(%error, "metrics server failed");
        }
    });

    Ok(handle)
}

async fn metrics_handler() -> impl IntoResponse {
    let metrics = Metrics::global();
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();

    match encoder.encode(&metrics.registry.gather(), &mut buffer) {
        Ok(()) => match String::from_utf8(buffer) {
            Ok(text) => (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                text,
            )
                .into_response(),
            Err(error) => {
                tracing::warn!(%error, "metrics encoding produced invalid UTF-8");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        },
        Err(error) => {
            tracing::warn!(%error, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn health_handler() -> impl IntoResponse {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_metrics_are_registered_exactly_once() {
        let metrics = Metrics::global();
        metrics.hook_events_total.with_label_values(&["session.idle"]).inc();
        let families = metrics.registry.gather();
        assert!(families.iter().any(|f| f.name() == "discode_hook_events_total"));
    }
}
