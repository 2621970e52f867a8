//! # HTTP API Module
//!
//! Thin axum surface over the service facade: evaluation endpoints,
//! registry administration, versioning, A/B management and the
//! change-event WebSocket. Handlers delegate; request parsing and
//! response envelopes are the only logic that lives here.

pub mod dto;
pub mod error;
pub mod handlers;

use crate::config::HttpConfig;
use crate::registry::ChangeEvent;
use crate::service::RuleService;
use axum::routing::{get, post};
use axum::{Extension, Router};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::debug;

/// Capacity of the broadcast channel bridging registry events to
/// WebSocket subscribers.
const EVENT_BRIDGE_CAPACITY: usize = 256;

/// Bridge registry change events onto a tokio broadcast channel.
///
/// A dedicated thread drains a registry subscription and fans events out
/// to however many WebSocket connections subscribe. The thread exits when
/// the service's registry shuts down and the subscription closes.
pub fn spawn_event_bridge(service: &Arc<RuleService>) -> broadcast::Sender<ChangeEvent> {
    let (tx, _) = broadcast::channel(EVENT_BRIDGE_CAPACITY);
    let subscription = service.subscribe();
    let bridge_tx = tx.clone();

    std::thread::Builder::new()
        .name("event-bridge".to_string())
        .spawn(move || {
            while let Some(event) = subscription.recv() {
                // No receivers is fine; events are only for live sockets.
                if bridge_tx.send(event).is_err() {
                    debug!("no live event subscribers");
                }
            }
        })
        .ok();

    tx
}

/// Build the API router.
pub fn router(
    service: Arc<RuleService>,
    events: broadcast::Sender<ChangeEvent>,
    http: &HttpConfig,
) -> Router {
    Router::new()
        .route("/health", get(handlers::admin::health))
        .route("/v1/status", get(handlers::admin::status))
        .route("/v1/execute", post(handlers::execute::execute))
        .route("/v1/execute/batch", post(handlers::execute::execute_batch))
        .route("/v1/execute/dmn", post(handlers::execute::execute_dmn))
        .route(
            "/v1/workflows/execute",
            post(handlers::execute::execute_workflow),
        )
        .route("/v1/admin/reload", post(handlers::admin::reload))
        .route("/v1/admin/validate", get(handlers::admin::validate))
        .route(
            "/v1/admin/monitor/start",
            post(handlers::admin::start_monitor),
        )
        .route(
            "/v1/admin/monitor/stop",
            post(handlers::admin::stop_monitor),
        )
        .route(
            "/v1/rules/:rule_id/versions",
            get(handlers::versions::list_versions),
        )
        .route(
            "/v1/rules/:rule_id/versions/:version",
            get(handlers::versions::get_version),
        )
        .route(
            "/v1/rules/:rule_id/compare",
            get(handlers::versions::compare_versions),
        )
        .route(
            "/v1/rules/:rule_id/rollback",
            post(handlers::versions::rollback),
        )
        .route(
            "/v1/abtests",
            post(handlers::abtests::create_test).get(handlers::abtests::list_tests),
        )
        .route(
            "/v1/abtests/:test_id/start",
            post(handlers::abtests::start_test),
        )
        .route(
            "/v1/abtests/:test_id/stop",
            post(handlers::abtests::stop_test),
        )
        .route(
            "/v1/abtests/:test_id/assignment",
            get(handlers::abtests::assignment),
        )
        .route(
            "/v1/abtests/:test_id/metrics",
            get(handlers::abtests::metrics),
        )
        .route("/v1/events", get(handlers::events::events))
        .layer(Extension(service))
        .layer(Extension(events))
        .layer(RequestBodyLimitLayer::new(http.request_body_limit))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}
