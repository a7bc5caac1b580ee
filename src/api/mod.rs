use crate::engine::Engine;
use axum::body::Body;
use axum::http::{HeaderName, Request};
use axum::{
    Router,
    routing::{get, post, put},
};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

pub mod health;
pub mod messages;
pub mod scheduler;
pub mod schemas;

const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone, Debug)]
pub struct MgmtState {
    pub engine: Engine,
}

/// Operations router: probes, scheduler control, message lifecycle and stats.
pub fn mgmt_router(state: MgmtState) -> Router {
    let api_routes = Router::new()
        .route("/scheduler", get(scheduler::get_status))
        .route("/scheduler/start", post(scheduler::start))
        .route("/scheduler/stop", post(scheduler::stop))
        .route("/stats", get(messages::get_stats))
        .route("/messages", post(messages::create_message))
        .route("/messages/{id}", get(messages::get_message).put(messages::update_message))
        .route("/messages/{id}/send", post(messages::send_message))
        .route("/messages/{id}/schedule", put(messages::schedule_message))
        .route("/messages/{id}/cancel", post(messages::cancel_message))
        .route("/maintenance/cleanup", post(messages::cleanup));

    Router::new()
        .route("/livez", get(health::livez))
        .route("/readyz", get(health::readyz))
        .nest("/v1", api_routes)
        .layer(PropagateRequestIdLayer::new(HeaderName::from_static(REQUEST_ID_HEADER)))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<Body>| {
                    let request_id = request
                        .extensions()
                        .get::<RequestId>()
                        .map(|id| id.header_value().to_str().unwrap_or_default())
                        .unwrap_or_default()
                        .to_string();

                    tracing::info_span!(
                        "request",
                        "request_id" = %request_id,
                        "http.request.method" = %request.method(),
                        "url.path" = %request.uri().path(),
                        "http.response.status_code" = tracing::field::Empty,
                        "otel.kind" = "server",
                    )
                })
                .on_response(
                    |response: &axum::http::Response<_>, latency: std::time::Duration, _span: &tracing::Span| {
                        let status = response.status();
                        tracing::Span::current().record("http.response.status_code", status.as_u16());

                        tracing::info!(
                            latency_ms = %latency.as_millis(),
                            status = %status.as_u16(),
                            "request completed"
                        );
                    },
                )
                .on_failure(|error, _latency, _span: &tracing::Span| {
                    tracing::error!(error = %error, "request failed");
                }),
        )
        .layer(SetRequestIdLayer::new(HeaderName::from_static(REQUEST_ID_HEADER), MakeRequestUuid))
        .with_state(state)
}
