mod agents;
mod events;
mod fallback;
mod hooks;
mod sessions;
mod stream;

use axum::error_handling::HandleErrorLayer;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{BoxError, Router};
use tower::timeout::TimeoutLayer;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let request_timeout = state.config.request_timeout;
    Router::new()
        .route("/events", post(events::ingest))
        .route("/events/recent", get(events::recent))
        .route("/events/filter-options", get(events::filter_options))
        .route("/events/correlated", get(events::correlated))
        .route("/events/session/{session_id}", get(events::session_events))
        .route("/api/agents/metrics/current", get(agents::current))
        .route("/api/agents/metrics/timeline", get(agents::timeline))
        .route("/api/agents/types/distribution", get(agents::distribution))
        .route("/api/agents/tools/usage", get(agents::tools_usage))
        .route("/api/agents/start", post(agents::start))
        .route("/api/agents/complete", post(agents::complete))
        .route("/api/terminal/status", get(agents::terminal_status))
        .route("/api/hooks/coverage", get(hooks::coverage))
        .route("/api/hooks/{type}/context", get(hooks::context))
        .route("/api/hooks/{type}/events", get(hooks::hook_events))
        .route("/api/hooks/{type}/metrics", get(hooks::hook_metrics))
        .route(
            "/api/hooks/{type}/execution-context",
            get(hooks::execution_context),
        )
        .route("/api/sessions/active", get(sessions::active))
        .route("/api/sessions/spawn", post(sessions::spawn))
        .route(
            "/api/sessions/{id}/relationships",
            get(sessions::relationships),
        )
        .route("/api/sessions/{id}/children", get(sessions::children))
        .route("/api/sessions/{id}/tree", get(sessions::tree))
        .route(
            "/api/sessions/{id}/child_completed",
            post(sessions::child_completed),
        )
        .route("/api/relationships/stats", get(sessions::stats))
        .route("/api/sync/stats", get(fallback::sync_stats))
        .route("/api/fallback/status", get(fallback::status))
        .route("/api/fallback/health", get(fallback::health))
        .route("/api/fallback/test-redis", post(fallback::test_redis))
        .route("/api/fallback/sync", post(fallback::force_sync))
        .route(
            "/api/fallback/handoffs/{project}",
            get(fallback::latest_handoff).post(fallback::save_handoff),
        )
        .route(
            "/api/fallback/handoffs/{project}/list",
            get(fallback::list_handoffs),
        )
        .route("/stream", get(stream::ws_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                // Deadline exceeded surfaces as 504; partial durable writes
                // are already transactional per statement
                .layer(HandleErrorLayer::new(|_: BoxError| async {
                    StatusCode::GATEWAY_TIMEOUT
                }))
                .layer(TimeoutLayer::new(request_timeout)),
        )
        .with_state(state)
}
