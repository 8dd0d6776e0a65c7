pub mod routes;
pub mod ws;

use crate::state::AppState;
use axum::routing::get;
use std::sync::Arc;

pub fn router(state: Arc<AppState>) -> axum::Router {
    axum::Router::new()
        .route("/api/report", get(routes::get_report))
        .route("/api/plan", get(routes::get_plan))
        .route("/api/options", get(routes::get_options))
        .route("/api/exclusions", get(routes::get_exclusions))
        .route("/api/runs", get(routes::get_runs))
        .route("/api/runs/{id}", get(routes::get_run))
        .route("/api/counters", get(routes::get_counters))
        .route("/ws", get(ws::ws_handler))
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .with_state(state)
}
