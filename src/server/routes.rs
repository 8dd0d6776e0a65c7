use crate::db;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde_json::json;
use std::sync::Arc;

#[derive(serde::Deserialize)]
pub struct RunsQuery {
    pub limit: Option<usize>,
}

type ApiResponse = (StatusCode, Json<serde_json::Value>);

fn not_ready(state: &AppState) -> ApiResponse {
    let snapshot = state.snapshot_rx.borrow();
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "state": snapshot.state, "error": snapshot.last_error })),
    )
}

fn ok(value: serde_json::Value) -> ApiResponse {
    (StatusCode::OK, Json(value))
}

/// GET /api/report -- latest run (from watch channel, no lock)
pub async fn get_report(State(state): State<Arc<AppState>>) -> ApiResponse {
    let report = state.snapshot_rx.borrow().report.clone();
    match report {
        Some(r) => ok(json!(r)),
        None => not_ready(&state),
    }
}

/// GET /api/plan -- equities book of the latest run, with its risk
pub async fn get_plan(State(state): State<Arc<AppState>>) -> ApiResponse {
    let report = state.snapshot_rx.borrow().report.clone();
    match report {
        Some(r) => ok(json!({ "run_id": r.run_id, "plan": r.equity_plan, "risk": r.equity_risk })),
        None => not_ready(&state),
    }
}

/// GET /api/options -- options book of the latest run, with its risk
pub async fn get_options(State(state): State<Arc<AppState>>) -> ApiResponse {
    let report = state.snapshot_rx.borrow().report.clone();
    match report {
        Some(r) => ok(json!({ "run_id": r.run_id, "plan": r.options_plan, "risk": r.options_risk })),
        None => not_ready(&state),
    }
}

/// GET /api/exclusions -- everything left out of the latest run, and why
pub async fn get_exclusions(State(state): State<Arc<AppState>>) -> ApiResponse {
    let report = state.snapshot_rx.borrow().report.clone();
    match report {
        Some(r) => {
            let excluded: Vec<_> = r.all_exclusions().collect();
            ok(json!({ "run_id": r.run_id, "exclusions": excluded }))
        }
        None => not_ready(&state),
    }
}

/// GET /api/runs -- run history from DB (cold path)
pub async fn get_runs(State(state): State<Arc<AppState>>, Query(params): Query<RunsQuery>) -> ApiResponse {
    let limit = params.limit.unwrap_or(50).min(500);
    match db::get_recent_runs(&state.db, limit) {
        Ok(runs) => ok(json!({ "runs": runs })),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))),
    }
}

/// GET /api/runs/{id} -- persisted entries and exclusions of one run
pub async fn get_run(State(state): State<Arc<AppState>>, Path(run_id): Path<String>) -> ApiResponse {
    match db::get_run_detail(&state.db, &run_id) {
        Ok(Some(detail)) => ok(json!(detail)),
        Ok(None) => (StatusCode::NOT_FOUND, Json(json!({ "error": format!("unknown run {run_id}") }))),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))),
    }
}

/// GET /api/counters -- run counters (lock-free reads)
pub async fn get_counters(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    use portable_atomic::Ordering::Relaxed;
    Json(json!({
        "strategy": state.config.strategy,
        "universe": state.config.tickers.len(),
        "runs_completed": state.counters.runs_completed.load(Relaxed),
        "runs_failed": state.counters.runs_failed.load(Relaxed),
        "assets_fetched": state.counters.assets_fetched.load(Relaxed),
        "assets_excluded": state.counters.assets_excluded.load(Relaxed),
        "ws_messages_sent": state.counters.ws_messages_sent.load(Relaxed),
    }))
}
