use crate::api::MgmtState;
use crate::api::schemas::scheduler::SchedulerToggle;
use axum::{Json, extract::State, response::IntoResponse};

pub async fn get_status(State(state): State<MgmtState>) -> impl IntoResponse {
    Json(state.engine.status().await)
}

pub async fn start(State(state): State<MgmtState>) -> impl IntoResponse {
    let changed = state.engine.start().await;
    Json(SchedulerToggle { changed, status: state.engine.status().await })
}

pub async fn stop(State(state): State<MgmtState>) -> impl IntoResponse {
    let changed = state.engine.stop().await;
    Json(SchedulerToggle { changed, status: state.engine.status().await })
}
