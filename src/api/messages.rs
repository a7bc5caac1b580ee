use crate::api::MgmtState;
use crate::api::schemas::messages::{Cleanup, CleanupResult, CreateMessage, ScheduleMessage, StatsQuery, UpdateContent};
use crate::error::Result;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

/// Creates a draft.
///
/// # Errors
/// Returns `AppError::BadRequest` if an address is blank or the retry budget is negative.
pub async fn create_message(
    State(state): State<MgmtState>,
    Json(payload): Json<CreateMessage>,
) -> Result<impl IntoResponse> {
    let (new, max_retries) = payload.into_parts();
    let message = state.engine.create_draft(new, max_retries).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn get_message(State(state): State<MgmtState>, Path(id): Path<Uuid>) -> Result<impl IntoResponse> {
    Ok(Json(state.engine.get_message(id).await?))
}

pub async fn update_message(
    State(state): State<MgmtState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateContent>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.engine.update_content(id, payload.subject, payload.body).await?))
}

/// Sends a message immediately.
///
/// # Errors
/// Returns `AppError::BadRequest` if it was already sent and `AppError::Conflict` if it is in flight or terminal.
pub async fn send_message(State(state): State<MgmtState>, Path(id): Path<Uuid>) -> Result<impl IntoResponse> {
    Ok(Json(state.engine.send_now(id).await?))
}

/// # Errors
/// Returns `AppError::BadRequest` if the date is not in the future.
pub async fn schedule_message(
    State(state): State<MgmtState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ScheduleMessage>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.engine.schedule_email(id, payload.scheduled_date).await?))
}

pub async fn cancel_message(State(state): State<MgmtState>, Path(id): Path<Uuid>) -> Result<impl IntoResponse> {
    Ok(Json(state.engine.cancel_scheduled_email(id).await?))
}

pub async fn get_stats(State(state): State<MgmtState>, Query(query): Query<StatsQuery>) -> Result<impl IntoResponse> {
    Ok(Json(state.engine.get_email_stats(query.sender_id).await?))
}

pub async fn cleanup(State(state): State<MgmtState>, Json(payload): Json<Cleanup>) -> Result<impl IntoResponse> {
    let deleted = state.engine.cleanup_old_emails(payload.days_old).await?;
    Ok(Json(CleanupResult { deleted }))
}
