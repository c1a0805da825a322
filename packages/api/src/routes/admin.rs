use crate::{
    entity::{question, sea_orm_active_enums::QuestionStatus},
    error::ApiError,
    routes::question::QuestionEntry,
    state::AppState,
    sync,
};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, IntoActiveModel, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/questions", get(list_questions))
        .route("/questions/{id}", patch(update_question))
        .route("/sync/works", post(sync_works))
}

fn parse_status(value: &str) -> Option<QuestionStatus> {
    match value {
        "pending" => Some(QuestionStatus::Pending),
        "answered" => Some(QuestionStatus::Answered),
        "rejected" => Some(QuestionStatus::Rejected),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuestionsParams {
    pub status: Option<String>,
}

#[tracing::instrument(name = "GET /admin/questions", skip(state))]
pub async fn list_questions(
    State(state): State<AppState>,
    Query(params): Query<ListQuestionsParams>,
) -> Result<Json<Vec<QuestionEntry>>, ApiError> {
    let status = match params.status.as_deref() {
        None => QuestionStatus::Pending,
        Some(raw) => parse_status(raw).ok_or_else(|| {
            ApiError::unprocessable(format!("{} is not a valid status", raw))
        })?,
    };

    let questions = question::Entity::find()
        .filter(question::Column::Status.eq(status))
        .order_by_desc(question::Column::CreatedAt)
        .all(&state.db)
        .await?;

    Ok(Json(questions.into_iter().map(QuestionEntry::from).collect()))
}

#[derive(Debug, Deserialize)]
pub struct UpdateQuestionParams {
    pub status: String,
}

#[tracing::instrument(name = "PATCH /admin/questions/{id}", skip(state, params))]
pub async fn update_question(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(params): Json<UpdateQuestionParams>,
) -> Result<Json<QuestionEntry>, ApiError> {
    let status = parse_status(&params.status).ok_or_else(|| {
        ApiError::unprocessable(format!("{} is not a valid status", params.status))
    })?;

    let existing = question::Entity::find_by_id(&id)
        .one(&state.db)
        .await?
        .ok_or(ApiError::NOT_FOUND)?;

    let mut active = existing.into_active_model();
    active.status = Set(status);
    active.updated_at = Set(chrono::Utc::now().naive_utc());
    let updated = active.update(&state.db).await?;

    tracing::info!(question_id = %updated.id, status = ?updated.status, "Question status updated");

    Ok(Json(updated.into()))
}

#[derive(Debug, Default, Deserialize)]
pub struct SyncWorksParams {
    /// Explicit work ids; falls back to the SYNC_WORK_IDS environment list
    #[serde(default)]
    pub ids: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct SyncWorksResponse {
    pub status: &'static str,
    pub message: String,
    pub queued: usize,
}

/// Kicks the works sync off as a detached task and returns immediately; the
/// triggering request never waits on the multi-minute batch.
#[tracing::instrument(name = "POST /admin/sync/works", skip(state, body))]
pub async fn sync_works(
    State(state): State<AppState>,
    body: Option<Json<SyncWorksParams>>,
) -> Result<impl IntoResponse, ApiError> {
    let ids = body
        .and_then(|Json(params)| params.ids)
        .unwrap_or_else(sync::ids_from_env);

    if ids.is_empty() {
        return Err(ApiError::bad_request("No work ids configured".to_string()));
    }

    let queued = ids.len();
    tokio::spawn(async move {
        let report = sync::run_works_sync(state, ids).await;
        tracing::info!(
            synced = report.synced,
            total = report.total,
            "Works sync finished"
        );
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(SyncWorksResponse {
            status: "accepted",
            message: "Sync started in background".to_string(),
            queued,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_map_to_enum_values() {
        assert_eq!(parse_status("pending"), Some(QuestionStatus::Pending));
        assert_eq!(parse_status("answered"), Some(QuestionStatus::Answered));
        assert_eq!(parse_status("rejected"), Some(QuestionStatus::Rejected));
        assert_eq!(parse_status("spam"), None);
    }
}
