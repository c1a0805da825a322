use crate::{
    entity::{question, sea_orm_active_enums::QuestionStatus},
    error::ApiError,
    state::AppState,
};
use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub fn routes() -> Router<AppState> {
    Router::new().route("/", get(index).post(create))
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QuestionEntry {
    pub id: String,
    pub content: String,
    pub twitter_handle: Option<String>,
    pub status: QuestionStatus,
    pub created_at: chrono::NaiveDateTime,
}

impl From<question::Model> for QuestionEntry {
    fn from(model: question::Model) -> Self {
        Self {
            id: model.id,
            content: model.content,
            twitter_handle: model.twitter_handle,
            status: model.status,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateQuestionParams {
    pub content: String,
    pub twitter_handle: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateQuestionResponse {
    pub status: &'static str,
    pub question: QuestionEntry,
}

/// First hop of the forwarded chain, if the edge proxy set one
fn requester_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
}

#[utoipa::path(
    post,
    path = "/questions",
    tag = "questions",
    request_body = CreateQuestionParams,
    responses(
        (status = 201, description = "Question submitted", body = CreateQuestionResponse),
        (status = 422, description = "Blank content")
    )
)]
#[tracing::instrument(name = "POST /questions", skip(state, headers, params))]
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(params): Json<CreateQuestionParams>,
) -> Result<impl IntoResponse, ApiError> {
    let content = params.content.trim().to_string();
    if content.is_empty() {
        return Err(ApiError::unprocessable("Content can't be blank".to_string()));
    }

    let now = chrono::Utc::now().naive_utc();
    let model = question::ActiveModel {
        id: Set(archive_os_types::create_id()),
        content: Set(content),
        twitter_handle: Set(params
            .twitter_handle
            .map(|h| h.trim().trim_start_matches('@').to_string())
            .filter(|h| !h.is_empty())),
        status: Set(QuestionStatus::Pending),
        ip_address: Set(requester_ip(&headers)),
        created_at: Set(now),
        updated_at: Set(now),
    };

    let saved = model.insert(&state.db).await?;
    tracing::info!(question_id = %saved.id, "Question received");

    Ok((
        StatusCode::CREATED,
        Json(CreateQuestionResponse {
            status: "success",
            question: saved.into(),
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/questions",
    tag = "questions",
    responses(
        (status = 200, description = "Answered questions, newest first", body = [QuestionEntry])
    )
)]
#[tracing::instrument(name = "GET /questions", skip(state))]
pub async fn index(State(state): State<AppState>) -> Result<Json<Vec<QuestionEntry>>, ApiError> {
    let questions = question::Entity::find()
        .filter(question::Column::Status.eq(QuestionStatus::Answered))
        .order_by_desc(question::Column::CreatedAt)
        .limit(50)
        .all(&state.db)
        .await?;

    Ok(Json(questions.into_iter().map(QuestionEntry::from).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requester_ip_takes_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(requester_ip(&headers).as_deref(), Some("203.0.113.7"));

        assert_eq!(requester_ip(&HeaderMap::new()), None);
    }
}
