use crate::{entity::work, error::ApiError, state::AppState};
use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};

pub const WORKS_CACHE_KEY: &str = "works/all";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/{id}", get(show))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WorksResponse {
    pub works: Vec<work::Model>,
}

#[tracing::instrument(name = "GET /works", skip(state))]
pub async fn index(State(state): State<AppState>) -> Result<Json<WorksResponse>, ApiError> {
    if let Some(cached) = state.get_cache::<WorksResponse>(WORKS_CACHE_KEY) {
        return Ok(Json(cached));
    }

    let works = work::Entity::find()
        .order_by_desc(work::Column::PublishedAt)
        .all(&state.db)
        .await?;

    let response = WorksResponse { works };
    state.set_cache(WORKS_CACHE_KEY.to_string(), &response);
    Ok(Json(response))
}

/// Lookup by the source-site id first, then by primary id.
#[tracing::instrument(name = "GET /works/{id}", skip(state))]
pub async fn show(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<work::Model>, ApiError> {
    let by_external = work::Entity::find()
        .filter(work::Column::ExternalId.eq(&id))
        .one(&state.db)
        .await?;

    let work = match by_external {
        Some(work) => work,
        None => work::Entity::find_by_id(&id)
            .one(&state.db)
            .await?
            .ok_or(ApiError::NOT_FOUND)?,
    };

    Ok(Json(work))
}
