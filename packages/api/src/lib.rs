use std::sync::Arc;

use axum::{Json, Router, middleware::from_fn_with_state, routing::get};
use error::ApiError;
use archive_os_types::{Value, json};
use state::State;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    decompression::RequestDecompressionLayer,
};

pub mod entity;
mod middleware;
mod routes;

pub mod error;
pub mod realtime;
pub mod state;
pub mod sync;

pub use axum;
pub use sea_orm;

pub fn construct_router(state: Arc<State>) -> Router {
    let admin = routes::admin::routes().layer(from_fn_with_state(
        state.clone(),
        middleware::admin::admin_auth,
    ));

    let router = Router::new()
        .route("/", get(service_info))
        .nest("/health", routes::health::routes())
        .nest("/works", routes::work::routes())
        .nest("/donations", routes::donation::routes())
        .nest("/questions", routes::question::routes())
        .nest("/webhook", routes::webhook::routes())
        .nest("/admin", admin)
        .route("/realtime", get(routes::realtime::realtime))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            ServiceBuilder::new()
                .layer(RequestDecompressionLayer::new())
                .layer(CompressionLayer::new()),
        );

    Router::new().nest("/api/v1", router)
}

#[tracing::instrument(name = "GET /")]
async fn service_info() -> Result<Json<Value>, ApiError> {
    Ok(Json(json!({
        "api": "Archive OS API",
        "version": "v1",
        "status": "running",
        "endpoints": {
            "works": "/api/v1/works",
            "donations": "/api/v1/donations",
            "questions": "/api/v1/questions",
            "realtime": "/api/v1/realtime",
        },
    })))
}
