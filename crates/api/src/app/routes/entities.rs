use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query, rejection::JsonRejection, rejection::QueryRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use ske_core::EntityUpdate;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_entity).get(list_entities))
        .route(
            "/:id",
            get(get_entity).patch(update_entity).delete(delete_entity),
        )
}

pub async fn create_entity(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::CreateEntityRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return errors::invalid_body(e.body_text()),
    };

    match services.entities().create(body.into()).await {
        Ok(entity) => (StatusCode::CREATED, Json(entity)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn get_entity(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match dto::parse_entity_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.entities().get(id).await {
        Ok(entity) => Json(entity).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn list_entities(
    Extension(services): Extension<Arc<AppServices>>,
    query: Result<Query<dto::ListQuery>, QueryRejection>,
) -> axum::response::Response {
    let Query(query) = match query {
        Ok(q) => q,
        Err(e) => return errors::invalid_pagination(e.body_text()),
    };
    let page = match dto::parse_pagination(&services.pagination(), &query) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    match services.entities().list(page).await {
        Ok(entities) => Json(entities).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn update_entity(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Result<Json<EntityUpdate>, JsonRejection>,
) -> axum::response::Response {
    let id = match dto::parse_entity_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let Json(patch) = match body {
        Ok(b) => b,
        Err(e) => return errors::invalid_body(e.body_text()),
    };

    match services.entities().update(id, patch).await {
        Ok(entity) => Json(entity).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn delete_entity(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match dto::parse_entity_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.entities().delete(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
