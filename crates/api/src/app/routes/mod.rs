use axum::Router;

pub mod entities;
pub mod system;

/// Router for all resource endpoints.
pub fn router() -> Router {
    Router::new().nest("/entities", entities::router())
}
