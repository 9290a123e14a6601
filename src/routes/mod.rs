use crate::middleware::{auth::auth_middleware, response::wrap_response_middleware};
use crate::state::AppState;
use axum::{middleware, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod analytics;
pub mod auth;
pub mod crops;
pub mod dashboard;
pub mod farms;
pub mod harvest;
pub mod inventory;
pub mod reports;
pub mod users;

pub fn create_router() -> Router<AppState> {
    Router::new()
        .merge(auth::router())
        .merge(users::router())
        .merge(farms::router())
        .merge(crops::router())
        .merge(harvest::router())
        .merge(inventory::router())
        .merge(dashboard::router())
        .merge(analytics::router())
        .merge(reports::router())
}

/// The full application: routes, envelope, auth, CORS and request tracing.
pub fn build_app(state: AppState) -> Router {
    create_router()
        .layer(middleware::from_fn(wrap_response_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
