use crate::commands;
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/users", get(commands::users::get_users_axum))
        .route("/api/users/create", post(commands::users::create_user_axum))
        .route(
            "/api/users/update/:id",
            post(commands::users::update_user_axum),
        )
        .route(
            "/api/users/reset-password/:id",
            post(commands::users::reset_password_axum),
        )
}
