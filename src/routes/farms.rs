use crate::commands;
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/farms", get(commands::farms::get_farms_axum))
        .route("/api/farms/:id", get(commands::farms::get_farm_axum))
        .route("/api/farms/save", post(commands::farms::save_farm_axum))
        .route(
            "/api/farms/deactivate/:id",
            post(commands::farms::deactivate_farm_axum),
        )
        .route("/api/fields", get(commands::fields::get_fields_axum))
        .route("/api/fields/:id", get(commands::fields::get_field_axum))
        .route("/api/fields/save", post(commands::fields::save_field_axum))
        .route(
            "/api/fields/notes/:id",
            post(commands::fields::update_field_notes_axum),
        )
        .route(
            "/api/fields/delete/:id",
            post(commands::fields::delete_field_axum),
        )
}
