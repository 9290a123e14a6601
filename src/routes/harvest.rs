use crate::commands;
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/harvests",
            get(commands::harvest::get_harvest_records_axum),
        )
        .route(
            "/api/harvests/:id",
            get(commands::harvest::get_harvest_record_axum),
        )
        .route(
            "/api/harvests/save",
            post(commands::harvest::save_harvest_record_axum),
        )
        .route(
            "/api/harvests/delete/:id",
            post(commands::harvest::delete_harvest_record_axum),
        )
}
