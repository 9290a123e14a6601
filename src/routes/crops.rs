use crate::commands;
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/crops", get(commands::crops::get_crops_axum))
        .route("/api/crops/save", post(commands::crops::save_crop_axum))
        .route("/api/crop-types", get(commands::crops::get_crop_types_axum))
        .route(
            "/api/crop-types/save",
            post(commands::crops::save_crop_type_axum),
        )
        .route(
            "/api/storage-locations",
            get(commands::crops::get_storage_locations_axum),
        )
        .route(
            "/api/storage-locations/save",
            post(commands::crops::save_storage_location_axum),
        )
}
