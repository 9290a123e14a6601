use crate::commands;
use crate::state::AppState;
use axum::{routing::get, Router};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/dashboard", get(commands::dashboard::get_dashboard_axum))
        .route(
            "/api/dashboard/stats",
            get(commands::dashboard::get_role_stats_axum),
        )
        .route(
            "/api/notifications",
            get(commands::notifications::get_notifications_axum),
        )
}
