use crate::commands::reports;
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/reports/monthly-summary",
            get(reports::get_monthly_summary_axum),
        )
        .route("/api/reports/generate", post(reports::generate_report_axum))
        .route("/api/reports/history", get(reports::get_report_history_axum))
}
