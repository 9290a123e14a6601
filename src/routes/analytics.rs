use crate::commands::analytics;
use crate::state::AppState;
use axum::{routing::get, Router};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/analytics/yearly-trends",
            get(analytics::get_yearly_trends_axum),
        )
        .route(
            "/api/analytics/farm-efficiency/:id",
            get(analytics::get_farm_efficiency_axum),
        )
        .route(
            "/api/analytics/yield-performance",
            get(analytics::get_yield_performance_axum),
        )
        .route(
            "/api/analytics/seasonal-trends",
            get(analytics::get_seasonal_trends_axum),
        )
        .route(
            "/api/analytics/predictions",
            get(analytics::get_predictions_axum),
        )
        .route(
            "/api/analytics/top-metrics",
            get(analytics::get_top_metrics_axum),
        )
        .route("/api/analytics/top-farms", get(analytics::get_top_farms_axum))
}
