use crate::commands::inventory::{items, legacy};
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn router() -> Router<AppState> {
    Router::new()
        // Legacy book
        .route("/api/inventory", get(legacy::get_inventory_axum))
        .route("/api/inventory/add", post(legacy::add_inventory_axum))
        .route("/api/inventory/remove", post(legacy::remove_inventory_axum))
        .route(
            "/api/inventory/bulk-update",
            post(legacy::bulk_update_inventory_axum),
        )
        .route(
            "/api/inventory/removable",
            get(legacy::get_removable_inventory_axum),
        )
        // Item book with audit log
        .route("/api/inventory/items", get(items::get_inventory_items_axum))
        .route(
            "/api/inventory/items/add",
            post(items::add_inventory_item_axum),
        )
        .route(
            "/api/inventory/items/remove",
            post(items::remove_inventory_items_axum),
        )
        .route(
            "/api/inventory/items/adjust/:id",
            post(items::adjust_inventory_item_axum),
        )
        .route(
            "/api/inventory/items/expire",
            post(items::expire_inventory_items_axum),
        )
        .route(
            "/api/inventory/transactions",
            get(items::get_inventory_transactions_axum),
        )
        .route(
            "/api/inventory/stock-summary",
            get(items::get_stock_summary_axum),
        )
}
