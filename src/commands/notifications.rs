use crate::access::Capability;
use crate::commands::fields::{upcoming_fields, FieldView};
use crate::commands::inventory::items::{scoped_items, ItemFilter, ItemView};
use crate::commands::inventory::legacy::{scoped_inventory, InventoryFilter, InventoryView};
use crate::commands::inventory::stock::StockStatus;
use crate::commands::utils::today;
use crate::error::HarvestResult;
use crate::metrics::HARVEST_SOON_DAYS;
use crate::middleware::auth::CurrentUser;
use crate::state::AppState;
use axum::extract::{Json, State};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Serialize)]
pub struct Notifications {
    pub upcoming_harvests: Vec<FieldView>,
    pub low_inventory: Vec<InventoryView>,
    pub expiring_items: Vec<ItemView>,
    pub expired_items: Vec<ItemView>,
    pub total_count: usize,
}

impl Notifications {
    /// Sorts stocked items into the expiring and expired lists; empty batches raise nothing.
    pub fn assemble(
        upcoming_harvests: Vec<FieldView>,
        low_inventory: Vec<InventoryView>,
        items: Vec<ItemView>,
    ) -> Self {
        let (expired_items, expiring_items): (Vec<ItemView>, Vec<ItemView>) = items
            .into_iter()
            .filter(|v| v.item.quantity > Decimal::ZERO)
            .filter(|v| matches!(v.status, StockStatus::Expired | StockStatus::Expiring))
            .partition(|v| v.status == StockStatus::Expired);
        let total_count = upcoming_harvests.len()
            + low_inventory.len()
            + expiring_items.len()
            + expired_items.len();
        Self {
            upcoming_harvests,
            low_inventory,
            expiring_items,
            expired_items,
            total_count,
        }
    }
}

pub async fn get_notifications_axum(
    State(state): State<AppState>,
    user: CurrentUser,
) -> HarvestResult<Json<Notifications>> {
    user.require(Capability::ViewNotifications)?;
    let pool = &state.pool;
    let today = today();
    let baseline = state.config.baseline_yield_per_hectare;
    let threshold = state.config.low_stock_threshold_tons;

    let upcoming = upcoming_fields(pool, &user, today, HARVEST_SOON_DAYS, None)
        .await?
        .into_iter()
        .map(|f| FieldView::build(f, baseline, today))
        .collect();

    let low_inventory = scoped_inventory(pool, &user, &InventoryFilter::default())
        .await?
        .into_iter()
        .filter(|row| row.quantity_tons < threshold)
        .map(|row| InventoryView::build(row, threshold, today))
        .collect();

    let items = scoped_items(pool, &user, &ItemFilter::default())
        .await?
        .into_iter()
        .map(|item| ItemView::build(item, today))
        .collect();

    let notifications = Notifications::assemble(upcoming, low_inventory, items);
    tracing::debug!(
        "{} notifications for {}",
        notifications.total_count,
        user.username
    );
    Ok(Json(notifications))
}
