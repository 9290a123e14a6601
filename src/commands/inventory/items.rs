use super::stock::{self, plan_fifo_removal, Batch, StockStatus};
use crate::access::{Capability, Resource};
use crate::commands::utils::{today, validate_grade, validate_non_negative, validate_positive};
use crate::db::{DbPool, InventoryItem, InventoryTransaction};
use crate::error::{HarvestError, HarvestResult};
use crate::middleware::auth::CurrentUser;
use crate::state::AppState;
use axum::extract::{Json, Path, Query, State};
use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, Transaction};

const ITEM_SELECT: &str = r#"
    SELECT ii.*, ct.display_name AS crop_type_name, sl.name AS location_name,
           ct.minimum_stock_threshold
    FROM inventory_items ii
    JOIN crop_types ct ON ct.id = ii.crop_type_id
    JOIN storage_locations sl ON sl.id = ii.storage_location_id
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionType {
    Add,
    Remove,
    Adjust,
    Expired,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Add => "ADD",
            ActionType::Remove => "REMOVE",
            ActionType::Adjust => "ADJUST",
            ActionType::Expired => "EXPIRED",
        }
    }

    pub fn parse(s: &str) -> HarvestResult<Self> {
        match s.trim().to_uppercase().as_str() {
            "ADD" => Ok(ActionType::Add),
            "REMOVE" => Ok(ActionType::Remove),
            "ADJUST" => Ok(ActionType::Adjust),
            "EXPIRED" => Ok(ActionType::Expired),
            other => Err(HarvestError::validation(format!("Unknown action type: {}", other))),
        }
    }
}

/// One audit row. `quantity` is the signed change.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub action: ActionType,
    pub quantity: Decimal,
    pub previous: Decimal,
    pub new: Decimal,
}

impl LedgerEntry {
    pub fn change(action: ActionType, previous: Decimal, new: Decimal) -> Self {
        Self {
            action,
            quantity: new - previous,
            previous,
            new,
        }
    }
}

async fn log_transaction(
    tx: &mut Transaction<'_, Postgres>,
    item_id: i32,
    entry: &LedgerEntry,
    notes: Option<&str>,
    user_id: Option<i32>,
) -> HarvestResult<()> {
    sqlx::query(
        "INSERT INTO inventory_transactions
            (inventory_item_id, action_type, quantity, previous_quantity, new_quantity, notes, user_id)
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(item_id)
    .bind(entry.action.as_str())
    .bind(entry.quantity)
    .bind(entry.previous)
    .bind(entry.new)
    .bind(notes)
    .bind(user_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub fn ensure_capacity(
    location: &str,
    capacity: Decimal,
    stored: Decimal,
    adding: Decimal,
) -> HarvestResult<()> {
    if stored + adding > capacity {
        let free = (capacity - stored).max(Decimal::ZERO);
        return Err(HarvestError::validation(format!(
            "Adding {} tons would exceed the capacity of {} ({} tons free)",
            adding.normalize(),
            location,
            free.normalize()
        )));
    }
    Ok(())
}

/// Extra storage an adjustment takes up; decreases take none.
pub fn added_by_adjustment(previous: Decimal, new_quantity: Decimal) -> Decimal {
    (new_quantity - previous).max(Decimal::ZERO)
}

pub fn default_item_expiry(date_stored: NaiveDate, shelf_life_days: i32) -> NaiveDate {
    date_stored + Duration::days(shelf_life_days as i64)
}

#[derive(Debug, Serialize)]
pub struct ItemView {
    #[serde(flatten)]
    pub item: InventoryItem,
    pub days_until_expiry: i64,
    pub status: StockStatus,
}

impl ItemView {
    pub fn build(item: InventoryItem, today: NaiveDate) -> Self {
        let threshold = item.minimum_stock_threshold.unwrap_or(Decimal::ONE_HUNDRED);
        Self {
            days_until_expiry: (item.expiry_date - today).num_days(),
            status: StockStatus::classify(item.quantity, item.expiry_date, threshold, today),
            item,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ItemFilter {
    pub crop_type_id: Option<i32>,
    pub storage_location_id: Option<i32>,
    pub status: Option<String>,
}

pub async fn scoped_items(
    pool: &DbPool,
    user: &CurrentUser,
    filter: &ItemFilter,
) -> HarvestResult<Vec<InventoryItem>> {
    let sql = format!(
        "{} WHERE {}
           AND ($2::INT IS NULL OR ii.crop_type_id = $2)
           AND ($3::INT IS NULL OR ii.storage_location_id = $3)
         ORDER BY ii.expiry_date, ii.id",
        ITEM_SELECT,
        user.scope(Resource::InventoryItem).sql()
    );
    let items = sqlx::query_as::<_, InventoryItem>(&sql)
        .bind(user.id)
        .bind(filter.crop_type_id)
        .bind(filter.storage_location_id)
        .fetch_all(pool)
        .await?;
    Ok(items)
}

async fn fetch_item(pool: &DbPool, id: i32) -> HarvestResult<InventoryItem> {
    let sql = format!("{} WHERE ii.id = $1", ITEM_SELECT);
    sqlx::query_as::<_, InventoryItem>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| HarvestError::not_found("Inventory item"))
}

pub async fn get_inventory_items_axum(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(filter): Query<ItemFilter>,
) -> HarvestResult<Json<Vec<ItemView>>> {
    user.require(Capability::ManageInventory)?;
    let status = match filter.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => Some(StockStatus::parse(s)?),
        None => None,
    };
    let today = today();
    let views = scoped_items(&state.pool, &user, &filter)
        .await?
        .into_iter()
        .map(|item| ItemView::build(item, today))
        .filter(|v| status.map_or(true, |s| v.status == s))
        .collect();
    Ok(Json(views))
}

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub crop_type_id: i32,
    pub storage_location_id: i32,
    pub quantity: Decimal,
    pub quality_grade: String,
    pub date_stored: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

pub async fn add_inventory_item_axum(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<AddItemRequest>,
) -> HarvestResult<Json<ItemView>> {
    user.require(Capability::ManageInventory)?;
    validate_positive("Quantity", payload.quantity)?;
    let grade = validate_grade(&payload.quality_grade)?;
    let date_stored = payload.date_stored.unwrap_or_else(today);

    let mut tx = state.pool.begin().await?;

    let location: Option<(String, Decimal)> = sqlx::query_as(
        "SELECT name, capacity_tons FROM storage_locations WHERE id = $1 AND is_active FOR UPDATE",
    )
    .bind(payload.storage_location_id)
    .fetch_optional(&mut *tx)
    .await?;
    let (location_name, capacity) =
        location.ok_or_else(|| HarvestError::not_found("Storage location"))?;

    let (stored,): (Decimal,) = sqlx::query_as(
        "SELECT COALESCE(SUM(quantity), 0) FROM inventory_items WHERE storage_location_id = $1",
    )
    .bind(payload.storage_location_id)
    .fetch_one(&mut *tx)
    .await?;
    ensure_capacity(&location_name, capacity, stored, payload.quantity)?;

    let shelf_life: Option<(i32,)> =
        sqlx::query_as("SELECT average_shelf_life_days FROM crop_types WHERE id = $1")
            .bind(payload.crop_type_id)
            .fetch_optional(&mut *tx)
            .await?;
    let (shelf_life,) = shelf_life.ok_or_else(|| HarvestError::not_found("Crop type"))?;
    let expiry = payload
        .expiry_date
        .unwrap_or_else(|| default_item_expiry(date_stored, shelf_life));
    stock::validate_expiry(date_stored, expiry)?;

    let (id,): (i32,) = sqlx::query_as(
        "INSERT INTO inventory_items
            (crop_type_id, storage_location_id, quantity, quality_grade, date_stored, expiry_date, added_by)
         VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id",
    )
    .bind(payload.crop_type_id)
    .bind(payload.storage_location_id)
    .bind(payload.quantity)
    .bind(&grade)
    .bind(date_stored)
    .bind(expiry)
    .bind(user.id)
    .fetch_one(&mut *tx)
    .await?;

    let entry = LedgerEntry::change(ActionType::Add, Decimal::ZERO, payload.quantity);
    log_transaction(&mut tx, id, &entry, payload.notes.as_deref(), Some(user.id)).await?;
    tx.commit().await?;

    tracing::info!(
        "Inventory item {} ({} t at {}) added by {}",
        id,
        payload.quantity,
        location_name,
        user.username
    );
    Ok(Json(ItemView::build(fetch_item(&state.pool, id).await?, today())))
}

#[derive(Debug, Deserialize)]
pub struct RemoveItemsRequest {
    pub crop_type_id: i32,
    pub storage_location_id: Option<i32>,
    pub quantity: Decimal,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ItemRemovalResult {
    pub removed: Decimal,
    pub entries: Vec<ItemDraw>,
}

#[derive(Debug, Serialize)]
pub struct ItemDraw {
    pub item_id: i32,
    pub taken: Decimal,
    pub remaining: Decimal,
}

pub async fn remove_inventory_items_axum(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<RemoveItemsRequest>,
) -> HarvestResult<Json<ItemRemovalResult>> {
    user.require(Capability::ManageInventory)?;
    validate_positive("Quantity", payload.quantity)?;

    let mut tx = state.pool.begin().await?;

    let batches: Vec<(i32, NaiveDate, Decimal)> = sqlx::query_as(
        "SELECT id, date_stored, quantity FROM inventory_items
         WHERE crop_type_id = $1 AND ($2::INT IS NULL OR storage_location_id = $2) AND quantity > 0
         ORDER BY date_stored, id
         FOR UPDATE",
    )
    .bind(payload.crop_type_id)
    .bind(payload.storage_location_id)
    .fetch_all(&mut *tx)
    .await?;

    let batches: Vec<Batch> = batches
        .into_iter()
        .map(|(id, date_stored, quantity)| Batch { id, date_stored, quantity })
        .collect();

    let plan = plan_fifo_removal(&batches, payload.quantity).map_err(|short| {
        HarvestError::validation(format!(
            "Insufficient stock: requested {} tons, only {} tons available",
            short.requested.normalize(),
            short.available.normalize()
        ))
    })?;

    let mut entries = Vec::with_capacity(plan.len());
    for draw in &plan {
        sqlx::query("UPDATE inventory_items SET quantity = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2")
            .bind(draw.remaining)
            .bind(draw.id)
            .execute(&mut *tx)
            .await?;
        let entry = LedgerEntry::change(ActionType::Remove, draw.previous, draw.remaining);
        log_transaction(&mut tx, draw.id, &entry, payload.notes.as_deref(), Some(user.id)).await?;
        entries.push(ItemDraw {
            item_id: draw.id,
            taken: draw.taken,
            remaining: draw.remaining,
        });
    }

    tx.commit().await?;
    tracing::info!(
        "Removed {} t of crop type {} across {} items by {}",
        payload.quantity,
        payload.crop_type_id,
        entries.len(),
        user.username
    );

    Ok(Json(ItemRemovalResult {
        removed: payload.quantity,
        entries,
    }))
}

#[derive(Debug, Deserialize)]
pub struct AdjustItemRequest {
    pub new_quantity: Decimal,
    pub notes: Option<String>,
}

pub async fn adjust_inventory_item_axum(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i32>,
    Json(payload): Json<AdjustItemRequest>,
) -> HarvestResult<Json<ItemView>> {
    user.require(Capability::ManageInventory)?;
    validate_non_negative("Quantity", payload.new_quantity)?;
    user.ensure_access(&state.pool, Resource::InventoryItem, id).await?;

    let mut tx = state.pool.begin().await?;
    let (previous, location_id): (Decimal, i32) = sqlx::query_as(
        "SELECT quantity, storage_location_id FROM inventory_items WHERE id = $1 FOR UPDATE",
    )
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    let growth = added_by_adjustment(previous, payload.new_quantity);
    if growth > Decimal::ZERO {
        let (location_name, capacity): (String, Decimal) = sqlx::query_as(
            "SELECT name, capacity_tons FROM storage_locations WHERE id = $1 FOR UPDATE",
        )
        .bind(location_id)
        .fetch_one(&mut *tx)
        .await?;
        let (stored,): (Decimal,) = sqlx::query_as(
            "SELECT COALESCE(SUM(quantity), 0) FROM inventory_items WHERE storage_location_id = $1",
        )
        .bind(location_id)
        .fetch_one(&mut *tx)
        .await?;
        ensure_capacity(&location_name, capacity, stored, growth)?;
    }

    sqlx::query("UPDATE inventory_items SET quantity = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2")
        .bind(payload.new_quantity)
        .bind(id)
        .execute(&mut *tx)
        .await?;

    let entry = LedgerEntry::change(ActionType::Adjust, previous, payload.new_quantity);
    log_transaction(&mut tx, id, &entry, payload.notes.as_deref(), Some(user.id)).await?;
    tx.commit().await?;

    tracing::info!(
        "Inventory item {} adjusted {} -> {} by {}",
        id,
        previous,
        payload.new_quantity,
        user.username
    );
    Ok(Json(ItemView::build(fetch_item(&state.pool, id).await?, today())))
}

#[derive(Debug, Serialize)]
pub struct ExpireSweepResult {
    pub expired_items: usize,
    pub expired_quantity: Decimal,
}

/// Zeroes every item past its expiry date that still holds stock.
pub async fn expire_items(
    pool: &DbPool,
    user_id: Option<i32>,
    today: NaiveDate,
) -> HarvestResult<ExpireSweepResult> {
    let mut tx = pool.begin().await?;
    let expired: Vec<(i32, Decimal)> = sqlx::query_as(
        "SELECT id, quantity FROM inventory_items
         WHERE expiry_date < $1 AND quantity > 0
         ORDER BY id
         FOR UPDATE",
    )
    .bind(today)
    .fetch_all(&mut *tx)
    .await?;

    let mut total = Decimal::ZERO;
    for (id, quantity) in &expired {
        sqlx::query("UPDATE inventory_items SET quantity = 0, updated_at = CURRENT_TIMESTAMP WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let entry = LedgerEntry::change(ActionType::Expired, *quantity, Decimal::ZERO);
        log_transaction(&mut tx, *id, &entry, Some("Expired stock written off"), user_id).await?;
        total += *quantity;
    }
    tx.commit().await?;

    Ok(ExpireSweepResult {
        expired_items: expired.len(),
        expired_quantity: total,
    })
}

pub async fn expire_inventory_items_axum(
    State(state): State<AppState>,
    user: CurrentUser,
) -> HarvestResult<Json<ExpireSweepResult>> {
    user.require(Capability::ManageInventory)?;
    let result = expire_items(&state.pool, Some(user.id), today()).await?;
    tracing::info!(
        "Expire sweep by {}: {} items, {} t",
        user.username,
        result.expired_items,
        result.expired_quantity
    );
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct TransactionFilter {
    pub item_id: Option<i32>,
    pub action: Option<String>,
    pub limit: Option<i64>,
}

pub async fn get_inventory_transactions_axum(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(filter): Query<TransactionFilter>,
) -> HarvestResult<Json<Vec<InventoryTransaction>>> {
    user.require(Capability::ManageInventory)?;
    let action = match filter.action.as_deref().map(str::trim).filter(|a| !a.is_empty()) {
        Some(a) => Some(ActionType::parse(a)?.as_str()),
        None => None,
    };
    let limit = filter.limit.unwrap_or(100).clamp(1, 500);

    let rows = sqlx::query_as::<_, InventoryTransaction>(
        "SELECT * FROM inventory_transactions
         WHERE ($1::INT IS NULL OR inventory_item_id = $1)
           AND ($2::TEXT IS NULL OR action_type = $2)
         ORDER BY timestamp DESC, id DESC
         LIMIT $3",
    )
    .bind(filter.item_id)
    .bind(action)
    .bind(limit)
    .fetch_all(&state.pool)
    .await?;
    Ok(Json(rows))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct CropTypeStock {
    pub crop_type_id: i32,
    pub crop_type_name: String,
    pub total_quantity: Decimal,
    pub minimum_stock_threshold: Decimal,
    pub item_count: i64,
    #[sqlx(skip)]
    pub below_threshold: bool,
}

pub async fn get_stock_summary_axum(
    State(state): State<AppState>,
    user: CurrentUser,
) -> HarvestResult<Json<Vec<CropTypeStock>>> {
    user.require(Capability::ManageInventory)?;
    let mut rows = sqlx::query_as::<_, CropTypeStock>(
        "SELECT ct.id AS crop_type_id, ct.display_name AS crop_type_name,
                COALESCE(SUM(ii.quantity), 0) AS total_quantity,
                ct.minimum_stock_threshold,
                COUNT(ii.id) FILTER (WHERE ii.quantity > 0) AS item_count
         FROM crop_types ct
         LEFT JOIN inventory_items ii ON ii.crop_type_id = ct.id
         WHERE ct.is_active
         GROUP BY ct.id, ct.display_name, ct.minimum_stock_threshold
         ORDER BY ct.display_name",
    )
    .fetch_all(&state.pool)
    .await?;
    for row in &mut rows {
        row.below_threshold = row.total_quantity < row.minimum_stock_threshold;
    }
    Ok(Json(rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_ledger_entries_are_signed() {
        let remove = LedgerEntry::change(ActionType::Remove, dec("40"), dec("15"));
        assert_eq!(remove.quantity, dec("-25"));
        let adjust_up = LedgerEntry::change(ActionType::Adjust, dec("10"), dec("12.5"));
        assert_eq!(adjust_up.quantity, dec("2.5"));
        let add = LedgerEntry::change(ActionType::Add, Decimal::ZERO, dec("8"));
        assert_eq!((add.previous, add.new, add.quantity), (Decimal::ZERO, dec("8"), dec("8")));
    }

    #[test]
    fn test_action_type_parse() {
        assert_eq!(ActionType::parse("remove").unwrap(), ActionType::Remove);
        assert_eq!(ActionType::Expired.as_str(), "EXPIRED");
        assert!(ActionType::parse("MOVE").is_err());
    }

    #[test]
    fn test_capacity() {
        assert!(ensure_capacity("Cold Storage Unit", dec("500"), dec("450"), dec("50")).is_ok());
        let err = ensure_capacity("Cold Storage Unit", dec("500"), dec("450"), dec("50.5")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation error: Adding 50.5 tons would exceed the capacity of Cold Storage Unit (50 tons free)"
        );
    }

    #[test]
    fn test_adjustment_growth_checked_against_capacity() {
        assert_eq!(added_by_adjustment(dec("20"), dec("5")), Decimal::ZERO);
        let growth = added_by_adjustment(dec("20"), dec("80"));
        assert_eq!(growth, dec("60"));
        // 450 t stored including this item's 20 t; raising it to 80 t overflows 500 t.
        assert!(ensure_capacity("Cold Storage Unit", dec("500"), dec("450"), growth).is_err());
        assert!(ensure_capacity("Cold Storage Unit", dec("500"), dec("440"), growth).is_ok());
    }

    #[test]
    fn test_default_item_expiry() {
        let stored = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(default_item_expiry(stored, 90), NaiveDate::from_ymd_opt(2024, 3, 31).unwrap());
    }

    #[test]
    fn test_item_view_uses_crop_threshold() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let item = InventoryItem {
            id: 1,
            crop_type_id: 1,
            storage_location_id: 1,
            quantity: dec("30"),
            quality_grade: "A".into(),
            date_stored: today,
            expiry_date: NaiveDate::from_ymd_opt(2024, 12, 1).unwrap(),
            added_by: None,
            created_at: chrono::Utc::now(),
            crop_type_name: None,
            location_name: None,
            minimum_stock_threshold: Some(dec("25")),
        };
        let view = ItemView::build(item, today);
        assert_eq!(view.status, StockStatus::Good);
        assert_eq!(view.days_until_expiry, 183);
    }
}
