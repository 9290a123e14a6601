use super::stock::{self, plan_fifo_removal, Batch, BulkAction, StockStatus};
use crate::access::{Capability, Resource};
use crate::commands::utils::{parse_date_param, require_text, today, validate_grade, validate_positive};
use crate::db::{DbPool, InventoryRow};
use crate::error::{HarvestError, HarvestResult};
use crate::metrics;
use crate::middleware::auth::CurrentUser;
use crate::state::AppState;
use axum::extract::{Json, Query, State};
use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, Transaction};

pub const DEFAULT_SHELF_LIFE_DAYS: i64 = 180;

pub fn default_expiry(today: NaiveDate) -> NaiveDate {
    today + Duration::days(DEFAULT_SHELF_LIFE_DAYS)
}

pub fn shortfall_message(available: Decimal, crop: &str, location: &str) -> String {
    format!(
        "Only {} tons available for {} at {}",
        available.normalize(),
        crop,
        location
    )
}

#[derive(Debug, Serialize)]
pub struct InventoryView {
    #[serde(flatten)]
    pub row: InventoryRow,
    pub total_value: Option<f64>,
    pub days_in_storage: i64,
    pub days_until_expiry: i64,
    pub is_expired: bool,
    pub is_low_stock: bool,
    pub status: StockStatus,
    pub status_labels: Vec<String>,
}

impl InventoryView {
    pub fn build(row: InventoryRow, threshold: Decimal, today: NaiveDate) -> Self {
        let days_until_expiry = (row.expiry_date - today).num_days();
        Self {
            total_value: row.unit_price.map(|p| metrics::round2(metrics::to_f64(p * row.quantity_tons))),
            days_in_storage: (today - row.date_stored).num_days(),
            days_until_expiry,
            is_expired: days_until_expiry < 0,
            is_low_stock: row.quantity_tons < threshold,
            status: StockStatus::classify(row.quantity_tons, row.expiry_date, threshold, today),
            status_labels: stock::status_labels(
                row.quantity_tons,
                row.expiry_date,
                row.is_reserved,
                threshold,
                today,
            ),
            row,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewInventoryRow {
    pub crop_id: i32,
    pub quantity_tons: Decimal,
    pub storage_location: String,
    pub storage_condition: Option<String>,
    pub quality_grade: String,
    pub date_stored: NaiveDate,
    pub expiry_date: Option<NaiveDate>,
    pub batch_number: Option<String>,
    pub unit_price: Option<Decimal>,
    pub harvest_record_id: Option<i32>,
    pub managed_by: i32,
    pub notes: Option<String>,
}

pub async fn insert_inventory_row(
    tx: &mut Transaction<'_, Postgres>,
    row: &NewInventoryRow,
) -> HarvestResult<i32> {
    validate_positive("Quantity", row.quantity_tons)?;
    let location = require_text("Storage location", &row.storage_location)?;
    let grade = validate_grade(&row.quality_grade)?;
    let condition = row
        .storage_condition
        .clone()
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| "ambient".to_string());
    stock::validate_condition(&condition)?;
    let expiry = row.expiry_date.unwrap_or_else(|| default_expiry(row.date_stored));
    stock::validate_expiry(row.date_stored, expiry)?;

    let (id,): (i32,) = sqlx::query_as(
        "INSERT INTO inventory (
            crop_id, quantity_tons, storage_location, storage_condition, quality_grade,
            date_stored, expiry_date, batch_number, unit_price, harvest_record_id, managed_by, notes
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) RETURNING id",
    )
    .bind(row.crop_id)
    .bind(row.quantity_tons)
    .bind(&location)
    .bind(&condition)
    .bind(&grade)
    .bind(row.date_stored)
    .bind(expiry)
    .bind(&row.batch_number)
    .bind(row.unit_price)
    .bind(row.harvest_record_id)
    .bind(row.managed_by)
    .bind(&row.notes)
    .fetch_one(&mut **tx)
    .await?;

    Ok(id)
}

#[derive(Debug, Default, Deserialize)]
pub struct InventoryFilter {
    pub crop_id: Option<i32>,
    pub storage_location: Option<String>,
    pub grade: Option<String>,
    pub status: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CropStock {
    pub crop_name: String,
    pub total_quantity: Decimal,
    pub item_count: i64,
}

#[derive(Serialize)]
pub struct InventoryOverview {
    pub items: Vec<InventoryView>,
    pub crop_inventory: Vec<CropStock>,
    pub total_quantity: Decimal,
    pub total_items: usize,
}

pub async fn scoped_inventory(
    pool: &DbPool,
    user: &CurrentUser,
    filter: &InventoryFilter,
) -> HarvestResult<Vec<InventoryRow>> {
    let start = parse_date_param("start_date", filter.start_date.as_deref())?;
    let end = parse_date_param("end_date", filter.end_date.as_deref())?;
    let grade = match filter.grade.as_deref().map(str::trim).filter(|g| !g.is_empty()) {
        Some(g) => Some(validate_grade(g)?),
        None => None,
    };
    let location = filter
        .storage_location
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| format!("%{}%", l));

    let sql = format!(
        "SELECT i.*, c.name AS crop_name
         FROM inventory i JOIN crops c ON c.id = i.crop_id
         WHERE {}
           AND ($2::INT IS NULL OR i.crop_id = $2)
           AND ($3::TEXT IS NULL OR i.storage_location ILIKE $3)
           AND ($4::TEXT IS NULL OR i.quality_grade = $4)
           AND ($5::DATE IS NULL OR i.date_stored >= $5)
           AND ($6::DATE IS NULL OR i.date_stored <= $6)
         ORDER BY i.updated_at DESC",
        user.scope(Resource::Inventory).sql()
    );
    let rows = sqlx::query_as::<_, InventoryRow>(&sql)
        .bind(user.id)
        .bind(filter.crop_id)
        .bind(location)
        .bind(grade)
        .bind(start)
        .bind(end)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Per-crop totals over the rows being shown, largest first.
pub fn group_by_crop(views: &[InventoryView]) -> Vec<CropStock> {
    let mut groups: Vec<CropStock> = Vec::new();
    for v in views {
        let name = v.row.crop_name.clone().unwrap_or_default();
        match groups.iter_mut().find(|g| g.crop_name == name) {
            Some(g) => {
                g.total_quantity += v.row.quantity_tons;
                g.item_count += 1;
            }
            None => groups.push(CropStock {
                crop_name: name,
                total_quantity: v.row.quantity_tons,
                item_count: 1,
            }),
        }
    }
    groups.sort_by(|a, b| b.total_quantity.cmp(&a.total_quantity));
    groups
}

pub async fn get_inventory_axum(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(filter): Query<InventoryFilter>,
) -> HarvestResult<Json<InventoryOverview>> {
    user.require(Capability::ManageInventory)?;
    let status = match filter.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => Some(StockStatus::parse(s)?),
        None => None,
    };
    let threshold = state.config.low_stock_threshold_tons;
    let today = today();

    let items: Vec<InventoryView> = scoped_inventory(&state.pool, &user, &filter)
        .await?
        .into_iter()
        .map(|row| InventoryView::build(row, threshold, today))
        .filter(|v| status.map_or(true, |s| v.status == s))
        .collect();

    Ok(Json(InventoryOverview {
        crop_inventory: group_by_crop(&items),
        total_quantity: items.iter().map(|v| v.row.quantity_tons).sum(),
        total_items: items.len(),
        items,
    }))
}

#[derive(Debug, Deserialize)]
pub struct AddInventoryRequest {
    pub crop_id: i32,
    pub quantity_tons: Decimal,
    pub storage_location: String,
    pub storage_condition: Option<String>,
    pub quality_grade: String,
    pub expiry_date: Option<NaiveDate>,
    pub batch_number: Option<String>,
    pub unit_price: Option<Decimal>,
    pub notes: Option<String>,
}

pub async fn add_inventory_axum(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<AddInventoryRequest>,
) -> HarvestResult<Json<InventoryView>> {
    user.require(Capability::ManageInventory)?;

    let mut tx = state.pool.begin().await?;
    let id = insert_inventory_row(
        &mut tx,
        &NewInventoryRow {
            crop_id: payload.crop_id,
            quantity_tons: payload.quantity_tons,
            storage_location: payload.storage_location,
            storage_condition: payload.storage_condition,
            quality_grade: payload.quality_grade,
            date_stored: today(),
            expiry_date: payload.expiry_date,
            batch_number: payload.batch_number,
            unit_price: payload.unit_price,
            harvest_record_id: None,
            managed_by: user.id,
            notes: payload.notes,
        },
    )
    .await?;
    tx.commit().await?;
    tracing::info!("Inventory {} ({} t) added by {}", id, payload.quantity_tons, user.username);

    let row = sqlx::query_as::<_, InventoryRow>(
        "SELECT i.*, c.name AS crop_name FROM inventory i JOIN crops c ON c.id = i.crop_id WHERE i.id = $1",
    )
    .bind(id)
    .fetch_one(&state.pool)
    .await?;
    Ok(Json(InventoryView::build(
        row,
        state.config.low_stock_threshold_tons,
        today(),
    )))
}

#[derive(Debug, Deserialize)]
pub struct RemoveInventoryRequest {
    pub crop_id: i32,
    pub storage_location: String,
    pub quantity_tons: Decimal,
}

#[derive(Debug, Serialize)]
pub struct RemovalResult {
    pub removed: Decimal,
    pub batches_touched: usize,
    pub batches_emptied: usize,
}

pub async fn remove_inventory_axum(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<RemoveInventoryRequest>,
) -> HarvestResult<Json<RemovalResult>> {
    user.require(Capability::ManageInventory)?;
    validate_positive("Quantity", payload.quantity_tons)?;
    let location = require_text("Storage location", &payload.storage_location)?;

    let mut tx = state.pool.begin().await?;

    let crop_name: Option<(String,)> = sqlx::query_as("SELECT name FROM crops WHERE id = $1")
        .bind(payload.crop_id)
        .fetch_optional(&mut *tx)
        .await?;
    let (crop_name,) = crop_name.ok_or_else(|| HarvestError::not_found("Crop"))?;

    let batches: Vec<(i32, NaiveDate, Decimal)> = sqlx::query_as(
        "SELECT id, date_stored, quantity_tons FROM inventory
         WHERE crop_id = $1 AND storage_location = $2
         ORDER BY date_stored, id
         FOR UPDATE",
    )
    .bind(payload.crop_id)
    .bind(&location)
    .fetch_all(&mut *tx)
    .await?;

    let batches: Vec<Batch> = batches
        .into_iter()
        .map(|(id, date_stored, quantity)| Batch { id, date_stored, quantity })
        .collect();

    let plan = plan_fifo_removal(&batches, payload.quantity_tons).map_err(|short| {
        HarvestError::validation(shortfall_message(short.available, &crop_name, &location))
    })?;

    let mut emptied = 0;
    for draw in &plan {
        if draw.empties_batch() {
            sqlx::query("DELETE FROM inventory WHERE id = $1")
                .bind(draw.id)
                .execute(&mut *tx)
                .await?;
            emptied += 1;
        } else {
            sqlx::query(
                "UPDATE inventory SET quantity_tons = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2",
            )
            .bind(draw.remaining)
            .bind(draw.id)
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;
    tracing::info!(
        "Removed {} t of {} from {} ({} batches) by {}",
        payload.quantity_tons,
        crop_name,
        location,
        plan.len(),
        user.username
    );

    Ok(Json(RemovalResult {
        removed: payload.quantity_tons,
        batches_touched: plan.len(),
        batches_emptied: emptied,
    }))
}

#[derive(Debug, Deserialize)]
pub struct BulkUpdateRequest {
    pub ids: Vec<i32>,
    pub action: String,
    pub new_location: Option<String>,
    pub new_condition: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BulkUpdateResult {
    pub updated: u64,
}

pub async fn bulk_update_inventory_axum(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<BulkUpdateRequest>,
) -> HarvestResult<Json<BulkUpdateResult>> {
    user.require(Capability::ManageInventory)?;
    if payload.ids.is_empty() {
        return Err(HarvestError::validation("Select at least one inventory item"));
    }
    let action = BulkAction::parse(
        &payload.action,
        payload.new_location.as_deref(),
        payload.new_condition.as_deref(),
    )?;

    let (set_clause, value) = action.set_clause();
    let sql = format!(
        "UPDATE inventory i SET {}, updated_at = CURRENT_TIMESTAMP
         WHERE i.id = ANY($2) AND {}",
        set_clause,
        user.scope(Resource::Inventory).sql()
    );
    let mut query = sqlx::query(&sql).bind(user.id).bind(&payload.ids);
    if let Some(v) = value {
        query = query.bind(v.to_string());
    }
    let res = query.execute(&state.pool).await?;

    tracing::info!(
        "Bulk {:?} on {} inventory rows by {}",
        action,
        res.rows_affected(),
        user.username
    );
    Ok(Json(BulkUpdateResult {
        updated: res.rows_affected(),
    }))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct RemovableStock {
    pub crop_id: i32,
    pub crop_name: String,
    pub storage_location: String,
    pub available_tons: Decimal,
}

/// Crop/location pairs that still hold stock, for the removal form.
pub async fn get_removable_inventory_axum(
    State(state): State<AppState>,
    user: CurrentUser,
) -> HarvestResult<Json<Vec<RemovableStock>>> {
    user.require(Capability::ManageInventory)?;
    let rows = sqlx::query_as::<_, RemovableStock>(
        "SELECT i.crop_id, c.name AS crop_name, i.storage_location, SUM(i.quantity_tons) AS available_tons
         FROM inventory i JOIN crops c ON c.id = i.crop_id
         GROUP BY i.crop_id, c.name, i.storage_location
         HAVING SUM(i.quantity_tons) > 0
         ORDER BY c.name, i.storage_location",
    )
    .fetch_all(&state.pool)
    .await?;
    Ok(Json(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn row(id: i32, crop: &str, qty: &str, expiry: NaiveDate) -> InventoryRow {
        InventoryRow {
            id,
            crop_id: 1,
            quantity_tons: qty.parse().unwrap(),
            storage_location: "Main Warehouse".into(),
            storage_condition: "dry".into(),
            quality_grade: "A".into(),
            date_stored: d(2024, 5, 1),
            expiry_date: expiry,
            batch_number: None,
            unit_price: Some("250.50".parse().unwrap()),
            is_reserved: false,
            harvest_record_id: None,
            managed_by: 1,
            notes: None,
            updated_at: Utc::now(),
            crop_name: Some(crop.into()),
        }
    }

    #[test]
    fn test_inventory_view() {
        let today = d(2024, 6, 1);
        let view = InventoryView::build(row(1, "Corn", "40", d(2024, 6, 5)), Decimal::ONE_HUNDRED, today);
        assert_eq!(view.total_value, Some(10020.0));
        assert_eq!(view.days_in_storage, 31);
        assert_eq!(view.days_until_expiry, 4);
        assert!(!view.is_expired);
        assert!(view.is_low_stock);
        assert_eq!(view.status, StockStatus::Expiring);
        assert_eq!(view.status_labels, vec!["Expires in 4 days", "Low Stock"]);
    }

    #[test]
    fn test_group_by_crop() {
        let today = d(2024, 6, 1);
        let t = Decimal::ONE_HUNDRED;
        let views: Vec<InventoryView> = vec![
            row(1, "Corn", "40", d(2025, 1, 1)),
            row(2, "Wheat", "300", d(2025, 1, 1)),
            row(3, "Corn", "20", d(2025, 1, 1)),
        ]
        .into_iter()
        .map(|r| InventoryView::build(r, t, today))
        .collect();
        let groups = group_by_crop(&views);
        assert_eq!(groups[0].crop_name, "Wheat");
        assert_eq!(groups[1].total_quantity, Decimal::from(60));
        assert_eq!(groups[1].item_count, 2);
    }

    #[test]
    fn test_shortfall_message() {
        assert_eq!(
            shortfall_message("12.50".parse().unwrap(), "Corn", "Main Warehouse"),
            "Only 12.5 tons available for Corn at Main Warehouse"
        );
    }

    #[test]
    fn test_default_expiry() {
        assert_eq!(default_expiry(d(2024, 1, 1)), d(2024, 6, 29));
    }
}
