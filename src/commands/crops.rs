use crate::access::Capability;
use crate::commands::utils::{conflict_on_unique, require_text, validate_non_negative, validate_positive};
use crate::db::{Crop, CropType, DbPool, StorageLocation};
use crate::error::{HarvestError, HarvestResult};
use crate::metrics;
use crate::middleware::auth::CurrentUser;
use crate::state::AppState;
use axum::extract::{Json, State};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const CROP_CATEGORIES: [&str; 5] = ["cereal", "legume", "root", "fruit", "other"];

// --- Crops ---

pub async fn get_crops_axum(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> HarvestResult<Json<Vec<Crop>>> {
    let crops = sqlx::query_as::<_, Crop>("SELECT * FROM crops ORDER BY name, variety")
        .fetch_all(&state.pool)
        .await?;
    Ok(Json(crops))
}

#[derive(Deserialize)]
pub struct SaveCropRequest {
    pub id: Option<i32>,
    pub name: String,
    #[serde(default)]
    pub variety: String,
    pub crop_type: String,
    pub expected_yield_per_hectare: Option<Decimal>,
    pub growing_season_days: Option<i32>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

pub fn validate_crop_category(category: &str) -> HarvestResult<()> {
    if CROP_CATEGORIES.contains(&category) {
        Ok(())
    } else {
        Err(HarvestError::validation(format!(
            "Crop type must be one of {}",
            CROP_CATEGORIES.join(", ")
        )))
    }
}

pub async fn save_crop_axum(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<SaveCropRequest>,
) -> HarvestResult<Json<Crop>> {
    user.require(Capability::ManageFarms)?;
    let name = require_text("Crop name", &payload.name)?;
    validate_crop_category(&payload.crop_type)?;
    if let Some(y) = payload.expected_yield_per_hectare {
        validate_non_negative("Expected yield", y)?;
    }

    let crop = match payload.id {
        Some(id) if id > 0 => sqlx::query_as::<_, Crop>(
            "UPDATE crops SET name = $1, variety = $2, crop_type = $3, expected_yield_per_hectare = $4,
                growing_season_days = $5, description = $6, is_active = COALESCE($7, is_active),
                updated_at = CURRENT_TIMESTAMP
             WHERE id = $8 RETURNING *",
        )
        .bind(&name)
        .bind(payload.variety.trim())
        .bind(&payload.crop_type)
        .bind(payload.expected_yield_per_hectare)
        .bind(payload.growing_season_days)
        .bind(&payload.description)
        .bind(payload.is_active)
        .bind(id)
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| conflict_on_unique(e, "A crop with this name and variety already exists"))?
        .ok_or_else(|| HarvestError::not_found("Crop"))?,
        _ => sqlx::query_as::<_, Crop>(
            "INSERT INTO crops (name, variety, crop_type, expected_yield_per_hectare, growing_season_days, description, is_active)
             VALUES ($1, $2, $3, $4, $5, $6, COALESCE($7, TRUE)) RETURNING *",
        )
        .bind(&name)
        .bind(payload.variety.trim())
        .bind(&payload.crop_type)
        .bind(payload.expected_yield_per_hectare)
        .bind(payload.growing_season_days)
        .bind(&payload.description)
        .bind(payload.is_active)
        .fetch_one(&state.pool)
        .await
        .map_err(|e| conflict_on_unique(e, "A crop with this name and variety already exists"))?,
    };

    tracing::info!("Crop '{}' saved by {}", crop.label(), user.username);
    Ok(Json(crop))
}

// --- Crop types ---

pub async fn get_crop_types_axum(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> HarvestResult<Json<Vec<CropType>>> {
    let types = sqlx::query_as::<_, CropType>("SELECT * FROM crop_types ORDER BY display_name")
        .fetch_all(&state.pool)
        .await?;
    Ok(Json(types))
}

#[derive(Deserialize)]
pub struct SaveCropTypeRequest {
    pub id: Option<i32>,
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    pub average_shelf_life_days: Option<i32>,
    pub minimum_stock_threshold: Option<Decimal>,
    pub is_active: Option<bool>,
}

pub async fn save_crop_type_axum(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<SaveCropTypeRequest>,
) -> HarvestResult<Json<CropType>> {
    user.require(Capability::ManageInventory)?;
    let name = require_text("Name", &payload.name)?.to_lowercase();
    let display_name = require_text("Display name", &payload.display_name)?;
    let shelf_life = payload.average_shelf_life_days.unwrap_or(180);
    if shelf_life <= 0 {
        return Err(HarvestError::validation("Shelf life must be at least one day"));
    }
    let threshold = payload.minimum_stock_threshold.unwrap_or(Decimal::ONE_HUNDRED);
    validate_non_negative("Minimum stock threshold", threshold)?;

    let crop_type = match payload.id {
        Some(id) if id > 0 => sqlx::query_as::<_, CropType>(
            "UPDATE crop_types SET name = $1, display_name = $2, description = $3,
                average_shelf_life_days = $4, minimum_stock_threshold = $5,
                is_active = COALESCE($6, is_active)
             WHERE id = $7 RETURNING *",
        )
        .bind(&name)
        .bind(&display_name)
        .bind(&payload.description)
        .bind(shelf_life)
        .bind(threshold)
        .bind(payload.is_active)
        .bind(id)
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| conflict_on_unique(e, "Crop type name already exists"))?
        .ok_or_else(|| HarvestError::not_found("Crop type"))?,
        _ => sqlx::query_as::<_, CropType>(
            "INSERT INTO crop_types (name, display_name, description, average_shelf_life_days, minimum_stock_threshold, is_active)
             VALUES ($1, $2, $3, $4, $5, COALESCE($6, TRUE)) RETURNING *",
        )
        .bind(&name)
        .bind(&display_name)
        .bind(&payload.description)
        .bind(shelf_life)
        .bind(threshold)
        .bind(payload.is_active)
        .fetch_one(&state.pool)
        .await
        .map_err(|e| conflict_on_unique(e, "Crop type name already exists"))?,
    };

    tracing::info!("Crop type '{}' saved by {}", crop_type.name, user.username);
    Ok(Json(crop_type))
}

// --- Storage locations ---

#[derive(Debug, Serialize)]
pub struct StorageLocationView {
    #[serde(flatten)]
    pub location: StorageLocation,
    pub utilization_percent: f64,
    pub available_tons: f64,
}

pub fn utilization(stored: Decimal, capacity: Decimal) -> f64 {
    if capacity <= Decimal::ZERO {
        return 0.0;
    }
    metrics::round1(metrics::to_f64(stored / capacity * Decimal::ONE_HUNDRED))
}

impl From<StorageLocation> for StorageLocationView {
    fn from(location: StorageLocation) -> Self {
        let stored = location.stored_tons.unwrap_or(Decimal::ZERO);
        Self {
            utilization_percent: utilization(stored, location.capacity_tons),
            available_tons: metrics::to_f64((location.capacity_tons - stored).max(Decimal::ZERO)),
            location,
        }
    }
}

pub async fn storage_locations_with_usage(pool: &DbPool) -> HarvestResult<Vec<StorageLocation>> {
    let rows = sqlx::query_as::<_, StorageLocation>(
        "SELECT sl.*, COALESCE((SELECT SUM(ii.quantity) FROM inventory_items ii WHERE ii.storage_location_id = sl.id), 0) AS stored_tons
         FROM storage_locations sl ORDER BY sl.name",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn get_storage_locations_axum(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> HarvestResult<Json<Vec<StorageLocationView>>> {
    let rows = storage_locations_with_usage(&state.pool).await?;
    Ok(Json(rows.into_iter().map(StorageLocationView::from).collect()))
}

#[derive(Deserialize)]
pub struct SaveStorageLocationRequest {
    pub id: Option<i32>,
    pub name: String,
    pub code: String,
    pub address: Option<String>,
    pub capacity_tons: Decimal,
    pub is_active: Option<bool>,
}

pub async fn save_storage_location_axum(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<SaveStorageLocationRequest>,
) -> HarvestResult<Json<StorageLocation>> {
    user.require(Capability::ManageInventory)?;
    let name = require_text("Name", &payload.name)?;
    let code = require_text("Code", &payload.code)?.to_uppercase();
    if code.chars().count() > 10 {
        return Err(HarvestError::validation("Code must be at most 10 characters"));
    }
    validate_positive("Capacity", payload.capacity_tons)?;

    let location = match payload.id {
        Some(id) if id > 0 => sqlx::query_as::<_, StorageLocation>(
            "UPDATE storage_locations SET name = $1, code = $2, address = $3, capacity_tons = $4,
                is_active = COALESCE($5, is_active), updated_at = CURRENT_TIMESTAMP
             WHERE id = $6 RETURNING *",
        )
        .bind(&name)
        .bind(&code)
        .bind(&payload.address)
        .bind(payload.capacity_tons)
        .bind(payload.is_active)
        .bind(id)
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| conflict_on_unique(e, "Storage location name or code already exists"))?
        .ok_or_else(|| HarvestError::not_found("Storage location"))?,
        _ => sqlx::query_as::<_, StorageLocation>(
            "INSERT INTO storage_locations (name, code, address, capacity_tons, is_active)
             VALUES ($1, $2, $3, $4, COALESCE($5, TRUE)) RETURNING *",
        )
        .bind(&name)
        .bind(&code)
        .bind(&payload.address)
        .bind(payload.capacity_tons)
        .bind(payload.is_active)
        .fetch_one(&state.pool)
        .await
        .map_err(|e| conflict_on_unique(e, "Storage location name or code already exists"))?,
    };

    tracing::info!("Storage location {} saved by {}", location.code, user.username);
    Ok(Json(location))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crop_category() {
        assert!(validate_crop_category("legume").is_ok());
        assert!(validate_crop_category("tuber").is_err());
    }

    #[test]
    fn test_utilization() {
        let cap = Decimal::from(500);
        assert_eq!(utilization(Decimal::from(125), cap), 25.0);
        assert_eq!(utilization(Decimal::from(10), Decimal::ZERO), 0.0);
    }

    #[test]
    fn test_location_view_clamps_available() {
        let view = StorageLocationView::from(StorageLocation {
            id: 1,
            name: "Cold Storage Unit".into(),
            code: "CS-01".into(),
            address: None,
            capacity_tons: Decimal::from(100),
            is_active: true,
            stored_tons: Some(Decimal::from(120)),
        });
        assert_eq!(view.available_tons, 0.0);
        assert_eq!(view.utilization_percent, 120.0);
    }
}
