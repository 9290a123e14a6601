use crate::access::{Capability, Resource};
use crate::commands::farms::refresh_farms;
use crate::commands::inventory::legacy::{insert_inventory_row, NewInventoryRow};
use crate::commands::utils::{conflict_on_unique, parse_date_param, today, validate_grade};
use crate::db::{DbPool, HarvestRecord};
use crate::error::{HarvestError, HarvestResult};
use crate::metrics::{self, EfficiencyBand};
use crate::middleware::auth::CurrentUser;
use crate::state::AppState;
use axum::extract::{Json, Path, Query, State};
use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const HARVEST_STATUSES: [&str; 3] = ["pending", "completed", "verified"];

pub(crate) const HARVEST_SELECT: &str = r#"
    SELECT h.*, fl.name AS field_name, fl.farm_id, fa.name AS farm_name, c.name AS crop_name,
           fl.area_hectares, c.expected_yield_per_hectare, u.username AS harvested_by_username
    FROM harvest_records h
    JOIN fields fl ON fl.id = h.field_id
    JOIN farms fa ON fa.id = fl.farm_id
    JOIN crops c ON c.id = fl.crop_id
    LEFT JOIN users u ON u.id = h.harvested_by
"#;

/// Minimum recordable quantity: 0.1 t.
pub fn minimum_quantity() -> Decimal {
    Decimal::new(1, 1)
}

/// Checks quantity, grade and date; returns the normalised grade.
pub fn validate_harvest(
    quantity: Decimal,
    grade: &str,
    harvest_date: NaiveDate,
    today: NaiveDate,
) -> HarvestResult<String> {
    if quantity < minimum_quantity() {
        return Err(HarvestError::validation("Quantity must be at least 0.1 tons"));
    }
    if harvest_date > today {
        return Err(HarvestError::validation("Harvest date cannot be in the future"));
    }
    validate_grade(grade)
}

fn validate_status(status: Option<&str>) -> HarvestResult<String> {
    let s = status.map(str::trim).filter(|s| !s.is_empty()).unwrap_or("completed");
    if HARVEST_STATUSES.contains(&s) {
        Ok(s.to_string())
    } else {
        Err(HarvestError::validation(format!("Unknown harvest status: {}", s)))
    }
}

fn validate_moisture(moisture: Option<Decimal>) -> HarvestResult<()> {
    match moisture {
        Some(m) if m < Decimal::ZERO || m > Decimal::ONE_HUNDRED => Err(HarvestError::validation(
            "Moisture content must be between 0 and 100",
        )),
        _ => Ok(()),
    }
}

/// Whether a save books the harvest into legacy stock. A harvest is booked at most once.
pub fn plan_stock_booking(requested: bool, already_booked: bool) -> HarvestResult<bool> {
    if requested && already_booked {
        return Err(HarvestError::validation(
            "This harvest is already stored in inventory",
        ));
    }
    Ok(requested)
}

#[derive(Debug, Serialize)]
pub struct HarvestView {
    #[serde(flatten)]
    pub record: HarvestRecord,
    pub yield_per_hectare: f64,
    pub efficiency: f64,
    pub efficiency_band: EfficiencyBand,
}

impl HarvestView {
    pub fn build(record: HarvestRecord, baseline: Decimal) -> Self {
        let area = record.area_hectares.unwrap_or(Decimal::ZERO);
        let expected = metrics::expected_yield(area, record.expected_yield_per_hectare, baseline);
        let efficiency = metrics::round1(metrics::efficiency_percent(record.quantity_tons, expected));
        Self {
            yield_per_hectare: metrics::round2(metrics::to_f64(metrics::yield_per_hectare(
                record.quantity_tons,
                area,
            ))),
            efficiency,
            efficiency_band: EfficiencyBand::from_percent(efficiency),
            record,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct HarvestFilter {
    pub farm_id: Option<i32>,
    pub field_id: Option<i32>,
    pub grade: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct HarvestSummary {
    pub total_harvests: i64,
    pub total_quantity: Decimal,
    pub recent_activity: i64,
}

#[derive(Serialize)]
pub struct HarvestOverview {
    pub summary: HarvestSummary,
    pub harvests: Vec<HarvestView>,
}

pub async fn scoped_harvests(
    pool: &DbPool,
    user: &CurrentUser,
    filter: &HarvestFilter,
    limit: i64,
) -> HarvestResult<Vec<HarvestRecord>> {
    let start = parse_date_param("start_date", filter.start_date.as_deref())?;
    let end = parse_date_param("end_date", filter.end_date.as_deref())?;
    let grade = match filter.grade.as_deref().map(str::trim).filter(|g| !g.is_empty()) {
        Some(g) => Some(validate_grade(g)?),
        None => None,
    };

    let sql = format!(
        "{} WHERE {}
           AND ($2::INT IS NULL OR fl.farm_id = $2)
           AND ($3::INT IS NULL OR h.field_id = $3)
           AND ($4::TEXT IS NULL OR h.quality_grade = $4)
           AND ($5::DATE IS NULL OR h.harvest_date >= $5)
           AND ($6::DATE IS NULL OR h.harvest_date <= $6)
         ORDER BY h.harvest_date DESC, h.id DESC
         LIMIT $7",
        HARVEST_SELECT,
        user.scope(Resource::HarvestRecord).sql()
    );

    let rows = sqlx::query_as::<_, HarvestRecord>(&sql)
        .bind(user.id)
        .bind(filter.farm_id)
        .bind(filter.field_id)
        .bind(grade)
        .bind(start)
        .bind(end)
        .bind(limit)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

pub async fn harvest_summary(pool: &DbPool, user: &CurrentUser) -> HarvestResult<HarvestSummary> {
    let sql = format!(
        "SELECT COUNT(*) AS total_harvests,
                COALESCE(SUM(h.quantity_tons), 0) AS total_quantity,
                COUNT(*) FILTER (WHERE h.harvest_date >= $2) AS recent_activity
         FROM harvest_records h
         WHERE {}",
        user.scope(Resource::HarvestRecord).sql()
    );
    let summary = sqlx::query_as::<_, HarvestSummary>(&sql)
        .bind(user.id)
        .bind(today() - Duration::days(7))
        .fetch_one(pool)
        .await?;
    Ok(summary)
}

pub async fn fetch_harvest(pool: &DbPool, id: i32) -> HarvestResult<HarvestRecord> {
    let sql = format!("{} WHERE h.id = $1", HARVEST_SELECT);
    sqlx::query_as::<_, HarvestRecord>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| HarvestError::not_found("Harvest record"))
}

pub async fn get_harvest_records_axum(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(filter): Query<HarvestFilter>,
) -> HarvestResult<Json<HarvestOverview>> {
    let baseline = state.config.baseline_yield_per_hectare;
    let records = scoped_harvests(&state.pool, &user, &filter, 50).await?;
    let summary = harvest_summary(&state.pool, &user).await?;
    Ok(Json(HarvestOverview {
        summary,
        harvests: records
            .into_iter()
            .map(|r| HarvestView::build(r, baseline))
            .collect(),
    }))
}

pub async fn get_harvest_record_axum(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i32>,
) -> HarvestResult<Json<HarvestView>> {
    user.ensure_access(&state.pool, Resource::HarvestRecord, id).await?;
    let record = fetch_harvest(&state.pool, id).await?;
    Ok(Json(HarvestView::build(
        record,
        state.config.baseline_yield_per_hectare,
    )))
}

#[derive(Debug, Deserialize)]
pub struct StoreHarvestRequest {
    pub storage_location: String,
    pub storage_condition: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub unit_price: Option<Decimal>,
    pub batch_number: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SaveHarvestRecordRequest {
    pub id: Option<i32>,
    pub field_id: i32,
    pub harvest_date: Option<NaiveDate>,
    pub quantity_tons: Decimal,
    pub quality_grade: String,
    pub status: Option<String>,
    pub weather_conditions: Option<String>,
    pub moisture_content: Option<Decimal>,
    #[serde(default)]
    pub notes: String,
    /// Also books the harvest into stock.
    pub store_in_inventory: Option<StoreHarvestRequest>,
}

pub async fn save_harvest_record_axum(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(record): Json<SaveHarvestRecordRequest>,
) -> HarvestResult<Json<HarvestView>> {
    user.require(Capability::TrackHarvests)?;
    let today = today();
    let harvest_date = record.harvest_date.unwrap_or(today);
    let grade = validate_harvest(record.quantity_tons, &record.quality_grade, harvest_date, today)?;
    let status = validate_status(record.status.as_deref())?;
    validate_moisture(record.moisture_content)?;
    user.ensure_access(&state.pool, Resource::Field, record.field_id).await?;
    if record.store_in_inventory.is_some() {
        user.require(Capability::ManageInventory)?;
    }

    let existing = match record.id {
        Some(id) if id > 0 => {
            user.ensure_access(&state.pool, Resource::HarvestRecord, id).await?;
            Some(id)
        }
        _ => None,
    };

    let mut tx = state.pool.begin().await?;

    let (new_farm, crop_id): (i32, i32) =
        sqlx::query_as("SELECT farm_id, crop_id FROM fields WHERE id = $1")
            .bind(record.field_id)
            .fetch_one(&mut *tx)
            .await?;

    let id = if let Some(id) = existing {
        let (old_farm,): (i32,) = sqlx::query_as(
            "SELECT fl.farm_id FROM harvest_records h JOIN fields fl ON fl.id = h.field_id WHERE h.id = $1",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        let (booked,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM inventory WHERE harvest_record_id = $1)",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        plan_stock_booking(record.store_in_inventory.is_some(), booked)?;

        sqlx::query(
            "UPDATE harvest_records SET
                field_id = $1, harvest_date = $2, quantity_tons = $3, quality_grade = $4,
                status = $5, weather_conditions = $6, moisture_content = $7, notes = $8,
                updated_at = CURRENT_TIMESTAMP
             WHERE id = $9",
        )
        .bind(record.field_id)
        .bind(harvest_date)
        .bind(record.quantity_tons)
        .bind(&grade)
        .bind(&status)
        .bind(&record.weather_conditions)
        .bind(record.moisture_content)
        .bind(&record.notes)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        refresh_farms(&mut tx, &[old_farm, new_farm]).await?;
        id
    } else {
        let (id,): (i32,) = sqlx::query_as(
            "INSERT INTO harvest_records (
                field_id, harvest_date, quantity_tons, quality_grade, harvested_by,
                status, weather_conditions, moisture_content, notes
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING id",
        )
        .bind(record.field_id)
        .bind(harvest_date)
        .bind(record.quantity_tons)
        .bind(&grade)
        .bind(user.id)
        .bind(&status)
        .bind(&record.weather_conditions)
        .bind(record.moisture_content)
        .bind(&record.notes)
        .fetch_one(&mut *tx)
        .await?;

        refresh_farms(&mut tx, &[new_farm]).await?;
        id
    };

    if let Some(store) = &record.store_in_inventory {
        insert_inventory_row(
            &mut tx,
            &NewInventoryRow {
                crop_id,
                quantity_tons: record.quantity_tons,
                storage_location: store.storage_location.clone(),
                storage_condition: store.storage_condition.clone(),
                quality_grade: grade.clone(),
                date_stored: today,
                expiry_date: store.expiry_date,
                batch_number: store.batch_number.clone(),
                unit_price: store.unit_price,
                harvest_record_id: Some(id),
                managed_by: user.id,
                notes: None,
            },
        )
        .await
        .map_err(|e| match e {
            HarvestError::Database(e) => {
                conflict_on_unique(e, "This harvest is already stored in inventory")
            }
            e => e,
        })?;
    }

    tx.commit().await?;
    tracing::info!(
        "Harvest {} ({} t, grade {}) saved by {}",
        id,
        record.quantity_tons,
        grade,
        user.username
    );

    let saved = fetch_harvest(&state.pool, id).await?;
    Ok(Json(HarvestView::build(
        saved,
        state.config.baseline_yield_per_hectare,
    )))
}

pub async fn delete_harvest_record_axum(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i32>,
) -> HarvestResult<Json<()>> {
    user.require(Capability::TrackHarvests)?;
    user.ensure_access(&state.pool, Resource::HarvestRecord, id).await?;

    let mut tx = state.pool.begin().await?;
    let (farm_id,): (i32,) = sqlx::query_as(
        "SELECT fl.farm_id FROM harvest_records h JOIN fields fl ON fl.id = h.field_id WHERE h.id = $1",
    )
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM harvest_records WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    refresh_farms(&mut tx, &[farm_id]).await?;
    tx.commit().await?;

    tracing::info!("Harvest {} deleted by {}", id, user.username);
    Ok(Json(()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_harvest_booked_into_stock_once() {
        assert!(plan_stock_booking(true, false).unwrap());
        assert!(!plan_stock_booking(false, false).unwrap());
        // Re-saving a booked harvest without asking to store leaves stock untouched.
        assert!(!plan_stock_booking(false, true).unwrap());
        let err = plan_stock_booking(true, true).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation error: This harvest is already stored in inventory"
        );
    }

    #[test]
    fn test_validate_harvest() {
        let today = d(2024, 6, 1);
        assert_eq!(validate_harvest(dec("0.1"), "a", today, today).unwrap(), "A");
        assert!(validate_harvest(dec("0.09"), "A", today, today).is_err());
        assert!(validate_harvest(dec("5"), "F", today, today).is_err());
        assert!(validate_harvest(dec("5"), "B", d(2024, 6, 2), today).is_err());
    }

    #[test]
    fn test_status_and_moisture() {
        assert_eq!(validate_status(None).unwrap(), "completed");
        assert_eq!(validate_status(Some("verified")).unwrap(), "verified");
        assert!(validate_status(Some("lost")).is_err());
        assert!(validate_moisture(Some(dec("101"))).is_err());
        assert!(validate_moisture(Some(dec("14.5"))).is_ok());
        assert!(validate_moisture(None).is_ok());
    }

    #[test]
    fn test_harvest_view_metrics() {
        let record = HarvestRecord {
            id: 1,
            field_id: 1,
            harvest_date: d(2024, 5, 1),
            quantity_tons: dec("76"),
            quality_grade: "A".into(),
            harvested_by: 1,
            status: "completed".into(),
            weather_conditions: None,
            moisture_content: None,
            notes: String::new(),
            created_at: Utc::now(),
            field_name: None,
            farm_id: Some(1),
            farm_name: None,
            crop_name: None,
            area_hectares: Some(dec("10")),
            expected_yield_per_hectare: Some(dec("8")),
            harvested_by_username: None,
        };
        let view = HarvestView::build(record, dec("5"));
        assert_eq!(view.yield_per_hectare, 7.6);
        assert_eq!(view.efficiency, 95.0);
        assert_eq!(view.efficiency_band, EfficiencyBand::High);
    }
}
