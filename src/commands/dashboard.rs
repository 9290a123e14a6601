use crate::access::{Capability, Resource};
use crate::commands::fields::{upcoming_fields, FieldView};
use crate::commands::harvest::{scoped_harvests, HarvestFilter, HarvestView};
use crate::commands::utils::today;
use crate::db::{DbPool, Farm};
use crate::error::HarvestResult;
use crate::metrics;
use crate::middleware::auth::CurrentUser;
use crate::state::AppState;
use axum::extract::{Json, State};
use chrono::{Datelike, Duration, NaiveDate};
use rust_decimal::Decimal;
use serde::Serialize;

pub const MONTH_NAMES: [&str; 12] = [
    "January", "February", "March", "April", "May", "June", "July", "August", "September",
    "October", "November", "December",
];

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MonthPoint {
    pub month: String,
    pub harvest_count: i64,
    pub total_quantity: f64,
}

/// Expands sparse `(month, count, total)` rows into twelve points, January first.
pub fn fill_months(rows: &[(i32, i64, Decimal)], short_names: bool) -> Vec<MonthPoint> {
    MONTH_NAMES
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let month = i as i32 + 1;
            let (count, total) = rows
                .iter()
                .find(|(m, _, _)| *m == month)
                .map(|(_, c, t)| (*c, *t))
                .unwrap_or((0, Decimal::ZERO));
            MonthPoint {
                month: if short_names { name[..3].to_string() } else { name.to_string() },
                harvest_count: count,
                total_quantity: metrics::to_f64(total),
            }
        })
        .collect()
}

pub async fn monthly_totals(
    pool: &DbPool,
    user: &CurrentUser,
    year: i32,
) -> HarvestResult<Vec<(i32, i64, Decimal)>> {
    let sql = format!(
        "SELECT EXTRACT(MONTH FROM h.harvest_date)::INT, COUNT(*), COALESCE(SUM(h.quantity_tons), 0)
         FROM harvest_records h
         WHERE {} AND EXTRACT(YEAR FROM h.harvest_date)::INT = $2
         GROUP BY 1 ORDER BY 1",
        user.scope(Resource::HarvestRecord).sql()
    );
    let rows = sqlx::query_as::<_, (i32, i64, Decimal)>(&sql)
        .bind(user.id)
        .bind(year)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

pub async fn total_harvested_since(
    pool: &DbPool,
    user: &CurrentUser,
    since: Option<NaiveDate>,
) -> HarvestResult<Decimal> {
    let sql = format!(
        "SELECT COALESCE(SUM(h.quantity_tons), 0) FROM harvest_records h
         WHERE {} AND ($2::DATE IS NULL OR h.harvest_date >= $2)",
        user.scope(Resource::HarvestRecord).sql()
    );
    let (total,): (Decimal,) = sqlx::query_as(&sql)
        .bind(user.id)
        .bind(since)
        .fetch_one(pool)
        .await?;
    Ok(total)
}

pub async fn active_farms(pool: &DbPool, user: &CurrentUser) -> HarvestResult<Vec<Farm>> {
    let sql = format!(
        "SELECT f.* FROM farms f WHERE {} AND f.is_active ORDER BY f.id",
        user.scope(Resource::Farm).sql()
    );
    let farms = sqlx::query_as::<_, Farm>(&sql)
        .bind(user.id)
        .fetch_all(pool)
        .await?;
    Ok(farms)
}

#[derive(Debug, Serialize)]
pub struct RoleStats {
    pub role: &'static str,
    pub total_harvested: Option<Decimal>,
    pub active_farms: Option<usize>,
    pub inventory_items: Option<i64>,
    pub inventory_value: Option<Decimal>,
}

pub async fn get_role_stats_axum(
    State(state): State<AppState>,
    user: CurrentUser,
) -> HarvestResult<Json<RoleStats>> {
    let pool = &state.pool;
    let mut stats = RoleStats {
        role: user.role.display_name(),
        total_harvested: None,
        active_farms: None,
        inventory_items: None,
        inventory_value: None,
    };

    if user.can(Capability::ViewAnalytics) {
        stats.total_harvested = Some(total_harvested_since(pool, &user, None).await?);
    }
    if user.can(Capability::ManageFarms) {
        stats.active_farms = Some(active_farms(pool, &user).await?.len());
    }
    if user.can(Capability::ManageInventory) {
        let sql = format!(
            "SELECT COUNT(*), COALESCE(SUM(i.quantity_tons * COALESCE(i.unit_price, 0)), 0)
             FROM inventory i WHERE {}",
            user.scope(Resource::Inventory).sql()
        );
        let (count, value): (i64, Decimal) = sqlx::query_as(&sql)
            .bind(user.id)
            .fetch_one(pool)
            .await?;
        stats.inventory_items = Some(count);
        stats.inventory_value = Some(value);
    }

    Ok(Json(stats))
}

#[derive(Debug, Serialize, PartialEq)]
pub struct CropShare {
    pub crop: String,
    pub percentage: f64,
    pub quantity: f64,
}

pub fn crop_shares(rows: &[(String, Decimal)]) -> Vec<CropShare> {
    let total: Decimal = rows.iter().map(|(_, q)| *q).sum();
    rows.iter()
        .map(|(crop, quantity)| CropShare {
            crop: crop.clone(),
            percentage: metrics::share_percent(*quantity, total),
            quantity: metrics::to_f64(*quantity),
        })
        .collect()
}

#[derive(Debug, Serialize, PartialEq)]
pub struct YieldBar {
    pub farm: String,
    pub expected: f64,
    pub actual: f64,
}

/// Expected at the baseline yield vs actual for the first four farms, anonymised.
pub fn yield_bars(farms: &[Farm], baseline: Decimal) -> Vec<YieldBar> {
    farms
        .iter()
        .take(4)
        .enumerate()
        .map(|(i, farm)| YieldBar {
            farm: metrics::farm_letter_label(i),
            expected: metrics::to_f64(farm.cached_field_area_hectares * baseline),
            actual: metrics::to_f64(farm.cached_total_harvested_tons),
        })
        .collect()
}

#[derive(Serialize)]
pub struct Dashboard {
    pub total_harvested: Decimal,
    pub active_farms: usize,
    pub total_inventory: Decimal,
    pub avg_yield_efficiency: Option<u32>,
    pub harvest_trends: Vec<MonthPoint>,
    pub crop_distribution: Vec<CropShare>,
    pub yield_performance: Vec<YieldBar>,
    pub recent_harvests: Vec<HarvestView>,
    pub upcoming_harvests: Vec<FieldView>,
    pub last_30_days_harvested: Decimal,
}

pub async fn get_dashboard_axum(
    State(state): State<AppState>,
    user: CurrentUser,
) -> HarvestResult<Json<Dashboard>> {
    let pool = &state.pool;
    let baseline = state.config.baseline_yield_per_hectare;
    let today = today();
    let harvest_scope = user.scope(Resource::HarvestRecord).sql();

    let total_harvested = total_harvested_since(pool, &user, None).await?;
    let farms = active_farms(pool, &user).await?;

    let inventory_sql = format!(
        "SELECT COALESCE(SUM(i.quantity_tons), 0) FROM inventory i WHERE {}",
        user.scope(Resource::Inventory).sql()
    );
    let (total_inventory,): (Decimal,) = sqlx::query_as(&inventory_sql)
        .bind(user.id)
        .fetch_one(pool)
        .await?;

    let area_sql = format!(
        "SELECT COALESCE(SUM(fl.area_hectares), 0) FROM fields fl
         WHERE EXISTS (SELECT 1 FROM harvest_records h WHERE h.field_id = fl.id AND {})",
        harvest_scope
    );
    let (harvested_area,): (Decimal,) = sqlx::query_as(&area_sql)
        .bind(user.id)
        .fetch_one(pool)
        .await?;

    let crop_sql = format!(
        "SELECT c.name, SUM(h.quantity_tons)
         FROM harvest_records h
         JOIN fields fl ON fl.id = h.field_id
         JOIN crops c ON c.id = fl.crop_id
         WHERE {}
         GROUP BY c.name ORDER BY 2 DESC",
        harvest_scope
    );
    let crop_rows: Vec<(String, Decimal)> = sqlx::query_as(&crop_sql)
        .bind(user.id)
        .fetch_all(pool)
        .await?;

    let months = monthly_totals(pool, &user, today.year()).await?;
    let recent = scoped_harvests(pool, &user, &HarvestFilter::default(), 5).await?;
    let upcoming = upcoming_fields(pool, &user, today, 30, Some(5)).await?;
    let last_30 = total_harvested_since(pool, &user, Some(today - Duration::days(30))).await?;

    Ok(Json(Dashboard {
        total_harvested,
        active_farms: farms.len(),
        total_inventory,
        avg_yield_efficiency: metrics::dashboard_efficiency(total_harvested, harvested_area, baseline),
        harvest_trends: fill_months(&months, true),
        crop_distribution: crop_shares(&crop_rows),
        yield_performance: yield_bars(&farms, baseline),
        recent_harvests: recent
            .into_iter()
            .map(|r| HarvestView::build(r, baseline))
            .collect(),
        upcoming_harvests: upcoming
            .into_iter()
            .map(|f| FieldView::build(f, baseline, today))
            .collect(),
        last_30_days_harvested: last_30,
    }))
}
