use crate::access::{Capability, Resource};
use crate::commands::dashboard::{fill_months, monthly_totals, MonthPoint};
use crate::commands::farms::load_farm_efficiency;
use crate::commands::fields::upcoming_fields;
use crate::commands::utils::today;
use crate::db::{DbPool, Field};
use crate::error::HarvestResult;
use crate::metrics::{self, FarmEfficiency};
use crate::middleware::auth::CurrentUser;
use crate::state::AppState;
use axum::extract::{Json, Path, Query, State};
use chrono::{Datelike, Duration, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const YIELD_LABEL_CHARS: usize = 10;
const MAX_PREDICTIONS: i64 = 8;

#[derive(Deserialize, Default)]
pub struct AnalyticsParams {
    pub year: Option<i32>,
    pub limit: Option<i64>,
    pub years: Option<i32>,
    pub days: Option<i64>,
}

#[derive(Serialize)]
pub struct YearlyTrends {
    pub year: i32,
    pub months: Vec<MonthPoint>,
}

pub async fn get_yearly_trends_axum(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(params): Query<AnalyticsParams>,
) -> HarvestResult<Json<YearlyTrends>> {
    user.require(Capability::ViewAnalytics)?;
    let year = params.year.unwrap_or_else(|| today().year());
    let rows = monthly_totals(&state.pool, &user, year).await?;
    Ok(Json(YearlyTrends {
        year,
        months: fill_months(&rows, false),
    }))
}

pub async fn get_farm_efficiency_axum(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(farm_id): Path<i32>,
) -> HarvestResult<Json<FarmEfficiency>> {
    user.require(Capability::ViewAnalytics)?;
    user.ensure_access(&state.pool, Resource::Farm, farm_id).await?;
    let efficiency =
        load_farm_efficiency(&state.pool, farm_id, state.config.baseline_yield_per_hectare).await?;
    Ok(Json(efficiency))
}

/// Per-farm actual vs expected tonnage, one row per active farm in scope.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FarmYieldRow {
    pub id: i32,
    pub name: String,
    pub actual: Decimal,
    pub expected: Decimal,
}

impl FarmYieldRow {
    pub fn efficiency(&self) -> f64 {
        metrics::efficiency_percent(self.actual, self.expected)
    }
}

async fn farm_yield_rows(
    pool: &DbPool,
    user: &CurrentUser,
    baseline: Decimal,
) -> HarvestResult<Vec<FarmYieldRow>> {
    let sql = format!(
        "SELECT f.id, f.name, f.cached_total_harvested_tons AS actual,
                COALESCE(SUM(fl.area_hectares * COALESCE(NULLIF(c.expected_yield_per_hectare, 0), $2)), 0) AS expected
         FROM farms f
         LEFT JOIN fields fl ON fl.farm_id = f.id
         LEFT JOIN crops c ON c.id = fl.crop_id
         WHERE {} AND f.is_active
         GROUP BY f.id
         ORDER BY f.id",
        user.scope(Resource::Farm).sql()
    );
    let rows = sqlx::query_as::<_, FarmYieldRow>(&sql)
        .bind(user.id)
        .bind(baseline)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

#[derive(Debug, Serialize, PartialEq)]
pub struct YieldPerformance {
    pub farm: String,
    pub expected: f64,
    pub actual: f64,
}

pub fn yield_performance(rows: &[FarmYieldRow], limit: usize) -> Vec<YieldPerformance> {
    rows.iter()
        .take(limit)
        .map(|r| YieldPerformance {
            farm: metrics::truncate_label(&r.name, YIELD_LABEL_CHARS),
            expected: metrics::to_f64(r.expected),
            actual: metrics::to_f64(r.actual),
        })
        .collect()
}

pub async fn get_yield_performance_axum(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(params): Query<AnalyticsParams>,
) -> HarvestResult<Json<Vec<YieldPerformance>>> {
    user.require(Capability::ViewAnalytics)?;
    let limit = params.limit.unwrap_or(8).clamp(1, 50) as usize;
    let rows = farm_yield_rows(&state.pool, &user, state.config.baseline_yield_per_hectare).await?;
    Ok(Json(yield_performance(&rows, limit)))
}

#[derive(Serialize)]
pub struct SeasonalTrends {
    pub years: Vec<i32>,
    pub crops: BTreeMap<String, Vec<f64>>,
}

/// One series per crop, aligned with `years`; missing years are zero.
pub fn seasonal_series(rows: &[(String, i32, Decimal)], years: &[i32]) -> BTreeMap<String, Vec<f64>> {
    let mut series: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for (crop, year, total) in rows {
        let Some(slot) = years.iter().position(|y| y == year) else {
            continue;
        };
        let values = series
            .entry(crop.clone())
            .or_insert_with(|| vec![0.0; years.len()]);
        values[slot] += metrics::to_f64(*total);
    }
    series
}

pub async fn get_seasonal_trends_axum(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(params): Query<AnalyticsParams>,
) -> HarvestResult<Json<SeasonalTrends>> {
    user.require(Capability::ViewAnalytics)?;
    let span = params.years.unwrap_or(5).clamp(1, 20);
    let current = today().year();
    let years: Vec<i32> = (current - span + 1..=current).collect();

    let sql = format!(
        "SELECT c.name, EXTRACT(YEAR FROM h.harvest_date)::INT, SUM(h.quantity_tons)
         FROM harvest_records h
         JOIN fields fl ON fl.id = h.field_id
         JOIN crops c ON c.id = fl.crop_id
         WHERE {} AND EXTRACT(YEAR FROM h.harvest_date)::INT BETWEEN $2 AND $3
         GROUP BY 1, 2",
        user.scope(Resource::HarvestRecord).sql()
    );
    let rows: Vec<(String, i32, Decimal)> = sqlx::query_as(&sql)
        .bind(user.id)
        .bind(years[0])
        .bind(current)
        .fetch_all(&state.pool)
        .await?;

    Ok(Json(SeasonalTrends {
        crops: seasonal_series(&rows, &years),
        years,
    }))
}

#[derive(Debug, Serialize, PartialEq)]
pub struct HarvestPrediction {
    pub field_id: i32,
    pub crop: String,
    pub field: String,
    pub amount: f64,
    pub date: NaiveDate,
    pub confidence: u8,
}

impl HarvestPrediction {
    pub fn for_field(field: &Field, baseline: Decimal) -> Self {
        let per_ha = field.expected_yield_per_hectare;
        Self {
            field_id: field.id,
            crop: field.crop_name.clone().unwrap_or_default(),
            field: format!(
                "{} - {}",
                field.farm_name.as_deref().unwrap_or_default(),
                field.name
            ),
            amount: metrics::to_f64(metrics::expected_yield(field.area_hectares, per_ha, baseline)),
            date: field.expected_harvest_date,
            confidence: metrics::prediction_confidence(
                field.harvest_count.unwrap_or(0),
                per_ha.is_some_and(|v| v > Decimal::ZERO),
            ),
        }
    }
}

pub async fn get_predictions_axum(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(params): Query<AnalyticsParams>,
) -> HarvestResult<Json<Vec<HarvestPrediction>>> {
    user.require(Capability::ViewAnalytics)?;
    let days = params.days.unwrap_or(60).clamp(1, 365);
    let baseline = state.config.baseline_yield_per_hectare;
    let fields = upcoming_fields(&state.pool, &user, today(), days, Some(MAX_PREDICTIONS)).await?;
    Ok(Json(
        fields
            .iter()
            .map(|f| HarvestPrediction::for_field(f, baseline))
            .collect(),
    ))
}

#[derive(Debug, Serialize, PartialEq)]
pub struct TopPerformer {
    pub name: String,
    pub efficiency: f64,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct TopMetrics {
    /// `None` when no active farm is in scope.
    pub avg_efficiency: Option<f64>,
    pub top_performer: Option<TopPerformer>,
    pub predicted_harvest: f64,
    pub underperforming_count: usize,
}

pub fn top_metrics(rows: &[FarmYieldRow], predicted_harvest: Decimal) -> TopMetrics {
    let efficiencies: Vec<(&FarmYieldRow, f64)> = rows.iter().map(|r| (r, r.efficiency())).collect();
    let avg_efficiency = if efficiencies.is_empty() {
        None
    } else {
        let sum: f64 = efficiencies.iter().map(|(_, e)| e).sum();
        Some(metrics::round1(sum / efficiencies.len() as f64))
    };
    // Ties keep the earliest farm.
    let top_performer = efficiencies
        .iter()
        .filter(|(_, e)| *e > 0.0)
        .fold(None::<&(&FarmYieldRow, f64)>, |best, cur| match best {
            Some(b) if b.1 >= cur.1 => Some(b),
            _ => Some(cur),
        })
        .map(|(r, e)| TopPerformer {
            name: r.name.clone(),
            efficiency: metrics::round1(*e),
        });

    TopMetrics {
        avg_efficiency,
        top_performer,
        predicted_harvest: metrics::to_f64(predicted_harvest),
        underperforming_count: efficiencies
            .iter()
            .filter(|(_, e)| *e < metrics::UNDERPERFORMING_BELOW)
            .count(),
    }
}

pub async fn get_top_metrics_axum(
    State(state): State<AppState>,
    user: CurrentUser,
) -> HarvestResult<Json<TopMetrics>> {
    user.require(Capability::ViewAnalytics)?;
    let baseline = state.config.baseline_yield_per_hectare;
    let rows = farm_yield_rows(&state.pool, &user, baseline).await?;

    let today = today();
    let sql = format!(
        "SELECT COALESCE(SUM(fl.area_hectares * COALESCE(NULLIF(c.expected_yield_per_hectare, 0), $4)), 0)
         FROM fields fl JOIN crops c ON c.id = fl.crop_id
         WHERE {} AND fl.is_active AND fl.expected_harvest_date BETWEEN $2 AND $3",
        user.scope(Resource::Field).sql()
    );
    let (predicted,): (Decimal,) = sqlx::query_as(&sql)
        .bind(user.id)
        .bind(today)
        .bind(today + Duration::days(14))
        .bind(baseline)
        .fetch_one(&state.pool)
        .await?;

    Ok(Json(top_metrics(&rows, predicted)))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct TopFarm {
    pub id: i32,
    pub name: String,
    pub location: String,
    pub total_harvested: Decimal,
    pub average_yield: Decimal,
}

pub async fn get_top_farms_axum(
    State(state): State<AppState>,
    user: CurrentUser,
) -> HarvestResult<Json<Vec<TopFarm>>> {
    user.require(Capability::ViewAnalytics)?;
    let sql = format!(
        "SELECT f.id, f.name, f.location,
                f.cached_total_harvested_tons AS total_harvested,
                f.cached_average_yield AS average_yield
         FROM farms f
         WHERE {} AND f.is_active
         ORDER BY f.cached_total_harvested_tons DESC, f.id
         LIMIT 5",
        user.scope(Resource::Farm).sql()
    );
    let farms = sqlx::query_as::<_, TopFarm>(&sql)
        .bind(user.id)
        .fetch_all(&state.pool)
        .await?;
    Ok(Json(farms))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn row(id: i32, name: &str, actual: &str, expected: &str) -> FarmYieldRow {
        FarmYieldRow {
            id,
            name: name.into(),
            actual: dec(actual),
            expected: dec(expected),
        }
    }

    #[test]
    fn test_yield_performance_truncates_names() {
        let rows = vec![
            row(1, "Green Valley Estate", "40", "50"),
            row(2, "Oakridge", "10", "20"),
        ];
        let perf = yield_performance(&rows, 8);
        assert_eq!(perf[0].farm, "Green Vall...");
        assert_eq!(perf[1].farm, "Oakridge");
        assert_eq!(yield_performance(&rows, 1).len(), 1);
    }

    #[test]
    fn test_seasonal_series_aligns_years() {
        let years = vec![2022, 2023, 2024];
        let rows = vec![
            ("Corn".to_string(), 2024, dec("12")),
            ("Corn".to_string(), 2022, dec("3.5")),
            ("Wheat".to_string(), 2023, dec("7")),
            ("Wheat".to_string(), 2019, dec("99")),
        ];
        let series = seasonal_series(&rows, &years);
        assert_eq!(series["Corn"], vec![3.5, 0.0, 12.0]);
        assert_eq!(series["Wheat"], vec![0.0, 7.0, 0.0]);
    }

    #[test]
    fn test_top_metrics() {
        let rows = vec![
            row(1, "North", "45", "50"),
            row(2, "South", "10", "50"),
            row(3, "East", "100", "50"),
        ];
        let m = top_metrics(&rows, dec("42.5"));
        // 90, 20 and a capped 100
        assert_eq!(m.avg_efficiency, Some(70.0));
        assert_eq!(m.top_performer.unwrap().name, "East");
        assert_eq!(m.underperforming_count, 1);
        assert_eq!(m.predicted_harvest, 42.5);
    }

    #[test]
    fn test_top_metrics_without_farms() {
        let m = top_metrics(&[], Decimal::ZERO);
        assert_eq!(m.avg_efficiency, None);
        assert!(m.top_performer.is_none());
        assert_eq!(m.underperforming_count, 0);
    }

    #[test]
    fn test_prediction_for_field() {
        let field = Field {
            id: 3,
            farm_id: 1,
            name: "North 40".into(),
            crop_id: 1,
            area_hectares: dec("10"),
            planting_date: NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
            expected_harvest_date: NaiveDate::from_ymd_opt(2024, 9, 1).unwrap(),
            supervisor_id: 2,
            soil_type: None,
            irrigation_type: None,
            is_active: true,
            notes: None,
            farm_name: Some("Green Acres".into()),
            crop_name: Some("Corn".into()),
            expected_yield_per_hectare: Some(dec("8")),
            supervisor_username: None,
            total_harvested: None,
            harvest_count: Some(4),
        };
        let p = HarvestPrediction::for_field(&field, dec("5"));
        assert_eq!(p.field, "Green Acres - North 40");
        assert_eq!(p.amount, 80.0);
        assert_eq!(p.confidence, 93);
    }
}
