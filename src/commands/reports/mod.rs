pub mod render;

use crate::access::{Capability, Resource, Role};
use crate::commands::harvest::{scoped_harvests, HarvestFilter, HarvestView};
use crate::commands::inventory::legacy::{scoped_inventory, InventoryFilter, InventoryView};
use crate::commands::utils::{parse_date_param, today};
use crate::db::{DbPool, ReportRecord};
use crate::error::{HarvestError, HarvestResult};
use crate::metrics;
use crate::middleware::auth::CurrentUser;
use crate::state::AppState;
use axum::extract::{Json, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use chrono::{Datelike, Months, NaiveDate};
use render::ReportDocument;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

const MAX_REPORT_ROWS: i64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    Harvest,
    Inventory,
    FarmPerformance,
}

impl ReportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::Harvest => "harvest",
            ReportType::Inventory => "inventory",
            ReportType::FarmPerformance => "farm_performance",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            ReportType::Harvest => "Harvest Report",
            ReportType::Inventory => "Inventory Report",
            ReportType::FarmPerformance => "Farm Performance Report",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Csv,
    Pdf,
    Json,
}

impl ReportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportFormat::Csv => "csv",
            ReportFormat::Pdf => "pdf",
            ReportFormat::Json => "json",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ReportFormat::Csv => "text/csv; charset=utf-8",
            ReportFormat::Pdf => "application/pdf",
            ReportFormat::Json => "application/json",
        }
    }
}

pub fn report_filename(kind: ReportType, format: ReportFormat, day: NaiveDate) -> String {
    format!(
        "{}_report_{}.{}",
        kind.as_str(),
        day.format("%Y%m%d"),
        format.as_str()
    )
}

/// First day of the current month and of the month before it.
pub fn month_bounds(day: NaiveDate) -> (NaiveDate, NaiveDate) {
    let current = day.with_day(1).unwrap_or(day);
    let previous = current.checked_sub_months(Months::new(1)).unwrap_or(current);
    (current, previous)
}

#[derive(Debug, Serialize, PartialEq)]
pub struct PeriodTotals {
    pub label: String,
    pub harvest_count: i64,
    pub total_quantity: Decimal,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct MonthlySummary {
    pub current_month: PeriodTotals,
    pub last_month: PeriodTotals,
    /// Change in tonnage against last month; `None` when last month had none.
    pub change_percent: Option<f64>,
}

pub fn change_percent(current: Decimal, previous: Decimal) -> Option<f64> {
    if previous <= Decimal::ZERO {
        return None;
    }
    Some(metrics::round1(metrics::to_f64(
        (current - previous) / previous * Decimal::ONE_HUNDRED,
    )))
}

async fn period_totals(
    pool: &DbPool,
    user: &CurrentUser,
    start: NaiveDate,
    end: Option<NaiveDate>,
) -> HarvestResult<(i64, Decimal)> {
    let sql = format!(
        "SELECT COUNT(*), COALESCE(SUM(h.quantity_tons), 0) FROM harvest_records h
         WHERE {} AND h.harvest_date >= $2 AND ($3::DATE IS NULL OR h.harvest_date < $3)",
        user.scope(Resource::HarvestRecord).sql()
    );
    let totals: (i64, Decimal) = sqlx::query_as(&sql)
        .bind(user.id)
        .bind(start)
        .bind(end)
        .fetch_one(pool)
        .await?;
    Ok(totals)
}

pub async fn get_monthly_summary_axum(
    State(state): State<AppState>,
    user: CurrentUser,
) -> HarvestResult<Json<MonthlySummary>> {
    user.require(Capability::GenerateReports)?;
    let (current, previous) = month_bounds(today());
    let (cur_count, cur_total) = period_totals(&state.pool, &user, current, None).await?;
    let (prev_count, prev_total) =
        period_totals(&state.pool, &user, previous, Some(current)).await?;

    Ok(Json(MonthlySummary {
        change_percent: change_percent(cur_total, prev_total),
        current_month: PeriodTotals {
            label: current.format("%B %Y").to_string(),
            harvest_count: cur_count,
            total_quantity: cur_total,
        },
        last_month: PeriodTotals {
            label: previous.format("%B %Y").to_string(),
            harvest_count: prev_count,
            total_quantity: prev_total,
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct GenerateReportRequest {
    pub report_type: ReportType,
    pub format: ReportFormat,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub farm_id: Option<i32>,
}

#[derive(Debug, Clone, Copy)]
struct Period {
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
}

impl Period {
    fn parse(start: Option<&str>, end: Option<&str>) -> HarvestResult<Self> {
        let start = parse_date_param("start_date", start)?;
        let end = parse_date_param("end_date", end)?;
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(HarvestError::validation("start_date must not be after end_date"));
            }
        }
        Ok(Self { start, end })
    }

    fn describe(&self) -> Option<String> {
        match (self.start, self.end) {
            (None, None) => None,
            (Some(s), Some(e)) => Some(format!("Period: {} to {}", s, e)),
            (Some(s), None) => Some(format!("From {}", s)),
            (None, Some(e)) => Some(format!("Up to {}", e)),
        }
    }
}

fn fmt_dec(d: Decimal) -> String {
    format!("{:.2}", metrics::to_f64(d))
}

pub fn harvest_document(views: &[HarvestView]) -> ReportDocument {
    let mut doc = ReportDocument::new(
        ReportType::Harvest.title(),
        &["Date", "Farm", "Field", "Crop", "Quantity (t)", "Grade", "Status", "Yield (t/ha)"],
    );
    for v in views {
        let r = &v.record;
        doc.push_row(vec![
            r.harvest_date.to_string(),
            r.farm_name.clone().unwrap_or_default(),
            r.field_name.clone().unwrap_or_default(),
            r.crop_name.clone().unwrap_or_default(),
            fmt_dec(r.quantity_tons),
            r.quality_grade.clone(),
            r.status.clone(),
            format!("{:.2}", v.yield_per_hectare),
        ]);
    }
    doc
}

pub fn inventory_document(views: &[InventoryView]) -> ReportDocument {
    let mut doc = ReportDocument::new(
        ReportType::Inventory.title(),
        &["Crop", "Quantity (t)", "Location", "Condition", "Grade", "Stored", "Expires", "Status"],
    );
    for v in views {
        let r = &v.row;
        doc.push_row(vec![
            r.crop_name.clone().unwrap_or_default(),
            fmt_dec(r.quantity_tons),
            r.storage_location.clone(),
            r.storage_condition.clone(),
            r.quality_grade.clone(),
            r.date_stored.to_string(),
            r.expiry_date.to_string(),
            v.status.as_str().to_string(),
        ]);
    }
    doc
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FarmPerformanceRow {
    pub name: String,
    pub location: String,
    pub field_count: i64,
    pub area_hectares: Decimal,
    pub harvested: Decimal,
    pub expected: Decimal,
}

pub fn farm_performance_document(rows: &[FarmPerformanceRow]) -> ReportDocument {
    let mut doc = ReportDocument::new(
        ReportType::FarmPerformance.title(),
        &["Farm", "Location", "Fields", "Area (ha)", "Harvested (t)", "Expected (t)", "Efficiency %", "Yield (t/ha)"],
    );
    for r in rows {
        let efficiency = metrics::efficiency_percent(r.harvested, r.expected);
        doc.push_row(vec![
            r.name.clone(),
            r.location.clone(),
            r.field_count.to_string(),
            fmt_dec(r.area_hectares),
            fmt_dec(r.harvested),
            fmt_dec(r.expected),
            format!("{:.1}", efficiency),
            fmt_dec(metrics::yield_per_hectare(r.harvested, r.area_hectares)),
        ]);
    }
    doc
}

async fn farm_performance_rows(
    pool: &DbPool,
    user: &CurrentUser,
    farm_id: Option<i32>,
    period: Period,
    baseline: Decimal,
) -> HarvestResult<Vec<FarmPerformanceRow>> {
    let sql = format!(
        "SELECT f.name, f.location,
                COUNT(fl.id) AS field_count,
                COALESCE(SUM(fl.area_hectares), 0) AS area_hectares,
                COALESCE(SUM((SELECT SUM(hr.quantity_tons) FROM harvest_records hr
                              WHERE hr.field_id = fl.id
                                AND ($3::DATE IS NULL OR hr.harvest_date >= $3)
                                AND ($4::DATE IS NULL OR hr.harvest_date <= $4))), 0) AS harvested,
                COALESCE(SUM(fl.area_hectares * COALESCE(NULLIF(c.expected_yield_per_hectare, 0), $5)), 0) AS expected
         FROM farms f
         LEFT JOIN fields fl ON fl.farm_id = f.id
         LEFT JOIN crops c ON c.id = fl.crop_id
         WHERE {} AND f.is_active AND ($2::INT IS NULL OR f.id = $2)
         GROUP BY f.id
         ORDER BY f.name",
        user.scope(Resource::Farm).sql()
    );
    let rows = sqlx::query_as::<_, FarmPerformanceRow>(&sql)
        .bind(user.id)
        .bind(farm_id)
        .bind(period.start)
        .bind(period.end)
        .bind(baseline)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

async fn build_document(
    state: &AppState,
    user: &CurrentUser,
    req: &GenerateReportRequest,
    period: Period,
) -> HarvestResult<ReportDocument> {
    let pool = &state.pool;
    let baseline = state.config.baseline_yield_per_hectare;
    let today = today();

    let mut doc = match req.report_type {
        ReportType::Harvest => {
            let filter = HarvestFilter {
                farm_id: req.farm_id,
                start_date: period.start.map(|d| d.to_string()),
                end_date: period.end.map(|d| d.to_string()),
                ..Default::default()
            };
            let views: Vec<HarvestView> = scoped_harvests(pool, user, &filter, MAX_REPORT_ROWS)
                .await?
                .into_iter()
                .map(|r| HarvestView::build(r, baseline))
                .collect();
            harvest_document(&views)
        }
        ReportType::Inventory => {
            let filter = InventoryFilter {
                start_date: period.start.map(|d| d.to_string()),
                end_date: period.end.map(|d| d.to_string()),
                ..Default::default()
            };
            let threshold = state.config.low_stock_threshold_tons;
            let views: Vec<InventoryView> = scoped_inventory(pool, user, &filter)
                .await?
                .into_iter()
                .map(|r| InventoryView::build(r, threshold, today))
                .collect();
            inventory_document(&views)
        }
        ReportType::FarmPerformance => {
            let rows = farm_performance_rows(pool, user, req.farm_id, period, baseline).await?;
            farm_performance_document(&rows)
        }
    };
    doc.subtitle = period.describe();
    Ok(doc)
}

pub async fn generate_report_axum(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<GenerateReportRequest>,
) -> HarvestResult<Response> {
    user.require(Capability::GenerateReports)?;
    let period = Period::parse(payload.start_date.as_deref(), payload.end_date.as_deref())?;
    if let Some(farm_id) = payload.farm_id {
        user.ensure_access(&state.pool, Resource::Farm, farm_id).await?;
    }

    let doc = build_document(&state, &user, &payload, period).await?;
    let row_count = doc.rows.len() as i32;

    let response = match payload.format {
        ReportFormat::Json => Json(&doc).into_response(),
        ReportFormat::Csv | ReportFormat::Pdf => {
            let format = payload.format;
            let bytes = tokio::task::spawn_blocking(move || match format {
                ReportFormat::Pdf => render::to_pdf(&doc),
                _ => render::to_csv(&doc),
            })
            .await
            .map_err(|e| HarvestError::Internal(e.to_string()))??;
            let disposition = format!(
                "attachment; filename=\"{}\"",
                report_filename(payload.report_type, format, today())
            );
            (
                [
                    (header::CONTENT_TYPE, format.content_type().to_string()),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                bytes,
            )
                .into_response()
        }
    };

    sqlx::query(
        "INSERT INTO report_records (report_type, format, period_start, period_end, farm_id, generated_by, row_count)
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(payload.report_type.as_str())
    .bind(payload.format.as_str())
    .bind(period.start)
    .bind(period.end)
    .bind(payload.farm_id)
    .bind(user.id)
    .bind(row_count)
    .execute(&state.pool)
    .await?;

    tracing::info!(
        "{} report ({}, {} rows) generated by {}",
        payload.report_type.as_str(),
        payload.format.as_str(),
        row_count,
        user.username
    );
    Ok(response)
}

/// Latest 50 generations; admins see everyone's.
pub async fn get_report_history_axum(
    State(state): State<AppState>,
    user: CurrentUser,
) -> HarvestResult<Json<Vec<ReportRecord>>> {
    user.require(Capability::GenerateReports)?;
    let owner = (user.role != Role::Admin).then_some(user.id);
    let records = sqlx::query_as::<_, ReportRecord>(
        "SELECT * FROM report_records
         WHERE ($1::INT IS NULL OR generated_by = $1)
         ORDER BY created_at DESC, id DESC
         LIMIT 50",
    )
    .bind(owner)
    .fetch_all(&state.pool)
    .await?;
    Ok(Json(records))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_month_bounds_across_year() {
        assert_eq!(month_bounds(date(2024, 1, 15)), (date(2024, 1, 1), date(2023, 12, 1)));
        assert_eq!(month_bounds(date(2024, 3, 31)), (date(2024, 3, 1), date(2024, 2, 1)));
    }

    #[test]
    fn test_change_percent() {
        assert_eq!(change_percent(Decimal::from(15), Decimal::from(10)), Some(50.0));
        assert_eq!(change_percent(Decimal::from(5), Decimal::from(10)), Some(-50.0));
        assert_eq!(change_percent(Decimal::from(5), Decimal::ZERO), None);
    }

    #[test]
    fn test_report_filename() {
        assert_eq!(
            report_filename(ReportType::FarmPerformance, ReportFormat::Pdf, date(2024, 6, 9)),
            "farm_performance_report_20240609.pdf"
        );
    }

    #[test]
    fn test_request_parsing() {
        let req: GenerateReportRequest = serde_json::from_value(serde_json::json!({
            "report_type": "farm_performance",
            "format": "csv",
            "farm_id": 3
        }))
        .unwrap();
        assert_eq!(req.report_type, ReportType::FarmPerformance);
        assert_eq!(req.format, ReportFormat::Csv);
        assert!(serde_json::from_value::<GenerateReportRequest>(serde_json::json!({
            "report_type": "sales",
            "format": "csv"
        }))
        .is_err());
    }

    #[test]
    fn test_period_rejects_inverted_range() {
        assert!(Period::parse(Some("2024-06-10"), Some("2024-06-01")).is_err());
        let p = Period::parse(Some("2024-06-01"), None).unwrap();
        assert_eq!(p.describe().as_deref(), Some("From 2024-06-01"));
    }

    #[test]
    fn test_farm_performance_document() {
        let rows = vec![FarmPerformanceRow {
            name: "Green Acres".into(),
            location: "Iowa".into(),
            field_count: 2,
            area_hectares: Decimal::from(10),
            harvested: Decimal::from(40),
            expected: Decimal::from(50),
        }];
        let doc = farm_performance_document(&rows);
        assert_eq!(doc.headers.len(), doc.rows[0].len());
        assert_eq!(doc.rows[0][6], "80.0");
        assert_eq!(doc.rows[0][7], "4.00");
    }
}
