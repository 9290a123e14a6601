use crate::access::{Capability, Resource};
use crate::commands::farms::refresh_farms;
use crate::commands::utils::{require_text, today, validate_positive};
use crate::db::{DbPool, Field};
use crate::error::{HarvestError, HarvestResult};
use crate::metrics::{self, HarvestWindow};
use crate::middleware::auth::CurrentUser;
use crate::state::AppState;
use axum::extract::{Json, Path, Query, State};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

const FIELD_SELECT: &str = r#"
    SELECT fl.*, fa.name AS farm_name, c.name AS crop_name,
           c.expected_yield_per_hectare, u.username AS supervisor_username,
           COALESCE((SELECT SUM(hr.quantity_tons) FROM harvest_records hr WHERE hr.field_id = fl.id), 0) AS total_harvested,
           (SELECT COUNT(*) FROM harvest_records hr WHERE hr.field_id = fl.id) AS harvest_count
    FROM fields fl
    JOIN farms fa ON fa.id = fl.farm_id
    JOIN crops c ON c.id = fl.crop_id
    LEFT JOIN users u ON u.id = fl.supervisor_id
"#;

#[derive(Debug, Serialize)]
pub struct FieldView {
    #[serde(flatten)]
    pub field: Field,
    pub days_to_harvest: Option<i64>,
    pub harvest_window: HarvestWindow,
    pub efficiency: f64,
}

impl FieldView {
    pub fn build(field: Field, baseline: Decimal, today: NaiveDate) -> Self {
        let expected = metrics::expected_yield(
            field.area_hectares,
            field.expected_yield_per_hectare,
            baseline,
        );
        let actual = field.total_harvested.unwrap_or(Decimal::ZERO);
        let date = Some(field.expected_harvest_date);
        Self {
            days_to_harvest: metrics::days_to_harvest(date, today),
            harvest_window: HarvestWindow::classify(date, today),
            efficiency: metrics::round1(metrics::efficiency_percent(actual, expected)),
            field,
        }
    }
}

pub fn validate_field_dates(planting: NaiveDate, expected_harvest: NaiveDate) -> HarvestResult<()> {
    if expected_harvest < planting {
        return Err(HarvestError::validation(
            "Expected harvest date cannot be before the planting date",
        ));
    }
    Ok(())
}

pub async fn fields_for_farm(
    pool: &DbPool,
    user: &CurrentUser,
    farm_id: i32,
) -> HarvestResult<Vec<Field>> {
    scoped_fields(pool, user, Some(farm_id)).await
}

pub async fn scoped_fields(
    pool: &DbPool,
    user: &CurrentUser,
    farm_id: Option<i32>,
) -> HarvestResult<Vec<Field>> {
    let sql = format!(
        "{} WHERE {} AND ($2::INT IS NULL OR fl.farm_id = $2) ORDER BY fa.name, fl.name",
        FIELD_SELECT,
        user.scope(Resource::Field).sql()
    );
    let fields = sqlx::query_as::<_, Field>(&sql)
        .bind(user.id)
        .bind(farm_id)
        .fetch_all(pool)
        .await?;
    Ok(fields)
}

/// Active fields in scope whose expected harvest falls within the next `days` days.
/// `None` returns every match.
pub async fn upcoming_fields(
    pool: &DbPool,
    user: &CurrentUser,
    today: NaiveDate,
    days: i64,
    limit: Option<i64>,
) -> HarvestResult<Vec<Field>> {
    let sql = format!(
        "{} WHERE {} AND fl.is_active
           AND fl.expected_harvest_date BETWEEN $2 AND $3
         ORDER BY fl.expected_harvest_date, fl.id
         LIMIT $4",
        FIELD_SELECT,
        user.scope(Resource::Field).sql()
    );
    let fields = sqlx::query_as::<_, Field>(&sql)
        .bind(user.id)
        .bind(today)
        .bind(today + chrono::Duration::days(days))
        .bind(limit)
        .fetch_all(pool)
        .await?;
    Ok(fields)
}

pub async fn fetch_field(pool: &DbPool, id: i32) -> HarvestResult<Field> {
    let sql = format!("{} WHERE fl.id = $1", FIELD_SELECT);
    sqlx::query_as::<_, Field>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| HarvestError::not_found("Field"))
}

#[derive(Deserialize)]
pub struct FieldListParams {
    pub farm_id: Option<i32>,
}

pub async fn get_fields_axum(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(params): Query<FieldListParams>,
) -> HarvestResult<Json<Vec<FieldView>>> {
    let baseline = state.config.baseline_yield_per_hectare;
    let today = today();
    let fields = scoped_fields(&state.pool, &user, params.farm_id).await?;
    Ok(Json(
        fields
            .into_iter()
            .map(|f| FieldView::build(f, baseline, today))
            .collect(),
    ))
}

pub async fn get_field_axum(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i32>,
) -> HarvestResult<Json<FieldView>> {
    user.ensure_access(&state.pool, Resource::Field, id).await?;
    let field = fetch_field(&state.pool, id).await?;
    Ok(Json(FieldView::build(
        field,
        state.config.baseline_yield_per_hectare,
        today(),
    )))
}

#[derive(Deserialize)]
pub struct SaveFieldRequest {
    pub id: Option<i32>,
    pub farm_id: i32,
    pub name: String,
    pub crop_id: i32,
    pub area_hectares: Decimal,
    pub planting_date: NaiveDate,
    pub expected_harvest_date: NaiveDate,
    pub supervisor_id: i32,
    pub soil_type: Option<String>,
    pub irrigation_type: Option<String>,
    pub is_active: Option<bool>,
    pub notes: Option<String>,
}

pub async fn save_field_axum(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<SaveFieldRequest>,
) -> HarvestResult<Json<FieldView>> {
    user.require(Capability::ManageFarms)?;
    let name = require_text("Field name", &payload.name)?;
    validate_positive("Area", payload.area_hectares)?;
    validate_field_dates(payload.planting_date, payload.expected_harvest_date)?;
    user.ensure_access(&state.pool, Resource::Farm, payload.farm_id).await?;

    let mut tx = state.pool.begin().await?;

    let id = match payload.id {
        Some(id) if id > 0 => {
            user.ensure_access(&state.pool, Resource::Field, id).await?;
            let (old_farm,): (i32,) = sqlx::query_as("SELECT farm_id FROM fields WHERE id = $1")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
            sqlx::query(
                "UPDATE fields SET farm_id = $1, name = $2, crop_id = $3, area_hectares = $4,
                    planting_date = $5, expected_harvest_date = $6, supervisor_id = $7,
                    soil_type = $8, irrigation_type = $9, is_active = COALESCE($10, is_active),
                    notes = $11, updated_at = CURRENT_TIMESTAMP
                 WHERE id = $12",
            )
            .bind(payload.farm_id)
            .bind(&name)
            .bind(payload.crop_id)
            .bind(payload.area_hectares)
            .bind(payload.planting_date)
            .bind(payload.expected_harvest_date)
            .bind(payload.supervisor_id)
            .bind(&payload.soil_type)
            .bind(&payload.irrigation_type)
            .bind(payload.is_active)
            .bind(&payload.notes)
            .bind(id)
            .execute(&mut *tx)
            .await?;
            refresh_farms(&mut tx, &[old_farm, payload.farm_id]).await?;
            tracing::info!("Field {} updated by {}", id, user.username);
            id
        }
        _ => {
            let (id,): (i32,) = sqlx::query_as(
                "INSERT INTO fields (farm_id, name, crop_id, area_hectares, planting_date,
                    expected_harvest_date, supervisor_id, soil_type, irrigation_type, is_active, notes)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, COALESCE($10, TRUE), $11)
                 RETURNING id",
            )
            .bind(payload.farm_id)
            .bind(&name)
            .bind(payload.crop_id)
            .bind(payload.area_hectares)
            .bind(payload.planting_date)
            .bind(payload.expected_harvest_date)
            .bind(payload.supervisor_id)
            .bind(&payload.soil_type)
            .bind(&payload.irrigation_type)
            .bind(payload.is_active)
            .bind(&payload.notes)
            .fetch_one(&mut *tx)
            .await?;
            refresh_farms(&mut tx, &[payload.farm_id]).await?;
            tracing::info!("Field '{}' ({}) created by {}", name, id, user.username);
            id
        }
    };

    tx.commit().await?;

    let field = fetch_field(&state.pool, id).await?;
    Ok(Json(FieldView::build(
        field,
        state.config.baseline_yield_per_hectare,
        today(),
    )))
}

#[derive(Deserialize)]
pub struct FieldNotesRequest {
    pub notes: Option<String>,
    pub irrigation_type: Option<String>,
}

/// Supervisors keep their own fields' notes and irrigation up to date.
pub async fn update_field_notes_axum(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i32>,
    Json(payload): Json<FieldNotesRequest>,
) -> HarvestResult<Json<()>> {
    user.require(Capability::SuperviseFields)?;
    user.ensure_access(&state.pool, Resource::Field, id).await?;
    sqlx::query(
        "UPDATE fields SET notes = COALESCE($1, notes), irrigation_type = COALESCE($2, irrigation_type),
            updated_at = CURRENT_TIMESTAMP
         WHERE id = $3",
    )
    .bind(&payload.notes)
    .bind(&payload.irrigation_type)
    .bind(id)
    .execute(&state.pool)
    .await?;
    Ok(Json(()))
}

pub async fn delete_field_axum(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i32>,
) -> HarvestResult<Json<()>> {
    user.require(Capability::ManageFarms)?;
    user.ensure_access(&state.pool, Resource::Field, id).await?;

    let mut tx = state.pool.begin().await?;
    let (farm_id,): (i32,) = sqlx::query_as("DELETE FROM fields WHERE id = $1 RETURNING farm_id")
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
    refresh_farms(&mut tx, &[farm_id]).await?;
    tx.commit().await?;

    tracing::info!("Field {} deleted by {}", id, user.username);
    Ok(Json(()))
}
