use crate::access::{Capability, Resource, Role};
use crate::commands::utils::{require_text, validate_positive};
use crate::db::{DbPool, Farm, Field};
use crate::error::{HarvestError, HarvestResult};
use crate::metrics::{self, FarmEfficiency, FieldYieldBasis, SizeBucket};
use crate::middleware::auth::CurrentUser;
use crate::state::AppState;
use axum::extract::{Json, Path, Query, State};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, Transaction};
use std::collections::BTreeMap;

const FARM_SELECT: &str = "SELECT f.*, u.username AS manager_username FROM farms f LEFT JOIN users u ON u.id = f.manager_id";

/// Recomputes the cached totals on a farm. Locks the farm row first so two
/// writers touching the same farm serialise.
pub async fn refresh_farm_aggregates(
    tx: &mut Transaction<'_, Postgres>,
    farm_id: i32,
) -> HarvestResult<()> {
    let locked: Option<(i32,)> = sqlx::query_as("SELECT id FROM farms WHERE id = $1 FOR UPDATE")
        .bind(farm_id)
        .fetch_optional(&mut **tx)
        .await?;
    if locked.is_none() {
        return Err(HarvestError::not_found("Farm"));
    }

    let (area, count): (Decimal, i64) = sqlx::query_as(
        "SELECT COALESCE(SUM(area_hectares), 0), COUNT(*) FROM fields WHERE farm_id = $1",
    )
    .bind(farm_id)
    .fetch_one(&mut **tx)
    .await?;

    let (harvested,): (Decimal,) = sqlx::query_as(
        "SELECT COALESCE(SUM(h.quantity_tons), 0)
         FROM harvest_records h JOIN fields fl ON fl.id = h.field_id
         WHERE fl.farm_id = $1",
    )
    .bind(farm_id)
    .fetch_one(&mut **tx)
    .await?;

    let average = metrics::yield_per_hectare(harvested, area).round_dp(4);

    sqlx::query(
        "UPDATE farms SET
            cached_field_area_hectares = $1, cached_field_count = $2,
            cached_total_harvested_tons = $3, cached_average_yield = $4,
            updated_at = CURRENT_TIMESTAMP
         WHERE id = $5",
    )
    .bind(area)
    .bind(count as i32)
    .bind(harvested)
    .bind(average)
    .bind(farm_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Refreshes several farms in id order so concurrent callers lock in the same order.
pub async fn refresh_farms(
    tx: &mut Transaction<'_, Postgres>,
    farm_ids: &[i32],
) -> HarvestResult<()> {
    let mut ids = farm_ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    for id in ids {
        refresh_farm_aggregates(tx, id).await?;
    }
    Ok(())
}

pub async fn load_farm_efficiency(
    pool: &DbPool,
    farm_id: i32,
    baseline: Decimal,
) -> HarvestResult<FarmEfficiency> {
    let basis: Vec<(Decimal, Option<Decimal>)> = sqlx::query_as(
        "SELECT fl.area_hectares, c.expected_yield_per_hectare
         FROM fields fl JOIN crops c ON c.id = fl.crop_id
         WHERE fl.farm_id = $1",
    )
    .bind(farm_id)
    .fetch_all(pool)
    .await?;

    let (actual,): (Decimal,) = sqlx::query_as(
        "SELECT COALESCE(SUM(h.quantity_tons), 0)
         FROM harvest_records h JOIN fields fl ON fl.id = h.field_id
         WHERE fl.farm_id = $1",
    )
    .bind(farm_id)
    .fetch_one(pool)
    .await?;

    let fields: Vec<FieldYieldBasis> = basis
        .into_iter()
        .map(|(area_hectares, expected_per_hectare)| FieldYieldBasis {
            area_hectares,
            expected_per_hectare,
        })
        .collect();

    Ok(metrics::farm_efficiency(&fields, actual, baseline))
}

#[derive(Debug, Serialize, PartialEq)]
pub struct FarmRanking {
    pub id: i32,
    pub name: String,
    pub average_yield: f64,
    pub total_harvested: f64,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct LocationCount {
    pub location: String,
    pub count: usize,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct SizeCount {
    pub range: &'static str,
    pub count: usize,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct FarmSummary {
    pub total_farms: usize,
    pub active_farms: usize,
    pub total_area_acres: f64,
    pub average_farm_size_acres: f64,
    pub total_fields: i64,
    pub total_harvested: f64,
    pub top_farms: Vec<FarmRanking>,
    pub recent_farms: Vec<FarmRanking>,
    pub location_distribution: Vec<LocationCount>,
    pub size_distribution: Vec<SizeCount>,
}

fn ranking(farm: &Farm) -> FarmRanking {
    FarmRanking {
        id: farm.id,
        name: farm.name.clone(),
        average_yield: metrics::round2(metrics::to_f64(farm.cached_average_yield)),
        total_harvested: metrics::to_f64(farm.cached_total_harvested_tons),
    }
}

/// Farm-management overview built from the cached aggregates.
pub fn summarize_farms(farms: &[Farm]) -> FarmSummary {
    let acres: Vec<Decimal> = farms
        .iter()
        .map(|f| metrics::hectares_to_acres(f.cached_field_area_hectares))
        .collect();
    let total_acres: Decimal = acres.iter().copied().sum();
    let average_size = if farms.is_empty() {
        Decimal::ZERO
    } else {
        total_acres / Decimal::from(farms.len())
    };

    let mut by_yield: Vec<&Farm> = farms.iter().collect();
    by_yield.sort_by(|a, b| b.cached_average_yield.cmp(&a.cached_average_yield));

    let mut by_created: Vec<&Farm> = farms.iter().collect();
    by_created.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let mut locations: BTreeMap<&str, usize> = BTreeMap::new();
    for farm in farms {
        *locations.entry(farm.location.as_str()).or_default() += 1;
    }

    let mut sizes: BTreeMap<SizeBucket, usize> = BTreeMap::new();
    for a in &acres {
        *sizes.entry(SizeBucket::for_acres(*a)).or_default() += 1;
    }

    FarmSummary {
        total_farms: farms.len(),
        active_farms: farms.iter().filter(|f| f.is_active).count(),
        total_area_acres: metrics::round1(metrics::to_f64(total_acres)),
        average_farm_size_acres: metrics::round1(metrics::to_f64(average_size)),
        total_fields: farms.iter().map(|f| f.cached_field_count as i64).sum(),
        total_harvested: metrics::to_f64(farms.iter().map(|f| f.cached_total_harvested_tons).sum()),
        top_farms: by_yield.into_iter().take(5).map(ranking).collect(),
        recent_farms: by_created.into_iter().take(5).map(ranking).collect(),
        location_distribution: locations
            .into_iter()
            .map(|(location, count)| LocationCount {
                location: location.to_string(),
                count,
            })
            .collect(),
        size_distribution: sizes
            .into_iter()
            .map(|(bucket, count)| SizeCount {
                range: bucket.label(),
                count,
            })
            .collect(),
    }
}

pub async fn scoped_farms(
    pool: &DbPool,
    user: &CurrentUser,
    include_inactive: bool,
) -> HarvestResult<Vec<Farm>> {
    let sql = format!(
        "{} WHERE {} AND ($2 OR f.is_active) ORDER BY f.name",
        FARM_SELECT,
        user.scope(Resource::Farm).sql()
    );
    let farms = sqlx::query_as::<_, Farm>(&sql)
        .bind(user.id)
        .bind(include_inactive)
        .fetch_all(pool)
        .await?;
    Ok(farms)
}

pub async fn fetch_farm(pool: &DbPool, id: i32) -> HarvestResult<Farm> {
    let sql = format!("{} WHERE f.id = $1", FARM_SELECT);
    sqlx::query_as::<_, Farm>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| HarvestError::not_found("Farm"))
}

#[derive(Deserialize)]
pub struct FarmListParams {
    pub include_inactive: Option<bool>,
}

#[derive(Serialize)]
pub struct FarmOverview {
    pub summary: FarmSummary,
    pub farms: Vec<Farm>,
}

pub async fn get_farms_axum(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(params): Query<FarmListParams>,
) -> HarvestResult<Json<FarmOverview>> {
    let farms = scoped_farms(&state.pool, &user, params.include_inactive.unwrap_or(false)).await?;
    Ok(Json(FarmOverview {
        summary: summarize_farms(&farms),
        farms,
    }))
}

#[derive(Serialize)]
pub struct FarmDetail {
    pub farm: Farm,
    pub fields: Vec<Field>,
    pub efficiency: FarmEfficiency,
}

pub async fn get_farm_axum(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i32>,
) -> HarvestResult<Json<FarmDetail>> {
    user.ensure_access(&state.pool, Resource::Farm, id).await?;
    let farm = fetch_farm(&state.pool, id).await?;
    let fields = crate::commands::fields::fields_for_farm(&state.pool, &user, id).await?;
    let efficiency =
        load_farm_efficiency(&state.pool, id, state.config.baseline_yield_per_hectare).await?;
    Ok(Json(FarmDetail {
        farm,
        fields,
        efficiency,
    }))
}

/// Manager to write when saving a farm. `None` on an update keeps the current
/// owner; only admins reassign, and a farm manager always owns what they create.
pub fn farm_owner(role: Role, caller: i32, requested: Option<i32>, is_update: bool) -> Option<i32> {
    match (role, is_update) {
        (Role::Admin, true) => requested,
        (Role::Admin, false) => Some(requested.unwrap_or(caller)),
        (_, true) => None,
        (_, false) => Some(caller),
    }
}

#[derive(Deserialize)]
pub struct SaveFarmRequest {
    pub id: Option<i32>,
    pub name: String,
    pub location: String,
    pub total_area_hectares: Decimal,
    pub description: Option<String>,
    pub manager_id: Option<i32>,
    pub is_active: Option<bool>,
}

pub async fn save_farm_axum(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<SaveFarmRequest>,
) -> HarvestResult<Json<Farm>> {
    user.require(Capability::ManageFarms)?;
    let name = require_text("Farm name", &payload.name)?;
    let location = require_text("Location", &payload.location)?;
    validate_positive("Total area", payload.total_area_hectares)?;

    let existing = payload.id.filter(|id| *id > 0);
    let manager_id = farm_owner(user.role, user.id, payload.manager_id, existing.is_some());

    let id = match existing {
        Some(id) => {
            user.ensure_access(&state.pool, Resource::Farm, id).await?;
            sqlx::query(
                "UPDATE farms SET name = $1, location = $2, total_area_hectares = $3,
                    description = $4, manager_id = COALESCE($5, manager_id),
                    is_active = COALESCE($6, is_active),
                    updated_at = CURRENT_TIMESTAMP
                 WHERE id = $7",
            )
            .bind(&name)
            .bind(&location)
            .bind(payload.total_area_hectares)
            .bind(&payload.description)
            .bind(manager_id)
            .bind(payload.is_active)
            .bind(id)
            .execute(&state.pool)
            .await?;
            tracing::info!("Farm {} updated by {}", id, user.username);
            id
        }
        None => {
            let (id,): (i32,) = sqlx::query_as(
                "INSERT INTO farms (name, manager_id, location, total_area_hectares, description, is_active)
                 VALUES ($1, $2, $3, $4, $5, COALESCE($6, TRUE)) RETURNING id",
            )
            .bind(&name)
            .bind(manager_id)
            .bind(&location)
            .bind(payload.total_area_hectares)
            .bind(&payload.description)
            .bind(payload.is_active)
            .fetch_one(&state.pool)
            .await?;
            tracing::info!("Farm '{}' ({}) created by {}", name, id, user.username);
            id
        }
    };

    Ok(Json(fetch_farm(&state.pool, id).await?))
}

pub async fn deactivate_farm_axum(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i32>,
) -> HarvestResult<Json<()>> {
    user.require(Capability::ManageFarms)?;
    user.ensure_access(&state.pool, Resource::Farm, id).await?;
    sqlx::query("UPDATE farms SET is_active = FALSE, updated_at = CURRENT_TIMESTAMP WHERE id = $1")
        .bind(id)
        .execute(&state.pool)
        .await?;
    tracing::info!("Farm {} deactivated by {}", id, user.username);
    Ok(Json(()))
}
