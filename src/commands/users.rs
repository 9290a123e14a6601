use crate::access::{Capability, Resource, Role};
use crate::commands::auth::{hash_password, validate_password};
use crate::commands::utils::{conflict_on_unique, require_text};
use crate::db::User;
use crate::error::{HarvestError, HarvestResult};
use crate::middleware::auth::CurrentUser;
use crate::state::AppState;
use axum::extract::{Json, Path, State};
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
pub struct UserOverview {
    pub users: Vec<User>,
    pub total_users: usize,
    pub active_users: usize,
}

pub async fn get_users_axum(
    State(state): State<AppState>,
    user: CurrentUser,
) -> HarvestResult<Json<UserOverview>> {
    user.require(Capability::ViewUsers)?;
    let sql = format!(
        "SELECT u.* FROM users u WHERE {} ORDER BY u.username",
        user.scope(Resource::User).sql()
    );
    let users = sqlx::query_as::<_, User>(&sql)
        .bind(user.id)
        .fetch_all(&state.pool)
        .await?;
    Ok(Json(UserOverview {
        total_users: users.len(),
        active_users: users.iter().filter(|u| u.is_active).count(),
        users,
    }))
}

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub password: String,
    pub role: Role,
}

pub async fn create_user_axum(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<CreateUserRequest>,
) -> HarvestResult<Json<User>> {
    user.require(Capability::ManageUsers)?;
    let username = require_text("Username", &payload.username)?;
    validate_password(&payload.password, None)?;
    let email = payload
        .email
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_lowercase);

    let created = sqlx::query_as::<_, User>(
        "INSERT INTO users (username, email, first_name, last_name, password_hash, role)
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING *",
    )
    .bind(&username)
    .bind(&email)
    .bind(payload.first_name.trim())
    .bind(payload.last_name.trim())
    .bind(hash_password(&payload.password)?)
    .bind(payload.role.as_str())
    .fetch_one(&state.pool)
    .await
    .map_err(|e| conflict_on_unique(e, "Username or email is already taken"))?;

    tracing::info!(
        "User '{}' created as {} by {}",
        created.username,
        payload.role,
        user.username
    );
    Ok(Json(created))
}

#[derive(Deserialize, Default)]
pub struct UpdateUserRequest {
    pub role: Option<Role>,
    pub is_active: Option<bool>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
}

/// An admin may not lock themselves out by demoting or deactivating their own account.
pub fn guard_self_update(actor: &CurrentUser, target_id: i32, req: &UpdateUserRequest) -> HarvestResult<()> {
    if actor.id != target_id {
        return Ok(());
    }
    if req.is_active == Some(false) {
        return Err(HarvestError::validation("You cannot deactivate your own account"));
    }
    if let Some(role) = req.role {
        if actor.role == Role::Admin && role != Role::Admin {
            return Err(HarvestError::validation("You cannot remove your own admin role"));
        }
    }
    Ok(())
}

pub async fn update_user_axum(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i32>,
    Json(payload): Json<UpdateUserRequest>,
) -> HarvestResult<Json<User>> {
    user.require(Capability::ManageUsers)?;
    guard_self_update(&user, id, &payload)?;

    let email = payload
        .email
        .as_deref()
        .map(str::trim)
        .map(str::to_lowercase);

    let updated = sqlx::query_as::<_, User>(
        "UPDATE users SET
            role = COALESCE($1, role),
            is_active = COALESCE($2, is_active),
            first_name = COALESCE($3, first_name),
            last_name = COALESCE($4, last_name),
            email = CASE WHEN $5::TEXT IS NULL THEN email WHEN $5 = '' THEN NULL ELSE $5 END,
            updated_at = CURRENT_TIMESTAMP
         WHERE id = $6 RETURNING *",
    )
    .bind(payload.role.map(|r| r.as_str()))
    .bind(payload.is_active)
    .bind(payload.first_name.as_deref().map(str::trim))
    .bind(payload.last_name.as_deref().map(str::trim))
    .bind(email)
    .bind(id)
    .fetch_optional(&state.pool)
    .await
    .map_err(|e| conflict_on_unique(e, "Email is already in use"))?
    .ok_or_else(|| HarvestError::not_found("User"))?;

    tracing::info!("User {} updated by {}", updated.username, user.username);
    Ok(Json(updated))
}

#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    pub password: String,
}

pub async fn reset_password_axum(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i32>,
    Json(payload): Json<ResetPasswordRequest>,
) -> HarvestResult<Json<()>> {
    user.require(Capability::ManageUsers)?;
    validate_password(&payload.password, None)?;

    let res = sqlx::query(
        "UPDATE users SET password_hash = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2",
    )
    .bind(hash_password(&payload.password)?)
    .bind(id)
    .execute(&state.pool)
    .await?;
    if res.rows_affected() == 0 {
        return Err(HarvestError::not_found("User"));
    }

    tracing::info!("Password reset for user {} by {}", id, user.username);
    Ok(Json(()))
}
