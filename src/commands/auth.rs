use crate::access::{Capabilities, MenuItem, Role};
use crate::commands::utils::conflict_on_unique;
use crate::db::{self, DbPool, User};
use crate::error::{HarvestError, HarvestResult};
use crate::middleware::auth::{issue_token, CurrentUser};
use crate::state::AppState;
use axum::extract::{Json, State};
use bcrypt::{hash, verify, DEFAULT_COST};
use serde::{Deserialize, Serialize};

pub const MIN_PASSWORD_LEN: usize = 8;

pub fn validate_password(password: &str, confirmation: Option<&str>) -> HarvestResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(HarvestError::validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    if let Some(confirm) = confirmation {
        if confirm != password {
            return Err(HarvestError::validation("Passwords do not match"));
        }
    }
    Ok(())
}

pub fn hash_password(password: &str) -> HarvestResult<String> {
    Ok(hash(password, DEFAULT_COST)?)
}

#[derive(Debug, Serialize)]
pub struct Profile {
    pub user: User,
    pub full_name: String,
    pub role: Role,
    pub role_display: &'static str,
    pub capabilities: Capabilities,
    pub menu: Vec<MenuItem>,
}

impl Profile {
    /// Inactive accounts carry no capabilities.
    pub fn for_user(user: User) -> HarvestResult<Self> {
        let role = user.role()?;
        let (capabilities, menu) = if user.is_active {
            (role.capabilities(), role.menu_items())
        } else {
            (Capabilities::default(), Vec::new())
        };
        Ok(Self {
            full_name: user.full_name(),
            role,
            role_display: role.display_name(),
            capabilities,
            menu,
            user,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_in_hours: i64,
    pub profile: Profile,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    /// Username or email.
    pub username: String,
    pub password: String,
    #[serde(default = "default_remember")]
    pub remember_me: bool,
}

fn default_remember() -> bool {
    true
}

async fn find_login_user(pool: &DbPool, login: &str) -> HarvestResult<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        "SELECT * FROM users WHERE username = $1 OR LOWER(email) = LOWER($1) ORDER BY (username = $1) DESC LIMIT 1",
    )
    .bind(login)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

fn session_response(state: &AppState, user: User, remember_me: bool) -> HarvestResult<LoginResponse> {
    let ttl = if remember_me {
        state.config.jwt_ttl_hours
    } else {
        state.config.session_ttl_hours
    };
    let token = issue_token(&state.config, &user, ttl)?;
    Ok(LoginResponse {
        token,
        expires_in_hours: ttl,
        profile: Profile::for_user(user)?,
    })
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> HarvestResult<Json<LoginResponse>> {
    let login = payload.username.trim();
    if login.is_empty() || payload.password.is_empty() {
        return Err(HarvestError::validation("Please enter both username and password."));
    }

    let user = find_login_user(&state.pool, login)
        .await?
        .ok_or_else(|| HarvestError::Auth("Invalid username or password.".to_string()))?;

    if !verify(&payload.password, &user.password_hash)? {
        tracing::warn!("Failed login for '{}'", login);
        return Err(HarvestError::Auth("Invalid username or password.".to_string()));
    }
    if !user.is_active {
        return Err(HarvestError::Auth("Your account has been deactivated.".to_string()));
    }

    tracing::info!("User '{}' logged in", user.username);
    Ok(Json(session_response(&state, user, payload.remember_me)?))
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub password: String,
    pub password_confirm: String,
}

/// Self-service sign-up; new accounts start as field workers.
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> HarvestResult<Json<LoginResponse>> {
    let username = payload.username.trim();
    if username.is_empty() {
        return Err(HarvestError::validation("Username is required"));
    }
    validate_password(&payload.password, Some(&payload.password_confirm))?;
    let email = payload
        .email
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_lowercase);

    let password_hash = hash_password(&payload.password)?;
    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (username, email, first_name, last_name, password_hash, role)
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING *",
    )
    .bind(username)
    .bind(&email)
    .bind(payload.first_name.trim())
    .bind(payload.last_name.trim())
    .bind(password_hash)
    .bind(Role::FieldWorker.as_str())
    .fetch_one(&state.pool)
    .await
    .map_err(|e| conflict_on_unique(e, "Username or email is already taken"))?;

    tracing::info!("Registered new field worker '{}'", user.username);
    Ok(Json(session_response(&state, user, false)?))
}

#[derive(Deserialize)]
pub struct DemoLoginRequest {
    pub role: String,
}

pub async fn demo_login(
    State(state): State<AppState>,
    Json(payload): Json<DemoLoginRequest>,
) -> HarvestResult<Json<LoginResponse>> {
    if !state.config.seed_demo_accounts {
        return Err(HarvestError::not_found("Demo login"));
    }
    let account = db::demo_account(&payload.role)
        .ok_or_else(|| HarvestError::validation(format!("Unknown demo role: {}", payload.role)))?;

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = $1")
        .bind(account.username)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| HarvestError::not_found("Demo account"))?;
    if !user.is_active {
        return Err(HarvestError::Auth("Your account has been deactivated.".to_string()));
    }

    tracing::info!("Demo login as '{}'", user.username);
    Ok(Json(session_response(&state, user, false)?))
}

pub async fn me(
    State(state): State<AppState>,
    user: CurrentUser,
) -> HarvestResult<Json<Profile>> {
    let row = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user.id)
        .fetch_one(&state.pool)
        .await?;
    Ok(Json(Profile::for_user(row)?))
}

/// Tokens are stateless; the client discards its copy.
pub async fn logout(user: CurrentUser) -> HarvestResult<Json<()>> {
    tracing::info!("User '{}' logged out", user.username);
    Ok(Json(()))
}

pub async fn ping() -> Json<&'static str> {
    Json("pong")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(role: &str, active: bool) -> User {
        User {
            id: 1,
            username: "sam".into(),
            email: None,
            first_name: String::new(),
            last_name: String::new(),
            password_hash: String::new(),
            role: role.into(),
            is_active: active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_password_rules() {
        assert!(validate_password("short", None).is_err());
        assert!(validate_password("longenough", Some("longenough")).is_ok());
        assert!(validate_password("longenough", Some("different1")).is_err());
    }

    #[test]
    fn test_hash_verifies() {
        let h = hash_password("harvest2024").unwrap();
        assert!(verify("harvest2024", &h).unwrap());
        assert!(!verify("harvest2025", &h).unwrap());
    }

    #[test]
    fn test_profile_of_active_user() {
        let profile = Profile::for_user(user("field_supervisor", true)).unwrap();
        assert_eq!(profile.role_display, "Field Supervisor");
        assert_eq!(profile.full_name, "sam");
        assert!(profile.capabilities.can_supervise_fields);
        assert!(profile.menu.iter().any(|m| m.key == "analytics"));
    }

    #[test]
    fn test_inactive_profile_has_no_capabilities() {
        let profile = Profile::for_user(user("admin", false)).unwrap();
        assert_eq!(profile.capabilities, Capabilities::default());
        assert!(profile.menu.is_empty());
    }

    #[test]
    fn test_profile_serialises_without_hash() {
        let mut u = user("admin", true);
        u.password_hash = "secret-hash".into();
        let json = serde_json::to_string(&Profile::for_user(u).unwrap()).unwrap();
        assert!(!json.contains("secret-hash"));
        assert!(json.contains("\"role\":\"admin\""));
    }
}
