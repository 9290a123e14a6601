use crate::access::{self, Capability, Resource, Role, Scope};
use crate::config::AppConfig;
use crate::db::User;
use crate::error::{HarvestError, HarvestResult};
use crate::state::AppState;
use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

const PUBLIC_ROUTES: [&str; 4] = [
    "/api/auth/login",
    "/api/auth/register",
    "/api/auth/demo-login",
    "/api/ping",
];

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub user_id: i32,
    pub username: String,
    pub role: String,
    pub exp: usize,
}

pub fn issue_token(config: &AppConfig, user: &User, ttl_hours: i64) -> HarvestResult<String> {
    let exp = chrono::Utc::now() + chrono::Duration::hours(ttl_hours);
    let claims = Claims {
        sub: user.username.clone(),
        user_id: user.id,
        username: user.username.clone(),
        role: user.role.clone(),
        exp: exp.timestamp() as usize,
    };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )?)
}

pub fn decode_token(config: &AppConfig, token: &str) -> HarvestResult<Claims> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, HarvestError> {
    let path = request.uri().path();

    if !path.starts_with("/api/") || PUBLIC_ROUTES.contains(&path) {
        return Ok(next.run(request).await);
    }

    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or_else(|| HarvestError::Auth("Authentication required.".to_string()))?
        .to_str()
        .map_err(|_| HarvestError::Auth("Malformed Authorization header.".to_string()))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| HarvestError::Auth("Expected a Bearer token.".to_string()))?;

    let claims = decode_token(&state.config, token)?;
    request.extensions_mut().insert(claims);

    Ok(next.run(request).await)
}

/// The authenticated account, reloaded per request so deactivation and role
/// changes take effect without waiting for the token to expire.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: i32,
    pub username: String,
    pub full_name: String,
    pub role: Role,
}

impl CurrentUser {
    pub fn from_user(user: &User) -> HarvestResult<Self> {
        Ok(Self {
            id: user.id,
            username: user.username.clone(),
            full_name: user.full_name(),
            role: user.role()?,
        })
    }

    pub fn can(&self, cap: Capability) -> bool {
        self.role.has(cap)
    }

    pub fn require(&self, cap: Capability) -> HarvestResult<()> {
        if self.can(cap) {
            Ok(())
        } else {
            Err(HarvestError::forbidden(format!(
                "You don't have permission to {}.",
                cap.describe()
            )))
        }
    }

    pub fn scope(&self, resource: Resource) -> Scope {
        access::record_scope(self.role, resource)
    }

    pub async fn ensure_access(
        &self,
        pool: &crate::db::DbPool,
        resource: Resource,
        id: i32,
    ) -> HarvestResult<()> {
        access::ensure_object_access(pool, self.id, self.role, resource, id).await
    }
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = HarvestError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let claims = parts
            .extensions
            .get::<Claims>()
            .cloned()
            .ok_or_else(|| HarvestError::Auth("Authentication required.".to_string()))?;

        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(claims.user_id)
            .fetch_optional(&state.pool)
            .await?
            .ok_or_else(|| HarvestError::Auth("Account no longer exists.".to_string()))?;

        if !user.is_active {
            return Err(HarvestError::Auth("Account is inactive.".to_string()));
        }

        CurrentUser::from_user(&user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_user(role: &str) -> User {
        User {
            id: 7,
            username: "manager_demo".into(),
            email: Some("manager@harvestpro.com".into()),
            first_name: "Manager".into(),
            last_name: "Demo".into(),
            password_hash: String::new(),
            role: role.into(),
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_token_round_trip() {
        let config = AppConfig::default();
        let token = issue_token(&config, &sample_user("farm_manager"), 1).unwrap();
        let claims = decode_token(&config, &token).unwrap();
        assert_eq!(claims.user_id, 7);
        assert_eq!(claims.role, "farm_manager");
    }

    #[test]
    fn test_token_rejected_with_other_secret() {
        let config = AppConfig::default();
        let token = issue_token(&config, &sample_user("admin"), 1).unwrap();
        let other = AppConfig {
            jwt_secret: "another-secret".into(),
            ..AppConfig::default()
        };
        assert!(matches!(
            decode_token(&other, &token),
            Err(HarvestError::Token(_))
        ));
    }

    #[test]
    fn test_expired_token_rejected() {
        let config = AppConfig::default();
        let token = issue_token(&config, &sample_user("admin"), -2).unwrap();
        assert!(decode_token(&config, &token).is_err());
    }

    #[test]
    fn test_current_user_permissions() {
        let user = CurrentUser::from_user(&sample_user("field_worker")).unwrap();
        assert!(user.require(Capability::TrackHarvests).is_ok());
        let err = user.require(Capability::ManageFarms).unwrap_err();
        assert!(matches!(err, HarvestError::Forbidden(_)));
        assert_eq!(user.full_name, "Manager Demo");
    }

    #[test]
    fn test_unknown_role_rejected() {
        assert!(CurrentUser::from_user(&sample_user("owner")).is_err());
    }
}
