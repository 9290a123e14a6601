use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Permission denied: {0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Bcrypt error: {0}")]
    Bcrypt(#[from] bcrypt::BcryptError),

    #[error("Token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("PDF error: {0}")]
    Pdf(#[from] printpdf::Error),
}

impl HarvestError {
    pub fn validation(msg: impl Into<String>) -> Self {
        HarvestError::Validation(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        HarvestError::Forbidden(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        HarvestError::NotFound(what.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            HarvestError::Auth(_) | HarvestError::Token(_) => StatusCode::UNAUTHORIZED,
            HarvestError::Forbidden(_) => StatusCode::FORBIDDEN,
            HarvestError::NotFound(_) => StatusCode::NOT_FOUND,
            HarvestError::Validation(_) => StatusCode::BAD_REQUEST,
            HarvestError::Conflict(_) => StatusCode::CONFLICT,
            HarvestError::Database(sqlx::Error::RowNotFound) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// Errors cross the API boundary as plain strings.
pub type HarvestResult<T> = Result<T, HarvestError>;

impl IntoResponse for HarvestError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_message = match self {
            HarvestError::Auth(msg) => msg,
            HarvestError::Token(_) => "Invalid or expired token.".to_string(),
            HarvestError::Forbidden(msg) => msg,
            HarvestError::NotFound(what) => format!("{} not found", what),
            HarvestError::Validation(msg) => msg,
            HarvestError::Conflict(msg) => msg,
            HarvestError::Database(sqlx::Error::RowNotFound) => "Record not found".to_string(),
            HarvestError::Database(ref e) => {
                tracing::error!("Database Error: {:?}", e);
                "A database error occurred.".to_string()
            }
            HarvestError::Io(ref e) => {
                tracing::error!("IO Error: {:?}", e);
                "A file system error occurred.".to_string()
            }
            ref other => {
                tracing::error!("Unhandled Error: {:?}", other);
                "An internal server error occurred.".to_string()
            }
        };

        let body = Json(json!({
            "success": false,
            "error": error_message,
        }));

        (status, body).into_response()
    }
}
