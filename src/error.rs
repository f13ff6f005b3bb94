use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::packages::PackageSyncError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    PackageSync(#[from] PackageSyncError),
    #[error("not found: {0}")]
    NotFound(&'static str),
    #[error("bad request: {message}")]
    BadRequest { code: &'static str, message: String },
    #[error("conflict: {message}")]
    Conflict { code: &'static str, message: String },
    #[error("{0}")]
    Message(String),
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        AppError::BadRequest {
            code: "BAD_REQUEST",
            message: message.into(),
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::Db(_) => "DATABASE_ERROR",
            AppError::PackageSync(_) => "PACKAGE_SYNC_FAILED",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::BadRequest { code, .. } | AppError::Conflict { code, .. } => code,
            AppError::Message(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::Db(_) | AppError::PackageSync(_) | AppError::Message(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!(?self);
        } else {
            tracing::debug!(?self);
        }
        let message = match &self {
            AppError::BadRequest { message, .. } | AppError::Conflict { message, .. } => {
                message.clone()
            }
            other => other.to_string(),
        };
        let body = Json(json!({ "error": self.code(), "message": message }));
        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_maps_to_409() {
        let response = AppError::Conflict {
            code: "BILLING_ALREADY_INVOICED",
            message: "already invoiced".into(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn sync_failures_are_server_errors() {
        let err = PackageSyncError {
            package_id: uuid::Uuid::nil(),
            operation: "load",
            message: "boom".into(),
        };
        let response = AppError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
