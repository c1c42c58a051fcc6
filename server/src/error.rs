use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use mongodb::error::{ErrorKind, WriteFailure};

use crate::response;

const DUPLICATE_KEY_CODE: i32 = 11000;

#[derive(Debug, thiserror::Error)]
pub enum ShopServerError {
    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("Password hashing error: {0}")]
    PasswordHash(#[from] bcrypt::BcryptError),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Authentication required")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Validation(String),

    #[error("Invalid id: {0}")]
    InvalidId(String),

    #[error("Invalid request body: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ShopServerError {
    pub fn not_found(what: &str) -> Self {
        ShopServerError::NotFound(format!("{what} not found"))
    }

    /// True when a unique index rejected the write.
    pub fn is_duplicate_key(&self) -> bool {
        match self {
            ShopServerError::Database(err) => matches!(
                err.kind.as_ref(),
                ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY_CODE
            ),
            _ => false,
        }
    }

    /// Turns a unique index violation into a 409 with `message`.
    pub fn duplicate_as_conflict(self, message: &str) -> Self {
        if self.is_duplicate_key() {
            ShopServerError::Conflict(message.to_string())
        } else {
            self
        }
    }
}

impl ResponseError for ShopServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            ShopServerError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ShopServerError::Unauthorized => StatusCode::UNAUTHORIZED,
            ShopServerError::Forbidden(_) => StatusCode::FORBIDDEN,
            ShopServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ShopServerError::Conflict(_) => StatusCode::CONFLICT,
            ShopServerError::Validation(_) => StatusCode::BAD_REQUEST,
            ShopServerError::InvalidId(_) => StatusCode::BAD_REQUEST,
            ShopServerError::Serialization(_) => StatusCode::BAD_REQUEST,
            ShopServerError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ShopServerError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ShopServerError::PasswordHash(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ShopServerError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ShopServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        // Storage and hashing details stay in the logs.
        let message = if status.is_server_error() {
            "Internal server error".to_string()
        } else {
            self.to_string()
        };
        response::error(message, status)
    }
}

pub type Result<T> = std::result::Result<T, ShopServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_keep_their_message() {
        let err = ShopServerError::Conflict("Email already registered".to_string());
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.to_string(), "Email already registered");
    }

    #[test]
    fn server_errors_default_to_500() {
        let err = ShopServerError::Internal("boom".to_string());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            err.error_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    fn write_error(code: i32) -> ShopServerError {
        let write: mongodb::error::WriteError = mongodb::bson::from_document(
            mongodb::bson::doc! { "code": code, "errmsg": "E11000 duplicate key error" },
        )
        .unwrap();
        ShopServerError::Database(ErrorKind::Write(WriteFailure::WriteError(write)).into())
    }

    #[test]
    fn duplicate_key_becomes_conflict() {
        let err = write_error(11000).duplicate_as_conflict("Already reviewed");
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.to_string(), "Already reviewed");

        let err = write_error(121).duplicate_as_conflict("Already reviewed");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let err = ShopServerError::Internal("boom".to_string()).duplicate_as_conflict("x");
        assert!(matches!(err, ShopServerError::Internal(_)));
    }

    #[test]
    fn not_found_helper_formats_message() {
        let err = ShopServerError::not_found("Product");
        assert_eq!(err.to_string(), "Product not found");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }
}
