use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::error;

use crate::responses::RequestMeta;
use crate::store::StoreError;
use crate::types::{UserId, WithdrawalStatus};

pub const E_BAD_AMOUNT: &str = "BAD_AMOUNT";
pub const E_BAD_PACKAGE: &str = "BAD_PACKAGE";
pub const E_BAD_REGISTRATION: &str = "BAD_REGISTRATION";
pub const E_BAD_CONFIG: &str = "BAD_CONFIG";
pub const E_DB_FAILURE: &str = "DB_FAILURE";
pub const E_DUPLICATE_IDENTITY: &str = "DUPLICATE_IDENTITY";
pub const E_INSUFFICIENT_BALANCE: &str = "INSUFFICIENT_BALANCE";
pub const E_INVALID_TRANSITION: &str = "INVALID_TRANSITION";
pub const E_PACKAGE_NOT_FOUND: &str = "PACKAGE_NOT_FOUND";
pub const E_UNKNOWN_SPONSOR: &str = "UNKNOWN_SPONSOR";
pub const E_USER_NOT_FOUND: &str = "USER_NOT_FOUND";
pub const E_WITHDRAWAL_NOT_FOUND: &str = "WITHDRAWAL_NOT_FOUND";

/// Everything the network operations can fail with.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// No user answers to the sponsor address given at registration.
    #[error("invalid sponsor address: {0}")]
    UnknownSponsor(String),
    #[error("{0} is already registered")]
    DuplicateIdentity(String),
    #[error("invalid registration: {0}")]
    InvalidRegistration(String),
    #[error("user {0} not found")]
    UserNotFound(UserId),
    #[error("package {0} not found")]
    PackageNotFound(i64),
    #[error("withdrawal {0} not found")]
    WithdrawalNotFound(i64),
    #[error("invalid package: {0}")]
    InvalidPackage(String),
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("invalid commission rates: {0}")]
    InvalidRates(String),
    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance {
        requested: Decimal,
        available: Decimal,
    },
    #[error("withdrawal {id} is {from}, cannot become {to}")]
    InvalidTransition {
        id: i64,
        from: WithdrawalStatus,
        to: WithdrawalStatus,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, NetworkError>;

impl NetworkError {
    /// Maps the failure onto an HTTP error with its stable code.
    pub fn into_api(self, meta: RequestMeta) -> ApiErrorWithMeta {
        let (error, code) = match self {
            NetworkError::UnknownSponsor(_) => {
                (ApiError::BadRequest(self.to_string()), E_UNKNOWN_SPONSOR)
            }
            NetworkError::DuplicateIdentity(_) => {
                (ApiError::Conflict(self.to_string()), E_DUPLICATE_IDENTITY)
            }
            NetworkError::InvalidRegistration(_) => {
                (ApiError::BadRequest(self.to_string()), E_BAD_REGISTRATION)
            }
            NetworkError::UserNotFound(_) => (ApiError::NotFound(self.to_string()), E_USER_NOT_FOUND),
            NetworkError::PackageNotFound(_) => {
                (ApiError::NotFound(self.to_string()), E_PACKAGE_NOT_FOUND)
            }
            NetworkError::WithdrawalNotFound(_) => {
                (ApiError::NotFound(self.to_string()), E_WITHDRAWAL_NOT_FOUND)
            }
            NetworkError::InvalidPackage(_) => (ApiError::BadRequest(self.to_string()), E_BAD_PACKAGE),
            NetworkError::InvalidAmount(_) => (ApiError::BadRequest(self.to_string()), E_BAD_AMOUNT),
            NetworkError::InvalidRates(_) => (ApiError::Internal(self.into()), E_BAD_CONFIG),
            NetworkError::InsufficientBalance { .. } => {
                (ApiError::BadRequest(self.to_string()), E_INSUFFICIENT_BALANCE)
            }
            NetworkError::InvalidTransition { .. } => {
                (ApiError::Conflict(self.to_string()), E_INVALID_TRANSITION)
            }
            NetworkError::Store(StoreError::Conflict(msg)) => {
                (ApiError::Conflict(msg), E_DUPLICATE_IDENTITY)
            }
            NetworkError::Store(e) => (ApiError::Internal(e.into()), E_DB_FAILURE),
        };
        error.with_meta(meta).with_code(code)
    }
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(anyhow::Error),
}

#[derive(Debug)]
pub struct ApiErrorWithMeta {
    error: ApiError,
    meta: RequestMeta,
    code: Option<String>,
}

impl ApiError {
    pub fn with_meta(self, meta: RequestMeta) -> ApiErrorWithMeta {
        ApiErrorWithMeta {
            error: self,
            meta,
            code: None,
        }
    }
}

impl ApiErrorWithMeta {
    pub fn with_code(mut self, code: &str) -> Self {
        self.code = Some(code.to_string());
        self
    }
}

impl IntoResponse for ApiErrorWithMeta {
    fn into_response(self) -> Response {
        let (status, error_message) = match self.error {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(e) => {
                error!(request_id = %self.meta.request_id, "internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        let mut body = json!({
            "request_id": self.meta.request_id,
            "error": error_message,
        });
        if let Some(code) = self.code {
            body["code"] = json!(code);
        }

        (status, Json(body)).into_response()
    }
}
