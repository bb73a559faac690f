//! HTTP error mapping.
//!
//! Every failure leaves the daemon as `{ "error": ..., "code": ... }` with a
//! status derived from the domain error. Storage failures are logged here and
//! reach the client only as `internal_error`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use qrd_orders::{OrderError, TransitionError};
use thiserror::Error;
use tracing::error;

use crate::api_types::ErrorBody;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Order(#[from] OrderError),

    #[error("{message}")]
    BadRequest { code: &'static str, message: String },

    #[error("{0}")]
    Unauthorized(String),

    #[error("{message}")]
    NotFound { code: &'static str, message: String },

    #[error("{0}")]
    Forbidden(String),

    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        ApiError::BadRequest {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        ApiError::NotFound {
            code,
            message: message.into(),
        }
    }

    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Order(e) => order_status_and_code(e),
            ApiError::BadRequest { code, .. } => (StatusCode::BAD_REQUEST, code),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ApiError::NotFound { code, .. } => (StatusCode::NOT_FOUND, code),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "access_denied"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

fn order_status_and_code(e: &OrderError) -> (StatusCode, &'static str) {
    match e {
        OrderError::AccountNotFound(_) => (StatusCode::NOT_FOUND, "account_not_found"),
        OrderError::TableNotFound(_) => (StatusCode::NOT_FOUND, "table_not_found"),
        OrderError::OrderNotFound(_) => (StatusCode::NOT_FOUND, "order_not_found"),
        OrderError::OrderingDisabled(_) => (StatusCode::CONFLICT, "ordering_disabled"),
        OrderError::TableInactive(_) => (StatusCode::CONFLICT, "table_inactive"),
        OrderError::EmptyOrder => (StatusCode::UNPROCESSABLE_ENTITY, "empty_order"),
        OrderError::TooManyLines { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "too_many_lines"),
        OrderError::InvalidQuantity { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, "invalid_quantity")
        }
        OrderError::ProductUnavailable(_) => {
            (StatusCode::UNPROCESSABLE_ENTITY, "product_unavailable")
        }
        OrderError::ActiveOrderExists { .. } => (StatusCode::CONFLICT, "active_order_exists"),
        OrderError::Transition(TransitionError::Illegal { .. }) => {
            (StatusCode::CONFLICT, "illegal_transition")
        }
        OrderError::Transition(TransitionError::Forbidden { .. }) => {
            (StatusCode::FORBIDDEN, "role_forbidden")
        }
        OrderError::StatusConflict { .. } => (StatusCode::CONFLICT, "status_conflict"),
        OrderError::AccessDenied(_) | OrderError::AccountAccessDenied(_) => {
            (StatusCode::FORBIDDEN, "access_denied")
        }
        OrderError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "request failed");
            "internal error".to_string()
        } else {
            self.to_string()
        };

        let active_order_id = match &self {
            ApiError::Order(OrderError::ActiveOrderExists { order_id }) => Some(*order_id),
            _ => None,
        };

        (
            status,
            Json(ErrorBody {
                error: message,
                code: code.to_string(),
                active_order_id,
            }),
        )
            .into_response()
    }
}
