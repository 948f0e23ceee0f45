use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

/// Standard error body returned by every endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Unprocessable Entity",
    "message": "Insufficient stock for 1 line",
    "details": null,
    "timestamp": "2025-11-02T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Structured error details (per-line shortfalls, field errors)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

/// One cart line that could not be satisfied by current inventory.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StockShortfall {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub requested: i32,
    pub available: i32,
}

impl std::fmt::Display for StockShortfall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.variant_id {
            Some(variant) => write!(
                f,
                "variant {} of product {}: requested {}, available {}",
                variant, self.product_id, self.requested, self.available
            ),
            None => write!(
                f,
                "product {}: requested {}, available {}",
                self.product_id, self.requested, self.available
            ),
        }
    }
}

fn shortfall_summary(shortfalls: &[StockShortfall]) -> String {
    shortfalls
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::error::DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Insufficient stock: {}", shortfall_summary(.0))]
    InsufficientStock(Vec<StockShortfall>),

    /// Server-derived catalog price disagrees materially with the cart's
    /// captured price for a line.
    #[error("Price conflict on product {product_id}: cart has {cart_price}, catalog has {catalog_price}")]
    PriceConflict {
        product_id: Uuid,
        cart_price: Decimal,
        catalog_price: Decimal,
    },

    #[error("Coupon rejected: {code}: {reason}")]
    CouponRejected { code: String, reason: String },

    #[error("Gift card rejected: {code}: {reason}")]
    GiftCardRejected { code: String, reason: String },

    #[error("Payment failed: {0}")]
    PaymentFailed(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Invalid status transition: {0}")]
    InvalidStatus(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) | Self::InvalidOperation(_) | Self::InvalidStatus(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::InsufficientStock(_)
            | Self::CouponRejected { .. }
            | Self::GiftCardRejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::PriceConflict { .. } => StatusCode::CONFLICT,
            Self::PaymentFailed(_) => StatusCode::PAYMENT_REQUIRED,
            Self::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            Self::DatabaseError(_) | Self::InternalError(_) | Self::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message suitable for HTTP responses. Internal variants return a
    /// generic message so implementation details never leak.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) | Self::Other(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    /// Structured payload for errors that carry per-line information.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::InsufficientStock(shortfalls) => serde_json::to_value(shortfalls).ok(),
            Self::PriceConflict {
                product_id,
                cart_price,
                catalog_price,
            } => Some(json!({
                "product_id": product_id,
                "cart_price": cart_price,
                "catalog_price": catalog_price,
            })),
            Self::CouponRejected { code, reason } | Self::GiftCardRejected { code, reason } => {
                Some(json!({ "code": code, "reason": reason }))
            }
            _ => None,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details: self.details(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}

/// Error type for HTTP handlers wrapping service errors plus the few
/// handler-local failure modes.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Service error: {0}")]
    ServiceError(#[from] ServiceError),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, details) = match &self {
            ApiError::ServiceError(err) => {
                (err.status_code(), err.response_message(), err.details())
            }
            ApiError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone(), None),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
        };

        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message,
            details,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn status_code_mapping() {
        assert_eq!(
            ServiceError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::ValidationError("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::InsufficientStock(vec![]).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::PriceConflict {
                product_id: Uuid::new_v4(),
                cart_price: dec!(10.00),
                catalog_price: dec!(12.00),
            }
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::PaymentFailed("declined".into()).status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            ServiceError::ExternalServiceError("gateway down".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn response_message_hides_internal_details() {
        assert_eq!(
            ServiceError::InternalError("secret path".into()).response_message(),
            "Internal server error"
        );
        assert_eq!(
            ServiceError::NotFound("Cart not found".into()).response_message(),
            "Not found: Cart not found"
        );
    }

    #[test]
    fn shortfall_message_names_each_line() {
        let product_id = Uuid::new_v4();
        let err = ServiceError::InsufficientStock(vec![StockShortfall {
            product_id,
            variant_id: None,
            requested: 3,
            available: 1,
        }]);
        let msg = err.to_string();
        assert!(msg.contains(&product_id.to_string()));
        assert!(msg.contains("requested 3"));
        assert!(msg.contains("available 1"));
    }

    #[test]
    fn stock_conflict_details_serialize_per_line() {
        let err = ServiceError::InsufficientStock(vec![StockShortfall {
            product_id: Uuid::new_v4(),
            variant_id: Some(Uuid::new_v4()),
            requested: 2,
            available: 0,
        }]);
        let details = err.details().expect("details expected");
        assert_eq!(details.as_array().map(|a| a.len()), Some(1));
    }
}
