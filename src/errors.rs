use http::StatusCode;
use uuid::Uuid;

use crate::gateways::GatewayError;

/// Error type shared by all order services.
///
/// The taxonomy distinguishes caller mistakes (4xx), gateway hard failures
/// where the refund outcome is unknown (502), and invariant violations such
/// as an unconfigured payment method (500). Gateway soft failures are not
/// errors at all; they are recorded on the order as `RefundStatus::Failed`.
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

    #[error("Order {0} has not been paid")]
    OrderNotPaid(Uuid),

    #[error("Order {0} has already been shipped")]
    AlreadyShipped(Uuid),

    #[error("Order {0} is not awaiting a refund decision")]
    InvalidRefundState(Uuid),

    /// The order carries a payment method no gateway adapter is registered
    /// for. Misconfiguration or data corruption, never caller input.
    #[error("Unsupported payment method: {0}")]
    UnsupportedPaymentMethod(String),

    /// The gateway could not be reached or timed out mid-call. The refund
    /// outcome is unknown and no order state has been written.
    #[error("Payment gateway unavailable, refund outcome unknown: {0}")]
    GatewayUnavailable(#[from] GatewayError),

    #[error("Concurrent modification of order {0}")]
    ConcurrentModification(Uuid),

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

pub trait IntoDbErr {
    fn into_db_err(self) -> sea_orm::error::DbErr;
}

impl IntoDbErr for sea_orm::error::DbErr {
    fn into_db_err(self) -> sea_orm::error::DbErr {
        self
    }
}

impl IntoDbErr for String {
    fn into_db_err(self) -> sea_orm::error::DbErr {
        sea_orm::error::DbErr::Custom(self)
    }
}

impl IntoDbErr for &str {
    fn into_db_err(self) -> sea_orm::error::DbErr {
        sea_orm::error::DbErr::Custom(self.to_string())
    }
}

impl ServiceError {
    /// Generic constructor that normalizes any supported database error input.
    pub fn db_error<E: IntoDbErr>(error: E) -> Self {
        ServiceError::DatabaseError(error.into_db_err())
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_)
            | Self::InvalidOperation(_)
            | Self::OrderNotPaid(_)
            | Self::AlreadyShipped(_)
            | Self::InvalidRefundState(_) => StatusCode::BAD_REQUEST,
            Self::ConcurrentModification(_) => StatusCode::CONFLICT,
            Self::GatewayUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::DatabaseError(_)
            | Self::UnsupportedPaymentMethod(_)
            | Self::InternalError(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::UnsupportedPaymentMethod(_) | Self::InternalError(_) | Self::Other(_) => {
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        }
    }
}
