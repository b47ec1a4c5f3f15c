use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Order aggregate root.
///
/// `ship_status` and `refund_status` are independent state machines that are
/// only mutated through `OrderLifecycle`; everything else is written at
/// checkout or payment time and read-only here.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// External-facing order number, unique per order.
    #[sea_orm(unique)]
    pub order_no: String,

    pub user_id: Uuid,

    /// Full order amount; also the amount refunded (no partial refunds).
    pub total_amount: Decimal,

    /// Provider identifier recorded when the order was paid, e.g. "alipay".
    /// Kept as a raw string so that an unconfigured provider is still
    /// loadable and can be surfaced as an invariant violation at dispatch.
    #[sea_orm(nullable)]
    pub payment_method: Option<String>,

    /// `None` means the order is unpaid.
    #[sea_orm(nullable)]
    pub paid_at: Option<DateTime<Utc>>,

    pub ship_status: ShipStatus,

    #[sea_orm(column_type = "Json", nullable)]
    pub ship_data: Option<ShipData>,

    pub refund_status: RefundStatus,

    /// Idempotency key sent to the payment gateway; minted at most once per
    /// refund attempt, and a new attempt mints a new value.
    #[sea_orm(nullable)]
    pub refund_no: Option<String>,

    #[sea_orm(column_type = "Json")]
    pub extra: OrderExtra,

    pub created_at: DateTime<Utc>,
    #[sea_orm(nullable)]
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Shipment state, monotonic: Pending -> Delivered -> Received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum ShipStatus {
    #[sea_orm(string_value = "pending")]
    Pending,

    #[sea_orm(string_value = "delivered")]
    Delivered,

    #[sea_orm(string_value = "received")]
    Received,
}

impl fmt::Display for ShipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShipStatus::Pending => write!(f, "pending"),
            ShipStatus::Delivered => write!(f, "delivered"),
            ShipStatus::Received => write!(f, "received"),
        }
    }
}

/// Refund state.
///
/// Legal transitions: None -> Applied -> {DeniedPendingReview, Success,
/// Failed}, and back to Applied from DeniedPendingReview or Failed when the
/// customer re-applies. Success is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    #[sea_orm(string_value = "none")]
    None,

    /// Customer has applied; an operator decision is pending.
    #[sea_orm(string_value = "applied")]
    Applied,

    /// Operator denied the application; the customer may re-apply.
    #[sea_orm(string_value = "denied_pending_review")]
    DeniedPendingReview,

    #[sea_orm(string_value = "success")]
    Success,

    /// The gateway rejected the refund (business-level). Not retried
    /// automatically; a fresh application puts the order back in Applied.
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl RefundStatus {
    /// States from which a customer may (re-)apply for a refund.
    pub fn can_apply(self) -> bool {
        matches!(
            self,
            RefundStatus::None | RefundStatus::DeniedPendingReview | RefundStatus::Failed
        )
    }
}

impl fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefundStatus::None => write!(f, "none"),
            RefundStatus::Applied => write!(f, "applied"),
            RefundStatus::DeniedPendingReview => write!(f, "denied_pending_review"),
            RefundStatus::Success => write!(f, "success"),
            RefundStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Carrier and tracking number captured when the order ships.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct ShipData {
    pub carrier: String,
    pub tracking_no: String,
}

/// Auxiliary refund data. Typed fields instead of an open string map; the
/// serialized keys are part of the persisted format and must not change.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct OrderExtra {
    /// Operator's reason for denying the latest refund application.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund_disagree_reason: Option<String>,

    /// Provider sub-error code from the latest failed refund attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund_failed_code: Option<String>,
}
