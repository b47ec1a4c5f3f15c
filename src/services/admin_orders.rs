use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

use crate::entities::order::Model as OrderModel;
use crate::errors::ServiceError;
use crate::repositories::OrderStore;
use crate::services::OrderLifecycle;

/// Shipment entry point payload. Both fields are mandatory and non-empty.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct ShipOrderRequest {
    pub order_id: Uuid,
    #[validate(length(min = 1, message = "Carrier is required"))]
    pub carrier: String,
    #[validate(length(min = 1, message = "Tracking number is required"))]
    pub tracking_no: String,
}

/// Refund decision entry point payload.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct HandleRefundRequest {
    pub order_id: Uuid,
    pub agree: bool,
    /// Required when `agree` is false; enforced by the lifecycle.
    pub reason: Option<String>,
}

/// Operator-facing orchestration over [`OrderLifecycle`].
#[derive(Clone)]
pub struct AdminOrderService {
    lifecycle: Arc<OrderLifecycle>,
    store: Arc<dyn OrderStore>,
}

impl AdminOrderService {
    pub fn new(lifecycle: Arc<OrderLifecycle>, store: Arc<dyn OrderStore>) -> Self {
        Self { lifecycle, store }
    }

    /// Ships a paid, not-yet-shipped order.
    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    pub async fn ship_order(&self, request: ShipOrderRequest) -> Result<OrderModel, ServiceError> {
        request.validate()?;
        self.lifecycle
            .mark_shipped(request.order_id, &request.carrier, &request.tracking_no)
            .await
    }

    /// Approves or denies a pending refund application.
    #[instrument(skip(self, request), fields(order_id = %request.order_id, agree = request.agree))]
    pub async fn handle_refund(
        &self,
        request: HandleRefundRequest,
    ) -> Result<OrderModel, ServiceError> {
        self.lifecycle
            .decide_refund(request.order_id, request.agree, request.reason)
            .await
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        self.store
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    /// Looks an order up by its external order number, as entered in the
    /// admin search box.
    #[instrument(skip(self))]
    pub async fn find_order_by_no(&self, order_no: &str) -> Result<OrderModel, ServiceError> {
        self.store
            .find_by_order_no(order_no)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_no)))
    }

    /// Paid orders, most recently paid first. Backs the admin order grid;
    /// unpaid orders are never shown there.
    #[instrument(skip(self))]
    pub async fn list_paid_orders(
        &self,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        self.store.list_paid(page, limit).await
    }
}
