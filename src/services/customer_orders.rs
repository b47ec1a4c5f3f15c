use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

use crate::entities::order::Model as OrderModel;
use crate::errors::ServiceError;
use crate::repositories::OrderStore;
use crate::services::OrderLifecycle;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct ApplyRefundRequest {
    pub order_id: Uuid,
    #[validate(length(min = 1, message = "A reason is required to apply for a refund"))]
    pub reason: String,
}

/// Customer-facing orchestration over [`OrderLifecycle`].
///
/// Reads are ownership-checked: a customer can only see their own orders.
#[derive(Clone)]
pub struct CustomerOrderService {
    lifecycle: Arc<OrderLifecycle>,
    store: Arc<dyn OrderStore>,
}

impl CustomerOrderService {
    pub fn new(lifecycle: Arc<OrderLifecycle>, store: Arc<dyn OrderStore>) -> Self {
        Self { lifecycle, store }
    }

    /// Applies for a refund on a paid order; also the retry path after a
    /// denial or a gateway-rejected attempt.
    #[instrument(skip(self, request), fields(user_id = %user_id, order_id = %request.order_id))]
    pub async fn apply_refund(
        &self,
        user_id: Uuid,
        request: ApplyRefundRequest,
    ) -> Result<OrderModel, ServiceError> {
        request.validate()?;
        self.get_order(user_id, request.order_id).await?;
        self.lifecycle
            .apply_refund(request.order_id, Some(request.reason))
            .await
    }

    /// Confirms receipt of a delivered order.
    #[instrument(skip(self), fields(user_id = %user_id, order_id = %order_id))]
    pub async fn confirm_received(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<OrderModel, ServiceError> {
        self.get_order(user_id, order_id).await?;
        self.lifecycle.confirm_received(order_id).await
    }

    /// Loads an order owned by the given customer. A foreign order reads as
    /// not found rather than revealing its existence.
    #[instrument(skip(self), fields(user_id = %user_id, order_id = %order_id))]
    pub async fn get_order(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<OrderModel, ServiceError> {
        let order = self
            .store
            .find_by_id(order_id)
            .await?
            .filter(|order| order.user_id == user_id);
        order.ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn list_orders(
        &self,
        user_id: Uuid,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        self.store.list_for_user(user_id, page, limit).await
    }
}
