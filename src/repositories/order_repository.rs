use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::order::{
    Column, Entity as Order, Model as OrderModel, OrderExtra, RefundStatus, ShipData, ShipStatus,
};
use crate::errors::ServiceError;
use crate::repositories::{BaseRepository, Repository};

const MAX_REFUND_NO_ATTEMPTS: usize = 5;

/// Persistence contract for order aggregates.
///
/// Every state transition is a conditional atomic update: the expected
/// current state is part of the WHERE clause and the returned row count
/// tells the caller whether the transition actually happened. That makes
/// check-then-act races lose at the database even when a writer bypasses
/// the per-order lock.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<OrderModel>, ServiceError>;

    async fn find_by_order_no(&self, order_no: &str) -> Result<Option<OrderModel>, ServiceError>;

    /// Paid orders, most recently paid first. Backs the admin order grid.
    async fn list_paid(
        &self,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError>;

    async fn list_for_user(
        &self,
        user_id: Uuid,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError>;

    /// Unpaid -> paid, recording the provider and payment time. Backs the
    /// payment-notification hook; a second notification for the same order
    /// matches zero rows.
    async fn set_paid(
        &self,
        id: Uuid,
        payment_method: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<u64, ServiceError>;

    /// Pending -> Delivered, recording carrier and tracking number.
    async fn set_shipped(&self, id: Uuid, ship_data: ShipData) -> Result<u64, ServiceError>;

    /// Delivered -> Received.
    async fn set_received(&self, id: Uuid) -> Result<u64, ServiceError>;

    /// {from} -> Applied.
    async fn set_refund_applied(
        &self,
        id: Uuid,
        from: &[RefundStatus],
    ) -> Result<u64, ServiceError>;

    /// Applied -> DeniedPendingReview, writing the merged `extra` in the
    /// same update.
    async fn set_refund_denied(&self, id: Uuid, extra: OrderExtra) -> Result<u64, ServiceError>;

    /// Applied -> Success/Failed. `refund_no`, `refund_status` and `extra`
    /// land in one update so no reader ever sees a half-written outcome.
    async fn record_refund_outcome(
        &self,
        id: Uuid,
        refund_no: &str,
        status: RefundStatus,
        extra: OrderExtra,
    ) -> Result<u64, ServiceError>;

    /// Mints a refund number unique across concurrent callers.
    async fn generate_refund_no(&self) -> Result<String, ServiceError>;
}

/// sea-orm implementation of [`OrderStore`].
#[derive(Debug)]
pub struct OrderRepository {
    base: BaseRepository,
}

impl OrderRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    fn db(&self) -> &DatabaseConnection {
        self.base.get_db()
    }
}

/// Time-prefixed random token; uniqueness is enforced by the probe loop in
/// `generate_refund_no`.
pub fn candidate_refund_no() -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("RF{}{:06}", Utc::now().format("%Y%m%d%H%M%S"), suffix)
}

#[async_trait]
impl OrderStore for OrderRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<OrderModel>, ServiceError> {
        Order::find_by_id(id)
            .one(self.db())
            .await
            .map_err(ServiceError::db_error)
    }

    async fn find_by_order_no(&self, order_no: &str) -> Result<Option<OrderModel>, ServiceError> {
        Order::find()
            .filter(Column::OrderNo.eq(order_no))
            .one(self.db())
            .await
            .map_err(ServiceError::db_error)
    }

    async fn list_paid(
        &self,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        let paginator = Order::find()
            .filter(Column::PaidAt.is_not_null())
            .order_by_desc(Column::PaidAt)
            .paginate(self.db(), limit);

        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let orders = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::db_error)?;

        Ok((orders, total))
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        let paginator = Order::find()
            .filter(Column::UserId.eq(user_id))
            .order_by_desc(Column::CreatedAt)
            .paginate(self.db(), limit);

        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let orders = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::db_error)?;

        Ok((orders, total))
    }

    async fn set_paid(
        &self,
        id: Uuid,
        payment_method: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        let result = Order::update_many()
            .col_expr(Column::PaymentMethod, Expr::value(payment_method))
            .col_expr(Column::PaidAt, Expr::value(paid_at))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .col_expr(Column::Version, Expr::col(Column::Version).add(1))
            .filter(Column::Id.eq(id))
            .filter(Column::PaidAt.is_null())
            .exec(self.db())
            .await
            .map_err(ServiceError::db_error)?;

        Ok(result.rows_affected)
    }

    async fn set_shipped(&self, id: Uuid, ship_data: ShipData) -> Result<u64, ServiceError> {
        let result = Order::update_many()
            .col_expr(Column::ShipStatus, Expr::value(ShipStatus::Delivered))
            .col_expr(Column::ShipData, Expr::value(ship_data))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .col_expr(Column::Version, Expr::col(Column::Version).add(1))
            .filter(Column::Id.eq(id))
            .filter(Column::ShipStatus.eq(ShipStatus::Pending))
            .filter(Column::PaidAt.is_not_null())
            .exec(self.db())
            .await
            .map_err(ServiceError::db_error)?;

        Ok(result.rows_affected)
    }

    async fn set_received(&self, id: Uuid) -> Result<u64, ServiceError> {
        let result = Order::update_many()
            .col_expr(Column::ShipStatus, Expr::value(ShipStatus::Received))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .col_expr(Column::Version, Expr::col(Column::Version).add(1))
            .filter(Column::Id.eq(id))
            .filter(Column::ShipStatus.eq(ShipStatus::Delivered))
            .exec(self.db())
            .await
            .map_err(ServiceError::db_error)?;

        Ok(result.rows_affected)
    }

    async fn set_refund_applied(
        &self,
        id: Uuid,
        from: &[RefundStatus],
    ) -> Result<u64, ServiceError> {
        let result = Order::update_many()
            .col_expr(Column::RefundStatus, Expr::value(RefundStatus::Applied))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .col_expr(Column::Version, Expr::col(Column::Version).add(1))
            .filter(Column::Id.eq(id))
            .filter(Column::RefundStatus.is_in(from.iter().copied()))
            .filter(Column::PaidAt.is_not_null())
            .exec(self.db())
            .await
            .map_err(ServiceError::db_error)?;

        Ok(result.rows_affected)
    }

    async fn set_refund_denied(&self, id: Uuid, extra: OrderExtra) -> Result<u64, ServiceError> {
        let result = Order::update_many()
            .col_expr(
                Column::RefundStatus,
                Expr::value(RefundStatus::DeniedPendingReview),
            )
            .col_expr(Column::Extra, Expr::value(extra))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .col_expr(Column::Version, Expr::col(Column::Version).add(1))
            .filter(Column::Id.eq(id))
            .filter(Column::RefundStatus.eq(RefundStatus::Applied))
            .exec(self.db())
            .await
            .map_err(ServiceError::db_error)?;

        Ok(result.rows_affected)
    }

    async fn record_refund_outcome(
        &self,
        id: Uuid,
        refund_no: &str,
        status: RefundStatus,
        extra: OrderExtra,
    ) -> Result<u64, ServiceError> {
        let result = Order::update_many()
            .col_expr(Column::RefundNo, Expr::value(refund_no))
            .col_expr(Column::RefundStatus, Expr::value(status))
            .col_expr(Column::Extra, Expr::value(extra))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .col_expr(Column::Version, Expr::col(Column::Version).add(1))
            .filter(Column::Id.eq(id))
            .filter(Column::RefundStatus.eq(RefundStatus::Applied))
            .exec(self.db())
            .await
            .map_err(ServiceError::db_error)?;

        Ok(result.rows_affected)
    }

    async fn generate_refund_no(&self) -> Result<String, ServiceError> {
        for _ in 0..MAX_REFUND_NO_ATTEMPTS {
            let candidate = candidate_refund_no();
            let in_use = Order::find()
                .filter(Column::RefundNo.eq(candidate.clone()))
                .count(self.db())
                .await
                .map_err(ServiceError::db_error)?;
            if in_use == 0 {
                return Ok(candidate);
            }
        }
        Err(ServiceError::InternalError(
            "could not mint a unique refund number".to_string(),
        ))
    }
}
