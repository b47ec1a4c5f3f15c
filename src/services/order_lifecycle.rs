use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use lazy_static::lazy_static;
use prometheus::IntCounter;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::entities::order::{Model as OrderModel, OrderExtra, RefundStatus, ShipData, ShipStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::gateways::{GatewayRegistry, RefundOutcome, RefundRequest};
use crate::repositories::OrderStore;

lazy_static! {
    static ref ORDERS_PAID: IntCounter =
        IntCounter::new("orders_paid_total", "Total number of orders marked paid")
            .expect("metric can be created");
    static ref ORDERS_SHIPPED: IntCounter =
        IntCounter::new("orders_shipped_total", "Total number of orders shipped")
            .expect("metric can be created");
    static ref REFUNDS_SUCCEEDED: IntCounter = IntCounter::new(
        "refunds_succeeded_total",
        "Total number of refunds completed by a gateway"
    )
    .expect("metric can be created");
    static ref REFUNDS_REJECTED: IntCounter = IntCounter::new(
        "refunds_rejected_total",
        "Total number of refunds rejected by a gateway"
    )
    .expect("metric can be created");
}

/// State machine and refund orchestration for order aggregates.
///
/// Every mutating operation serializes per order: the whole
/// check-then-act(-then-persist) sequence, gateway call included, runs under
/// that order's lock. Unrelated orders are never blocked. The repository's
/// conditional updates back the lock up at the database level.
pub struct OrderLifecycle {
    store: Arc<dyn OrderStore>,
    gateways: Arc<GatewayRegistry>,
    event_sender: Option<Arc<EventSender>>,
    order_locks: DashMap<Uuid, Arc<AsyncMutex<()>>>,
}

impl OrderLifecycle {
    pub fn new(
        store: Arc<dyn OrderStore>,
        gateways: Arc<GatewayRegistry>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            store,
            gateways,
            event_sender,
            order_locks: DashMap::new(),
        }
    }

    /// Records a provider payment notification: sets the payment method and
    /// time on a not-yet-paid order. The hook a payment-notification handler
    /// calls after verifying the provider's signature.
    ///
    /// A duplicate notification is rejected; providers redeliver, and the
    /// first write wins.
    #[instrument(skip(self), fields(order_id = %order_id, payment_method))]
    pub async fn mark_paid(
        &self,
        order_id: Uuid,
        payment_method: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<OrderModel, ServiceError> {
        let lock = self.acquire_order_lock(order_id);
        let guard = lock.lock().await;

        let result = async {
            let order = self.load(order_id).await?;
            if order.paid_at.is_some() {
                return Err(ServiceError::InvalidOperation(format!(
                    "order {} has already been paid",
                    order_id
                )));
            }

            let rows = self.store.set_paid(order_id, payment_method, paid_at).await?;
            if rows == 0 {
                return Err(ServiceError::ConcurrentModification(order_id));
            }

            ORDERS_PAID.inc();
            self.emit(Event::OrderPaid { order_id }).await;
            info!(payment_method, "order payment recorded");
            self.load(order_id).await
        }
        .await;

        drop(guard);
        self.release_order_lock(order_id, lock);
        result
    }

    /// Records carrier and tracking number and moves the order to Delivered.
    ///
    /// Preconditions: the order is paid and still Pending.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn mark_shipped(
        &self,
        order_id: Uuid,
        carrier: &str,
        tracking_no: &str,
    ) -> Result<OrderModel, ServiceError> {
        let lock = self.acquire_order_lock(order_id);
        let guard = lock.lock().await;

        let result = async {
            let order = self.load(order_id).await?;
            if order.paid_at.is_none() {
                return Err(ServiceError::OrderNotPaid(order_id));
            }
            if order.ship_status != ShipStatus::Pending {
                return Err(ServiceError::AlreadyShipped(order_id));
            }

            let ship_data = ShipData {
                carrier: carrier.to_string(),
                tracking_no: tracking_no.to_string(),
            };
            let rows = self.store.set_shipped(order_id, ship_data).await?;
            if rows == 0 {
                return Err(ServiceError::ConcurrentModification(order_id));
            }

            ORDERS_SHIPPED.inc();
            self.emit(Event::OrderShipped { order_id }).await;
            info!(carrier, tracking_no, "order shipped");
            self.load(order_id).await
        }
        .await;

        drop(guard);
        self.release_order_lock(order_id, lock);
        result
    }

    /// Customer confirmation of receipt: Delivered -> Received (terminal).
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn confirm_received(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        let lock = self.acquire_order_lock(order_id);
        let guard = lock.lock().await;

        let result = async {
            let order = self.load(order_id).await?;
            match order.ship_status {
                ShipStatus::Pending => {
                    return Err(ServiceError::InvalidOperation(format!(
                        "order {} has not been shipped yet",
                        order_id
                    )))
                }
                ShipStatus::Received => {
                    return Err(ServiceError::InvalidOperation(format!(
                        "order {} receipt has already been confirmed",
                        order_id
                    )))
                }
                ShipStatus::Delivered => {}
            }

            let rows = self.store.set_received(order_id).await?;
            if rows == 0 {
                return Err(ServiceError::ConcurrentModification(order_id));
            }

            self.emit(Event::OrderReceived { order_id }).await;
            info!("order receipt confirmed");
            self.load(order_id).await
        }
        .await;

        drop(guard);
        self.release_order_lock(order_id, lock);
        result
    }

    /// Customer applies (or re-applies) for a refund.
    ///
    /// Allowed from None, DeniedPendingReview and Failed; a failed gateway
    /// attempt is retried by applying again, which moves the order back to
    /// Applied for a fresh decision.
    #[instrument(skip(self, reason), fields(order_id = %order_id))]
    pub async fn apply_refund(
        &self,
        order_id: Uuid,
        reason: Option<String>,
    ) -> Result<OrderModel, ServiceError> {
        const APPLY_FROM: &[RefundStatus] = &[
            RefundStatus::None,
            RefundStatus::DeniedPendingReview,
            RefundStatus::Failed,
        ];

        let lock = self.acquire_order_lock(order_id);
        let guard = lock.lock().await;

        let result = async {
            let order = self.load(order_id).await?;
            if order.paid_at.is_none() {
                return Err(ServiceError::OrderNotPaid(order_id));
            }
            if !order.refund_status.can_apply() {
                return Err(ServiceError::InvalidRefundState(order_id));
            }

            let rows = self.store.set_refund_applied(order_id, APPLY_FROM).await?;
            if rows == 0 {
                return Err(ServiceError::ConcurrentModification(order_id));
            }

            self.emit(Event::RefundRequested { order_id, reason }).await;
            info!("refund application recorded");
            self.load(order_id).await
        }
        .await;

        drop(guard);
        self.release_order_lock(order_id, lock);
        result
    }

    /// Operator decision on a refund application.
    ///
    /// Denial records the reason and parks the order in DeniedPendingReview;
    /// approval executes the refund against the payment gateway.
    #[instrument(skip(self, reason), fields(order_id = %order_id, agree))]
    pub async fn decide_refund(
        &self,
        order_id: Uuid,
        agree: bool,
        reason: Option<String>,
    ) -> Result<OrderModel, ServiceError> {
        let lock = self.acquire_order_lock(order_id);
        let guard = lock.lock().await;

        let result = async {
            let order = self.load(order_id).await?;
            if order.refund_status != RefundStatus::Applied {
                return Err(ServiceError::InvalidRefundState(order_id));
            }

            if agree {
                self.execute_refund_locked(order).await
            } else {
                let reason = reason.filter(|r| !r.trim().is_empty()).ok_or_else(|| {
                    ServiceError::ValidationError(
                        "a reason is required when denying a refund".to_string(),
                    )
                })?;

                let extra = OrderExtra {
                    refund_disagree_reason: Some(reason.clone()),
                    ..order.extra
                };
                let rows = self.store.set_refund_denied(order_id, extra).await?;
                if rows == 0 {
                    return Err(ServiceError::ConcurrentModification(order_id));
                }

                self.emit(Event::RefundDenied { order_id, reason }).await;
                info!("refund denied");
                self.load(order_id).await
            }
        }
        .await;

        drop(guard);
        self.release_order_lock(order_id, lock);
        result
    }

    /// Executes a refund for an order currently in Applied.
    ///
    /// Public entry point for callers that hold no lock; `decide_refund`
    /// reaches the same orchestration through `execute_refund_locked`.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn execute_refund(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        let lock = self.acquire_order_lock(order_id);
        let guard = lock.lock().await;

        let result = async {
            let order = self.load(order_id).await?;
            if order.refund_status != RefundStatus::Applied {
                return Err(ServiceError::InvalidRefundState(order_id));
            }
            self.execute_refund_locked(order).await
        }
        .await;

        drop(guard);
        self.release_order_lock(order_id, lock);
        result
    }

    /// Refund orchestration. Caller must hold the order's lock and have
    /// verified `refund_status == Applied`.
    ///
    /// A provider rejection is persisted as Failed together with the minted
    /// refund number and the provider code, in a single update. A hard
    /// gateway failure is propagated unchanged with no state written: the
    /// refund may have gone through on the provider side, so resolving it
    /// locally would lie about an unknown outcome.
    async fn execute_refund_locked(&self, order: OrderModel) -> Result<OrderModel, ServiceError> {
        let order_id = order.id;
        let gateway = self.gateways.for_method(order.payment_method.as_deref())
            .map_err(|e| {
                error!(payment_method = ?order.payment_method, "no gateway adapter for order");
                e
            })?;

        // Fresh idempotency key per attempt; never reused across attempts.
        let refund_no = self.store.generate_refund_no().await?;
        let request = RefundRequest {
            out_trade_no: order.order_no.clone(),
            refund_amount: order.total_amount,
            out_request_no: refund_no.clone(),
        };

        match gateway.refund(&request).await {
            Ok(RefundOutcome::Completed) => {
                let rows = self
                    .store
                    .record_refund_outcome(
                        order_id,
                        &refund_no,
                        RefundStatus::Success,
                        order.extra.clone(),
                    )
                    .await?;
                if rows == 0 {
                    return Err(ServiceError::ConcurrentModification(order_id));
                }

                REFUNDS_SUCCEEDED.inc();
                self.emit(Event::RefundSucceeded {
                    order_id,
                    refund_no: refund_no.clone(),
                })
                .await;
                info!(refund_no, "refund completed");
                self.load(order_id).await
            }
            Ok(RefundOutcome::Rejected { code }) => {
                let extra = OrderExtra {
                    refund_failed_code: Some(code.clone()),
                    ..order.extra
                };
                let rows = self
                    .store
                    .record_refund_outcome(order_id, &refund_no, RefundStatus::Failed, extra)
                    .await?;
                if rows == 0 {
                    return Err(ServiceError::ConcurrentModification(order_id));
                }

                REFUNDS_REJECTED.inc();
                self.emit(Event::RefundFailed {
                    order_id,
                    refund_no: refund_no.clone(),
                    code: code.clone(),
                })
                .await;
                warn!(refund_no, code, "refund rejected by gateway");
                self.load(order_id).await
            }
            Err(gateway_err) => {
                warn!(
                    refund_no,
                    error = %gateway_err,
                    "gateway call failed, refund outcome unknown; no state written"
                );
                Err(ServiceError::GatewayUnavailable(gateway_err))
            }
        }
    }

    async fn load(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        self.store
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(event).await {
                warn!(error = %e, "failed to publish domain event");
            }
        }
    }

    fn acquire_order_lock(&self, order_id: Uuid) -> Arc<AsyncMutex<()>> {
        self.order_locks
            .entry(order_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn release_order_lock(&self, order_id: Uuid, lock: Arc<AsyncMutex<()>>) {
        // Two strong references remain when no other task waits: the map's
        // and ours. Dropping the entry then keeps the map from growing with
        // every order ever touched.
        self.order_locks.remove_if(&order_id, |_, existing| {
            Arc::ptr_eq(existing, &lock) && Arc::strong_count(existing) == 2
        });
    }
}
