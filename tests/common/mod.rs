//! Test doubles: an in-memory order store with the same conditional-update
//! semantics as the sea-orm repository, and a scripted payment gateway.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal_macros::dec;
use uuid::Uuid;

use shopfront_core::entities::order::{
    Model as OrderModel, OrderExtra, RefundStatus, ShipData, ShipStatus,
};
use shopfront_core::errors::ServiceError;
use shopfront_core::gateways::{
    GatewayError, PaymentGateway, PaymentMethod, RefundOutcome, RefundRequest,
};
use shopfront_core::repositories::OrderStore;

pub fn paid_order(payment_method: Option<&str>) -> OrderModel {
    OrderModel {
        id: Uuid::new_v4(),
        order_no: format!("ORD-{}", Uuid::new_v4().simple()),
        user_id: Uuid::new_v4(),
        total_amount: dec!(199.00),
        payment_method: payment_method.map(str::to_string),
        paid_at: Some(Utc::now()),
        ship_status: ShipStatus::Pending,
        ship_data: None,
        refund_status: RefundStatus::None,
        refund_no: None,
        extra: OrderExtra::default(),
        created_at: Utc::now(),
        updated_at: None,
        version: 1,
    }
}

pub fn unpaid_order() -> OrderModel {
    OrderModel {
        paid_at: None,
        ..paid_order(None)
    }
}

#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: Mutex<HashMap<Uuid, OrderModel>>,
    refund_seq: AtomicU64,
}

impl InMemoryOrderStore {
    pub fn with_orders(orders: impl IntoIterator<Item = OrderModel>) -> Self {
        let store = Self::default();
        {
            let mut map = store.orders.lock().unwrap();
            for order in orders {
                map.insert(order.id, order);
            }
        }
        store
    }

    pub fn get(&self, id: Uuid) -> OrderModel {
        self.orders.lock().unwrap().get(&id).cloned().expect("order exists")
    }

    /// Applies `mutate` to the order iff `check` passes, in one critical
    /// section; mirrors the repository's conditional UPDATE contract.
    fn conditional_update(
        &self,
        id: Uuid,
        check: impl Fn(&OrderModel) -> bool,
        mutate: impl FnOnce(&mut OrderModel),
    ) -> u64 {
        let mut orders = self.orders.lock().unwrap();
        match orders.get_mut(&id) {
            Some(order) if check(order) => {
                mutate(order);
                order.updated_at = Some(Utc::now());
                order.version += 1;
                1
            }
            _ => 0,
        }
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<OrderModel>, ServiceError> {
        Ok(self.orders.lock().unwrap().get(&id).cloned())
    }

    async fn find_by_order_no(&self, order_no: &str) -> Result<Option<OrderModel>, ServiceError> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .values()
            .find(|o| o.order_no == order_no)
            .cloned())
    }

    async fn list_paid(
        &self,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        let mut paid: Vec<OrderModel> = self
            .orders
            .lock()
            .unwrap()
            .values()
            .filter(|o| o.paid_at.is_some())
            .cloned()
            .collect();
        paid.sort_by(|a, b| b.paid_at.cmp(&a.paid_at));
        let total = paid.len() as u64;
        let start = ((page.max(1) - 1) * limit) as usize;
        let page_items = paid.into_iter().skip(start).take(limit as usize).collect();
        Ok((page_items, total))
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        let mut owned: Vec<OrderModel> = self
            .orders
            .lock()
            .unwrap()
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = owned.len() as u64;
        let start = ((page.max(1) - 1) * limit) as usize;
        let page_items = owned.into_iter().skip(start).take(limit as usize).collect();
        Ok((page_items, total))
    }

    async fn set_paid(
        &self,
        id: Uuid,
        payment_method: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        Ok(self.conditional_update(
            id,
            |o| o.paid_at.is_none(),
            |o| {
                o.payment_method = Some(payment_method.to_string());
                o.paid_at = Some(paid_at);
            },
        ))
    }

    async fn set_shipped(&self, id: Uuid, ship_data: ShipData) -> Result<u64, ServiceError> {
        Ok(self.conditional_update(
            id,
            |o| o.ship_status == ShipStatus::Pending && o.paid_at.is_some(),
            |o| {
                o.ship_status = ShipStatus::Delivered;
                o.ship_data = Some(ship_data);
            },
        ))
    }

    async fn set_received(&self, id: Uuid) -> Result<u64, ServiceError> {
        Ok(self.conditional_update(
            id,
            |o| o.ship_status == ShipStatus::Delivered,
            |o| o.ship_status = ShipStatus::Received,
        ))
    }

    async fn set_refund_applied(
        &self,
        id: Uuid,
        from: &[RefundStatus],
    ) -> Result<u64, ServiceError> {
        Ok(self.conditional_update(
            id,
            |o| from.contains(&o.refund_status) && o.paid_at.is_some(),
            |o| o.refund_status = RefundStatus::Applied,
        ))
    }

    async fn set_refund_denied(&self, id: Uuid, extra: OrderExtra) -> Result<u64, ServiceError> {
        Ok(self.conditional_update(
            id,
            |o| o.refund_status == RefundStatus::Applied,
            |o| {
                o.refund_status = RefundStatus::DeniedPendingReview;
                o.extra = extra;
            },
        ))
    }

    async fn record_refund_outcome(
        &self,
        id: Uuid,
        refund_no: &str,
        status: RefundStatus,
        extra: OrderExtra,
    ) -> Result<u64, ServiceError> {
        Ok(self.conditional_update(
            id,
            |o| o.refund_status == RefundStatus::Applied,
            |o| {
                o.refund_no = Some(refund_no.to_string());
                o.refund_status = status;
                o.extra = extra;
            },
        ))
    }

    async fn generate_refund_no(&self) -> Result<String, ServiceError> {
        let n = self.refund_seq.fetch_add(1, Ordering::SeqCst);
        Ok(format!("RF-TEST-{:06}", n))
    }
}

/// Gateway double returning scripted outcomes in order; defaults to
/// `Completed` when the script runs out. Records every request it sees.
pub struct StubGateway {
    method: PaymentMethod,
    outcomes: Mutex<VecDeque<Result<RefundOutcome, GatewayError>>>,
    pub requests: Mutex<Vec<RefundRequest>>,
    pub calls: AtomicUsize,
}

impl StubGateway {
    pub fn new(method: PaymentMethod) -> Self {
        Self {
            method,
            outcomes: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn script(self, outcome: Result<RefundOutcome, GatewayError>) -> Self {
        self.outcomes.lock().unwrap().push_back(outcome);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn recorded_refund_nos(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.out_request_no.clone())
            .collect()
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    fn method(&self) -> PaymentMethod {
        self.method
    }

    async fn refund(&self, request: &RefundRequest) -> Result<RefundOutcome, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(RefundOutcome::Completed))
    }
}
