pub mod admin_orders;
pub mod customer_orders;
pub mod order_lifecycle;

pub use admin_orders::AdminOrderService;
pub use customer_orders::CustomerOrderService;
pub use order_lifecycle::OrderLifecycle;
