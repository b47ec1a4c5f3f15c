//! Shopfront order core.
//!
//! Order lifecycle state machines (shipment and refund) and refund
//! orchestration against payment gateways, consumed by the storefront and
//! admin HTTP layers. Routing, rendering and authentication live in those
//! outer layers; this crate owns the order-visible semantics.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod gateways;
pub mod repositories;
pub mod services;

use std::sync::Arc;

pub use errors::ServiceError;

/// Builds the service graph from a database pool and gateway registry.
pub fn build_services(
    db: Arc<db::DbPool>,
    gateways: Arc<gateways::GatewayRegistry>,
    event_sender: Option<Arc<events::EventSender>>,
) -> (
    services::AdminOrderService,
    services::CustomerOrderService,
) {
    let store: Arc<dyn repositories::OrderStore> =
        Arc::new(repositories::OrderRepository::new(db));
    let lifecycle = Arc::new(services::OrderLifecycle::new(
        store.clone(),
        gateways,
        event_sender,
    ));
    (
        services::AdminOrderService::new(lifecycle.clone(), store.clone()),
        services::CustomerOrderService::new(lifecycle, store),
    )
}
