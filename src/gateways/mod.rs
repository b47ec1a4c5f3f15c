use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::errors::ServiceError;

pub mod alipay;
pub mod wechat;

pub use alipay::AlipayGateway;
pub use wechat::WechatGateway;

/// Payment providers with a registered gateway adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Alipay,
    Wechat,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Alipay => "alipay",
            PaymentMethod::Wechat => "wechat",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "alipay" => Ok(PaymentMethod::Alipay),
            "wechat" => Ok(PaymentMethod::Wechat),
            other => Err(ServiceError::UnsupportedPaymentMethod(other.to_string())),
        }
    }
}

/// Refund payload sent to a provider. `out_request_no` is the idempotency
/// key; a retried call with the same value is not double-processed.
#[derive(Debug, Clone, Serialize)]
pub struct RefundRequest {
    pub out_trade_no: String,
    pub refund_amount: Decimal,
    pub out_request_no: String,
}

/// Outcome of a refund call that reached the provider.
///
/// `Rejected` is a business-level refusal (a "soft failure") that the caller
/// records on the order; it is a normal outcome, not an error path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefundOutcome {
    Completed,
    Rejected { code: String },
}

/// Hard failures: the request may or may not have reached the provider, so
/// the refund outcome is unknown. Callers must not resolve these to a
/// persisted refund state.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("gateway call timed out")]
    Timeout,

    #[error("unexpected gateway response: {0}")]
    InvalidResponse(String),
}

/// Contract consumed by `OrderLifecycle`. One implementation per provider;
/// adding a provider means adding an adapter, not editing the state machine.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn method(&self) -> PaymentMethod;

    async fn refund(&self, request: &RefundRequest) -> Result<RefundOutcome, GatewayError>;
}

impl fmt::Debug for dyn PaymentGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PaymentGateway({})", self.method())
    }
}

/// Adapter lookup keyed by the order's recorded payment method.
#[derive(Default)]
pub struct GatewayRegistry {
    gateways: HashMap<PaymentMethod, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateways.insert(gateway.method(), gateway);
        self
    }

    /// Resolves the adapter for an order's payment method.
    ///
    /// A missing or unrecognized method is an invariant violation: the order
    /// was paid through a provider this deployment has no adapter for.
    pub fn for_method(
        &self,
        payment_method: Option<&str>,
    ) -> Result<Arc<dyn PaymentGateway>, ServiceError> {
        let raw = payment_method.ok_or_else(|| {
            ServiceError::UnsupportedPaymentMethod("<unset>".to_string())
        })?;
        let method = raw.parse::<PaymentMethod>()?;
        self.gateways
            .get(&method)
            .cloned()
            .ok_or_else(|| ServiceError::UnsupportedPaymentMethod(raw.to_string()))
    }
}
