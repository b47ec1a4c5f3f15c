use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, instrument};

use crate::config::GatewayConfig;

use super::{GatewayError, PaymentGateway, PaymentMethod, RefundOutcome, RefundRequest};

type HmacSha256 = Hmac<Sha256>;

/// Refund client for Alipay.
///
/// Alipay signals business-level refund failures through a `sub_code` field
/// in an otherwise successful HTTP response; transport-level problems are the
/// only hard failures.
pub struct AlipayGateway {
    http: reqwest::Client,
    config: GatewayConfig,
}

#[derive(Debug, Deserialize)]
struct AlipayRefundResponse {
    code: Option<String>,
    sub_code: Option<String>,
    sub_msg: Option<String>,
}

impl AlipayGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { http, config })
    }

    /// Signs the sorted parameter string with the merchant secret.
    fn sign(&self, params: &BTreeMap<&'static str, String>) -> String {
        let canonical = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        let mut mac = HmacSha256::new_from_slice(self.config.secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(canonical.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

#[async_trait::async_trait]
impl PaymentGateway for AlipayGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Alipay
    }

    #[instrument(skip(self), fields(out_trade_no = %request.out_trade_no, out_request_no = %request.out_request_no))]
    async fn refund(&self, request: &RefundRequest) -> Result<RefundOutcome, GatewayError> {
        let mut params = BTreeMap::new();
        params.insert("app_id", self.config.app_id.clone());
        params.insert("method", "alipay.trade.refund".to_string());
        params.insert("out_trade_no", request.out_trade_no.clone());
        params.insert("refund_amount", request.refund_amount.to_string());
        params.insert("out_request_no", request.out_request_no.clone());
        params.insert("timestamp", Utc::now().format("%Y-%m-%d %H:%M:%S").to_string());
        let sign = self.sign(&params);
        params.insert("sign", sign);

        let response = self
            .http
            .post(&self.config.endpoint)
            .form(&params)
            .send()
            .await
            .map_err(map_reqwest_error)?
            .error_for_status()
            .map_err(map_reqwest_error)?;

        let body: AlipayRefundResponse = response.json().await.map_err(map_reqwest_error)?;
        debug!(code = ?body.code, sub_code = ?body.sub_code, "alipay refund response");

        // Per the provider contract, a sub_code means the refund was
        // processed and rejected; its absence means it completed.
        match body.sub_code {
            Some(code) => Ok(RefundOutcome::Rejected { code }),
            None => match body.code.as_deref() {
                Some("10000") | None => Ok(RefundOutcome::Completed),
                Some(other) => Err(GatewayError::InvalidResponse(format!(
                    "code {} without sub_code: {}",
                    other,
                    body.sub_msg.unwrap_or_default()
                ))),
            },
        }
    }
}

fn map_reqwest_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Transport(err)
    }
}
