use std::time::Duration;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, instrument};

use crate::config::GatewayConfig;

use super::{GatewayError, PaymentGateway, PaymentMethod, RefundOutcome, RefundRequest};

type HmacSha256 = Hmac<Sha256>;

/// Refund client for WeChat Pay.
///
/// WeChat reports business-level rejections with `return_code = "FAIL"` plus
/// an `err_code`; both arrive over a successful HTTP exchange.
pub struct WechatGateway {
    http: reqwest::Client,
    config: GatewayConfig,
}

#[derive(Debug, Serialize)]
struct WechatRefundPayload<'a> {
    appid: &'a str,
    out_trade_no: &'a str,
    out_refund_no: &'a str,
    refund_fee: String,
    sign: String,
}

#[derive(Debug, Deserialize)]
struct WechatRefundResponse {
    return_code: String,
    err_code: Option<String>,
    err_code_des: Option<String>,
}

impl WechatGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { http, config })
    }

    fn sign(&self, out_trade_no: &str, out_refund_no: &str, refund_fee: &str) -> String {
        let canonical = format!(
            "appid={}&out_refund_no={}&out_trade_no={}&refund_fee={}",
            self.config.app_id, out_refund_no, out_trade_no, refund_fee
        );
        let mut mac = HmacSha256::new_from_slice(self.config.secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(canonical.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

#[async_trait::async_trait]
impl PaymentGateway for WechatGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Wechat
    }

    #[instrument(skip(self), fields(out_trade_no = %request.out_trade_no, out_request_no = %request.out_request_no))]
    async fn refund(&self, request: &RefundRequest) -> Result<RefundOutcome, GatewayError> {
        let refund_fee = request.refund_amount.to_string();
        let payload = WechatRefundPayload {
            appid: &self.config.app_id,
            out_trade_no: &request.out_trade_no,
            out_refund_no: &request.out_request_no,
            refund_fee: refund_fee.clone(),
            sign: self.sign(&request.out_trade_no, &request.out_request_no, &refund_fee),
        };

        let response = self
            .http
            .post(&self.config.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(map_reqwest_error)?
            .error_for_status()
            .map_err(map_reqwest_error)?;

        let body: WechatRefundResponse = response.json().await.map_err(map_reqwest_error)?;
        debug!(return_code = %body.return_code, err_code = ?body.err_code, "wechat refund response");

        match body.return_code.as_str() {
            "SUCCESS" => Ok(RefundOutcome::Completed),
            "FAIL" => {
                let code = body.err_code.ok_or_else(|| {
                    GatewayError::InvalidResponse(format!(
                        "FAIL without err_code: {}",
                        body.err_code_des.unwrap_or_default()
                    ))
                })?;
                Ok(RefundOutcome::Rejected { code })
            }
            other => Err(GatewayError::InvalidResponse(format!(
                "unknown return_code {}",
                other
            ))),
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
