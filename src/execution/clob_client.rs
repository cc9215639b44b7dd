use crate::execution::clob_auth::{ApiCredentials, ClobAuth};
use crate::execution::order_builder::SignedOrder;
use crate::execution::ExecutionError;
use crate::models::order::OrderType;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// REST client for order placement and cancellation on the CLOB.
pub struct ClobClient {
    host: String,
    http: reqwest::Client,
    auth: ClobAuth,
}

#[derive(Debug, Serialize)]
struct PostOrderRequest<'a> {
    order: &'a SignedOrder,
    #[serde(rename = "orderType")]
    order_type: &'static str,
    owner: &'a str,
    #[serde(rename = "postOnly", skip_serializing_if = "std::ops::Not::not")]
    post_only: bool,
}

#[derive(Debug, Default, Deserialize)]
struct PostOrderResponse {
    success: Option<bool>,
    #[serde(rename = "orderID")]
    order_id: Option<String>,
    #[serde(rename = "errorMsg")]
    error_msg: Option<String>,
    /// Rejections use `error` rather than `errorMsg`.
    error: Option<String>,
}

impl ClobClient {
    pub fn new(host: impl Into<String>, auth: ClobAuth) -> Self {
        let http = reqwest::Client::builder()
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            host: host.into(),
            http,
            auth,
        }
    }

    /// Use configured L2 credentials, or create/derive them.
    pub async fn init_auth(&mut self, creds: Option<ApiCredentials>) -> Result<(), ExecutionError> {
        match creds {
            Some(creds) => {
                self.auth.set_credentials(creds);
                info!("L2 auth from configured API key");
            }
            None => {
                self.auth.derive_api_key(&self.http, &self.host).await?;
                info!("L2 auth initialized");
            }
        }
        Ok(())
    }

    fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &str,
    ) -> Result<reqwest::RequestBuilder, ExecutionError> {
        let headers = self.auth.l2_headers(method.as_str(), path, body)?;
        let url = format!("{}{}", self.host, path);
        Ok(headers.apply(self.http.request(method, url)))
    }

    /// Submit one signed order. Returns the exchange order id.
    pub async fn post_order(
        &self,
        signed: &SignedOrder,
        order_type: OrderType,
        post_only: bool,
    ) -> Result<String, ExecutionError> {
        let owner = self
            .auth
            .api_key()
            .ok_or_else(|| ExecutionError::Auth("API credentials not set".into()))?;
        let body = serde_json::to_string(&PostOrderRequest {
            order: signed,
            order_type: order_type.as_str(),
            owner,
            post_only,
        })?;

        let resp = self
            .request(reqwest::Method::POST, "/order", &body)?
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;

        let order_id = parse_post_response(status, &text)?;
        info!("Order submitted: id={order_id}");
        Ok(order_id)
    }

    pub async fn cancel_order(&self, order_id: &str) -> Result<(), ExecutionError> {
        let body = serde_json::json!({ "orderID": order_id }).to_string();
        let resp = self
            .request(reqwest::Method::DELETE, "/order", &body)?
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            debug!("Cancelled order {order_id}");
            Ok(())
        } else {
            let text = resp.text().await.unwrap_or_default();
            warn!("Cancel {order_id} failed: HTTP {status}");
            Err(ExecutionError::Rejected(format!("cancel HTTP {status}: {text}")))
        }
    }
}

fn parse_post_response(status: reqwest::StatusCode, text: &str) -> Result<String, ExecutionError> {
    let body: PostOrderResponse = serde_json::from_str(text).unwrap_or_default();

    match (body.success.unwrap_or(false), body.order_id) {
        (true, Some(id)) if !id.is_empty() => Ok(id),
        _ => {
            let reason = body
                .error
                .or(body.error_msg)
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| format!("HTTP {status}: {text}"));
            Err(ExecutionError::Rejected(reason))
        }
    }
}
