use common::{
    env_config::PayPalConfig,
    error::{AppError, Res},
    sub::format_amount,
};
use reqwest::{Client, StatusCode, header};
use serde_json::json;

use crate::dtos::paypal::{AccessToken, Order};

/// Thin client for the PayPal Orders v2 REST API.
pub struct PayPalClient {
    http: Client,
    config: PayPalConfig,
}

pub struct OrderSpec<'a> {
    pub transaction_id: &'a str,
    pub description: &'a str,
    pub amount: i64,
    pub currency: &'a str,
    pub return_url: &'a str,
    pub cancel_url: &'a str,
}

impl PayPalClient {
    pub fn new(config: PayPalConfig) -> Self {
        PayPalClient {
            http: Client::new(),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
    }

    async fn vendor_error(action: &str, response: reqwest::Response) -> AppError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        log::error!("PayPal {} failed with {}: {}", action, status, body);
        AppError::Vendor(format!("PayPal {} failed", action))
    }

    /// Client-credentials grant. Tokens are short lived and fetched per call.
    pub async fn access_token(&self) -> Res<String> {
        if self.config.client_id.is_empty() {
            return Err(AppError::Vendor("PayPal is not configured".to_string()));
        }

        let response = self
            .http
            .post(self.url("/v1/oauth2/token"))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body("grant_type=client_credentials")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::vendor_error("authentication", response).await);
        }
        let token: AccessToken = response.json().await?;
        Ok(token.access_token)
    }

    pub async fn create_order(&self, spec: OrderSpec<'_>) -> Res<Order> {
        let token = self.access_token().await?;
        let body = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": spec.transaction_id,
                "custom_id": spec.transaction_id,
                "description": spec.description,
                "amount": {
                    "currency_code": spec.currency.to_uppercase(),
                    "value": format_amount(spec.amount),
                },
            }],
            "application_context": {
                "return_url": spec.return_url,
                "cancel_url": spec.cancel_url,
                "user_action": "PAY_NOW",
            },
        });

        let response = self
            .http
            .post(self.url("/v2/checkout/orders"))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::vendor_error("order creation", response).await);
        }
        Ok(response.json().await?)
    }

    /// Captures an approved order. Capturing an order twice is reported by
    /// PayPal as 422 `ORDER_ALREADY_CAPTURED`; in that case the order is
    /// fetched and returned as is.
    pub async fn capture_order(&self, order_id: &str) -> Res<Order> {
        let token = self.access_token().await?;
        let response = self
            .http
            .post(self.url(&format!("/v2/checkout/orders/{}/capture", order_id)))
            .bearer_auth(&token)
            .json(&json!({}))
            .send()
            .await?;

        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            log::warn!("PayPal order {} was already captured", order_id);
            return self.get_order(&token, order_id).await;
        }
        if !response.status().is_success() {
            return Err(Self::vendor_error("capture", response).await);
        }
        Ok(response.json().await?)
    }

    async fn get_order(&self, token: &str, order_id: &str) -> Res<Order> {
        let response = self
            .http
            .get(self.url(&format!("/v2/checkout/orders/{}", order_id)))
            .bearer_auth(token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::vendor_error("order lookup", response).await);
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client(server: &MockServer) -> PayPalClient {
        PayPalClient::new(PayPalConfig {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            api_base: server.base_url(),
        })
    }

    async fn mock_token(server: &MockServer) -> httpmock::Mock<'_> {
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/oauth2/token")
                    .body("grant_type=client_credentials");
                then.status(200)
                    .json_body(json!({ "access_token": "A21", "expires_in": 32400 }));
            })
            .await
    }

    #[tokio::test]
    async fn create_order_sends_amount_and_returns_approve_link() {
        let server = MockServer::start_async().await;
        let token = mock_token(&server).await;
        let order = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v2/checkout/orders")
                    .header("authorization", "Bearer A21")
                    .body_contains(r#""custom_id":"tx-1""#)
                    .body_contains(r#""currency_code":"USD""#)
                    .body_contains(r#""value":"5.99""#);
                then.status(201).json_body(json!({
                    "id": "ORDER-1",
                    "status": "PAYER_ACTION_REQUIRED",
                    "links": [
                        { "href": "https://paypal.test/orders/ORDER-1", "rel": "self" },
                        { "href": "https://paypal.test/checkoutnow?token=ORDER-1", "rel": "payer-action" }
                    ]
                }));
            })
            .await;

        let created = client(&server)
            .create_order(OrderSpec {
                transaction_id: "tx-1",
                description: "200 credits",
                amount: 599,
                currency: "usd",
                return_url: "http://localhost:3000/paypal/return",
                cancel_url: "http://localhost:3000/subscription",
            })
            .await
            .unwrap();

        token.assert_async().await;
        order.assert_async().await;
        assert_eq!(created.id, "ORDER-1");
        assert_eq!(
            created.approve_url(),
            Some("https://paypal.test/checkoutnow?token=ORDER-1")
        );
    }

    #[tokio::test]
    async fn capture_reports_completion_and_custom_id() {
        let server = MockServer::start_async().await;
        mock_token(&server).await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v2/checkout/orders/ORDER-1/capture");
                then.status(201).json_body(json!({
                    "id": "ORDER-1",
                    "status": "COMPLETED",
                    "purchase_units": [{
                        "reference_id": "tx-1",
                        "payments": { "captures": [
                            { "id": "CAP-1", "status": "COMPLETED", "custom_id": "tx-1" }
                        ]}
                    }]
                }));
            })
            .await;

        let order = client(&server).capture_order("ORDER-1").await.unwrap();
        assert!(order.is_completed());
        assert_eq!(order.custom_id(), Some("tx-1"));
    }

    #[tokio::test]
    async fn already_captured_order_is_fetched() {
        let server = MockServer::start_async().await;
        mock_token(&server).await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v2/checkout/orders/ORDER-1/capture");
                then.status(422)
                    .json_body(json!({ "name": "UNPROCESSABLE_ENTITY" }));
            })
            .await;
        let lookup = server
            .mock_async(|when, then| {
                when.method(GET).path("/v2/checkout/orders/ORDER-1");
                then.status(200)
                    .json_body(json!({ "id": "ORDER-1", "status": "COMPLETED" }));
            })
            .await;

        let order = client(&server).capture_order("ORDER-1").await.unwrap();
        lookup.assert_async().await;
        assert!(order.is_completed());
    }

    #[tokio::test]
    async fn rejected_credentials_surface_as_vendor_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/oauth2/token");
                then.status(401).json_body(json!({ "error": "invalid_client" }));
            })
            .await;

        let err = client(&server).access_token().await.unwrap_err();
        assert!(matches!(err, AppError::Vendor(_)));
    }

    #[tokio::test]
    async fn unconfigured_client_fails_without_network() {
        let client = PayPalClient::new(PayPalConfig {
            client_id: String::new(),
            client_secret: String::new(),
            api_base: "http://127.0.0.1:9".to_string(),
        });
        assert!(matches!(client.access_token().await, Err(AppError::Vendor(_))));
    }
}
