//! PayPal orders as driven through the backend `/paypal/*` endpoints. Every
//! purchase first becomes a pending transaction on `/subscription/*`, then an
//! order the buyer approves on paypal.com.

use async_trait::async_trait;
use common::sub::{CreditBundle, PaymentProvider as ProviderKind};
use serde_json::json;
use uuid::Uuid;

use crate::{
    error::Result,
    http::ApiClient,
    models::{Completion, OrderPayload, Redirect, UpgradeStart},
    provider::{Checkout, PaymentProvider},
    subscription::SubscriptionApi,
};

impl From<OrderPayload> for Redirect {
    fn from(payload: OrderPayload) -> Self {
        Redirect {
            transaction_id: payload.transaction_id,
            reference: payload.order_id,
            url: payload.approve_url,
        }
    }
}

#[derive(Clone)]
pub struct PayPalAdapter {
    api: ApiClient,
    subscriptions: SubscriptionApi,
}

impl PayPalAdapter {
    pub fn new(api: ApiClient) -> Self {
        PayPalAdapter {
            subscriptions: SubscriptionApi::new(api.clone()),
            api,
        }
    }

    pub fn subscriptions(&self) -> &SubscriptionApi {
        &self.subscriptions
    }

    pub async fn create_order(&self, transaction_id: Uuid) -> Result<Redirect> {
        let payload: OrderPayload = self
            .api
            .post("/paypal/create-order", &json!({ "transaction_id": transaction_id }))
            .await?;
        Ok(payload.into())
    }

    pub async fn capture_order(&self, order_id: &str) -> Result<Completion> {
        self.api
            .post("/paypal/capture-order", &json!({ "order_id": order_id }))
            .await
    }
}

#[async_trait]
impl PaymentProvider for PayPalAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Paypal
    }

    async fn checkout_plan(&self, plan_id: Uuid) -> Result<Checkout> {
        match self.subscriptions.upgrade(plan_id).await? {
            UpgradeStart::Payment(pending) => {
                Ok(Checkout::Redirect(self.create_order(pending.transaction_id).await?))
            }
            UpgradeStart::Switched { message } => Ok(Checkout::Done { message }),
        }
    }

    async fn checkout_renewal(&self) -> Result<Redirect> {
        let pending = self.subscriptions.renew().await?;
        self.create_order(pending.transaction_id).await
    }

    async fn checkout_credits(&self, bundle: CreditBundle) -> Result<Redirect> {
        let pending = self.subscriptions.buy_credits(bundle).await?;
        self.create_order(pending.transaction_id).await
    }

    async fn confirm(&self, reference: &str) -> Result<Completion> {
        self.capture_order(reference).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::tests::signed_in;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn credit_purchase_creates_pending_transaction_then_order() {
        let server = MockServer::start_async().await;
        let pending = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/subscription/buy-credits")
                    .json_body(json!({ "units": 100 }));
                then.status(200).json_body(json!({
                    "success": true,
                    "transaction_id": "00000000-0000-4000-8000-0000000000ee",
                    "credit_units": 100,
                    "amount": 299,
                    "currency": "usd"
                }));
            })
            .await;
        let order = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/paypal/create-order")
                    .json_body(json!({ "transaction_id": "00000000-0000-4000-8000-0000000000ee" }));
                then.status(200).json_body(json!({
                    "success": true,
                    "transaction_id": "00000000-0000-4000-8000-0000000000ee",
                    "order_id": "5O190127TN364715T",
                    "approve_url": "https://www.sandbox.paypal.com/checkoutnow?token=5O190127TN364715T"
                }));
            })
            .await;

        let adapter = PayPalAdapter::new(signed_in(&server).client().clone());
        let redirect = adapter.checkout_credits(CreditBundle::Small).await.unwrap();

        pending.assert_async().await;
        order.assert_async().await;
        assert_eq!(redirect.reference, "5O190127TN364715T");
        assert_eq!(adapter.kind(), ProviderKind::Paypal);
    }

    #[tokio::test]
    async fn confirm_captures_the_order() {
        let server = MockServer::start_async().await;
        let capture = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/paypal/capture-order")
                    .json_body(json!({ "order_id": "5O190127TN364715T" }));
                then.status(200).json_body(json!({
                    "success": true,
                    "message": "Credits added",
                    "credit_requests": 100
                }));
            })
            .await;

        let adapter = PayPalAdapter::new(signed_in(&server).client().clone());
        let completion = adapter.confirm("5O190127TN364715T").await.unwrap();

        capture.assert_async().await;
        assert_eq!(completion.credit_requests, 100);
    }
}
