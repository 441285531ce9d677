//! Stripe checkout as driven through the backend `/stripe/*` endpoints.

use async_trait::async_trait;
use common::sub::{CreditBundle, PaymentProvider as ProviderKind};
use serde_json::json;
use url::form_urlencoded;
use uuid::Uuid;

use crate::{
    error::Result,
    http::ApiClient,
    models::{
        CheckoutPayload, Completion, PaymentMethodUpdate, PublicKeyPayload, Redirect, SetupSession,
        UpgradeStart,
    },
    provider::{Checkout, PaymentProvider},
    subscription::SubscriptionApi,
};

impl From<CheckoutPayload> for Redirect {
    fn from(payload: CheckoutPayload) -> Self {
        Redirect {
            transaction_id: payload.transaction_id,
            reference: payload.session_id,
            url: payload.checkout_url,
        }
    }
}

#[derive(Clone)]
pub struct StripeAdapter {
    api: ApiClient,
    subscriptions: SubscriptionApi,
}

impl StripeAdapter {
    pub fn new(api: ApiClient) -> Self {
        StripeAdapter {
            subscriptions: SubscriptionApi::new(api.clone()),
            api,
        }
    }

    pub fn subscriptions(&self) -> &SubscriptionApi {
        &self.subscriptions
    }

    pub async fn public_key(&self) -> Result<String> {
        let payload: PublicKeyPayload = self.api.get("/stripe/public-key").await?;
        Ok(payload.public_key)
    }

    /// Opens a checkout session for a pending transaction.
    pub async fn create_checkout(&self, transaction_id: Uuid) -> Result<Redirect> {
        let payload: CheckoutPayload = self
            .api
            .post("/stripe/create-checkout", &json!({ "transaction_id": transaction_id }))
            .await?;
        Ok(payload.into())
    }

    /// Confirms the session Stripe redirected back with.
    pub async fn verify_checkout(&self, session_id: &str) -> Result<Completion> {
        let session_id: String = form_urlencoded::byte_serialize(session_id.as_bytes()).collect();
        self.api
            .get(&format!("/stripe/success?session_id={}", session_id))
            .await
    }

    pub async fn create_setup_intent(&self) -> Result<SetupSession> {
        self.api.post("/stripe/create-setup-intent", &json!({})).await
    }

    /// Saves the card from a completed setup intent. A past due
    /// subscription is charged with it right away; see
    /// [`PaymentMethodUpdate::recovery`].
    pub async fn verify_setup_intent(&self, setup_intent_id: &str) -> Result<PaymentMethodUpdate> {
        self.api
            .post(
                "/stripe/verify-setup-intent",
                &json!({ "setup_intent_id": setup_intent_id }),
            )
            .await
    }

    pub async fn create_credit_checkout(&self, bundle: CreditBundle) -> Result<Redirect> {
        let payload: CheckoutPayload = self
            .api
            .post(
                "/stripe/create-buy-credit-checkout",
                &json!({ "units": bundle.units() }),
            )
            .await?;
        Ok(payload.into())
    }
}

#[async_trait]
impl PaymentProvider for StripeAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Stripe
    }

    async fn checkout_plan(&self, plan_id: Uuid) -> Result<Checkout> {
        match self.subscriptions.upgrade(plan_id).await? {
            UpgradeStart::Payment(pending) => {
                Ok(Checkout::Redirect(self.create_checkout(pending.transaction_id).await?))
            }
            UpgradeStart::Switched { message } => Ok(Checkout::Done { message }),
        }
    }

    async fn checkout_renewal(&self) -> Result<Redirect> {
        let pending = self.subscriptions.renew().await?;
        self.create_checkout(pending.transaction_id).await
    }

    async fn checkout_credits(&self, bundle: CreditBundle) -> Result<Redirect> {
        self.create_credit_checkout(bundle).await
    }

    async fn confirm(&self, reference: &str) -> Result<Completion> {
        self.verify_checkout(reference).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::ClientError, subscription::tests::signed_in};
    use httpmock::prelude::*;

    fn adapter(server: &MockServer) -> StripeAdapter {
        StripeAdapter::new(signed_in(server).client().clone())
    }

    #[tokio::test]
    async fn credit_checkout_returns_vendor_redirect() {
        let server = MockServer::start_async().await;
        let checkout = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/stripe/create-buy-credit-checkout")
                    .json_body(json!({ "units": 300 }));
                then.status(200).json_body(json!({
                    "success": true,
                    "transaction_id": "00000000-0000-4000-8000-0000000000cc",
                    "session_id": "cs_test_123",
                    "checkout_url": "https://checkout.stripe.com/c/pay/cs_test_123"
                }));
            })
            .await;

        let redirect = adapter(&server).checkout_credits(CreditBundle::Large).await.unwrap();

        checkout.assert_async().await;
        assert_eq!(redirect.reference, "cs_test_123");
        assert_eq!(redirect.url, "https://checkout.stripe.com/c/pay/cs_test_123");
    }

    #[tokio::test]
    async fn vendor_failure_is_returned_without_retry() {
        let server = MockServer::start_async().await;
        let checkout = server
            .mock_async(|when, then| {
                when.method(POST).path("/stripe/create-checkout");
                then.status(502).json_body(json!({ "error": "Stripe is not configured" }));
            })
            .await;

        let err = adapter(&server).create_checkout(Uuid::nil()).await.unwrap_err();

        assert!(matches!(err, ClientError::Vendor(ref m) if m == "Stripe is not configured"));
        checkout.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn public_key_reads_camel_case_field() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/stripe/public-key");
                then.status(200).json_body(json!({ "publicKey": "pk_test_abc" }));
            })
            .await;

        assert_eq!(adapter(&server).public_key().await.unwrap(), "pk_test_abc");
    }

    #[tokio::test]
    async fn setup_intent_verification_reports_recovery() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/stripe/verify-setup-intent")
                    .json_body(json!({ "setup_intent_id": "seti_1" }));
                then.status(200).json_body(json!({
                    "success": true,
                    "message": "Payment method updated",
                    "payment_method": {
                        "id": "00000000-0000-4000-8000-0000000000dd",
                        "card_last4": "4242",
                        "card_brand": "visa",
                        "card_exp_month": 12,
                        "card_exp_year": 2030
                    },
                    "recovery": {
                        "success": true,
                        "message": "Subscription renewed",
                        "credit_requests": 0
                    }
                }));
            })
            .await;

        let update = adapter(&server).verify_setup_intent("seti_1").await.unwrap();

        assert_eq!(update.payment_method.card_last4.as_deref(), Some("4242"));
        assert!(update.recovery.is_some_and(|r| r.success));
    }
}
