//! Provider-independent `/subscription/*` calls shared by both adapters.

use common::sub::CreditBundle;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::{
    error::{ClientError, Result},
    http::ApiClient,
    models::{
        MessagePayload, PendingPayment, Plan, SetupSession, SubscriptionChange, TransactionPage,
        UpgradeStart, UserPlan, UserProfile,
    },
};

#[derive(Clone)]
pub struct SubscriptionApi {
    api: ApiClient,
}

impl SubscriptionApi {
    pub fn new(api: ApiClient) -> Self {
        SubscriptionApi { api }
    }

    pub fn client(&self) -> &ApiClient {
        &self.api
    }

    pub async fn plans(&self) -> Result<Vec<Plan>> {
        self.api.get("/subscription/plans").await
    }

    pub async fn user_plan(&self) -> Result<UserPlan> {
        self.api.get("/subscription/user-plan").await
    }

    /// Reloads the profile and keeps the stored user in sync.
    pub async fn refresh_profile(&self) -> Result<UserProfile> {
        let user: UserProfile = self.api.get("/auth/me").await?;
        self.api.auth().store().set_user(user.clone());
        Ok(user)
    }

    pub async fn upgrade(&self, plan_id: Uuid) -> Result<UpgradeStart> {
        let body: Value = self
            .api
            .post("/subscription/upgrade", &json!({ "plan_id": plan_id }))
            .await?;

        if body.get("transaction_id").is_some() {
            let pending = serde_json::from_value(body).map_err(|e| ClientError::Api {
                status: 200,
                message: format!("Unexpected upgrade response: {}", e),
            })?;
            return Ok(UpgradeStart::Payment(pending));
        }

        let message = serde_json::from_value::<MessagePayload>(body)
            .map(|m| m.message)
            .unwrap_or_else(|_| "Plan changed".to_string());
        Ok(UpgradeStart::Switched { message })
    }

    pub async fn renew(&self) -> Result<PendingPayment> {
        self.api.post("/subscription/renew", &json!({})).await
    }

    pub async fn cancel(&self) -> Result<SubscriptionChange> {
        self.api.post("/subscription/cancel", &json!({})).await
    }

    pub async fn set_auto_renewal(&self, enabled: bool) -> Result<SubscriptionChange> {
        self.api
            .post("/subscription/auto-renewal", &json!({ "enabled": enabled }))
            .await
    }

    /// Starts a card update for a non-free subscription. Finish it with
    /// [`crate::stripe::StripeAdapter::verify_setup_intent`].
    pub async fn update_payment_method(&self) -> Result<SetupSession> {
        self.api
            .post("/subscription/update-payment-method", &json!({}))
            .await
    }

    pub async fn buy_credits(&self, bundle: CreditBundle) -> Result<PendingPayment> {
        self.api
            .post("/subscription/buy-credits", &json!({ "units": bundle.units() }))
            .await
    }

    pub async fn transactions(&self, limit: i64, offset: i64) -> Result<TransactionPage> {
        self.api
            .get(&format!("/subscription/transactions?limit={}&offset={}", limit, offset))
            .await
    }
}
