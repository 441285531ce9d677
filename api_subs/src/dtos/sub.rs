use chrono::{DateTime, Utc};
use common::sub::SubscriptionStatus;
use db::models::{plan::SubscriptionPlan, subscription::Subscription, transaction::PaymentTransaction};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct UpgradeRequest {
    pub plan_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct AutoRenewalRequest {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct BuyCreditsRequest {
    pub units: i32,
}

#[derive(Debug, Deserialize)]
pub struct TransactionsQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// A pending payment the client now has to check out with a provider.
#[derive(Debug, Serialize)]
pub struct PendingPaymentResponse {
    pub success: bool,
    pub transaction_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<SubscriptionPlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credit_units: Option<i32>,
    /// Minor units.
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Serialize)]
pub struct UsageSnapshot {
    pub status: SubscriptionStatus,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub renewal_date: Option<DateTime<Utc>>,
    pub grace_period_end_date: Option<DateTime<Utc>>,
    pub auto_renewal: bool,
    pub current_month: String,
    pub month_requests: i64,
    pub max_requests: i32,
    pub remaining_requests: i64,
    pub credit_requests: i32,
    pub device_count: i64,
    pub device_limit: i32,
}

#[derive(Debug, Serialize)]
pub struct UserPlanResponse {
    pub plan: SubscriptionPlan,
    pub usage: UsageSnapshot,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub success: bool,
    pub message: String,
    pub subscription: Subscription,
}

#[derive(Debug, Serialize)]
pub struct TransactionsResponse {
    pub transactions: Vec<PaymentTransaction>,
    pub limit: i64,
    pub offset: i64,
}

/// Result of settling a payment, shared by the Stripe and PayPal flows.
#[derive(Debug, Serialize)]
pub struct CompletionResponse {
    pub success: bool,
    pub message: String,
    pub transaction: PaymentTransaction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<SubscriptionPlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<Subscription>,
    pub credit_requests: i32,
}
