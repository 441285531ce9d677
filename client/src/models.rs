//! Backend response payloads as the client reads them. Unknown fields are
//! ignored so the backend can grow without breaking older clients.

use chrono::{DateTime, Utc};
use common::sub::SubscriptionStatus;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub plan_type: String,
    #[serde(default)]
    pub credit_requests: i32,
    #[serde(default)]
    pub email_verified: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub csrf_token: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AuthPayload {
    pub user: UserProfile,
    #[serde(flatten)]
    pub tokens: Option<SessionTokens>,
    #[serde(default)]
    pub verification_required: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RefreshPayload {
    #[serde(flatten)]
    pub tokens: SessionTokens,
}

/// How a signup ended, depending on the server's verification policy.
#[derive(Debug, Clone, PartialEq)]
pub enum SignupOutcome {
    /// A session was issued and stored.
    Authenticated(UserProfile),
    /// The account exists but the email must be confirmed before logging in.
    VerificationRequired { message: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Plan {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Minor units.
    pub price: i64,
    pub currency: String,
    pub interval: String,
    pub max_requests_per_month: i32,
    pub device_limit: i32,
}

impl Plan {
    pub fn is_free(&self) -> bool {
        self.price == 0
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Usage {
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

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserPlan {
    pub plan: Plan,
    pub usage: Usage,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubscriptionRecord {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub status: SubscriptionStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub renewal_date: Option<DateTime<Utc>>,
    pub auto_renewal: bool,
    pub grace_period_end_date: Option<DateTime<Utc>>,
}

/// Answer to cancel and auto renewal changes.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionChange {
    pub message: String,
    pub subscription: SubscriptionRecord,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub kind: String,
    pub plan_id: Option<Uuid>,
    pub credit_units: Option<i32>,
    pub payment_provider: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionPage {
    pub transactions: Vec<Transaction>,
    pub limit: i64,
    pub offset: i64,
}

/// A payment the backend is waiting for.
#[derive(Debug, Clone, Deserialize)]
pub struct PendingPayment {
    pub transaction_id: Uuid,
    #[serde(default)]
    pub plan: Option<Plan>,
    #[serde(default)]
    pub credit_units: Option<i32>,
    pub amount: i64,
    pub currency: String,
}

/// Result of `/subscription/upgrade`. Only paid plans need a payment.
#[derive(Debug, Clone)]
pub enum UpgradeStart {
    Payment(PendingPayment),
    /// Moved to the free plan (or already on it); nothing to pay.
    Switched { message: String },
}

/// Where to send the user to pay.
#[derive(Debug, Clone, PartialEq)]
pub struct Redirect {
    pub transaction_id: Uuid,
    /// Stripe checkout session id or PayPal order id.
    pub reference: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CheckoutPayload {
    pub transaction_id: Uuid,
    pub session_id: String,
    pub checkout_url: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OrderPayload {
    pub transaction_id: Uuid,
    pub order_id: String,
    pub approve_url: String,
}

/// A settled payment.
#[derive(Debug, Clone, Deserialize)]
pub struct Completion {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub plan: Option<Plan>,
    #[serde(default)]
    pub subscription: Option<SubscriptionRecord>,
    pub credit_requests: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetupSession {
    pub setup_intent_id: String,
    pub client_secret: String,
    pub checkout_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SavedPaymentMethod {
    pub id: Uuid,
    pub card_last4: Option<String>,
    pub card_brand: Option<String>,
    pub card_exp_month: Option<i32>,
    pub card_exp_year: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentMethodUpdate {
    pub message: String,
    pub payment_method: SavedPaymentMethod,
    /// Set when a past due subscription was reactivated with the new card.
    #[serde(default)]
    pub recovery: Option<Completion>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PublicKeyPayload {
    #[serde(rename = "publicKey")]
    pub public_key: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MessagePayload {
    pub message: String,
}
