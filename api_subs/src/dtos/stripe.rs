use db::models::payment_method::PaymentMethod;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dtos::sub::CompletionResponse;

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub transaction_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct SuccessQuery {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifySetupIntentRequest {
    pub setup_intent_id: String,
}

#[derive(Debug, Serialize)]
pub struct PublicKeyResponse {
    #[serde(rename = "publicKey")]
    pub public_key: String,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub success: bool,
    pub transaction_id: Uuid,
    pub session_id: String,
    pub checkout_url: String,
}

#[derive(Debug, Serialize)]
pub struct SetupIntentResponse {
    pub success: bool,
    pub setup_intent_id: String,
    pub client_secret: String,
    pub checkout_url: String,
}

/// Vendor-agnostic card details pulled from a verified setup intent.
#[derive(Debug, Clone)]
pub struct CardDetails {
    pub payment_method_id: String,
    pub last4: Option<String>,
    pub brand: Option<String>,
    pub exp_month: Option<i32>,
    pub exp_year: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct PaymentMethodResponse {
    pub success: bool,
    pub message: String,
    pub payment_method: PaymentMethod,
    /// Present when a past due subscription was charged and reactivated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery: Option<CompletionResponse>,
}

#[derive(Debug, Deserialize)]
pub struct BuyCreditCheckoutRequest {
    pub units: i32,
}
