use std::collections::HashMap;

use common::{
    error::{AppError, Res},
    stripe as stripe_common,
};
use db::models::user::User;
use sqlx::PgPool;
use stripe::{
    CheckoutSession, CheckoutSessionId, CheckoutSessionMode, CheckoutSessionPaymentStatus,
    CheckoutSessionStatus, Client,
    CreateCheckoutSession, CreatePaymentIntent, CreateSetupIntent, Currency, CustomerId, Event,
    PaymentIntent, PaymentIntentStatus, PaymentMethod, PaymentMethodId, SetupIntent, SetupIntentId,
    SetupIntentStatus, Webhook,
};
use uuid::Uuid;

use crate::dtos::stripe::CardDetails;

/// Metadata key carrying our transaction id on every Stripe object we create.
pub const TRANSACTION_METADATA_KEY: &str = "transaction_id";

pub struct CheckoutSpec<'a> {
    pub transaction_id: Uuid,
    pub product_name: &'a str,
    pub description: Option<&'a str>,
    /// Minor units.
    pub amount: i64,
    pub currency: &'a str,
    pub success_url: &'a str,
    pub cancel_url: &'a str,
}

pub fn parse_currency(code: &str) -> Res<Currency> {
    serde_json::from_value(serde_json::Value::String(code.to_lowercase()))
        .map_err(|_| AppError::Internal(format!("Unsupported currency: {}", code)))
}

fn transaction_metadata(transaction_id: Uuid) -> HashMap<String, String> {
    HashMap::from([(
        TRANSACTION_METADATA_KEY.to_string(),
        transaction_id.to_string(),
    )])
}

/// Returns the user's Stripe customer, creating and storing one when the
/// account predates Stripe being configured.
pub async fn ensure_customer(pool: &PgPool, client: &Client, user: &User) -> Res<CustomerId> {
    if let Some(customer_id) = &user.stripe_customer_id {
        return stripe_common::parse_customer_id(customer_id);
    }

    let customer = stripe_common::create_customer(client, &user.email, user.full_name.as_deref()).await?;
    db::user::set_stripe_customer_id(pool, user.id, customer.id.as_str()).await?;
    log::info!("Created Stripe customer {} for user {}", customer.id, user.id);
    Ok(customer.id)
}

/// Creates a one-off payment checkout for a pending transaction.
pub async fn create_checkout_session(
    client: &Client,
    customer: CustomerId,
    spec: CheckoutSpec<'_>,
) -> Res<CheckoutSession> {
    let params = CreateCheckoutSession {
        payment_method_types: Some(vec![stripe::CreateCheckoutSessionPaymentMethodTypes::Card]),
        line_items: Some(vec![stripe::CreateCheckoutSessionLineItems {
            price_data: Some(stripe::CreateCheckoutSessionLineItemsPriceData {
                currency: parse_currency(spec.currency)?,
                product_data: Some(stripe::CreateCheckoutSessionLineItemsPriceDataProductData {
                    name: spec.product_name.to_string(),
                    description: spec.description.map(str::to_string),
                    ..Default::default()
                }),
                unit_amount: Some(spec.amount),
                ..Default::default()
            }),
            quantity: Some(1),
            ..Default::default()
        }]),
        mode: Some(CheckoutSessionMode::Payment),
        success_url: Some(spec.success_url),
        cancel_url: Some(spec.cancel_url),
        customer: Some(customer),
        metadata: Some(transaction_metadata(spec.transaction_id)),
        ..Default::default()
    };
    CheckoutSession::create(client, params)
        .await
        .map_err(AppError::from)
}

pub async fn retrieve_checkout_session(client: &Client, session_id: &str) -> Res<CheckoutSession> {
    let id = session_id
        .parse::<CheckoutSessionId>()
        .map_err(|e| AppError::BadRequest(format!("Invalid checkout session id: {}", e)))?;
    CheckoutSession::retrieve(client, &id, &[])
        .await
        .map_err(AppError::from)
}

/// Our transaction id stored on the session at creation time.
pub fn session_transaction_id(session: &CheckoutSession) -> Res<Uuid> {
    session
        .metadata
        .as_ref()
        .and_then(|metadata| metadata.get(TRANSACTION_METADATA_KEY))
        .and_then(|id| Uuid::parse_str(id).ok())
        .ok_or_else(|| {
            AppError::BadRequest(format!(
                "Checkout session {} is not linked to a transaction",
                session.id
            ))
        })
}

pub fn is_session_paid(session: &CheckoutSession) -> bool {
    session.payment_status == CheckoutSessionPaymentStatus::Paid
}

/// The buyer can still complete this session.
pub fn is_session_open(session: &CheckoutSession) -> bool {
    session.status == Some(CheckoutSessionStatus::Open)
}

/// Creates an event for the webhook based on the request payload and signature.
/// Requires a webhook secret key.
pub fn construct_event(payload: &str, signature: &str, webhook_secret: &str) -> Res<Event> {
    match Webhook::construct_event(payload, signature, webhook_secret) {
        Ok(event) => Ok(event),
        Err(e) => {
            log::error!("Error constructing webhook event: {}", e);
            Err(AppError::BadRequest(format!("Webhook Error: {}", e)))
        }
    }
}

/// Starts a payment method update. The card is confirmed client side with
/// the returned client secret.
pub async fn create_setup_intent(client: &Client, customer: CustomerId, user_id: Uuid) -> Res<SetupIntent> {
    let mut params = CreateSetupIntent::new();
    params.customer = Some(customer);
    params.payment_method_types = Some(vec!["card".to_string()]);
    params.usage = Some(stripe::CreateSetupIntentUsage::OffSession);
    params.metadata = Some(HashMap::from([(
        "user_id".to_string(),
        user_id.to_string(),
    )]));

    SetupIntent::create(client, params)
        .await
        .map_err(AppError::from)
}

/// Checks that the setup intent belongs to `customer` and succeeded, then
/// returns the card it attached.
pub async fn verify_setup_intent(client: &Client, setup_intent_id: &str, customer: &CustomerId) -> Res<CardDetails> {
    let id = setup_intent_id
        .parse::<SetupIntentId>()
        .map_err(|e| AppError::BadRequest(format!("Invalid setup intent id: {}", e)))?;
    let intent = SetupIntent::retrieve(client, &id, &[]).await?;

    let owned = intent
        .customer
        .as_ref()
        .is_some_and(|c| &c.id() == customer);
    if !owned {
        return Err(AppError::Forbidden(
            "Setup intent belongs to another customer".to_string(),
        ));
    }
    if intent.status != SetupIntentStatus::Succeeded {
        log::warn!(
            "Setup intent {} verification attempted with status {}",
            intent.id,
            intent.status
        );
        return Err(AppError::BadRequest(
            "Setup intent not completed. Please complete the payment form.".to_string(),
        ));
    }

    let method_id: PaymentMethodId = intent
        .payment_method
        .as_ref()
        .map(|method| method.id())
        .ok_or_else(|| AppError::Vendor("Setup intent has no payment method".to_string()))?;
    let method = PaymentMethod::retrieve(client, &method_id, &[]).await?;
    let card = method.card.as_ref();

    Ok(CardDetails {
        payment_method_id: method.id.to_string(),
        last4: card.map(|c| c.last4.clone()),
        brand: card.map(|c| c.brand.clone()),
        exp_month: card.map(|c| c.exp_month as i32),
        exp_year: card.map(|c| c.exp_year as i32),
    })
}

/// Charges a stored payment method without the customer present. Returns
/// the intent so the caller can inspect its status; declines surface as
/// [`AppError::Stripe`].
pub async fn charge_saved_method(
    client: &Client,
    customer: CustomerId,
    payment_method_id: &str,
    amount: i64,
    currency: &str,
    transaction_id: Uuid,
) -> Res<PaymentIntent> {
    let method = payment_method_id
        .parse::<PaymentMethodId>()
        .map_err(|e| AppError::Internal(format!("Invalid payment method id: {}", e)))?;

    let mut params = CreatePaymentIntent::new(amount, parse_currency(currency)?);
    params.customer = Some(customer);
    params.payment_method = Some(method);
    params.confirm = Some(true);
    params.metadata = Some(transaction_metadata(transaction_id));

    PaymentIntent::create(client, params)
        .await
        .map_err(AppError::from)
}

pub fn is_intent_succeeded(intent: &PaymentIntent) -> bool {
    intent.status == PaymentIntentStatus::Succeeded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_codes_parse_case_insensitively() {
        assert_eq!(parse_currency("usd").unwrap(), Currency::USD);
        assert_eq!(parse_currency("USD").unwrap(), Currency::USD);
        assert!(parse_currency("not-a-currency").is_err());
    }

    #[test]
    fn metadata_carries_transaction_id() {
        let id = Uuid::new_v4();
        let metadata = transaction_metadata(id);
        assert_eq!(metadata.get(TRANSACTION_METADATA_KEY), Some(&id.to_string()));
    }
}
