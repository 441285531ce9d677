//! Provider checkout flows on top of the billing service: Stripe checkout
//! sessions, setup intents and webhooks, and PayPal orders.

use common::{
    env_config::{BillingConfig, Config},
    error::{AppError, Res},
    stripe as stripe_common,
    sub::{PaymentProvider, SubscriptionStatus, TransactionKind},
};
use db::{
    dtos::{payment_method::PaymentMethodCreateRequest, transaction::TransactionCreateRequest},
    models::transaction::PaymentTransaction,
};
use serde_json::json;
use sqlx::PgPool;
use stripe::{Client, Event, EventObject, EventType};
use uuid::Uuid;

use crate::{
    dtos::{
        paypal::CreateOrderResponse,
        stripe::{CheckoutResponse, PaymentMethodResponse, SetupIntentResponse},
        sub::CompletionResponse,
    },
    services::{
        pay::{self, CheckoutSpec},
        paypal::{OrderSpec, PayPalClient},
        sub,
    },
};

pub fn stripe_client(config: &Config) -> Res<Client> {
    if config.stripe.secret_key.is_empty() {
        return Err(AppError::Vendor("Stripe is not configured".to_string()));
    }
    Ok(stripe_common::create_client(&config.stripe.secret_key))
}

fn success_url(config: &Config) -> String {
    format!(
        "{}/subscription/success?session_id={{CHECKOUT_SESSION_ID}}",
        config.frontend_url.trim_end_matches('/')
    )
}

fn cancel_url(config: &Config) -> String {
    format!("{}/subscription", config.frontend_url.trim_end_matches('/'))
}

/// The vendor checkout already opened for a transaction. A transaction is
/// paid through one provider only.
fn existing_checkout(transaction: &PaymentTransaction, provider: PaymentProvider) -> Res<Option<&str>> {
    match (transaction.external_id.as_deref(), transaction.payment_provider.as_deref()) {
        (None, _) => Ok(None),
        (Some(external_id), Some(linked)) if linked == provider.as_str() => Ok(Some(external_id)),
        (Some(_), linked) => Err(AppError::Conflict(format!(
            "Transaction {} is already being paid with {}",
            transaction.id,
            linked.unwrap_or("another provider")
        ))),
    }
}

/// Opens a Stripe checkout for a pending transaction owned by `user_id`.
/// Asking again while the first session is still open returns that session.
pub async fn start_checkout(pool: &PgPool, config: &Config, user_id: Uuid, transaction_id: Uuid) -> Res<CheckoutResponse> {
    let client = stripe_client(config)?;
    let transaction = sub::get_payable_transaction(pool, user_id, transaction_id).await?;

    if let Some(session_id) = existing_checkout(&transaction, PaymentProvider::Stripe)? {
        let session = pay::retrieve_checkout_session(&client, session_id).await?;
        let checkout_url = session
            .url
            .clone()
            .filter(|_| pay::is_session_open(&session))
            .ok_or_else(|| AppError::Conflict("Checkout for this transaction is no longer open".to_string()))?;
        log::debug!("Reusing checkout {} for transaction {}", session.id, transaction.id);
        return Ok(CheckoutResponse {
            success: true,
            transaction_id: transaction.id,
            session_id: session.id.to_string(),
            checkout_url,
        });
    }

    let user = db::user::get_user_by_id(pool, user_id).await?;
    let customer = pay::ensure_customer(pool, &client, &user).await?;
    let (product_name, description) = sub::describe_transaction(pool, &transaction).await?;

    let success_url = success_url(config);
    let cancel_url = cancel_url(config);
    let session = pay::create_checkout_session(
        &client,
        customer,
        CheckoutSpec {
            transaction_id: transaction.id,
            product_name: &product_name,
            description: Some(&description),
            amount: transaction.amount,
            currency: &transaction.currency,
            success_url: &success_url,
            cancel_url: &cancel_url,
        },
    )
    .await?;

    let checkout_url = session
        .url
        .clone()
        .ok_or_else(|| AppError::Vendor("Checkout session has no URL".to_string()))?;
    db::transaction::set_external_reference(
        pool,
        transaction.id,
        PaymentProvider::Stripe.as_str(),
        session.id.as_str(),
    )
    .await?;
    log::info!(
        "Stripe checkout {} opened for transaction {}",
        session.id,
        transaction.id
    );

    Ok(CheckoutResponse {
        success: true,
        transaction_id: transaction.id,
        session_id: session.id.to_string(),
        checkout_url,
    })
}

/// Creates a pending credit purchase and opens its checkout in one step.
pub async fn start_credit_checkout(pool: &PgPool, config: &Config, user_id: Uuid, units: i32) -> Res<CheckoutResponse> {
    stripe_client(config)?;
    let pending = sub::initiate_credit_purchase(pool, user_id, units).await?;
    start_checkout(pool, config, user_id, pending.transaction_id).await
}

/// Handles the browser returning from a Stripe checkout.
pub async fn confirm_checkout(pool: &PgPool, config: &Config, user_id: Uuid, session_id: &str) -> Res<CompletionResponse> {
    let client = stripe_client(config)?;
    let session = pay::retrieve_checkout_session(&client, session_id).await?;
    let transaction_id = pay::session_transaction_id(&session)?;

    let transaction = db::transaction::get_transaction_by_id(pool, transaction_id).await?;
    if transaction.user_id != user_id {
        return Err(AppError::NotFound("Transaction not found".to_string()));
    }
    if !pay::is_session_paid(&session) {
        return Err(AppError::BadRequest("Payment has not been completed".to_string()));
    }

    sub::complete_transaction(
        pool,
        transaction_id,
        PaymentProvider::Stripe,
        Some(session.id.as_str()),
        Some(json!({ "checkout_session": session.id.as_str() })),
        &config.billing,
    )
    .await
}

/// What a verified Stripe webhook event asks of the billing service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookAction {
    Complete { transaction_id: Uuid, session_id: String },
    Expire { transaction_id: Uuid },
    Ignore,
}

pub fn webhook_action(event: &Event) -> Res<WebhookAction> {
    let action = match (event.type_, &event.data.object) {
        (EventType::CheckoutSessionCompleted, EventObject::CheckoutSession(session)) => {
            let transaction_id = pay::session_transaction_id(session)?;
            if !pay::is_session_paid(session) {
                log::info!(
                    "Checkout {} completed without payment, waiting for async settlement",
                    session.id
                );
                return Ok(WebhookAction::Ignore);
            }
            WebhookAction::Complete {
                transaction_id,
                session_id: session.id.to_string(),
            }
        }
        (EventType::CheckoutSessionExpired, EventObject::CheckoutSession(session)) => WebhookAction::Expire {
            transaction_id: pay::session_transaction_id(session)?,
        },
        (event_type, _) => {
            log::debug!("Ignoring Stripe event {} ({})", event.id, event_type);
            WebhookAction::Ignore
        }
    };
    Ok(action)
}

/// Settles the transaction a webhook event refers to. Redelivered events
/// and events racing the success redirect are harmless.
pub async fn apply_webhook_action(
    pool: &PgPool,
    billing: &BillingConfig,
    event_id: &str,
    action: WebhookAction,
) -> Res<()> {
    match action {
        WebhookAction::Complete {
            transaction_id,
            session_id,
        } => {
            sub::complete_transaction(
                pool,
                transaction_id,
                PaymentProvider::Stripe,
                Some(&session_id),
                Some(json!({ "event": event_id, "checkout_session": session_id })),
                billing,
            )
            .await?;
        }
        WebhookAction::Expire { transaction_id } => {
            sub::fail_transaction(
                pool,
                transaction_id,
                Some(json!({ "event": event_id, "reason": "checkout_expired" })),
                billing,
            )
            .await?;
        }
        WebhookAction::Ignore => {}
    }
    Ok(())
}

/// Dispatches a verified Stripe webhook event.
pub async fn handle_webhook_event(pool: &PgPool, config: &Config, event: Event) -> Res<()> {
    let action = webhook_action(&event)?;
    apply_webhook_action(pool, &config.billing, event.id.as_str(), action).await
}

/// Creates a setup intent for saving a new card.
pub async fn start_payment_method_update(pool: &PgPool, user_id: Uuid, config: &Config) -> Res<SetupIntentResponse> {
    let client = stripe_client(config)?;
    sub::ensure_payment_method_update_allowed(pool, user_id).await?;
    let user = db::user::get_user_by_id(pool, user_id).await?;
    let customer = pay::ensure_customer(pool, &client, &user).await?;
    let intent = pay::create_setup_intent(&client, customer, user.id).await?;

    let client_secret = intent
        .client_secret
        .clone()
        .ok_or_else(|| AppError::Vendor("Setup intent has no client secret".to_string()))?;
    let checkout_url = format!(
        "{}/stripe/setup?setup_intent_client_secret={}",
        config.frontend_url.trim_end_matches('/'),
        client_secret
    );

    Ok(SetupIntentResponse {
        success: true,
        setup_intent_id: intent.id.to_string(),
        client_secret,
        checkout_url,
    })
}

/// Stores the card from a completed setup intent as the default method. A
/// past due subscription is charged right away with the new card; a
/// declined recovery charge leaves the subscription past due.
pub async fn finish_payment_method_update(
    pool: &PgPool,
    config: &Config,
    user_id: Uuid,
    setup_intent_id: &str,
) -> Res<PaymentMethodResponse> {
    let client = stripe_client(config)?;
    sub::ensure_payment_method_update_allowed(pool, user_id).await?;
    let user = db::user::get_user_by_id(pool, user_id).await?;
    let customer_id = user
        .stripe_customer_id
        .as_deref()
        .ok_or_else(|| AppError::BadRequest("No payment setup in progress".to_string()))?;
    let customer = stripe_common::parse_customer_id(customer_id)?;
    let card = pay::verify_setup_intent(&client, setup_intent_id, &customer).await?;

    let mut tx = pool.begin().await?;
    db::payment_method::clear_default(&mut *tx, user_id).await?;
    let method = db::payment_method::upsert_default(
        &mut *tx,
        PaymentMethodCreateRequest {
            user_id,
            provider: PaymentProvider::Stripe.as_str().to_string(),
            provider_payment_id: card.payment_method_id.clone(),
            card_last4: card.last4,
            card_brand: card.brand,
            card_exp_month: card.exp_month,
            card_exp_year: card.exp_year,
        },
    )
    .await?;
    tx.commit().await?;
    log::info!("User {} saved payment method {}", user_id, method.id);

    let live = db::subscription::get_live_subscription(pool, user_id).await?;
    let Some(past_due) = live.filter(|s| s.status == SubscriptionStatus::PastDue) else {
        return Ok(PaymentMethodResponse {
            success: true,
            message: "Payment method saved successfully".to_string(),
            payment_method: method,
            recovery: None,
        });
    };

    let plan = db::plan::get_plan_by_id(pool, past_due.plan_id).await?;
    let pending = db::transaction::insert_transaction(
        pool,
        TransactionCreateRequest {
            user_id,
            kind: TransactionKind::Renewal,
            plan_id: Some(plan.id),
            subscription_id: Some(past_due.id),
            credit_units: None,
            amount: plan.price,
            currency: plan.currency.clone(),
        },
    )
    .await?;

    let charge = pay::charge_saved_method(
        &client,
        customer,
        &method.provider_payment_id,
        plan.price,
        &plan.currency,
        pending.id,
    )
    .await;

    match charge {
        Ok(intent) if pay::is_intent_succeeded(&intent) => {
            let recovery = sub::complete_transaction(
                pool,
                pending.id,
                PaymentProvider::Stripe,
                Some(intent.id.as_str()),
                None,
                &config.billing,
            )
            .await?;
            Ok(PaymentMethodResponse {
                success: true,
                message: "Payment method saved and subscription reactivated".to_string(),
                payment_method: method,
                recovery: Some(recovery),
            })
        }
        other => {
            if let Err(e) = &other {
                log::warn!("Recovery charge for {} declined: {}", past_due.id, e);
            }
            sub::fail_transaction(pool, pending.id, None, &config.billing).await?;
            Ok(PaymentMethodResponse {
                success: true,
                message: "Payment method saved, but the outstanding payment was declined".to_string(),
                payment_method: method,
                recovery: None,
            })
        }
    }
}

/// Creates a PayPal order for a pending transaction owned by `user_id`.
pub async fn start_paypal_order(pool: &PgPool, config: &Config, user_id: Uuid, transaction_id: Uuid) -> Res<CreateOrderResponse> {
    let transaction = sub::get_payable_transaction(pool, user_id, transaction_id).await?;
    if existing_checkout(&transaction, PaymentProvider::Paypal)?.is_some() {
        return Err(AppError::Conflict(
            "A PayPal order already exists for this transaction".to_string(),
        ));
    }
    let (_, description) = sub::describe_transaction(pool, &transaction).await?;

    let paypal = PayPalClient::new(config.paypal.clone());
    let transaction_ref = transaction.id.to_string();
    let return_url = format!("{}/paypal/success", config.frontend_url.trim_end_matches('/'));
    let cancel_url = cancel_url(config);
    let order = paypal
        .create_order(OrderSpec {
            transaction_id: &transaction_ref,
            description: &description,
            amount: transaction.amount,
            currency: &transaction.currency,
            return_url: &return_url,
            cancel_url: &cancel_url,
        })
        .await?;

    let approve_url = order
        .approve_url()
        .map(str::to_string)
        .ok_or_else(|| AppError::Vendor("PayPal order has no approval link".to_string()))?;
    db::transaction::set_external_reference(pool, transaction.id, PaymentProvider::Paypal.as_str(), &order.id).await?;
    log::info!("PayPal order {} opened for transaction {}", order.id, transaction.id);

    Ok(CreateOrderResponse {
        success: true,
        transaction_id: transaction.id,
        order_id: order.id,
        approve_url,
    })
}

/// Captures an approved PayPal order and settles its transaction.
pub async fn capture_paypal_order(pool: &PgPool, config: &Config, user_id: Uuid, order_id: &str) -> Res<CompletionResponse> {
    let transaction = db::transaction::get_transaction_by_external_id(pool, order_id).await?;
    if transaction.user_id != user_id {
        return Err(AppError::NotFound("Transaction not found".to_string()));
    }

    let order = PayPalClient::new(config.paypal.clone()).capture_order(order_id).await?;
    if !order.is_completed() {
        log::warn!("PayPal order {} captured with status {}", order.id, order.status);
        return Err(AppError::BadRequest("PayPal payment has not been completed".to_string()));
    }
    if order.custom_id().is_some_and(|id| id != transaction.id.to_string()) {
        return Err(AppError::Vendor(format!(
            "PayPal order {} does not belong to transaction {}",
            order.id, transaction.id
        )));
    }

    sub::complete_transaction(
        pool,
        transaction.id,
        PaymentProvider::Paypal,
        Some(&order.id),
        Some(json!({ "order": order.id, "captures": order.capture_ids() })),
        &config.billing,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn pending(provider: Option<&str>, external_id: Option<&str>) -> PaymentTransaction {
        PaymentTransaction {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            plan_id: Some(Uuid::new_v4()),
            subscription_id: None,
            kind: TransactionKind::Subscription.as_str().to_string(),
            credit_units: None,
            payment_provider: provider.map(str::to_string),
            amount: 999,
            currency: "usd".to_string(),
            status: "pending".to_string(),
            external_id: external_id.map(str::to_string),
            payload: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn fresh_transaction_has_no_checkout() {
        let transaction = pending(None, None);
        assert_eq!(existing_checkout(&transaction, PaymentProvider::Stripe).unwrap(), None);
    }

    #[test]
    fn second_checkout_returns_the_first_session() {
        let transaction = pending(Some("stripe"), Some("cs_test_first"));
        assert_eq!(
            existing_checkout(&transaction, PaymentProvider::Stripe).unwrap(),
            Some("cs_test_first")
        );
    }

    #[test]
    fn checkout_with_another_provider_is_refused() {
        let transaction = pending(Some("stripe"), Some("cs_test_first"));
        let err = existing_checkout(&transaction, PaymentProvider::Paypal).unwrap_err();
        assert!(matches!(err, AppError::Conflict(ref m) if m.contains("stripe")));
    }
}
