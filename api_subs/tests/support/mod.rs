#![allow(dead_code)]

use api_subs::services::sub::{self, UpgradeOutcome};
use chrono::{Duration, Utc};
use common::{
    env_config::BillingConfig,
    sub::{PaymentProvider, SubscriptionStatus},
};
use db::{
    dtos::{
        payment_method::PaymentMethodCreateRequest, subscription::SubscriptionCreateRequest,
        user::UserCreateRequest,
    },
    models::{plan::SubscriptionPlan, subscription::Subscription, user::User},
};
use sqlx::PgPool;
use uuid::Uuid;

/// Inserts a user on the free catalog plan, the way registration does.
pub async fn signup(pool: &PgPool, email: &str, stripe_customer_id: Option<&str>) -> User {
    let free = db::plan::get_free_plan(pool).await.unwrap();
    db::user::insert_user(
        pool,
        UserCreateRequest {
            email: email.to_string(),
            password_hash: "hashed".to_string(),
            full_name: None,
            plan_type: free.name.clone(),
            device_limit: free.device_limit,
            max_requests_per_month: free.max_requests_per_month,
            email_verified: true,
            stripe_customer_id: stripe_customer_id.map(str::to_string),
        },
    )
    .await
    .unwrap()
}

pub async fn plan(pool: &PgPool, name: &str) -> SubscriptionPlan {
    db::plan::get_plan_by_name(pool, name).await.unwrap()
}

/// Pending upgrade transaction for a paid plan.
pub async fn start_upgrade(pool: &PgPool, user_id: Uuid, plan_id: Uuid) -> Uuid {
    match sub::initiate_upgrade(pool, user_id, plan_id).await.unwrap() {
        UpgradeOutcome::Pending(pending) => pending.transaction_id,
        _ => panic!("paid plan did not ask for payment"),
    }
}

/// Buys `plan` through a Stripe checkout that settles immediately.
pub async fn subscribe(pool: &PgPool, user_id: Uuid, plan_id: Uuid, session_id: &str) -> Subscription {
    let transaction_id = start_upgrade(pool, user_id, plan_id).await;
    let completion = sub::complete_transaction(
        pool,
        transaction_id,
        PaymentProvider::Stripe,
        Some(session_id),
        None,
        &BillingConfig::default(),
    )
    .await
    .unwrap();
    completion.subscription.expect("plan purchase returns the subscription")
}

/// An active subscription whose period ended `overdue` ago.
pub async fn overdue_subscription(pool: &PgPool, user_id: Uuid, plan_id: Uuid, overdue: Duration) -> Subscription {
    let end_date = Utc::now() - overdue;
    db::subscription::insert_subscription(
        pool,
        SubscriptionCreateRequest {
            user_id,
            plan_id,
            status: SubscriptionStatus::Active,
            start_date: end_date - Duration::days(30),
            end_date,
            auto_renewal: true,
            payment_provider: Some(PaymentProvider::Stripe.as_str().to_string()),
            external_subscription_id: None,
        },
    )
    .await
    .unwrap()
}

pub async fn save_card(pool: &PgPool, user_id: Uuid, payment_method_id: &str) {
    db::payment_method::upsert_default(
        pool,
        PaymentMethodCreateRequest {
            user_id,
            provider: PaymentProvider::Stripe.as_str().to_string(),
            provider_payment_id: payment_method_id.to_string(),
            card_last4: Some("4242".to_string()),
            card_brand: Some("visa".to_string()),
            card_exp_month: Some(12),
            card_exp_year: Some(2030),
        },
    )
    .await
    .unwrap();
}

pub async fn set_status(pool: &PgPool, subscription_id: Uuid, status: SubscriptionStatus) {
    sqlx::query("UPDATE subscriptions SET status = $1 WHERE id = $2")
        .bind(status)
        .bind(subscription_id)
        .execute(pool)
        .await
        .unwrap();
}
