mod support;

use api_subs::services::{
    payment::{self, WebhookAction},
    sub,
};
use common::{
    env_config::BillingConfig,
    error::AppError,
    sub::{PaymentProvider, SubscriptionStatus},
};
use sqlx::PgPool;

#[sqlx::test(migrations = "../db/migrations")]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn credit_bundle_adds_exactly_its_units(pool: PgPool) {
    let user = support::signup(&pool, "credits@example.com", None).await;

    let pending = sub::initiate_credit_purchase(&pool, user.id, 200).await.unwrap();
    assert_eq!(pending.amount, 599);
    assert_eq!(pending.credit_units, Some(200));

    let completion = sub::complete_transaction(
        &pool,
        pending.transaction_id,
        PaymentProvider::Stripe,
        Some("cs_test_credits"),
        None,
        &BillingConfig::default(),
    )
    .await
    .unwrap();
    assert_eq!(completion.credit_requests, 200);
    assert!(completion.subscription.is_none());

    let user = db::user::get_user_by_id(&pool, user.id).await.unwrap();
    assert_eq!(user.credit_requests, 200);
    assert_eq!(user.plan_type, "free");
    assert!(
        db::subscription::get_latest_subscription(&pool, user.id)
            .await
            .unwrap()
            .is_none()
    );
}

#[sqlx::test(migrations = "../db/migrations")]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn completing_a_transaction_twice_applies_it_once(pool: PgPool) {
    let user = support::signup(&pool, "twice@example.com", None).await;
    let pending = sub::initiate_credit_purchase(&pool, user.id, 100).await.unwrap();
    let billing = BillingConfig::default();

    let first = sub::complete_transaction(
        &pool,
        pending.transaction_id,
        PaymentProvider::Stripe,
        Some("cs_test_twice"),
        None,
        &billing,
    )
    .await
    .unwrap();
    let second = sub::complete_transaction(
        &pool,
        pending.transaction_id,
        PaymentProvider::Stripe,
        Some("cs_test_twice"),
        None,
        &billing,
    )
    .await
    .unwrap();

    assert_eq!(first.message, "Payment processed successfully");
    assert_eq!(second.message, "Payment already processed");
    assert_eq!(second.credit_requests, 100);
    let user = db::user::get_user_by_id(&pool, user.id).await.unwrap();
    assert_eq!(user.credit_requests, 100);
}

#[sqlx::test(migrations = "../db/migrations")]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn plan_change_closes_the_old_row_and_opens_a_new_one(pool: PgPool) {
    let user = support::signup(&pool, "switch@example.com", None).await;
    let basic = support::plan(&pool, "basic").await;
    let advance = support::plan(&pool, "advance").await;

    let first = support::subscribe(&pool, user.id, basic.id, "cs_test_basic").await;
    assert_eq!(first.status, SubscriptionStatus::Active);

    let second = support::subscribe(&pool, user.id, advance.id, "cs_test_advance").await;
    assert_ne!(second.id, first.id);
    assert_eq!(second.plan_id, advance.id);
    assert_eq!(second.status, SubscriptionStatus::Active);

    let old = db::subscription::get_subscription_by_id(&pool, first.id).await.unwrap();
    assert_eq!(old.status, SubscriptionStatus::Cancelled);

    let live = db::subscription::get_live_subscription(&pool, user.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(live.id, second.id);

    let user = db::user::get_user_by_id(&pool, user.id).await.unwrap();
    assert_eq!(user.plan_type, "advance");
    assert_eq!(user.max_requests_per_month, advance.max_requests_per_month);
}

#[sqlx::test(migrations = "../db/migrations")]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn payment_failed_subscription_can_move_to_another_plan(pool: PgPool) {
    let user = support::signup(&pool, "lapsed@example.com", None).await;
    let basic = support::plan(&pool, "basic").await;
    let advance = support::plan(&pool, "advance").await;

    let failed = support::subscribe(&pool, user.id, basic.id, "cs_test_lapsed").await;
    support::set_status(&pool, failed.id, SubscriptionStatus::PaymentFailed).await;

    let replacement = support::subscribe(&pool, user.id, advance.id, "cs_test_replacement").await;

    let old = db::subscription::get_subscription_by_id(&pool, failed.id).await.unwrap();
    assert_eq!(old.status, SubscriptionStatus::Expired);
    assert_eq!(replacement.status, SubscriptionStatus::Active);
    assert_eq!(replacement.plan_id, advance.id);
}

#[sqlx::test(migrations = "../db/migrations")]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn cancel_keeps_the_row_and_falls_back_to_free_limits(pool: PgPool) {
    let user = support::signup(&pool, "cancel@example.com", None).await;
    let basic = support::plan(&pool, "basic").await;
    let free = db::plan::get_free_plan(&pool).await.unwrap();
    let subscription = support::subscribe(&pool, user.id, basic.id, "cs_test_cancel").await;

    let cancelled = sub::cancel_subscription(&pool, user.id).await.unwrap();
    assert_eq!(cancelled.id, subscription.id);
    assert_eq!(cancelled.status, SubscriptionStatus::Cancelled);

    let latest = db::subscription::get_latest_subscription(&pool, user.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.id, subscription.id);

    let plan = sub::get_user_plan(&pool, user.id).await.unwrap();
    assert_eq!(plan.plan.id, free.id);
    assert_eq!(plan.usage.status, SubscriptionStatus::Cancelled);
    assert_eq!(plan.usage.max_requests, free.max_requests_per_month);
    assert_eq!(plan.usage.device_limit, free.device_limit);

    let user = db::user::get_user_by_id(&pool, user.id).await.unwrap();
    assert_eq!(user.plan_type, free.name);
}

#[sqlx::test(migrations = "../db/migrations")]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn webhook_settles_checkout_and_redirect_is_a_no_op(pool: PgPool) {
    let user = support::signup(&pool, "webhook@example.com", None).await;
    let basic = support::plan(&pool, "basic").await;
    let billing = BillingConfig::default();
    let transaction_id = support::start_upgrade(&pool, user.id, basic.id).await;

    payment::apply_webhook_action(
        &pool,
        &billing,
        "evt_test_completed",
        WebhookAction::Complete {
            transaction_id,
            session_id: "cs_test_webhook".to_string(),
        },
    )
    .await
    .unwrap();

    let transaction = db::transaction::get_transaction_by_id(&pool, transaction_id).await.unwrap();
    assert_eq!(transaction.status, "succeeded");
    assert_eq!(transaction.external_id.as_deref(), Some("cs_test_webhook"));
    let live = db::subscription::get_live_subscription(&pool, user.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(live.plan_id, basic.id);

    let redirect = sub::complete_transaction(
        &pool,
        transaction_id,
        PaymentProvider::Stripe,
        Some("cs_test_webhook"),
        None,
        &billing,
    )
    .await
    .unwrap();
    assert_eq!(redirect.message, "Payment already processed");
    assert_eq!(redirect.subscription.map(|s| s.id), Some(live.id));
}

#[sqlx::test(migrations = "../db/migrations")]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn expired_checkout_fails_the_transaction(pool: PgPool) {
    let user = support::signup(&pool, "expired@example.com", None).await;
    let pending = sub::initiate_credit_purchase(&pool, user.id, 300).await.unwrap();

    payment::apply_webhook_action(
        &pool,
        &BillingConfig::default(),
        "evt_test_expired",
        WebhookAction::Expire {
            transaction_id: pending.transaction_id,
        },
    )
    .await
    .unwrap();

    let transaction = db::transaction::get_transaction_by_id(&pool, pending.transaction_id)
        .await
        .unwrap();
    assert_eq!(transaction.status, "failed");
    let user = db::user::get_user_by_id(&pool, user.id).await.unwrap();
    assert_eq!(user.credit_requests, 0);
}

#[sqlx::test(migrations = "../db/migrations")]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn checkout_reference_is_never_replaced(pool: PgPool) {
    let user = support::signup(&pool, "reference@example.com", None).await;
    let pending = sub::initiate_credit_purchase(&pool, user.id, 100).await.unwrap();

    db::transaction::set_external_reference(&pool, pending.transaction_id, "stripe", "cs_test_first")
        .await
        .unwrap();
    db::transaction::set_external_reference(&pool, pending.transaction_id, "stripe", "cs_test_first")
        .await
        .unwrap();
    let err = db::transaction::set_external_reference(&pool, pending.transaction_id, "stripe", "cs_test_second")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let found = db::transaction::get_transaction_by_external_id(&pool, "cs_test_first")
        .await
        .unwrap();
    assert_eq!(found.id, pending.transaction_id);
}

#[sqlx::test(migrations = "../db/migrations")]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn free_tier_cannot_save_a_card(pool: PgPool) {
    let user = support::signup(&pool, "card@example.com", None).await;

    let err = sub::ensure_payment_method_update_allowed(&pool, user.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let basic = support::plan(&pool, "basic").await;
    support::subscribe(&pool, user.id, basic.id, "cs_test_card").await;
    sub::ensure_payment_method_update_allowed(&pool, user.id).await.unwrap();
}
