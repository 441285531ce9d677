use chrono::{Datelike, Duration, Utc};
use common::{
    env_config::BillingConfig,
    error::{AppError, Res},
    sub::{
        self, CreditBundle, PaymentProvider, SubscriptionAction, SubscriptionEvent, SubscriptionStatus,
        TransactionKind, TransactionStatus,
    },
};
use db::{
    dtos::{subscription::SubscriptionCreateRequest, transaction::TransactionCreateRequest},
    models::{
        plan::SubscriptionPlan, subscription::Subscription, transaction::PaymentTransaction,
        user::User,
    },
};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::{
    dtos::sub::{CompletionResponse, PendingPaymentResponse, UsageSnapshot, UserPlanResponse},
    services::{lifecycle, plan},
};

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;

fn ensure_action(status: SubscriptionStatus, action: SubscriptionAction) -> Res<()> {
    if sub::is_action_allowed(status, action) {
        Ok(())
    } else {
        Err(AppError::Conflict(format!(
            "{:?} is not available while the subscription is {}",
            action, status
        )))
    }
}

/// Current plan, usage counters and subscription dates for the portal.
pub async fn get_user_plan(pool: &PgPool, user_id: Uuid) -> Res<UserPlanResponse> {
    let user = db::user::get_user_by_id(pool, user_id).await?;
    let catalog = db::plan::get_all_plans(pool).await?;
    let latest = db::subscription::get_latest_subscription(pool, user_id).await?;
    let effective = plan::resolve_user_plan(&catalog, latest.as_ref())?;

    let today = Utc::now().date_naive();
    let month_start = today.with_day(1).unwrap_or(today);
    let usage = db::usage::get_monthly_usage(pool, user_id, month_start).await?;

    let max_requests = effective.plan.max_requests_per_month;
    let dates = latest.as_ref().filter(|_| effective.status != SubscriptionStatus::FreeTier);

    Ok(UserPlanResponse {
        plan: effective.plan.clone(),
        usage: UsageSnapshot {
            status: effective.status,
            start_date: dates.map(|s| s.start_date),
            end_date: dates.map(|s| s.end_date),
            renewal_date: dates.and_then(|s| s.renewal_date),
            grace_period_end_date: dates.and_then(|s| s.grace_period_end_date),
            auto_renewal: dates.is_some_and(|s| s.auto_renewal),
            current_month: today.format("%B").to_string(),
            month_requests: usage.requests,
            max_requests,
            remaining_requests: (i64::from(max_requests) - usage.requests).max(0),
            credit_requests: user.credit_requests,
            device_count: usage.devices,
            device_limit: effective.plan.device_limit,
        },
    })
}

pub enum UpgradeOutcome {
    /// Payment is required; the client continues with a provider checkout.
    Pending(PendingPaymentResponse),
    /// Moving to the free plan cancels the paid subscription.
    Downgraded(Subscription),
    AlreadyFree,
}

/// Starts a plan change. Paid plans produce a pending transaction; the plan
/// is only applied once the payment is confirmed.
pub async fn initiate_upgrade(pool: &PgPool, user_id: Uuid, plan_id: Uuid) -> Res<UpgradeOutcome> {
    let plan = db::plan::get_plan_by_id(pool, plan_id).await?;
    if !plan.is_active {
        return Err(AppError::BadRequest(format!("Plan {} is not available", plan.name)));
    }

    let latest = db::subscription::get_latest_subscription(pool, user_id).await?;
    let status = plan::current_status(latest.as_ref());
    ensure_action(status, SubscriptionAction::Upgrade)?;

    if plan.is_free() {
        return if status == SubscriptionStatus::Active {
            cancel_subscription(pool, user_id).await.map(UpgradeOutcome::Downgraded)
        } else {
            Ok(UpgradeOutcome::AlreadyFree)
        };
    }

    if status == SubscriptionStatus::Active && latest.as_ref().is_some_and(|s| s.plan_id == plan.id) {
        return Err(AppError::Conflict(format!(
            "Already subscribed to the {} plan",
            plan.name
        )));
    }

    let transaction = db::transaction::insert_transaction(
        pool,
        TransactionCreateRequest {
            user_id,
            kind: TransactionKind::Subscription,
            plan_id: Some(plan.id),
            subscription_id: None,
            credit_units: None,
            amount: plan.price,
            currency: plan.currency.clone(),
        },
    )
    .await?;
    log::info!(
        "User {} started upgrade to {} (transaction {})",
        user_id,
        plan.name,
        transaction.id
    );

    Ok(UpgradeOutcome::Pending(PendingPaymentResponse {
        success: true,
        transaction_id: transaction.id,
        amount: transaction.amount,
        currency: transaction.currency,
        plan: Some(plan),
        credit_units: None,
    }))
}

/// Starts a renewal of an expired or payment failed subscription.
pub async fn initiate_renewal(pool: &PgPool, user_id: Uuid) -> Res<PendingPaymentResponse> {
    let latest = db::subscription::get_latest_subscription(pool, user_id).await?;
    let status = plan::current_status(latest.as_ref());
    ensure_action(status, SubscriptionAction::Renew)?;
    let subscription = latest.ok_or_else(|| AppError::NotFound("No subscription to renew".to_string()))?;

    let plan = db::plan::get_plan_by_id(pool, subscription.plan_id).await?;
    let transaction = db::transaction::insert_transaction(
        pool,
        TransactionCreateRequest {
            user_id,
            kind: TransactionKind::Renewal,
            plan_id: Some(plan.id),
            subscription_id: Some(subscription.id),
            credit_units: None,
            amount: plan.price,
            currency: plan.currency.clone(),
        },
    )
    .await?;

    Ok(PendingPaymentResponse {
        success: true,
        transaction_id: transaction.id,
        amount: transaction.amount,
        currency: transaction.currency,
        plan: Some(plan),
        credit_units: None,
    })
}

/// Records a pending credit bundle purchase.
pub async fn initiate_credit_purchase(pool: &PgPool, user_id: Uuid, units: i32) -> Res<PendingPaymentResponse> {
    let bundle = CreditBundle::from_units(units).ok_or_else(|| {
        AppError::BadRequest(format!(
            "Unknown credit bundle {}; choose one of {:?}",
            units,
            CreditBundle::ALL.map(|b| b.units())
        ))
    })?;

    let transaction = db::transaction::insert_transaction(
        pool,
        TransactionCreateRequest {
            user_id,
            kind: TransactionKind::Credits,
            plan_id: None,
            subscription_id: None,
            credit_units: Some(bundle.units()),
            amount: bundle.price(),
            currency: bundle.currency().to_string(),
        },
    )
    .await?;

    Ok(PendingPaymentResponse {
        success: true,
        transaction_id: transaction.id,
        amount: transaction.amount,
        currency: transaction.currency,
        plan: None,
        credit_units: Some(bundle.units()),
    })
}

/// Loads a transaction owned by `user_id` that can still be paid.
pub async fn get_payable_transaction(pool: &PgPool, user_id: Uuid, transaction_id: Uuid) -> Res<PaymentTransaction> {
    let transaction = db::transaction::get_transaction_by_id(pool, transaction_id).await?;
    if transaction.user_id != user_id {
        return Err(AppError::NotFound("Transaction not found".to_string()));
    }
    if transaction.status()? != TransactionStatus::Pending {
        return Err(AppError::Conflict(format!(
            "Transaction is already {}",
            transaction.status
        )));
    }
    Ok(transaction)
}

/// Product name and description shown on the vendor checkout page.
pub async fn describe_transaction(pool: &PgPool, transaction: &PaymentTransaction) -> Res<(String, String)> {
    match transaction.kind()? {
        TransactionKind::Credits => {
            let units = transaction.credit_units.unwrap_or_default();
            Ok((
                format!("{} request credits", units),
                format!("One-off bundle of {} OCR requests", units),
            ))
        }
        kind => {
            let plan_id = transaction
                .plan_id
                .ok_or_else(|| AppError::Internal(format!("Transaction {} has no plan", transaction.id)))?;
            let plan = db::plan::get_plan_by_id(pool, plan_id).await?;
            let verb = if kind == TransactionKind::Renewal { "Renewal" } else { "Subscription" };
            Ok((
                format!("TextExtract {} plan", plan.name),
                format!(
                    "{} of the {} plan, {} requests per {}",
                    verb, plan.name, plan.max_requests_per_month, plan.interval
                ),
            ))
        }
    }
}

/// Locks the user row and returns their live subscription.
async fn lock_live_subscription(conn: &mut PgConnection, user_id: Uuid) -> Res<(User, Subscription)> {
    let user = db::user::lock_user(&mut *conn, user_id).await?;
    let subscription = db::subscription::get_live_subscription(&mut *conn, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("No active subscription".to_string()))?;
    Ok((user, subscription))
}

/// Cancels immediately. The row is kept with status `cancelled` and the
/// user drops to free-plan limits.
pub async fn cancel_subscription(pool: &PgPool, user_id: Uuid) -> Res<Subscription> {
    let mut tx = pool.begin().await?;
    let (_, mut subscription) = lock_live_subscription(&mut tx, user_id).await?;
    ensure_action(subscription.status, SubscriptionAction::Cancel)?;

    lifecycle::cancelled(&mut subscription, Utc::now())?;
    let subscription = db::subscription::save_subscription(&mut *tx, &subscription).await?;

    let free_plan = db::plan::get_free_plan(&mut *tx).await?;
    db::user::apply_plan_limits(&mut *tx, user_id, &free_plan).await?;
    tx.commit().await?;

    log::info!("User {} cancelled subscription {}", user_id, subscription.id);
    Ok(subscription)
}

pub async fn set_auto_renewal(pool: &PgPool, user_id: Uuid, enabled: bool) -> Res<Subscription> {
    let mut tx = pool.begin().await?;
    let (_, mut subscription) = lock_live_subscription(&mut tx, user_id).await?;
    ensure_action(subscription.status, SubscriptionAction::ToggleAutoRenewal)?;

    subscription.auto_renewal = enabled;
    let subscription = db::subscription::save_subscription(&mut *tx, &subscription).await?;
    tx.commit().await?;

    log::info!(
        "User {} set auto renewal to {} on {}",
        user_id,
        enabled,
        subscription.id
    );
    Ok(subscription)
}

/// Payment method updates are offered in every state but the free tier.
fn check_payment_method_update(latest: Option<&Subscription>) -> Res<()> {
    ensure_action(plan::current_status(latest), SubscriptionAction::UpdatePaymentMethod)
}

/// Every route that saves a card goes through this guard.
pub async fn ensure_payment_method_update_allowed(pool: &PgPool, user_id: Uuid) -> Res<()> {
    let latest = db::subscription::get_latest_subscription(pool, user_id).await?;
    check_payment_method_update(latest.as_ref())
}

pub async fn list_transactions(
    pool: &PgPool,
    user_id: Uuid,
    limit: Option<i64>,
    offset: Option<i64>,
) -> Res<(Vec<PaymentTransaction>, i64, i64)> {
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = offset.unwrap_or(0).max(0);
    let transactions = db::transaction::get_transactions_by_user(pool, user_id, limit, offset).await?;
    Ok((transactions, limit, offset))
}

async fn insert_active(
    conn: &mut PgConnection,
    user_id: Uuid,
    plan: &SubscriptionPlan,
    provider: PaymentProvider,
    external_id: Option<&str>,
    billing: &BillingConfig,
) -> Res<Subscription> {
    let now = Utc::now();
    let request = SubscriptionCreateRequest {
        user_id,
        plan_id: plan.id,
        status: sub::next_status(SubscriptionStatus::FreeTier, SubscriptionEvent::CheckoutCompleted)?,
        start_date: now,
        end_date: now + Duration::days(billing.period_days),
        auto_renewal: true,
        payment_provider: Some(provider.as_str().to_string()),
        external_subscription_id: external_id.map(str::to_string),
    };
    db::subscription::insert_subscription(conn, request).await
}

/// How a confirmed plan purchase lands on the user's live subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PurchaseStep {
    /// No live row: start a new one.
    Insert,
    /// Same plan bought again while active: extend the period.
    Extend,
    Recover,
    Renew,
    /// Different plan: close the live row, then start a new one.
    Replace(SubscriptionEvent),
}

fn purchase_step(live: Option<SubscriptionStatus>, same_plan: bool) -> Res<PurchaseStep> {
    use SubscriptionStatus as S;

    let step = match (live, same_plan) {
        (None, _) => PurchaseStep::Insert,
        (Some(S::Active), true) => PurchaseStep::Extend,
        (Some(S::Active), false) => PurchaseStep::Replace(SubscriptionEvent::Cancelled),
        (Some(S::PastDue), true) => PurchaseStep::Recover,
        (Some(S::PaymentFailed), true) => PurchaseStep::Renew,
        (Some(S::PaymentFailed), false) => PurchaseStep::Replace(SubscriptionEvent::PeriodEnded),
        (Some(status), _) => {
            return Err(AppError::Conflict(format!(
                "Cannot switch plans while the subscription is {}",
                status
            )));
        }
    };
    Ok(step)
}

/// Applies a paid plan purchase to the user's subscriptions.
async fn apply_plan_purchase(
    conn: &mut PgConnection,
    user_id: Uuid,
    plan: &SubscriptionPlan,
    provider: PaymentProvider,
    external_id: Option<&str>,
    billing: &BillingConfig,
) -> Res<Subscription> {
    let now = Utc::now();
    let live = db::subscription::get_live_subscription(&mut *conn, user_id).await?;
    let step = purchase_step(
        live.as_ref().map(|s| s.status),
        live.as_ref().is_some_and(|s| s.plan_id == plan.id),
    )?;

    let Some(mut current) = live else {
        return insert_active(conn, user_id, plan, provider, external_id, billing).await;
    };

    match step {
        PurchaseStep::Insert => insert_active(conn, user_id, plan, provider, external_id, billing).await,
        PurchaseStep::Extend => {
            lifecycle::renewal_succeeded(&mut current, now, billing.period_days)?;
            db::subscription::save_subscription(&mut *conn, &current).await
        }
        PurchaseStep::Recover => {
            lifecycle::payment_recovered(&mut current, now, billing.period_days)?;
            db::subscription::save_subscription(&mut *conn, &current).await
        }
        PurchaseStep::Renew => {
            lifecycle::renewed(&mut current, now, billing.period_days)?;
            db::subscription::save_subscription(&mut *conn, &current).await
        }
        PurchaseStep::Replace(event) => {
            // the old row gives up the live slot before the new one takes it
            if event == SubscriptionEvent::Cancelled {
                lifecycle::cancelled(&mut current, now)?;
            } else {
                lifecycle::period_ended(&mut current)?;
            }
            db::subscription::save_subscription(&mut *conn, &current).await?;
            log::info!(
                "User {} switched plans, subscription {} is now {}",
                user_id,
                current.id,
                current.status
            );
            insert_active(conn, user_id, plan, provider, external_id, billing).await
        }
    }
}

/// Renews the subscription a renewal transaction was issued for. An active
/// subscription is extended, a past due one recovered and a lapsed one
/// starts a fresh period.
async fn apply_renewal(
    conn: &mut PgConnection,
    transaction: &PaymentTransaction,
    billing: &BillingConfig,
) -> Res<Subscription> {
    let subscription_id = transaction
        .subscription_id
        .ok_or_else(|| AppError::Internal(format!("Renewal {} has no subscription", transaction.id)))?;
    let mut subscription = db::subscription::get_subscription_by_id(&mut *conn, subscription_id).await?;
    let now = Utc::now();
    match subscription.status {
        SubscriptionStatus::Active => lifecycle::renewal_succeeded(&mut subscription, now, billing.period_days)?,
        SubscriptionStatus::PastDue => lifecycle::payment_recovered(&mut subscription, now, billing.period_days)?,
        _ => lifecycle::renewed(&mut subscription, now, billing.period_days)?,
    }
    db::subscription::save_subscription(&mut *conn, &subscription).await
}

/// Settles a pending transaction after the provider confirmed payment.
///
/// Safe to call more than once for the same transaction: the success
/// redirect and the webhook can both arrive, and only the first applies the
/// purchase. Later calls return the recorded outcome.
pub async fn complete_transaction(
    pool: &PgPool,
    transaction_id: Uuid,
    provider: PaymentProvider,
    external_id: Option<&str>,
    payload: Option<serde_json::Value>,
    billing: &BillingConfig,
) -> Res<CompletionResponse> {
    let mut tx = pool.begin().await?;
    let transaction = db::transaction::lock_transaction(&mut *tx, transaction_id).await?;

    match transaction.status()? {
        TransactionStatus::Succeeded => {
            tx.commit().await?;
            log::debug!("Transaction {} already completed", transaction_id);
            return completion_response(pool, transaction, "Payment already processed").await;
        }
        TransactionStatus::Failed => {
            return Err(AppError::Conflict("Transaction has already failed".to_string()));
        }
        TransactionStatus::Pending => {}
    }

    let user = db::user::lock_user(&mut *tx, transaction.user_id).await?;
    let kind = transaction.kind()?;

    let subscription = match kind {
        TransactionKind::Subscription => {
            let plan_id = transaction
                .plan_id
                .ok_or_else(|| AppError::Internal(format!("Transaction {} has no plan", transaction.id)))?;
            let plan = db::plan::get_plan_by_id(&mut *tx, plan_id).await?;
            let subscription = apply_plan_purchase(&mut tx, user.id, &plan, provider, external_id, billing).await?;
            db::user::apply_plan_limits(&mut *tx, user.id, &plan).await?;
            Some(subscription)
        }
        TransactionKind::Renewal => {
            let subscription = apply_renewal(&mut tx, &transaction, billing).await?;
            let plan = db::plan::get_plan_by_id(&mut *tx, subscription.plan_id).await?;
            db::user::apply_plan_limits(&mut *tx, user.id, &plan).await?;
            Some(subscription)
        }
        TransactionKind::Credits => {
            let units = transaction
                .credit_units
                .ok_or_else(|| AppError::Internal(format!("Transaction {} has no units", transaction.id)))?;
            db::user::add_credit_requests(&mut *tx, user.id, units).await?;
            None
        }
    };

    if let Some(external_id) = external_id.filter(|_| transaction.external_id.is_none()) {
        db::transaction::set_external_reference(&mut *tx, transaction.id, provider.as_str(), external_id).await?;
    }
    let transaction = db::transaction::set_transaction_status(
        &mut *tx,
        transaction.id,
        TransactionStatus::Succeeded,
        subscription.as_ref().map(|s| s.id),
        payload,
    )
    .await?;
    tx.commit().await?;

    log::info!(
        "Completed {} transaction {} for user {} via {}",
        kind.as_str(),
        transaction.id,
        user.id,
        provider.as_str()
    );
    completion_response(pool, transaction, "Payment processed successfully").await
}

async fn completion_response(
    pool: &PgPool,
    transaction: PaymentTransaction,
    message: &str,
) -> Res<CompletionResponse> {
    let user = db::user::get_user_by_id(pool, transaction.user_id).await?;
    let subscription = match transaction.subscription_id {
        Some(id) => Some(db::subscription::get_subscription_by_id(pool, id).await?),
        None => None,
    };
    let plan = match &subscription {
        Some(sub) => Some(db::plan::get_plan_by_id(pool, sub.plan_id).await?),
        None => None,
    };

    Ok(CompletionResponse {
        success: true,
        message: message.to_string(),
        transaction,
        plan,
        subscription,
        credit_requests: user.credit_requests,
    })
}

/// Marks a pending transaction failed. A declined renewal of an active
/// subscription opens its grace window. Settled transactions are left alone.
pub async fn fail_transaction(
    pool: &PgPool,
    transaction_id: Uuid,
    payload: Option<serde_json::Value>,
    billing: &BillingConfig,
) -> Res<()> {
    let mut tx = pool.begin().await?;
    let transaction = db::transaction::lock_transaction(&mut *tx, transaction_id).await?;
    if transaction.status()? != TransactionStatus::Pending {
        tx.commit().await?;
        return Ok(());
    }

    if let (TransactionKind::Renewal, Some(subscription_id)) = (transaction.kind()?, transaction.subscription_id) {
        db::user::lock_user(&mut *tx, transaction.user_id).await?;
        let mut subscription = db::subscription::get_subscription_by_id(&mut *tx, subscription_id).await?;
        if subscription.status == SubscriptionStatus::Active {
            lifecycle::renewal_failed(&mut subscription, Utc::now(), billing.grace_period_days)?;
            db::subscription::save_subscription(&mut *tx, &subscription).await?;
            log::info!(
                "Subscription {} is past due until {:?}",
                subscription.id,
                subscription.grace_period_end_date
            );
        }
    }

    db::transaction::set_transaction_status(&mut *tx, transaction_id, TransactionStatus::Failed, None, payload)
        .await?;
    tx.commit().await?;
    log::info!("Transaction {} marked failed", transaction_id);
    Ok(())
}
