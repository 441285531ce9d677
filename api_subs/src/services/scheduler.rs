//! Periodic renewal pass.
//!
//! Each tick charges subscriptions whose period has run out, moves failed
//! charges into the grace window, and closes out subscriptions whose grace
//! window has elapsed. Every row is re-read under the owner's user lock, so
//! a tick racing a checkout completion sees the committed state.
//!
//! A renewal charge runs in three steps: the pending transaction is
//! committed, the card is charged with no database transaction open, and the
//! result is settled through the billing service.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    env_config::{BillingConfig, Config},
    error::{AppError, Res},
    stripe as stripe_common,
    sub::{PaymentProvider, TransactionKind},
};
use db::{
    dtos::transaction::TransactionCreateRequest,
    models::{payment_method::PaymentMethod, subscription::Subscription, user::User},
};
use serde_json::json;
use sqlx::PgPool;
use stripe::Client;
use tokio::time::{self, MissedTickBehavior};
use uuid::Uuid;

use crate::services::{lifecycle, pay, sub};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalDecision {
    /// Charge the stored card for another period.
    Charge,
    /// Nothing to charge; let the period end.
    Expire,
}

pub fn renewal_decision(sub: &Subscription, has_payment_method: bool) -> RenewalDecision {
    if sub.auto_renewal && has_payment_method {
        RenewalDecision::Charge
    } else {
        RenewalDecision::Expire
    }
}

/// An off-session charge for a committed pending renewal transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewalCharge {
    pub transaction_id: Uuid,
    pub subscription_id: Uuid,
    pub customer: String,
    pub payment_method_id: String,
    /// Minor units.
    pub amount: i64,
    pub currency: String,
}

/// Charges a stored card without the customer present.
#[async_trait]
pub trait RenewalCharger: Send + Sync {
    /// Returns the vendor payment reference of a charge that went through.
    /// Declines and incomplete payments are errors.
    async fn charge(&self, charge: &RenewalCharge) -> Res<String>;
}

#[async_trait]
impl RenewalCharger for Client {
    async fn charge(&self, charge: &RenewalCharge) -> Res<String> {
        let customer = stripe_common::parse_customer_id(&charge.customer)?;
        let intent = pay::charge_saved_method(
            self,
            customer,
            &charge.payment_method_id,
            charge.amount,
            &charge.currency,
            charge.transaction_id,
        )
        .await?;
        if !pay::is_intent_succeeded(&intent) {
            return Err(AppError::Vendor(format!(
                "Payment intent {} ended in status {}",
                intent.id, intent.status
            )));
        }
        Ok(intent.id.to_string())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub renewed: usize,
    pub past_due: usize,
    pub expired: usize,
    pub payment_failed: usize,
}

pub fn spawn(pool: Arc<PgPool>, config: Arc<Config>) {
    let stripe = (!config.stripe.secret_key.is_empty())
        .then(|| stripe_common::create_client(&config.stripe.secret_key));
    let billing = config.billing.clone();
    let period = Duration::from_secs(billing.scheduler_interval_secs.max(1));

    tokio::spawn(async move {
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let charger = stripe.as_ref().map(|client| client as &dyn RenewalCharger);
            match run_once(&pool, charger, &billing, Utc::now()).await {
                Ok(summary) if summary != TickSummary::default() => {
                    log::info!("Renewal pass finished: {:?}", summary);
                }
                Ok(_) => log::debug!("Renewal pass found nothing to do"),
                Err(e) => log::error!("Renewal pass failed: {}", e),
            }
        }
    });
    log::info!("Renewal scheduler started, every {:?}", period);
}

/// One scheduler pass. A failure on one subscription is logged and does not
/// stop the others. Without a charger every due subscription expires.
pub async fn run_once(
    pool: &PgPool,
    charger: Option<&dyn RenewalCharger>,
    billing: &BillingConfig,
    now: DateTime<Utc>,
) -> Res<TickSummary> {
    let mut summary = TickSummary::default();

    for due in db::subscription::get_due_for_renewal(pool, now).await? {
        match process_due(pool, charger, billing, &due, now).await {
            Ok(Some(outcome)) => outcome.record(&mut summary),
            Ok(None) => {}
            Err(e) => log::error!("Renewal of subscription {} failed: {}", due.id, e),
        }
    }

    for lapsed in db::subscription::get_grace_expired(pool, now).await? {
        match process_grace_expired(pool, &lapsed, now).await {
            Ok(true) => summary.payment_failed += 1,
            Ok(false) => {}
            Err(e) => log::error!("Closing grace window of {} failed: {}", lapsed.id, e),
        }
    }

    Ok(summary)
}

enum DueOutcome {
    Renewed,
    PastDue,
    Expired,
}

impl DueOutcome {
    fn record(self, summary: &mut TickSummary) {
        match self {
            DueOutcome::Renewed => summary.renewed += 1,
            DueOutcome::PastDue => summary.past_due += 1,
            DueOutcome::Expired => summary.expired += 1,
        }
    }
}

/// Stripe card plus the customer it is attached to, when both exist.
fn chargeable_method(user: &User, method: Option<PaymentMethod>) -> Option<(String, PaymentMethod)> {
    let customer = user.stripe_customer_id.clone()?;
    method
        .filter(|m| m.provider == PaymentProvider::Stripe.as_str())
        .map(|m| (customer, m))
}

enum DuePlan {
    Charge(RenewalCharge),
    Expired,
}

/// Decides what to do with a due subscription under the user lock. Expiry is
/// applied right away; a charge only gets its pending transaction recorded.
async fn plan_due(
    pool: &PgPool,
    can_charge: bool,
    candidate: &Subscription,
    now: DateTime<Utc>,
) -> Res<Option<DuePlan>> {
    let mut tx = pool.begin().await?;
    let user = db::user::lock_user(&mut *tx, candidate.user_id).await?;
    let mut sub = db::subscription::get_subscription_by_id(&mut *tx, candidate.id).await?;
    if !lifecycle::is_due(&sub, now) {
        return Ok(None);
    }
    if db::transaction::has_pending_renewal(&mut *tx, sub.id).await? {
        log::warn!("Subscription {} already has a renewal charge in flight", sub.id);
        return Ok(None);
    }

    let method = db::payment_method::get_default_method(&mut *tx, user.id).await?;
    let target = chargeable_method(&user, method).filter(|_| can_charge);

    let plan = match (renewal_decision(&sub, target.is_some()), target) {
        (RenewalDecision::Charge, Some((customer, method))) => {
            let plan = db::plan::get_plan_by_id(&mut *tx, sub.plan_id).await?;
            let transaction = db::transaction::insert_transaction(
                &mut *tx,
                TransactionCreateRequest {
                    user_id: sub.user_id,
                    kind: TransactionKind::Renewal,
                    plan_id: Some(plan.id),
                    subscription_id: Some(sub.id),
                    credit_units: None,
                    amount: plan.price,
                    currency: plan.currency.clone(),
                },
            )
            .await?;
            DuePlan::Charge(RenewalCharge {
                transaction_id: transaction.id,
                subscription_id: sub.id,
                customer,
                payment_method_id: method.provider_payment_id,
                amount: plan.price,
                currency: plan.currency,
            })
        }
        _ => {
            lifecycle::period_ended(&mut sub)?;
            db::subscription::save_subscription(&mut *tx, &sub).await?;
            let free_plan = db::plan::get_free_plan(&mut *tx).await?;
            db::user::apply_plan_limits(&mut *tx, user.id, &free_plan).await?;
            log::info!("Subscription {} expired at end of period", sub.id);
            DuePlan::Expired
        }
    };

    tx.commit().await?;
    Ok(Some(plan))
}

async fn process_due(
    pool: &PgPool,
    charger: Option<&dyn RenewalCharger>,
    billing: &BillingConfig,
    candidate: &Subscription,
    now: DateTime<Utc>,
) -> Res<Option<DueOutcome>> {
    let Some(plan) = plan_due(pool, charger.is_some(), candidate, now).await? else {
        return Ok(None);
    };
    let (charger, charge) = match (plan, charger) {
        (DuePlan::Expired, _) => return Ok(Some(DueOutcome::Expired)),
        (DuePlan::Charge(charge), Some(charger)) => (charger, charge),
        (DuePlan::Charge(charge), None) => {
            return Err(AppError::Internal(format!(
                "Renewal transaction {} has no charger",
                charge.transaction_id
            )));
        }
    };

    match charger.charge(&charge).await {
        Ok(reference) => {
            sub::complete_transaction(
                pool,
                charge.transaction_id,
                PaymentProvider::Stripe,
                Some(&reference),
                Some(json!({ "payment_intent": reference, "off_session": true })),
                billing,
            )
            .await
            .inspect_err(|e| {
                log::error!(
                    "Charge {} for transaction {} succeeded but settling failed: {}",
                    reference,
                    charge.transaction_id,
                    e
                )
            })?;
            log::info!("Subscription {} renewed off session", charge.subscription_id);
            Ok(Some(DueOutcome::Renewed))
        }
        Err(e) => {
            log::warn!("Renewal charge for {} declined: {}", charge.subscription_id, e);
            sub::fail_transaction(
                pool,
                charge.transaction_id,
                Some(json!({ "reason": e.to_string(), "off_session": true })),
                billing,
            )
            .await?;
            Ok(Some(DueOutcome::PastDue))
        }
    }
}

async fn process_grace_expired(pool: &PgPool, candidate: &Subscription, now: DateTime<Utc>) -> Res<bool> {
    let mut tx = pool.begin().await?;
    db::user::lock_user(&mut *tx, candidate.user_id).await?;
    let mut sub = db::subscription::get_subscription_by_id(&mut *tx, candidate.id).await?;
    if !lifecycle::is_grace_over(&sub, now) {
        return Ok(false);
    }

    lifecycle::grace_elapsed(&mut sub)?;
    db::subscription::save_subscription(&mut *tx, &sub).await?;
    let free_plan = db::plan::get_free_plan(&mut *tx).await?;
    db::user::apply_plan_limits(&mut *tx, sub.user_id, &free_plan).await?;
    tx.commit().await?;

    log::info!("Subscription {} moved to payment_failed after grace", sub.id);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::lifecycle::tests::subscription;
    use chrono::Duration as ChronoDuration;
    use common::sub::SubscriptionStatus;

    #[test]
    fn auto_renewing_subscription_with_card_is_charged() {
        let sub = subscription(SubscriptionStatus::Active, Utc::now());
        assert_eq!(renewal_decision(&sub, true), RenewalDecision::Charge);
    }

    #[test]
    fn missing_card_lets_the_period_end() {
        let sub = subscription(SubscriptionStatus::Active, Utc::now());
        assert_eq!(renewal_decision(&sub, false), RenewalDecision::Expire);
    }

    #[test]
    fn disabled_auto_renewal_is_never_charged() {
        let mut sub = subscription(SubscriptionStatus::Active, Utc::now());
        sub.auto_renewal = false;
        assert_eq!(renewal_decision(&sub, true), RenewalDecision::Expire);
    }

    #[test]
    fn failed_then_lapsed_renewal_walks_the_grace_path() {
        let now = Utc::now();
        let mut sub = subscription(SubscriptionStatus::Active, now - ChronoDuration::minutes(1));
        assert!(lifecycle::is_due(&sub, now));

        lifecycle::renewal_failed(&mut sub, now, 5).unwrap();
        assert!(!lifecycle::is_due(&sub, now));
        assert!(!lifecycle::is_grace_over(&sub, now + ChronoDuration::days(4)));
        assert!(lifecycle::is_grace_over(&sub, now + ChronoDuration::days(5)));

        lifecycle::grace_elapsed(&mut sub).unwrap();
        assert_eq!(sub.status, SubscriptionStatus::PaymentFailed);
    }

    #[test]
    fn only_stripe_cards_with_a_customer_are_chargeable() {
        let now = Utc::now();
        let user = User {
            id: uuid::Uuid::new_v4(),
            email: "a@b.co".to_string(),
            full_name: None,
            plan_type: "basic".to_string(),
            device_limit: 3,
            max_requests_per_month: 200,
            credit_requests: 0,
            email_verified: true,
            status: "active".to_string(),
            stripe_customer_id: Some("cus_123".to_string()),
            last_login: None,
            created_at: now,
            updated_at: now,
        };
        let method = PaymentMethod {
            id: uuid::Uuid::new_v4(),
            user_id: user.id,
            provider: "stripe".to_string(),
            provider_payment_id: "pm_123".to_string(),
            card_last4: Some("4242".to_string()),
            card_brand: Some("visa".to_string()),
            card_exp_month: Some(12),
            card_exp_year: Some(2030),
            is_default: true,
            created_at: now,
            updated_at: now,
        };

        assert!(chargeable_method(&user, Some(method.clone())).is_some());
        assert!(chargeable_method(&user, None).is_none());

        let paypal = PaymentMethod {
            provider: "paypal".to_string(),
            ..method.clone()
        };
        assert!(chargeable_method(&user, Some(paypal)).is_none());

        let no_customer = User {
            stripe_customer_id: None,
            ..user
        };
        assert!(chargeable_method(&no_customer, Some(method)).is_none());
    }
}
