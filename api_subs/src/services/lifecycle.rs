//! In-memory status changes on a subscription row. Each function runs the
//! event through the transition table first and only then touches dates, so
//! a rejected event leaves the row untouched.

use chrono::{DateTime, Duration, Utc};
use common::{
    error::Res,
    sub::{self, SubscriptionEvent, SubscriptionStatus},
};
use db::models::subscription::Subscription;

fn transition(sub: &mut Subscription, event: SubscriptionEvent) -> Res<SubscriptionStatus> {
    let next = sub::next_status(sub.status, event)?;
    sub.status = next;
    Ok(next)
}

fn start_period(sub: &mut Subscription, start: DateTime<Utc>, period_days: i64) {
    sub.start_date = start;
    sub.end_date = start + Duration::days(period_days);
    sub.renewal_date = Some(sub.end_date);
    sub.grace_period_end_date = None;
}

fn mark_paid(sub: &mut Subscription, now: DateTime<Utc>) {
    sub.payment_status = Some("paid".to_string());
    sub.last_payment_date = Some(now);
}

/// A renewal charge went through. The new period starts where the old one
/// ended, or now if that is already in the past.
pub fn renewal_succeeded(sub: &mut Subscription, now: DateTime<Utc>, period_days: i64) -> Res<()> {
    transition(sub, SubscriptionEvent::RenewalSucceeded)?;
    let start = sub.end_date.max(now);
    start_period(sub, start, period_days);
    mark_paid(sub, now);
    Ok(())
}

/// A renewal charge failed. Access is kept until the grace window closes.
pub fn renewal_failed(sub: &mut Subscription, now: DateTime<Utc>, grace_days: i64) -> Res<()> {
    transition(sub, SubscriptionEvent::RenewalFailed)?;
    sub.payment_status = Some("failed".to_string());
    sub.grace_period_end_date = Some(now + Duration::days(grace_days));
    Ok(())
}

/// The customer paid while past due.
pub fn payment_recovered(sub: &mut Subscription, now: DateTime<Utc>, period_days: i64) -> Res<()> {
    transition(sub, SubscriptionEvent::PaymentRecovered)?;
    start_period(sub, now, period_days);
    mark_paid(sub, now);
    Ok(())
}

pub fn grace_elapsed(sub: &mut Subscription) -> Res<()> {
    transition(sub, SubscriptionEvent::GraceElapsed)?;
    sub.payment_status = Some("failed".to_string());
    Ok(())
}

pub fn period_ended(sub: &mut Subscription) -> Res<()> {
    transition(sub, SubscriptionEvent::PeriodEnded)?;
    sub.renewal_date = None;
    sub.grace_period_end_date = None;
    Ok(())
}

/// Cancellation takes effect immediately: the period is closed at `now`.
pub fn cancelled(sub: &mut Subscription, now: DateTime<Utc>) -> Res<()> {
    transition(sub, SubscriptionEvent::Cancelled)?;
    sub.end_date = now;
    sub.renewal_date = None;
    sub.auto_renewal = false;
    sub.grace_period_end_date = None;
    Ok(())
}

/// An expired or payment failed subscription was paid for again.
pub fn renewed(sub: &mut Subscription, now: DateTime<Utc>, period_days: i64) -> Res<()> {
    transition(sub, SubscriptionEvent::Renewed)?;
    start_period(sub, now, period_days);
    mark_paid(sub, now);
    Ok(())
}

/// Active and its renewal date has passed.
pub fn is_due(sub: &Subscription, now: DateTime<Utc>) -> bool {
    sub.status == SubscriptionStatus::Active && sub.renewal_date.unwrap_or(sub.end_date) <= now
}

/// Past due and the grace window has closed.
pub fn is_grace_over(sub: &Subscription, now: DateTime<Utc>) -> bool {
    sub.status == SubscriptionStatus::PastDue
        && sub.grace_period_end_date.is_some_and(|end| end <= now)
}
