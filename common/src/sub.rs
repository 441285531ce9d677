//! Subscription status model.
//!
//! A user's subscription is a finite state machine. Every status change in
//! the backend goes through [`next_status`], and every UI affordance on the
//! client is derived from [`available_actions`], so neither side decides on
//! its own what a status permits.
//!
//! ```text
//!  FreeTier --checkout--> Active --renewal failed--> PastDue --grace elapsed--> PaymentFailed
//!                          |  ^                        |                          |
//!                          |  +----payment recovered---+                          |
//!                          |  +----------------------renewed----------------------+
//!                          |  +----------renewed----------- Expired <--period ended--+
//!                          +--cancelled--> Cancelled
//!
//!  PaymentFailed --period ended--> Expired   (replaced by a new plan)
//! ```

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of a user's subscription. Stored as text in the
/// `subscriptions.status` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// No paid subscription row exists.
    FreeTier,
    Active,
    /// Renewal charge failed, access retained until the grace window ends.
    PastDue,
    /// Grace window exhausted without a successful payment.
    PaymentFailed,
    /// Period ended without renewal.
    Expired,
    /// Cancelled by the user. Terminal for the row.
    Cancelled,
}

impl SubscriptionStatus {
    pub const ALL: [SubscriptionStatus; 6] = [
        SubscriptionStatus::FreeTier,
        SubscriptionStatus::Active,
        SubscriptionStatus::PastDue,
        SubscriptionStatus::PaymentFailed,
        SubscriptionStatus::Expired,
        SubscriptionStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::FreeTier => "free_tier",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::PaymentFailed => "payment_failed",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }

    /// Statuses counted by the one-live-subscription-per-user rule.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Active
                | SubscriptionStatus::PastDue
                | SubscriptionStatus::PaymentFailed
        )
    }

    /// Whether the subscribed plan's limits apply. Every other status
    /// resolves to the free plan.
    pub fn grants_plan(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::PastDue)
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown subscription status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for SubscriptionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free_tier" => Ok(SubscriptionStatus::FreeTier),
            "active" => Ok(SubscriptionStatus::Active),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            "payment_failed" => Ok(SubscriptionStatus::PaymentFailed),
            "expired" => Ok(SubscriptionStatus::Expired),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Billing events that move a subscription between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionEvent {
    CheckoutCompleted,
    RenewalSucceeded,
    RenewalFailed,
    PaymentRecovered,
    GraceElapsed,
    PeriodEnded,
    Cancelled,
    Renewed,
}

impl fmt::Display for SubscriptionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubscriptionEvent::CheckoutCompleted => "checkout_completed",
            SubscriptionEvent::RenewalSucceeded => "renewal_succeeded",
            SubscriptionEvent::RenewalFailed => "renewal_failed",
            SubscriptionEvent::PaymentRecovered => "payment_recovered",
            SubscriptionEvent::GraceElapsed => "grace_elapsed",
            SubscriptionEvent::PeriodEnded => "period_ended",
            SubscriptionEvent::Cancelled => "cancelled",
            SubscriptionEvent::Renewed => "renewed",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("Cannot apply '{event}' to a subscription in status '{from}'")]
pub struct TransitionError {
    pub from: SubscriptionStatus,
    pub event: SubscriptionEvent,
}

/// The transition table. Returns the status reached by applying `event` in
/// status `from`, or an error for every pair not listed.
pub fn next_status(
    from: SubscriptionStatus,
    event: SubscriptionEvent,
) -> Result<SubscriptionStatus, TransitionError> {
    use SubscriptionEvent as E;
    use SubscriptionStatus as S;

    let to = match (from, event) {
        (S::FreeTier, E::CheckoutCompleted) => S::Active,
        (S::Active, E::RenewalSucceeded) => S::Active,
        (S::Active, E::RenewalFailed) => S::PastDue,
        (S::PastDue, E::PaymentRecovered) => S::Active,
        (S::PastDue, E::GraceElapsed) => S::PaymentFailed,
        (S::Active | S::PastDue | S::PaymentFailed, E::PeriodEnded) => S::Expired,
        (S::Active, E::Cancelled) => S::Cancelled,
        (S::Expired | S::PaymentFailed, E::Renewed) => S::Active,
        _ => return Err(TransitionError { from, event }),
    };
    Ok(to)
}

/// Statuses reachable from `status` in one step.
pub fn allowed_transitions(status: SubscriptionStatus) -> &'static [SubscriptionStatus] {
    use SubscriptionStatus as S;
    match status {
        S::FreeTier => &[S::Active],
        S::Active => &[S::Active, S::PastDue, S::Expired, S::Cancelled],
        S::PastDue => &[S::Active, S::PaymentFailed, S::Expired],
        S::PaymentFailed => &[S::Active, S::Expired],
        S::Expired => &[S::Active],
        S::Cancelled => &[],
    }
}

pub fn is_transition_allowed(from: SubscriptionStatus, to: SubscriptionStatus) -> bool {
    allowed_transitions(from).contains(&to)
}

/// What a user may do from a given status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionAction {
    /// Start a paid plan, or switch to another one.
    Upgrade,
    Renew,
    Cancel,
    UpdatePaymentMethod,
    ToggleAutoRenewal,
    BuyCredits,
}

pub fn available_actions(status: SubscriptionStatus) -> Vec<SubscriptionAction> {
    use SubscriptionAction as A;
    use SubscriptionStatus as S;

    let mut actions = Vec::new();
    if status != S::PastDue {
        actions.push(A::Upgrade);
    }
    if matches!(status, S::Expired | S::PaymentFailed) {
        actions.push(A::Renew);
    }
    if status == S::Active {
        actions.push(A::Cancel);
    }
    if status != S::FreeTier {
        actions.push(A::UpdatePaymentMethod);
    }
    if status.is_live() {
        actions.push(A::ToggleAutoRenewal);
    }
    actions.push(A::BuyCredits);
    actions
}

pub fn is_action_allowed(status: SubscriptionStatus, action: SubscriptionAction) -> bool {
    available_actions(status).contains(&action)
}

/// Pay-as-you-go request bundles. Credits never expire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum CreditBundle {
    Small,
    Medium,
    Large,
}

impl CreditBundle {
    pub const ALL: [CreditBundle; 3] = [CreditBundle::Small, CreditBundle::Medium, CreditBundle::Large];

    pub fn units(&self) -> i32 {
        match self {
            CreditBundle::Small => 100,
            CreditBundle::Medium => 200,
            CreditBundle::Large => 300,
        }
    }

    /// Price in USD cents.
    pub fn price(&self) -> i64 {
        match self {
            CreditBundle::Small => 299,
            CreditBundle::Medium => 599,
            CreditBundle::Large => 799,
        }
    }

    pub fn currency(&self) -> &'static str {
        "usd"
    }

    pub fn from_units(units: i32) -> Option<Self> {
        CreditBundle::ALL.into_iter().find(|b| b.units() == units)
    }
}

impl TryFrom<i32> for CreditBundle {
    type Error = String;

    fn try_from(units: i32) -> Result<Self, Self::Error> {
        CreditBundle::from_units(units)
            .ok_or_else(|| format!("No credit bundle of {} requests", units))
    }
}

impl From<CreditBundle> for i32 {
    fn from(bundle: CreditBundle) -> i32 {
        bundle.units()
    }
}

/// What a payment transaction pays for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Subscription,
    Renewal,
    Credits,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Subscription => "subscription",
            TransactionKind::Renewal => "renewal",
            TransactionKind::Credits => "credits",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "subscription" => Some(TransactionKind::Subscription),
            "renewal" => Some(TransactionKind::Renewal),
            "credits" => Some(TransactionKind::Credits),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Succeeded,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Succeeded => "succeeded",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TransactionStatus::Pending),
            "succeeded" => Some(TransactionStatus::Succeeded),
            "failed" => Some(TransactionStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentProvider {
    Stripe,
    Paypal,
}

impl PaymentProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentProvider::Stripe => "stripe",
            PaymentProvider::Paypal => "paypal",
        }
    }
}

/// Formats minor units as a decimal amount, e.g. `599` -> `"5.99"`.
pub fn format_amount(minor_units: i64) -> String {
    format!("{}.{:02}", minor_units / 100, minor_units % 100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use SubscriptionEvent as E;
    use SubscriptionStatus as S;

    const EVENTS: [SubscriptionEvent; 8] = [
        E::CheckoutCompleted,
        E::RenewalSucceeded,
        E::RenewalFailed,
        E::PaymentRecovered,
        E::GraceElapsed,
        E::PeriodEnded,
        E::Cancelled,
        E::Renewed,
    ];

    #[test]
    fn documented_transitions_are_accepted() {
        assert_eq!(next_status(S::FreeTier, E::CheckoutCompleted), Ok(S::Active));
        assert_eq!(next_status(S::Active, E::RenewalFailed), Ok(S::PastDue));
        assert_eq!(next_status(S::PastDue, E::PaymentRecovered), Ok(S::Active));
        assert_eq!(next_status(S::PastDue, E::GraceElapsed), Ok(S::PaymentFailed));
        assert_eq!(next_status(S::PastDue, E::PeriodEnded), Ok(S::Expired));
        assert_eq!(next_status(S::Active, E::Cancelled), Ok(S::Cancelled));
        assert_eq!(next_status(S::Expired, E::Renewed), Ok(S::Active));
        assert_eq!(next_status(S::PaymentFailed, E::Renewed), Ok(S::Active));
    }

    #[test]
    fn cancelled_is_terminal() {
        for event in EVENTS {
            assert!(next_status(S::Cancelled, event).is_err(), "{event} left cancelled");
        }
        assert!(allowed_transitions(S::Cancelled).is_empty());
    }

    #[test]
    fn cannot_cancel_outside_active() {
        for status in S::ALL {
            let res = next_status(status, E::Cancelled);
            assert_eq!(res.is_ok(), status == S::Active, "{status}");
        }
    }

    #[test]
    fn transition_table_agrees_with_allowed_targets() {
        for from in S::ALL {
            for event in EVENTS {
                if let Ok(to) = next_status(from, event) {
                    assert!(is_transition_allowed(from, to), "{from} -> {to}");
                }
            }
        }
    }

    #[test]
    fn rejected_transition_reports_source_and_event() {
        let err = next_status(S::FreeTier, E::Renewed).unwrap_err();
        assert_eq!(err.from, S::FreeTier);
        assert_eq!(err.event, E::Renewed);
        assert!(err.to_string().contains("free_tier"));
    }

    #[test]
    fn actions_follow_status() {
        assert!(available_actions(S::Expired).contains(&SubscriptionAction::Renew));
        assert!(available_actions(S::PaymentFailed).contains(&SubscriptionAction::Renew));
        for status in [S::FreeTier, S::Active, S::PastDue, S::Cancelled] {
            assert!(!is_action_allowed(status, SubscriptionAction::Renew), "{status}");
        }

        for status in S::ALL {
            assert_eq!(
                is_action_allowed(status, SubscriptionAction::Upgrade),
                status != S::PastDue,
                "{status}"
            );
            assert_eq!(
                is_action_allowed(status, SubscriptionAction::Cancel),
                status == S::Active
            );
            assert_eq!(
                is_action_allowed(status, SubscriptionAction::UpdatePaymentMethod),
                status != S::FreeTier
            );
            assert!(is_action_allowed(status, SubscriptionAction::BuyCredits));
        }
    }

    #[test]
    fn lapsed_subscriptions_can_choose_another_plan() {
        for status in [S::Expired, S::PaymentFailed] {
            assert!(is_action_allowed(status, SubscriptionAction::Upgrade), "{status}");
            assert!(is_action_allowed(status, SubscriptionAction::Renew), "{status}");
        }
        // a payment failed row gives up its live slot before the new plan starts
        assert_eq!(next_status(S::PaymentFailed, E::PeriodEnded), Ok(S::Expired));
        assert!(!S::Expired.is_live());
    }

    #[test]
    fn only_active_and_past_due_grant_the_plan() {
        let granting: Vec<_> = S::ALL.into_iter().filter(|s| s.grants_plan()).collect();
        assert_eq!(granting, vec![S::Active, S::PastDue]);
    }

    #[test]
    fn status_strings_parse_back() {
        for status in S::ALL {
            assert_eq!(status.as_str().parse::<S>(), Ok(status));
        }
        assert!("trialing".parse::<S>().is_err());
        assert_eq!(serde_json::to_string(&S::PastDue).unwrap(), "\"past_due\"");
    }

    #[test]
    fn credit_bundles_have_tiered_prices() {
        assert_eq!(CreditBundle::from_units(200), Some(CreditBundle::Medium));
        assert_eq!(CreditBundle::Medium.price(), 599);
        assert_eq!(format_amount(CreditBundle::Medium.price()), "5.99");
        assert_eq!(format_amount(CreditBundle::Small.price()), "2.99");
        assert_eq!(format_amount(CreditBundle::Large.price()), "7.99");
        assert!(CreditBundle::from_units(150).is_none());

        let bundle: CreditBundle = serde_json::from_str("300").unwrap();
        assert_eq!(bundle, CreditBundle::Large);
        assert!(serde_json::from_str::<CreditBundle>("50").is_err());
    }
}
