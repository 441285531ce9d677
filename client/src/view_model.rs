//! What the subscription page renders, and the flows it starts. Every
//! affordance is derived from the status enum; nothing here compares status
//! strings.

use chrono::{DateTime, Utc};
use common::sub::{
    CreditBundle, SubscriptionAction, SubscriptionStatus, available_actions, format_amount,
};
use uuid::Uuid;

use crate::{
    error::{ClientError, Result},
    models::{Completion, Plan, Redirect, SetupSession, UserPlan},
    provider::{Checkout, PaymentProvider},
    subscription::SubscriptionApi,
};

#[derive(Debug, Clone, PartialEq)]
pub struct PlanOption {
    pub plan: Plan,
    pub price_label: String,
    pub is_current: bool,
    /// False for the plan already in effect while it is active.
    pub selectable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreditOption {
    pub bundle: CreditBundle,
    pub units: i32,
    pub price_label: String,
}

/// Plan catalog plus the user's plan and usage, as one snapshot.
#[derive(Debug, Clone)]
pub struct SubscriptionView {
    pub plans: Vec<Plan>,
    pub current: UserPlan,
}

impl SubscriptionView {
    pub async fn load(api: &SubscriptionApi) -> Result<Self> {
        let (plans, current) = futures::try_join!(api.plans(), api.user_plan())?;
        Ok(SubscriptionView { plans, current })
    }

    pub fn status(&self) -> SubscriptionStatus {
        self.current.usage.status
    }

    /// The plan whose limits apply, which is the free plan unless the
    /// subscription is active or past due.
    pub fn plan(&self) -> &Plan {
        &self.current.plan
    }

    pub fn actions(&self) -> Vec<SubscriptionAction> {
        available_actions(self.status())
    }

    pub fn can(&self, action: SubscriptionAction) -> bool {
        self.actions().contains(&action)
    }

    pub fn status_label(&self) -> &'static str {
        match self.status() {
            SubscriptionStatus::FreeTier => "Free",
            SubscriptionStatus::Active => "Active",
            SubscriptionStatus::PastDue => "Payment past due",
            SubscriptionStatus::PaymentFailed => "Payment failed",
            SubscriptionStatus::Expired => "Expired",
            SubscriptionStatus::Cancelled => "Cancelled",
        }
    }

    pub fn plan_options(&self) -> Vec<PlanOption> {
        let can_upgrade = self.can(SubscriptionAction::Upgrade);
        let active = self.status() == SubscriptionStatus::Active;

        self.plans
            .iter()
            .map(|plan| {
                let is_current = plan.id == self.current.plan.id;
                PlanOption {
                    price_label: price_label(plan.price, &plan.currency, Some(&plan.interval)),
                    is_current,
                    selectable: can_upgrade && !(is_current && (active || plan.is_free())),
                    plan: plan.clone(),
                }
            })
            .collect()
    }

    pub fn credit_options(&self) -> Vec<CreditOption> {
        CreditBundle::ALL
            .into_iter()
            .map(|bundle| CreditOption {
                bundle,
                units: bundle.units(),
                price_label: price_label(bundle.price(), bundle.currency(), None),
            })
            .collect()
    }

    /// Share of this month's plan quota already used, 0 to 100.
    pub fn usage_percent(&self) -> f64 {
        let usage = &self.current.usage;
        if usage.max_requests <= 0 {
            return 100.0;
        }
        (usage.month_requests as f64 / usage.max_requests as f64 * 100.0).min(100.0)
    }

    /// Plan requests left this month plus purchased credits.
    pub fn requests_available(&self) -> i64 {
        self.current.usage.remaining_requests + i64::from(self.current.usage.credit_requests)
    }

    pub fn device_slots_left(&self) -> i64 {
        (i64::from(self.current.usage.device_limit) - self.current.usage.device_count).max(0)
    }

    /// Whole days until access is lost, while past due.
    pub fn grace_days_left(&self, now: DateTime<Utc>) -> Option<i64> {
        if self.status() != SubscriptionStatus::PastDue {
            return None;
        }
        let end = self.current.usage.grace_period_end_date?;
        let seconds = (end - now).num_seconds().max(0);
        Some((seconds + 86_399) / 86_400)
    }

    pub fn renews_on(&self) -> Option<DateTime<Utc>> {
        let usage = &self.current.usage;
        if usage.status == SubscriptionStatus::Active && usage.auto_renewal {
            usage.renewal_date
        } else {
            None
        }
    }
}

fn price_label(minor_units: i64, currency: &str, interval: Option<&str>) -> String {
    if minor_units == 0 {
        return "Free".to_string();
    }
    let amount = format!("{} {}", format_amount(minor_units), currency.to_uppercase());
    match interval {
        Some(interval) => format!("{} / {}", amount, interval),
        None => amount,
    }
}

/// The subscription page: holds the current view and re-fetches it after
/// every change that succeeded. Actions the current status does not offer
/// are refused locally with [`ClientError::State`]; the backend enforces the
/// same rules.
pub struct SubscriptionPage {
    api: SubscriptionApi,
    view: SubscriptionView,
}

impl SubscriptionPage {
    pub async fn open(api: SubscriptionApi) -> Result<Self> {
        let view = SubscriptionView::load(&api).await?;
        Ok(SubscriptionPage { api, view })
    }

    pub fn view(&self) -> &SubscriptionView {
        &self.view
    }

    pub async fn reload(&mut self) -> Result<&SubscriptionView> {
        self.view.current = self.api.user_plan().await?;
        Ok(&self.view)
    }

    fn ensure(&self, action: SubscriptionAction) -> Result<()> {
        if self.view.can(action) {
            Ok(())
        } else {
            Err(ClientError::State(format!(
                "{:?} is not available while the subscription is {}",
                action,
                self.view.status()
            )))
        }
    }

    pub async fn start_upgrade(&mut self, provider: &dyn PaymentProvider, plan_id: Uuid) -> Result<Checkout> {
        self.ensure(SubscriptionAction::Upgrade)?;
        let option = self
            .view
            .plan_options()
            .into_iter()
            .find(|option| option.plan.id == plan_id)
            .ok_or_else(|| ClientError::Validation(format!("Unknown plan {}", plan_id)))?;
        if !option.selectable {
            return Err(ClientError::State(format!("Already on the {} plan", option.plan.name)));
        }

        let checkout = provider.checkout_plan(plan_id).await?;
        if let Checkout::Done { .. } = checkout {
            self.reload().await?;
        }
        Ok(checkout)
    }

    pub async fn start_renewal(&self, provider: &dyn PaymentProvider) -> Result<Redirect> {
        self.ensure(SubscriptionAction::Renew)?;
        provider.checkout_renewal().await
    }

    pub async fn buy_credits(&self, provider: &dyn PaymentProvider, bundle: CreditBundle) -> Result<Redirect> {
        self.ensure(SubscriptionAction::BuyCredits)?;
        provider.checkout_credits(bundle).await
    }

    /// Confirms a payment the vendor redirected back from and reloads the
    /// plan on success.
    pub async fn finish_checkout(&mut self, provider: &dyn PaymentProvider, reference: &str) -> Result<Completion> {
        let completion = provider.confirm(reference).await?;
        if completion.success {
            self.reload().await?;
        } else {
            log::warn!("{} checkout {} not completed: {}", provider.kind().as_str(), reference, completion.message);
        }
        Ok(completion)
    }

    /// Cancels immediately; the reloaded view shows the free plan's limits.
    pub async fn cancel(&mut self) -> Result<String> {
        self.ensure(SubscriptionAction::Cancel)?;
        let change = self.api.cancel().await?;
        self.reload().await?;
        Ok(change.message)
    }

    pub async fn set_auto_renewal(&mut self, enabled: bool) -> Result<String> {
        self.ensure(SubscriptionAction::ToggleAutoRenewal)?;
        let change = self.api.set_auto_renewal(enabled).await?;
        self.reload().await?;
        Ok(change.message)
    }

    pub async fn update_payment_method(&self) -> Result<SetupSession> {
        self.ensure(SubscriptionAction::UpdatePaymentMethod)?;
        self.api.update_payment_method().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::Usage,
        stripe::StripeAdapter,
        subscription::tests::{FREE_ID, plan_json, signed_in},
    };
    use chrono::Duration;
    use httpmock::{Mock, prelude::*};
    use serde_json::{Value, json};

    const BASIC_ID: &str = "00000000-0000-4000-8000-000000000002";
    const ADVANCE_ID: &str = "00000000-0000-4000-8000-000000000003";
    const TX_ID: &str = "00000000-0000-4000-8000-0000000000aa";

    fn catalog() -> Value {
        json!([
            plan_json(FREE_ID, "free", 0, 20),
            plan_json(BASIC_ID, "basic", 999, 200),
            plan_json(ADVANCE_ID, "advance", 999, 500),
        ])
    }

    fn user_plan_json(plan: Value, status: &str, max: i32, credits: i32) -> Value {
        let auto_renewal = status == "active";
        json!({
            "plan": plan,
            "usage": {
                "status": status,
                "start_date": null,
                "end_date": null,
                "renewal_date": null,
                "grace_period_end_date": null,
                "auto_renewal": auto_renewal,
                "current_month": "March",
                "month_requests": 5,
                "max_requests": max,
                "remaining_requests": (max - 5).max(0),
                "credit_requests": credits,
                "device_count": 1,
                "device_limit": 1
            }
        })
    }

    async fn mock_user_plan<'a>(server: &'a MockServer, body: Value) -> Mock<'a> {
        server
            .mock_async(|when, then| {
                when.method(GET).path("/subscription/user-plan");
                then.status(200).json_body(body);
            })
            .await
    }

    async fn mock_catalog(server: &MockServer) {
        server
            .mock_async(|when, then| {
                when.method(GET).path("/subscription/plans");
                then.status(200).json_body(catalog());
            })
            .await;
    }

    fn view_with(status: SubscriptionStatus, grace_end: Option<DateTime<Utc>>) -> SubscriptionView {
        let plans: Vec<Plan> = serde_json::from_value(catalog()).unwrap();
        SubscriptionView {
            current: UserPlan {
                plan: plans[1].clone(),
                usage: Usage {
                    status,
                    start_date: None,
                    end_date: None,
                    renewal_date: None,
                    grace_period_end_date: grace_end,
                    auto_renewal: true,
                    current_month: "March".to_string(),
                    month_requests: 250,
                    max_requests: 200,
                    remaining_requests: 0,
                    credit_requests: 40,
                    device_count: 2,
                    device_limit: 1,
                },
            },
            plans,
        }
    }

    #[test]
    fn affordances_follow_status() {
        let expired = view_with(SubscriptionStatus::Expired, None);
        assert!(expired.can(SubscriptionAction::Renew));
        assert!(!expired.can(SubscriptionAction::Cancel));
        assert!(expired.can(SubscriptionAction::UpdatePaymentMethod));

        let active = view_with(SubscriptionStatus::Active, None);
        assert!(active.can(SubscriptionAction::Cancel));
        assert!(!active.can(SubscriptionAction::Renew));
        let options = active.plan_options();
        assert!(!options[1].selectable);
        assert!(options[2].selectable);
    }

    #[test]
    fn counters_are_clamped() {
        let view = view_with(SubscriptionStatus::Active, None);
        assert_eq!(view.usage_percent(), 100.0);
        assert_eq!(view.requests_available(), 40);
        assert_eq!(view.device_slots_left(), 0);
    }

    #[test]
    fn grace_days_round_up_while_past_due() {
        let now = Utc::now();
        let past_due = view_with(SubscriptionStatus::PastDue, Some(now + Duration::hours(30)));
        assert_eq!(past_due.grace_days_left(now), Some(2));

        let active = view_with(SubscriptionStatus::Active, Some(now + Duration::hours(30)));
        assert_eq!(active.grace_days_left(now), None);
    }

    #[test]
    fn credit_options_list_the_three_bundles() {
        let view = view_with(SubscriptionStatus::FreeTier, None);
        let labels: Vec<(i32, String)> = view
            .credit_options()
            .into_iter()
            .map(|o| (o.units, o.price_label))
            .collect();
        assert_eq!(
            labels,
            vec![
                (100, "2.99 USD".to_string()),
                (200, "5.99 USD".to_string()),
                (300, "7.99 USD".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn upgrade_checkout_success_then_refetch_shows_basic_active() {
        let server = MockServer::start_async().await;
        mock_catalog(&server).await;
        let mut free_plan = mock_user_plan(
            &server,
            user_plan_json(plan_json(FREE_ID, "free", 0, 20), "free_tier", 20, 0),
        )
        .await;
        let upgrade = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/subscription/upgrade")
                    .json_body(json!({ "plan_id": BASIC_ID }));
                then.status(200).json_body(json!({
                    "success": true,
                    "transaction_id": TX_ID,
                    "plan": plan_json(BASIC_ID, "basic", 999, 200),
                    "amount": 999,
                    "currency": "usd"
                }));
            })
            .await;
        let checkout = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/stripe/create-checkout")
                    .json_body(json!({ "transaction_id": TX_ID }));
                then.status(200).json_body(json!({
                    "success": true,
                    "transaction_id": TX_ID,
                    "session_id": "cs_test_basic",
                    "checkout_url": "https://checkout.stripe.com/c/pay/cs_test_basic"
                }));
            })
            .await;
        let success = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/stripe/success")
                    .query_param("session_id", "cs_test_basic");
                then.status(200).json_body(json!({
                    "success": true,
                    "message": "Subscription activated",
                    "plan": plan_json(BASIC_ID, "basic", 999, 200),
                    "credit_requests": 0
                }));
            })
            .await;

        let api = signed_in(&server);
        let stripe = StripeAdapter::new(api.client().clone());
        let mut page = SubscriptionPage::open(api).await.unwrap();
        assert_eq!(page.view().plan().name, "free");
        assert_eq!(page.view().status(), SubscriptionStatus::FreeTier);

        let plan_id = Uuid::parse_str(BASIC_ID).unwrap();
        let redirect = match page.start_upgrade(&stripe, plan_id).await.unwrap() {
            Checkout::Redirect(redirect) => redirect,
            other => panic!("expected a redirect, got {:?}", other),
        };
        assert_eq!(redirect.url, "https://checkout.stripe.com/c/pay/cs_test_basic");

        // the vendor redirects back to the portal with the session id
        free_plan.delete_async().await;
        let active_plan = mock_user_plan(
            &server,
            user_plan_json(plan_json(BASIC_ID, "basic", 999, 200), "active", 200, 0),
        )
        .await;

        let completion = page.finish_checkout(&stripe, &redirect.reference).await.unwrap();

        assert!(completion.success);
        upgrade.assert_async().await;
        checkout.assert_async().await;
        success.assert_async().await;
        active_plan.assert_async().await;
        assert_eq!(page.view().plan().name, "basic");
        assert_eq!(page.view().status(), SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn cancel_reloads_free_limits() {
        let server = MockServer::start_async().await;
        mock_catalog(&server).await;
        let mut basic = mock_user_plan(
            &server,
            user_plan_json(plan_json(BASIC_ID, "basic", 999, 200), "active", 200, 0),
        )
        .await;

        let api = signed_in(&server);
        let mut page = SubscriptionPage::open(api).await.unwrap();
        assert_eq!(page.view().current.usage.max_requests, 200);

        basic.delete_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/subscription/cancel");
                then.status(200).json_body(json!({
                    "success": true,
                    "message": "Subscription cancelled",
                    "subscription": {
                        "id": "00000000-0000-4000-8000-0000000000f1",
                        "plan_id": BASIC_ID,
                        "status": "cancelled",
                        "start_date": "2024-03-01T00:00:00Z",
                        "end_date": "2024-03-31T00:00:00Z",
                        "renewal_date": null,
                        "auto_renewal": false,
                        "grace_period_end_date": null
                    }
                }));
            })
            .await;
        mock_user_plan(
            &server,
            user_plan_json(plan_json(FREE_ID, "free", 0, 20), "cancelled", 20, 0),
        )
        .await;

        let message = page.cancel().await.unwrap();

        assert_eq!(message, "Subscription cancelled");
        assert_eq!(page.view().plan().name, "free");
        assert_eq!(page.view().current.usage.max_requests, 20);
        assert_eq!(page.view().status(), SubscriptionStatus::Cancelled);
        assert!(!page.view().can(SubscriptionAction::Cancel));
    }

    #[tokio::test]
    async fn credit_checkout_adds_units_without_changing_plan() {
        let server = MockServer::start_async().await;
        mock_catalog(&server).await;
        let mut before = mock_user_plan(
            &server,
            user_plan_json(plan_json(FREE_ID, "free", 0, 20), "free_tier", 20, 0),
        )
        .await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/stripe/create-buy-credit-checkout")
                    .json_body(json!({ "units": 200 }));
                then.status(200).json_body(json!({
                    "success": true,
                    "transaction_id": TX_ID,
                    "session_id": "cs_test_credits",
                    "checkout_url": "https://checkout.stripe.com/c/pay/cs_test_credits"
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/stripe/success")
                    .query_param("session_id", "cs_test_credits");
                then.status(200).json_body(json!({
                    "success": true,
                    "message": "200 requests added",
                    "credit_requests": 200
                }));
            })
            .await;

        let api = signed_in(&server);
        let stripe = StripeAdapter::new(api.client().clone());
        let mut page = SubscriptionPage::open(api).await.unwrap();

        let redirect = page.buy_credits(&stripe, CreditBundle::Medium).await.unwrap();
        before.delete_async().await;
        mock_user_plan(
            &server,
            user_plan_json(plan_json(FREE_ID, "free", 0, 20), "free_tier", 20, 200),
        )
        .await;
        let completion = page.finish_checkout(&stripe, &redirect.reference).await.unwrap();

        assert_eq!(completion.credit_requests, 200);
        assert_eq!(page.view().current.usage.credit_requests, 200);
        assert_eq!(page.view().plan().name, "free");
    }

    #[tokio::test]
    async fn renew_is_refused_locally_while_active() {
        let server = MockServer::start_async().await;
        mock_catalog(&server).await;
        mock_user_plan(
            &server,
            user_plan_json(plan_json(BASIC_ID, "basic", 999, 200), "active", 200, 0),
        )
        .await;
        let renew = server
            .mock_async(|when, then| {
                when.method(POST).path("/subscription/renew");
                then.status(200);
            })
            .await;

        let api = signed_in(&server);
        let stripe = StripeAdapter::new(api.client().clone());
        let page = SubscriptionPage::open(api).await.unwrap();

        let err = page.start_renewal(&stripe).await.unwrap_err();
        assert!(matches!(err, ClientError::State(_)));
        renew.assert_hits_async(0).await;
    }
}
