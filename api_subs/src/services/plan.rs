use common::{
    error::{AppError, Res},
    sub::SubscriptionStatus,
};
use db::models::{plan::SubscriptionPlan, subscription::Subscription};

/// The plan whose limits currently apply to a user, plus the status it was
/// derived from.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectivePlan<'a> {
    pub plan: &'a SubscriptionPlan,
    pub status: SubscriptionStatus,
}

/// The zero-priced catalog plan. Free-tier limits come only from here.
pub fn free_plan(catalog: &[SubscriptionPlan]) -> Res<&SubscriptionPlan> {
    catalog
        .iter()
        .filter(|plan| plan.is_free())
        .find(|plan| plan.is_active)
        .or_else(|| catalog.iter().find(|plan| plan.is_free()))
        .ok_or_else(|| AppError::Internal("Free plan is not configured".to_string()))
}

/// Status shown for a user given their most recent subscription row.
pub fn current_status(latest: Option<&Subscription>) -> SubscriptionStatus {
    latest.map_or(SubscriptionStatus::FreeTier, |sub| sub.status)
}

/// Active and past due subscriptions grant their plan; every other state,
/// including no subscription at all, falls back to the free plan.
pub fn resolve_user_plan<'a>(
    catalog: &'a [SubscriptionPlan],
    latest: Option<&Subscription>,
) -> Res<EffectivePlan<'a>> {
    let status = current_status(latest);

    let plan = match latest {
        Some(sub) if status.grants_plan() => catalog
            .iter()
            .find(|plan| plan.id == sub.plan_id)
            .ok_or_else(|| {
                AppError::Internal(format!(
                    "Subscription {} references unknown plan {}",
                    sub.id, sub.plan_id
                ))
            })?,
        _ => free_plan(catalog)?,
    };

    Ok(EffectivePlan { plan, status })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::lifecycle::tests::subscription;
    use chrono::Utc;
    use uuid::Uuid;

    fn plan(name: &str, price: i64, max_requests: i32, devices: i32) -> SubscriptionPlan {
        SubscriptionPlan {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: String::new(),
            price,
            currency: "usd".to_string(),
            interval: "month".to_string(),
            max_requests_per_month: max_requests,
            device_limit: devices,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn catalog() -> Vec<SubscriptionPlan> {
        vec![
            plan("free", 0, 20, 2),
            plan("basic", 999, 200, 3),
            plan("advance", 999, 500, 5),
        ]
    }

    #[test]
    fn no_subscription_resolves_to_free_limits() {
        let catalog = catalog();
        let effective = resolve_user_plan(&catalog, None).unwrap();

        assert_eq!(effective.status, SubscriptionStatus::FreeTier);
        assert_eq!(effective.plan.name, "free");
        assert_eq!(effective.plan.max_requests_per_month, 20);
        assert_eq!(effective.plan.device_limit, 2);
    }

    #[test]
    fn active_subscription_grants_its_plan() {
        let catalog = catalog();
        let mut sub = subscription(SubscriptionStatus::Active, Utc::now());
        sub.plan_id = catalog[1].id;

        let effective = resolve_user_plan(&catalog, Some(&sub)).unwrap();
        assert_eq!(effective.plan.name, "basic");
        assert_eq!(effective.status, SubscriptionStatus::Active);
    }

    #[test]
    fn past_due_keeps_paid_limits_during_grace() {
        let catalog = catalog();
        let mut sub = subscription(SubscriptionStatus::PastDue, Utc::now());
        sub.plan_id = catalog[2].id;

        let effective = resolve_user_plan(&catalog, Some(&sub)).unwrap();
        assert_eq!(effective.plan.name, "advance");
    }

    #[test]
    fn cancelled_row_resolves_to_free_limits() {
        let catalog = catalog();
        let mut sub = subscription(SubscriptionStatus::Cancelled, Utc::now());
        sub.plan_id = catalog[1].id;

        let effective = resolve_user_plan(&catalog, Some(&sub)).unwrap();
        assert_eq!(effective.status, SubscriptionStatus::Cancelled);
        assert_eq!(effective.plan.name, "free");
        assert_eq!(effective.plan.max_requests_per_month, 20);
    }

    #[test]
    fn expired_and_payment_failed_resolve_to_free() {
        let catalog = catalog();
        for status in [SubscriptionStatus::Expired, SubscriptionStatus::PaymentFailed] {
            let mut sub = subscription(status, Utc::now());
            sub.plan_id = catalog[2].id;
            let effective = resolve_user_plan(&catalog, Some(&sub)).unwrap();
            assert_eq!(effective.plan.name, "free", "{status}");
        }
    }

    #[test]
    fn missing_free_plan_is_an_error() {
        let catalog = vec![plan("basic", 999, 200, 3)];
        assert!(resolve_user_plan(&catalog, None).is_err());
    }

    #[test]
    fn dangling_plan_reference_is_an_error() {
        let catalog = catalog();
        let sub = subscription(SubscriptionStatus::Active, Utc::now());
        assert!(resolve_user_plan(&catalog, Some(&sub)).is_err());
    }
}
