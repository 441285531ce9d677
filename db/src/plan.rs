use common::error::{AppError, Res, not_found_or};
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::models::plan::SubscriptionPlan;

pub async fn get_active_plans<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
) -> Res<Vec<SubscriptionPlan>> {
    sqlx::query_as::<_, SubscriptionPlan>(
        "SELECT * FROM subscription_plans WHERE is_active = TRUE ORDER BY price ASC, name ASC",
    )
    .fetch_all(executor)
    .await
    .map_err(AppError::from)
}

/// Every plan including retired ones, so old subscriptions still resolve.
pub async fn get_all_plans<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
) -> Res<Vec<SubscriptionPlan>> {
    sqlx::query_as::<_, SubscriptionPlan>("SELECT * FROM subscription_plans ORDER BY price ASC, name ASC")
        .fetch_all(executor)
        .await
        .map_err(AppError::from)
}

pub async fn get_plan_by_id<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    plan_id: Uuid,
) -> Res<SubscriptionPlan> {
    sqlx::query_as::<_, SubscriptionPlan>("SELECT * FROM subscription_plans WHERE id = $1")
        .bind(plan_id)
        .fetch_one(executor)
        .await
        .map_err(|e| not_found_or(e, "Plan not found"))
}

pub async fn get_plan_by_name<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    name: &str,
) -> Res<SubscriptionPlan> {
    sqlx::query_as::<_, SubscriptionPlan>("SELECT * FROM subscription_plans WHERE name = $1")
        .bind(name)
        .fetch_one(executor)
        .await
        .map_err(|e| not_found_or(e, "Plan not found"))
}

/// The cheapest active zero-priced plan.
pub async fn get_free_plan<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
) -> Res<SubscriptionPlan> {
    sqlx::query_as::<_, SubscriptionPlan>(
        "SELECT * FROM subscription_plans WHERE price = 0 AND is_active = TRUE ORDER BY name LIMIT 1",
    )
    .fetch_one(executor)
    .await
    .map_err(|e| not_found_or(e, "Free plan is not configured"))
}
