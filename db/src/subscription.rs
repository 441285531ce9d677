use chrono::{DateTime, Utc};
use common::error::{AppError, Res, not_found_or};
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::{dtos::subscription::SubscriptionCreateRequest, models::subscription::Subscription};

const LIVE_STATUSES: &str = "('active', 'past_due', 'payment_failed')";

pub async fn get_subscription_by_id<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    subscription_id: Uuid,
) -> Res<Subscription> {
    sqlx::query_as::<_, Subscription>("SELECT * FROM subscriptions WHERE id = $1")
        .bind(subscription_id)
        .fetch_one(executor)
        .await
        .map_err(|e| not_found_or(e, "Subscription not found"))
}

/// Most recent subscription row of any status.
pub async fn get_latest_subscription<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: Uuid,
) -> Res<Option<Subscription>> {
    sqlx::query_as::<_, Subscription>(
        "SELECT * FROM subscriptions WHERE user_id = $1 ORDER BY created_at DESC LIMIT 1",
    )
    .bind(user_id)
    .fetch_optional(executor)
    .await
    .map_err(AppError::from)
}

/// The single active, past due or payment failed row, if any.
pub async fn get_live_subscription<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: Uuid,
) -> Res<Option<Subscription>> {
    let query = format!(
        "SELECT * FROM subscriptions WHERE user_id = $1 AND status IN {} LIMIT 1",
        LIVE_STATUSES
    );
    sqlx::query_as::<_, Subscription>(&query)
        .bind(user_id)
        .fetch_optional(executor)
        .await
        .map_err(AppError::from)
}

pub async fn insert_subscription<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    data: SubscriptionCreateRequest,
) -> Res<Subscription> {
    sqlx::query_as::<_, Subscription>(
        r#"
        INSERT INTO subscriptions (user_id, plan_id, status, start_date, end_date, renewal_date,
                                   auto_renewal, payment_status, last_payment_date,
                                   payment_provider, external_subscription_id)
        VALUES ($1, $2, $3, $4, $5, $5, $6, 'paid', $4, $7, $8)
        RETURNING *
        "#,
    )
    .bind(data.user_id)
    .bind(data.plan_id)
    .bind(data.status)
    .bind(data.start_date)
    .bind(data.end_date)
    .bind(data.auto_renewal)
    .bind(data.payment_provider)
    .bind(data.external_subscription_id)
    .fetch_one(executor)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            AppError::Conflict("User already has a live subscription".to_string())
        }
        other => AppError::Database(other),
    })
}

/// Persists every mutable column of the given row.
pub async fn save_subscription<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    sub: &Subscription,
) -> Res<Subscription> {
    sqlx::query_as::<_, Subscription>(
        r#"
        UPDATE subscriptions
        SET plan_id = $2, status = $3, start_date = $4, end_date = $5, renewal_date = $6,
            auto_renewal = $7, payment_status = $8, last_payment_date = $9,
            grace_period_end_date = $10, external_subscription_id = $11,
            payment_provider = $12, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(sub.id)
    .bind(sub.plan_id)
    .bind(sub.status)
    .bind(sub.start_date)
    .bind(sub.end_date)
    .bind(sub.renewal_date)
    .bind(sub.auto_renewal)
    .bind(&sub.payment_status)
    .bind(sub.last_payment_date)
    .bind(sub.grace_period_end_date)
    .bind(&sub.external_subscription_id)
    .bind(&sub.payment_provider)
    .fetch_one(executor)
    .await
    .map_err(|e| not_found_or(e, "Subscription not found"))
}

/// Active rows whose renewal date has passed.
pub async fn get_due_for_renewal<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    now: DateTime<Utc>,
) -> Res<Vec<Subscription>> {
    sqlx::query_as::<_, Subscription>(
        r#"
        SELECT * FROM subscriptions
        WHERE status = 'active' AND COALESCE(renewal_date, end_date) <= $1
        ORDER BY end_date ASC
        "#,
    )
    .bind(now)
    .fetch_all(executor)
    .await
    .map_err(AppError::from)
}

/// Past due rows whose grace window has closed.
pub async fn get_grace_expired<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    now: DateTime<Utc>,
) -> Res<Vec<Subscription>> {
    sqlx::query_as::<_, Subscription>(
        r#"
        SELECT * FROM subscriptions
        WHERE status = 'past_due' AND grace_period_end_date <= $1
        ORDER BY grace_period_end_date ASC
        "#,
    )
    .bind(now)
    .fetch_all(executor)
    .await
    .map_err(AppError::from)
}
