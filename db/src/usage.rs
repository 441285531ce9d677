use chrono::NaiveDate;
use common::error::{AppError, Res};
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::models::usage::{ApiRequest, DailyUsage, MonthlyUsage};

/// Sums the usage rows from `month_start` onwards and counts registered devices.
pub async fn get_monthly_usage<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: Uuid,
    month_start: NaiveDate,
) -> Res<MonthlyUsage> {
    sqlx::query_as::<_, MonthlyUsage>(
        r#"
        SELECT
            COALESCE((SELECT SUM(requests_count) FROM usage_stats
                      WHERE user_id = $1 AND date >= $2), 0)::BIGINT AS requests,
            COALESCE((SELECT SUM(billable_requests_count) FROM usage_stats
                      WHERE user_id = $1 AND date >= $2), 0)::BIGINT AS billable_requests,
            (SELECT COUNT(*) FROM devices WHERE user_id = $1)::BIGINT AS devices
        "#,
    )
    .bind(user_id)
    .bind(month_start)
    .fetch_one(executor)
    .await
    .map_err(AppError::from)
}

/// Daily usage rows between the optional bounds, oldest first.
pub async fn get_daily_usage<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: Uuid,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
) -> Res<Vec<DailyUsage>> {
    sqlx::query_as::<_, DailyUsage>(
        r#"
        SELECT date, requests_count, billable_requests_count, error_count,
               total_response_time_ms, average_response_time_ms
        FROM usage_stats
        WHERE user_id = $1
          AND ($2::DATE IS NULL OR date >= $2)
          AND ($3::DATE IS NULL OR date <= $3)
        ORDER BY date
        "#,
    )
    .bind(user_id)
    .bind(start_date)
    .bind(end_date)
    .fetch_all(executor)
    .await
    .map_err(AppError::from)
}

pub async fn get_api_requests<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: Uuid,
    limit: i64,
    offset: i64,
) -> Res<Vec<ApiRequest>> {
    sqlx::query_as::<_, ApiRequest>(
        r#"
        SELECT id, request_type, status, ip_address, user_agent, device_info,
               response_time_ms, error_message, request_size_bytes,
               response_size_bytes, created_at
        FROM api_requests
        WHERE user_id = $1
        ORDER BY created_at DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(executor)
    .await
    .map_err(AppError::from)
}
