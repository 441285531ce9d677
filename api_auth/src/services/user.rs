use chrono::{Datelike, NaiveDate, Utc};
use common::{
    env_config::Config,
    error::{AppError, Res},
    stripe,
};
use db::{
    dtos::user::UserCreateRequest,
    models::{
        usage::{ApiRequest, DailyUsage},
        user::User,
    },
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    dtos::{
        auth::RegisterRequest,
        user::{ProfileResponse, ProfileUsage},
    },
    services::password,
};

const DEFAULT_REQUESTS_PAGE: i64 = 10;
const MAX_REQUESTS_PAGE: i64 = 100;

pub async fn get_user_by_id(pool: &PgPool, user_id: Uuid) -> Res<User> {
    db::user::get_user_by_id(pool, user_id).await
}

/// Inserts a user on the free catalog plan. The Stripe customer is created up
/// front when Stripe is configured; a failure there is logged and retried
/// lazily at the first checkout.
pub async fn create_user_with_credentials(
    pool: &PgPool,
    req: &RegisterRequest,
    config: &Config,
) -> Res<User> {
    let email = req.email.trim().to_lowercase();
    let password_hash = password::hash_password(&req.password)?;

    let stripe_customer_id = if config.stripe.secret_key.is_empty() {
        None
    } else {
        let client = stripe::create_client(&config.stripe.secret_key);
        match stripe::create_customer(&client, &email, req.full_name.as_deref()).await {
            Ok(customer) => Some(customer.id.to_string()),
            Err(e) => {
                log::warn!("Could not create Stripe customer for {}: {}", email, e);
                None
            }
        }
    };

    let mut tx = pool.begin().await?;
    let free_plan = db::plan::get_free_plan(&mut *tx).await?;
    let user = db::user::insert_user(
        &mut *tx,
        UserCreateRequest {
            email,
            password_hash,
            full_name: req.full_name.clone(),
            plan_type: free_plan.name.clone(),
            device_limit: free_plan.device_limit,
            max_requests_per_month: free_plan.max_requests_per_month,
            email_verified: !config.signup_requires_verification,
            stripe_customer_id,
        },
    )
    .await?;
    tx.commit().await?;

    log::info!("Registered user {}", user.id);
    Ok(user)
}

/// The account with this month's quota and its registered devices.
pub async fn get_profile(pool: &PgPool, user_id: Uuid) -> Res<ProfileResponse> {
    let user = db::user::get_user_by_id(pool, user_id).await?;
    let today = Utc::now().date_naive();
    let month_start = today.with_day(1).unwrap_or(today);
    let usage = db::usage::get_monthly_usage(pool, user_id, month_start).await?;
    let devices = db::device::get_user_devices(pool, user_id).await?;

    Ok(ProfileResponse {
        usage: ProfileUsage {
            current_month: today.format("%B").to_string(),
            month_requests: usage.requests,
            max_requests: user.max_requests_per_month,
            remaining_requests: (i64::from(user.max_requests_per_month) - usage.requests).max(0),
            credit_requests: user.credit_requests,
        },
        user,
        devices,
    })
}

/// Only `full_name` can be changed here. A blank name clears it.
pub async fn update_profile(pool: &PgPool, user_id: Uuid, full_name: Option<&str>) -> Res<User> {
    let full_name = full_name.ok_or_else(|| AppError::BadRequest("No valid fields to update".to_string()))?;
    let full_name = Some(full_name.trim()).filter(|name| !name.is_empty());
    let user = db::user::update_full_name(pool, user_id, full_name).await?;
    log::info!("User {} updated their profile", user_id);
    Ok(user)
}

pub async fn get_usage(
    pool: &PgPool,
    user_id: Uuid,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
) -> Res<Vec<DailyUsage>> {
    if let (Some(start), Some(end)) = (start_date, end_date) {
        if start > end {
            return Err(AppError::BadRequest("start_date is after end_date".to_string()));
        }
    }
    db::usage::get_daily_usage(pool, user_id, start_date, end_date).await
}

/// Out-of-range page sizes fall back to the default. Offsets cannot be negative.
pub(crate) fn requests_page(limit: Option<i64>, offset: Option<i64>) -> Res<(i64, i64)> {
    let limit = limit
        .filter(|l| (1..=MAX_REQUESTS_PAGE).contains(l))
        .unwrap_or(DEFAULT_REQUESTS_PAGE);
    let offset = offset.unwrap_or(0);
    if offset < 0 {
        return Err(AppError::BadRequest("Invalid limit or offset value".to_string()));
    }
    Ok((limit, offset))
}

pub async fn get_requests(
    pool: &PgPool,
    user_id: Uuid,
    limit: Option<i64>,
    offset: Option<i64>,
) -> Res<Vec<ApiRequest>> {
    let (limit, offset) = requests_page(limit, offset)?;
    db::usage::get_api_requests(pool, user_id, limit, offset).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_page_defaults_and_bounds() {
        assert_eq!(requests_page(None, None).unwrap(), (10, 0));
        assert_eq!(requests_page(Some(25), Some(50)).unwrap(), (25, 50));
        assert_eq!(requests_page(Some(0), None).unwrap(), (10, 0));
        assert_eq!(requests_page(Some(500), None).unwrap(), (10, 0));
        assert!(matches!(requests_page(None, Some(-1)), Err(AppError::BadRequest(_))));
    }
}
