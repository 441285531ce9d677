use common::error::{AppError, Res};
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::{
    dtos::user::UserCreateRequest,
    models::{
        plan::SubscriptionPlan,
        user::{AuthCredentials, User},
    },
};

pub async fn exists_user_by_email<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    email: &str,
) -> Res<bool> {
    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
        .bind(email)
        .fetch_one(executor)
        .await
        .map_err(AppError::from)
}

pub async fn get_user_by_email<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    email: &str,
) -> Res<Option<User>> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(executor)
        .await
        .map_err(AppError::from)
}

pub async fn get_user_by_id<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: Uuid,
) -> Res<User> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_one(executor)
        .await
        .map_err(|e| common::error::not_found_or(e, "User not found"))
}

/// Locks the user row for the rest of the transaction. Every subscription
/// mutation for a user takes this lock first so they serialize.
pub async fn lock_user<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: Uuid,
) -> Res<User> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1 FOR UPDATE")
        .bind(user_id)
        .fetch_one(executor)
        .await
        .map_err(|e| common::error::not_found_or(e, "User not found"))
}

pub async fn insert_user<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    data: UserCreateRequest,
) -> Res<User> {
    sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (email, password_hash, full_name, plan_type, device_limit,
                           max_requests_per_month, email_verified, stripe_customer_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(data.email)
    .bind(data.password_hash)
    .bind(data.full_name)
    .bind(data.plan_type)
    .bind(data.device_limit)
    .bind(data.max_requests_per_month)
    .bind(data.email_verified)
    .bind(data.stripe_customer_id)
    .fetch_one(executor)
    .await
    .map_err(AppError::from)
}

pub async fn get_user_with_password_hash<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    email: &str,
) -> Res<Option<(User, AuthCredentials)>> {
    #[derive(sqlx::FromRow)]
    struct Row {
        #[sqlx(flatten)]
        user: User,
        password_hash: String,
    }

    let row = sqlx::query_as::<_, Row>("SELECT * FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(executor)
        .await?;

    Ok(row.map(|row| {
        let credentials = AuthCredentials {
            user_id: row.user.id,
            password_hash: row.password_hash,
        };
        (row.user, credentials)
    }))
}

pub async fn update_password_hash<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: Uuid,
    password_hash: &str,
) -> Res<()> {
    sqlx::query("UPDATE users SET password_hash = $1, updated_at = NOW() WHERE id = $2")
        .bind(password_hash)
        .bind(user_id)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn mark_email_verified<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: Uuid,
) -> Res<User> {
    sqlx::query_as::<_, User>(
        "UPDATE users SET email_verified = TRUE, updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(user_id)
    .fetch_one(executor)
    .await
    .map_err(|e| common::error::not_found_or(e, "User not found"))
}

pub async fn update_last_login<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: Uuid,
) -> Res<()> {
    sqlx::query("UPDATE users SET last_login = NOW() WHERE id = $1")
        .bind(user_id)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn set_stripe_customer_id<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: Uuid,
    customer_id: &str,
) -> Res<()> {
    sqlx::query("UPDATE users SET stripe_customer_id = $1, updated_at = NOW() WHERE id = $2")
        .bind(customer_id)
        .bind(user_id)
        .execute(executor)
        .await?;
    Ok(())
}

/// Copies the plan's name and limits onto the user row.
pub async fn apply_plan_limits<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: Uuid,
    plan: &SubscriptionPlan,
) -> Res<User> {
    sqlx::query_as::<_, User>(
        r#"
        UPDATE users
        SET plan_type = $1, device_limit = $2, max_requests_per_month = $3, updated_at = NOW()
        WHERE id = $4
        RETURNING *
        "#,
    )
    .bind(&plan.name)
    .bind(plan.device_limit)
    .bind(plan.max_requests_per_month)
    .bind(user_id)
    .fetch_one(executor)
    .await
    .map_err(AppError::from)
}

pub async fn add_credit_requests<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: Uuid,
    units: i32,
) -> Res<User> {
    sqlx::query_as::<_, User>(
        r#"
        UPDATE users
        SET credit_requests = credit_requests + $1, updated_at = NOW()
        WHERE id = $2
        RETURNING *
        "#,
    )
    .bind(units)
    .bind(user_id)
    .fetch_one(executor)
    .await
    .map_err(AppError::from)
}

pub async fn update_full_name<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: Uuid,
    full_name: Option<&str>,
) -> Res<User> {
    sqlx::query_as::<_, User>(
        "UPDATE users SET full_name = $1, updated_at = NOW() WHERE id = $2 RETURNING *",
    )
    .bind(full_name)
    .bind(user_id)
    .fetch_one(executor)
    .await
    .map_err(|e| common::error::not_found_or(e, "User not found"))
}
