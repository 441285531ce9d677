use common::{
    error::{AppError, Res, not_found_or},
    sub::TransactionStatus,
};
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::{dtos::transaction::TransactionCreateRequest, models::transaction::PaymentTransaction};

pub async fn insert_transaction<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    data: TransactionCreateRequest,
) -> Res<PaymentTransaction> {
    sqlx::query_as::<_, PaymentTransaction>(
        r#"
        INSERT INTO payment_transactions (user_id, kind, plan_id, subscription_id, credit_units,
                                          amount, currency, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending')
        RETURNING *
        "#,
    )
    .bind(data.user_id)
    .bind(data.kind.as_str())
    .bind(data.plan_id)
    .bind(data.subscription_id)
    .bind(data.credit_units)
    .bind(data.amount)
    .bind(data.currency)
    .fetch_one(executor)
    .await
    .map_err(AppError::from)
}

pub async fn get_transaction_by_id<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    transaction_id: Uuid,
) -> Res<PaymentTransaction> {
    sqlx::query_as::<_, PaymentTransaction>("SELECT * FROM payment_transactions WHERE id = $1")
        .bind(transaction_id)
        .fetch_one(executor)
        .await
        .map_err(|e| not_found_or(e, "Transaction not found"))
}

/// Same as [`get_transaction_by_id`] but holds a row lock until commit, so
/// two deliveries of the same payment confirmation cannot both apply it.
pub async fn lock_transaction<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    transaction_id: Uuid,
) -> Res<PaymentTransaction> {
    sqlx::query_as::<_, PaymentTransaction>(
        "SELECT * FROM payment_transactions WHERE id = $1 FOR UPDATE",
    )
    .bind(transaction_id)
    .fetch_one(executor)
    .await
    .map_err(|e| not_found_or(e, "Transaction not found"))
}

pub async fn get_transaction_by_external_id<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    external_id: &str,
) -> Res<PaymentTransaction> {
    sqlx::query_as::<_, PaymentTransaction>(
        "SELECT * FROM payment_transactions WHERE external_id = $1",
    )
    .bind(external_id)
    .fetch_one(executor)
    .await
    .map_err(|e| not_found_or(e, "Transaction not found"))
}

/// Records which vendor object (checkout session, order, payment intent)
/// settles this transaction. A reference, once set, is never replaced.
pub async fn set_external_reference<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    transaction_id: Uuid,
    provider: &str,
    external_id: &str,
) -> Res<PaymentTransaction> {
    sqlx::query_as::<_, PaymentTransaction>(
        r#"
        UPDATE payment_transactions
        SET payment_provider = $2, external_id = $3, updated_at = NOW()
        WHERE id = $1 AND (external_id IS NULL OR external_id = $3)
        RETURNING *
        "#,
    )
    .bind(transaction_id)
    .bind(provider)
    .bind(external_id)
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| {
        AppError::Conflict(format!(
            "Transaction {} is already linked to another checkout",
            transaction_id
        ))
    })
}

pub async fn set_transaction_status<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    transaction_id: Uuid,
    status: TransactionStatus,
    subscription_id: Option<Uuid>,
    payload: Option<serde_json::Value>,
) -> Res<PaymentTransaction> {
    sqlx::query_as::<_, PaymentTransaction>(
        r#"
        UPDATE payment_transactions
        SET status = $2,
            subscription_id = COALESCE($3, subscription_id),
            payload = COALESCE($4, payload),
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(transaction_id)
    .bind(status.as_str())
    .bind(subscription_id)
    .bind(payload)
    .fetch_one(executor)
    .await
    .map_err(|e| not_found_or(e, "Transaction not found"))
}

pub async fn get_transactions_by_user<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: Uuid,
    limit: i64,
    offset: i64,
) -> Res<Vec<PaymentTransaction>> {
    sqlx::query_as::<_, PaymentTransaction>(
        r#"
        SELECT * FROM payment_transactions
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

/// Whether a renewal charge for this subscription is still awaiting its
/// outcome.
pub async fn has_pending_renewal<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    subscription_id: Uuid,
) -> Res<bool> {
    sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM payment_transactions
            WHERE subscription_id = $1 AND kind = 'renewal' AND status = 'pending'
        )
        "#,
    )
    .bind(subscription_id)
    .fetch_one(executor)
    .await
    .map_err(AppError::from)
}
