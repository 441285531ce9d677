use common::error::{AppError, Res};
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::{dtos::payment_method::PaymentMethodCreateRequest, models::payment_method::PaymentMethod};

/// Clears the default flag on all of the user's stored methods.
pub async fn clear_default<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: Uuid,
) -> Res<()> {
    sqlx::query("UPDATE payment_methods SET is_default = FALSE WHERE user_id = $1")
        .bind(user_id)
        .execute(executor)
        .await?;
    Ok(())
}

/// Stores the method as the user's default. Re-saving a known provider id
/// refreshes the card details instead of inserting a duplicate.
pub async fn upsert_default<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    data: PaymentMethodCreateRequest,
) -> Res<PaymentMethod> {
    sqlx::query_as::<_, PaymentMethod>(
        r#"
        INSERT INTO payment_methods (user_id, provider, provider_payment_id, card_last4,
                                     card_brand, card_exp_month, card_exp_year, is_default)
        VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE)
        ON CONFLICT (provider_payment_id) DO UPDATE
        SET card_last4 = EXCLUDED.card_last4,
            card_brand = EXCLUDED.card_brand,
            card_exp_month = EXCLUDED.card_exp_month,
            card_exp_year = EXCLUDED.card_exp_year,
            is_default = TRUE,
            updated_at = NOW()
        RETURNING *
        "#,
    )
    .bind(data.user_id)
    .bind(data.provider)
    .bind(data.provider_payment_id)
    .bind(data.card_last4)
    .bind(data.card_brand)
    .bind(data.card_exp_month)
    .bind(data.card_exp_year)
    .fetch_one(executor)
    .await
    .map_err(AppError::from)
}

pub async fn get_default_method<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: Uuid,
) -> Res<Option<PaymentMethod>> {
    sqlx::query_as::<_, PaymentMethod>(
        "SELECT * FROM payment_methods WHERE user_id = $1 AND is_default = TRUE LIMIT 1",
    )
    .bind(user_id)
    .fetch_optional(executor)
    .await
    .map_err(AppError::from)
}
