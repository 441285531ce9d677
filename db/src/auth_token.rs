use chrono::{DateTime, Utc};
use common::error::{AppError, Res};
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::models::auth_token::{AuthToken, AuthTokenKind};

pub async fn insert_auth_token<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: Uuid,
    kind: AuthTokenKind,
    expires_at: DateTime<Utc>,
) -> Res<AuthToken> {
    sqlx::query_as::<_, AuthToken>(
        "INSERT INTO auth_tokens (user_id, kind, expires_at) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(user_id)
    .bind(kind.as_str())
    .bind(expires_at)
    .fetch_one(executor)
    .await
    .map_err(AppError::from)
}

/// Marks the token used if it exists, has the right kind, is unused and
/// unexpired. Returns `None` otherwise.
pub async fn consume_auth_token<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    token_id: Uuid,
    kind: AuthTokenKind,
) -> Res<Option<AuthToken>> {
    sqlx::query_as::<_, AuthToken>(
        r#"
        UPDATE auth_tokens
        SET used_at = NOW()
        WHERE id = $1 AND kind = $2 AND used_at IS NULL AND expires_at > NOW()
        RETURNING *
        "#,
    )
    .bind(token_id)
    .bind(kind.as_str())
    .fetch_optional(executor)
    .await
    .map_err(AppError::from)
}
