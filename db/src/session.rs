use common::error::{AppError, Res};
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::{dtos::session::SessionCreateRequest, models::session::RefreshSession};

pub async fn insert_session<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    data: SessionCreateRequest,
) -> Res<RefreshSession> {
    sqlx::query_as::<_, RefreshSession>(
        r#"
        INSERT INTO refresh_sessions (id, user_id, csrf_token, user_agent, ip_address, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(data.id)
    .bind(data.user_id)
    .bind(data.csrf_token)
    .bind(data.user_agent)
    .bind(data.ip_address)
    .bind(data.expires_at)
    .fetch_one(executor)
    .await
    .map_err(AppError::from)
}

/// Fetches and locks the session row.
pub async fn lock_session<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    session_id: Uuid,
) -> Res<Option<RefreshSession>> {
    sqlx::query_as::<_, RefreshSession>("SELECT * FROM refresh_sessions WHERE id = $1 FOR UPDATE")
        .bind(session_id)
        .fetch_optional(executor)
        .await
        .map_err(AppError::from)
}

/// Marks `session_id` as spent and points it at its successor.
pub async fn mark_rotated<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    session_id: Uuid,
    replaced_by: Uuid,
) -> Res<()> {
    sqlx::query(
        r#"
        UPDATE refresh_sessions
        SET revoked = TRUE, replaced_by = $2, last_used_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(session_id)
    .bind(replaced_by)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn revoke_session<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    session_id: Uuid,
) -> Res<()> {
    sqlx::query("UPDATE refresh_sessions SET revoked = TRUE WHERE id = $1")
        .bind(session_id)
        .execute(executor)
        .await?;
    Ok(())
}

/// Revokes every session of the user. Returns how many were still open.
pub async fn revoke_all_sessions<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: Uuid,
) -> Res<u64> {
    let result =
        sqlx::query("UPDATE refresh_sessions SET revoked = TRUE WHERE user_id = $1 AND revoked = FALSE")
            .bind(user_id)
            .execute(executor)
            .await?;
    Ok(result.rows_affected())
}
