use chrono::{Duration, Utc};
use common::{
    env_config::Config,
    error::{AppError, Res},
    jwt::{self, ClaimsSpec},
};
use db::{
    dtos::session::SessionCreateRequest,
    models::{auth_token::AuthTokenKind, user::User},
};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::{
    dtos::auth::{LoginRequest, RequestMeta, ResetPasswordRequest, SessionTokens},
    services::{
        notify::{Notice, Notifier},
        password,
    },
};

const EMAIL_VERIFICATION_TTL_HOURS: i64 = 24;
const PASSWORD_RESET_TTL_MINUTES: i64 = 60;

fn invalid_credentials() -> AppError {
    AppError::Unauthorized("Invalid email or password".to_string())
}

/// Checks credentials and account state. Unknown emails and wrong passwords
/// produce the same error.
pub async fn authenticate_user(pool: &PgPool, login_data: &LoginRequest, config: &Config) -> Res<User> {
    let email = login_data.email.trim().to_lowercase();
    let (user, credentials) = db::user::get_user_with_password_hash(pool, &email)
        .await?
        .ok_or_else(invalid_credentials)?;

    if !password::verify_password(&login_data.password, &credentials.password_hash)? {
        return Err(invalid_credentials());
    }
    if !user.is_active() {
        return Err(AppError::Forbidden("Account is inactive".to_string()));
    }
    if config.signup_requires_verification && !user.email_verified {
        return Err(AppError::Forbidden("Email address is not verified".to_string()));
    }

    db::user::update_last_login(pool, user.id).await?;
    Ok(user)
}

async fn open_session(
    tx: &mut Transaction<'_, Postgres>,
    user: &User,
    csrf_token: String,
    meta: &RequestMeta,
    config: &Config,
) -> Res<(Uuid, SessionTokens)> {
    let session_id = Uuid::new_v4();
    let (refresh_token, expires_at) =
        jwt::generate_refresh_token(user.id, session_id, &config.jwt_config)?;

    db::session::insert_session(
        &mut **tx,
        SessionCreateRequest {
            id: session_id,
            user_id: user.id,
            csrf_token: csrf_token.clone(),
            user_agent: meta.user_agent.clone(),
            ip_address: meta.ip_address.clone(),
            expires_at,
        },
    )
    .await?;

    let access_token = jwt::generate_access_token(
        ClaimsSpec {
            user_id: user.id,
            email: &user.email,
            csrf: &csrf_token,
        },
        &config.jwt_config,
    )?;

    Ok((
        session_id,
        SessionTokens {
            access_token,
            refresh_token,
            csrf_token,
        },
    ))
}

/// Opens a new refresh session with a fresh CSRF token.
pub async fn issue_session(pool: &PgPool, user: &User, meta: &RequestMeta, config: &Config) -> Res<SessionTokens> {
    let mut tx = pool.begin().await?;
    let (_, tokens) =
        open_session(&mut tx, user, Uuid::new_v4().simple().to_string(), meta, config).await?;
    tx.commit().await?;
    Ok(tokens)
}

/// Exchanges a refresh token for a new token pair. The presented session is
/// revoked and replaced; presenting an already replaced token revokes every
/// session of the user.
pub async fn refresh_session(
    pool: &PgPool,
    refresh_token: &str,
    meta: &RequestMeta,
    config: &Config,
) -> Res<SessionTokens> {
    let claims = jwt::validate_refresh_token(refresh_token, &config.jwt_config)?;

    let mut tx = pool.begin().await?;
    let session = db::session::lock_session(&mut *tx, claims.jti)
        .await?
        .filter(|session| session.user_id == claims.sub)
        .ok_or_else(|| AppError::Unauthorized("Unknown refresh session".to_string()))?;

    if session.revoked {
        let revoked = db::session::revoke_all_sessions(&mut *tx, session.user_id).await?;
        tx.commit().await?;
        log::warn!(
            "Refresh token reuse for user {}, revoked {} open session(s)",
            session.user_id,
            revoked
        );
        return Err(AppError::Unauthorized("Refresh token has been revoked".to_string()));
    }
    if !session.is_usable(Utc::now()) {
        return Err(AppError::Unauthorized("Refresh session expired".to_string()));
    }

    let user = db::user::get_user_by_id(&mut *tx, session.user_id).await?;
    if !user.is_active() {
        return Err(AppError::Forbidden("Account is inactive".to_string()));
    }

    let (new_session_id, tokens) =
        open_session(&mut tx, &user, session.csrf_token.clone(), meta, config).await?;
    db::session::mark_rotated(&mut *tx, session.id, new_session_id).await?;
    tx.commit().await?;

    log::debug!("Rotated refresh session {} -> {}", session.id, new_session_id);
    Ok(tokens)
}

/// Revokes the session behind `refresh_token`. The CSRF header must match the
/// token bound to the session.
pub async fn logout(pool: &PgPool, refresh_token: &str, csrf_token: Option<&str>, config: &Config) -> Res<()> {
    let claims = jwt::validate_refresh_token(refresh_token, &config.jwt_config)?;

    let mut tx = pool.begin().await?;
    let session = db::session::lock_session(&mut *tx, claims.jti)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Unknown refresh session".to_string()))?;

    if csrf_token != Some(session.csrf_token.as_str()) {
        return Err(AppError::Forbidden("Missing or invalid CSRF token".to_string()));
    }

    db::session::revoke_session(&mut *tx, session.id).await?;
    tx.commit().await?;
    log::info!("User {} logged out", session.user_id);
    Ok(())
}

/// Issues a single-use email verification token and hands it to `notifier`.
pub async fn issue_email_verification(pool: &PgPool, notifier: &dyn Notifier, user: &User) -> Res<Uuid> {
    let expires_at = Utc::now() + Duration::hours(EMAIL_VERIFICATION_TTL_HOURS);
    let token =
        db::auth_token::insert_auth_token(pool, user.id, AuthTokenKind::EmailVerification, expires_at).await?;
    log::info!("Email verification issued for user {}", user.id);
    notifier
        .send(user, Notice::EmailVerification { token: token.id })
        .await?;
    Ok(token.id)
}

fn parse_token(token: &str) -> Res<Uuid> {
    Uuid::parse_str(token.trim()).map_err(|_| AppError::BadRequest("Invalid or expired token".to_string()))
}

pub async fn verify_email(pool: &PgPool, token: &str) -> Res<User> {
    let token_id = parse_token(token)?;
    let mut tx = pool.begin().await?;
    let token = db::auth_token::consume_auth_token(&mut *tx, token_id, AuthTokenKind::EmailVerification)
        .await?
        .ok_or_else(|| AppError::BadRequest("Invalid or expired token".to_string()))?;
    let user = db::user::mark_email_verified(&mut *tx, token.user_id).await?;
    tx.commit().await?;
    log::info!("User {} verified their email", user.id);
    Ok(user)
}

/// Issues a reset token when the email is known. Callers respond identically
/// either way, so the endpoint does not reveal which accounts exist.
pub async fn request_password_reset(pool: &PgPool, notifier: &dyn Notifier, email: &str) -> Res<()> {
    let email = email.trim().to_lowercase();
    let Some(user) = db::user::get_user_by_email(pool, &email).await? else {
        log::debug!("Password reset requested for unknown email");
        return Ok(());
    };

    let expires_at = Utc::now() + Duration::minutes(PASSWORD_RESET_TTL_MINUTES);
    let token =
        db::auth_token::insert_auth_token(pool, user.id, AuthTokenKind::PasswordReset, expires_at).await?;
    log::info!("Password reset issued for user {}", user.id);
    notifier
        .send(&user, Notice::PasswordReset { token: token.id })
        .await
}

/// Sets a new password and signs the user out everywhere.
pub async fn reset_password(pool: &PgPool, req: &ResetPasswordRequest) -> Res<()> {
    if req.password != req.confirm_password {
        return Err(AppError::BadRequest("Passwords do not match".to_string()));
    }
    password::validate_password(&req.password)?;
    let token_id = parse_token(&req.token)?;
    let password_hash = password::hash_password(&req.password)?;

    let mut tx = pool.begin().await?;
    let token = db::auth_token::consume_auth_token(&mut *tx, token_id, AuthTokenKind::PasswordReset)
        .await?
        .ok_or_else(|| AppError::BadRequest("Invalid or expired token".to_string()))?;
    db::user::update_password_hash(&mut *tx, token.user_id, &password_hash).await?;
    let revoked = db::session::revoke_all_sessions(&mut *tx, token.user_id).await?;
    tx.commit().await?;

    log::info!(
        "Password reset for user {}, revoked {} session(s)",
        token.user_id,
        revoked
    );
    Ok(())
}
