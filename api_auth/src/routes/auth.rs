use std::sync::Arc;

use actix_web::{HttpRequest, Responder, http::header, post, web};
use common::{
    env_config::Config,
    error::{AppError, Res},
    http::Success,
};
use db::{dtos::device::DeviceInfo, models::user::User};
use sqlx::PgPool;

use crate::{
    dtos::auth::{
        AuthResponse, LoginRequest, PasswordResetRequest, RefreshRequest, RefreshResponse,
        RegisterRequest, RequestMeta, ResetPasswordRequest, VerifyEmailRequest,
    },
    middleware::auth::CSRF_HEADER,
    services::{self, notify::Notifier, password},
};

pub const DEVICE_ID_HEADER: &str = "X-Device-ID";

fn header_value(req: &HttpRequest, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Device details from the `X-Device-*` headers. `None` without an id.
fn device_info(req: &HttpRequest) -> Option<DeviceInfo> {
    Some(DeviceInfo {
        device_identifier: header_value(req, DEVICE_ID_HEADER)?,
        device_name: header_value(req, "X-Device-Name"),
        device_type: header_value(req, "X-Device-Type"),
        os_name: header_value(req, "X-OS-Name"),
        os_version: header_value(req, "X-OS-Version"),
        app_version: header_value(req, "X-App-Version"),
    })
}

async fn register_device(pool: &PgPool, user: &User, req: &HttpRequest) -> Res<()> {
    if let Some(info) = device_info(req) {
        services::device::register_device(pool, user, info).await?;
    }
    Ok(())
}

fn request_meta(req: &HttpRequest) -> RequestMeta {
    RequestMeta {
        user_agent: req
            .headers()
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        ip_address: req.connection_info().realip_remote_addr().map(str::to_string),
    }
}

/// Registers a new user with email and password.
///
/// # Input
/// - `req`: JSON payload with `email`, `password` and an optional `full_name`
///
/// # Output
/// - 201 with the user and a session (`access_token`, `refresh_token`,
///   `csrf_token`), or with `verification_required: true` and no tokens when
///   the server requires email verification before the first login
/// - 400 when the email or password is malformed, 409 when the email is taken
#[post("/register")]
pub async fn post_register(
    http_req: HttpRequest,
    req: web::Json<RegisterRequest>,
    pool: web::Data<Arc<PgPool>>,
    config: web::Data<Arc<Config>>,
    notifier: web::Data<Arc<dyn Notifier>>,
) -> Res<impl Responder> {
    let pg_pool: &PgPool = &pool;
    password::validate_email(&req.email)?;
    password::validate_password(&req.password)?;

    let email_exists =
        db::user::exists_user_by_email(pg_pool, &req.email.trim().to_lowercase()).await?;
    if email_exists {
        return Err(AppError::Conflict("Email already registered".to_string()));
    }

    let user =
        services::user::create_user_with_credentials(pg_pool, &req.into_inner(), &config).await?;

    if config.signup_requires_verification {
        services::auth::issue_email_verification(pg_pool, notifier.get_ref().as_ref(), &user).await?;
        return Success::created(AuthResponse::pending_verification(user));
    }

    register_device(pg_pool, &user, &http_req).await?;
    let tokens =
        services::auth::issue_session(pg_pool, &user, &request_meta(&http_req), &config).await?;
    Success::created(AuthResponse::authenticated(user, tokens))
}

/// Authenticates a user with email and password. A request carrying
/// `X-Device-ID` registers that device against the plan's device limit.
///
/// # Output
/// - 200 with the user and a new session
/// - 401 for bad credentials, 403 for inactive or unverified accounts and for
///   a new device once the limit is reached
#[post("/login")]
pub async fn post_login(
    http_req: HttpRequest,
    login_data: web::Json<LoginRequest>,
    config: web::Data<Arc<Config>>,
    pool: web::Data<Arc<PgPool>>,
) -> Res<impl Responder> {
    let pg_pool: &PgPool = &pool;
    let user = services::auth::authenticate_user(pg_pool, &login_data, &config).await?;
    register_device(pg_pool, &user, &http_req).await?;
    let tokens =
        services::auth::issue_session(pg_pool, &user, &request_meta(&http_req), &config).await?;
    log::info!("User {} logged in", user.id);
    Success::ok(AuthResponse::authenticated(user, tokens))
}

/// Rotates the refresh token. The old token stops working immediately.
#[post("/refresh")]
pub async fn post_refresh(
    http_req: HttpRequest,
    body: web::Json<RefreshRequest>,
    config: web::Data<Arc<Config>>,
    pool: web::Data<Arc<PgPool>>,
) -> Res<impl Responder> {
    let tokens = services::auth::refresh_session(
        &pool,
        &body.refresh_token,
        &request_meta(&http_req),
        &config,
    )
    .await?;
    Success::ok(RefreshResponse {
        success: true,
        tokens,
    })
}

/// Revokes the refresh session. Does not need a valid access token, so an
/// expired session can still be closed, but the `X-CSRF-TOKEN` header must
/// carry the session's CSRF token.
#[post("/logout")]
pub async fn post_logout(
    http_req: HttpRequest,
    body: web::Json<RefreshRequest>,
    config: web::Data<Arc<Config>>,
    pool: web::Data<Arc<PgPool>>,
) -> Res<impl Responder> {
    let csrf = http_req
        .headers()
        .get(CSRF_HEADER)
        .and_then(|value| value.to_str().ok());
    services::auth::logout(&pool, &body.refresh_token, csrf, &config).await?;
    Success::message("Logged out")
}

/// Always answers with the same message, whether or not the email exists.
#[post("/request-password-reset")]
pub async fn post_request_password_reset(
    body: web::Json<PasswordResetRequest>,
    pool: web::Data<Arc<PgPool>>,
    notifier: web::Data<Arc<dyn Notifier>>,
) -> Res<impl Responder> {
    services::auth::request_password_reset(&pool, notifier.get_ref().as_ref(), &body.email).await?;
    Success::message("If the email is registered, a reset link has been sent")
}

#[post("/reset-password")]
pub async fn post_reset_password(
    body: web::Json<ResetPasswordRequest>,
    pool: web::Data<Arc<PgPool>>,
) -> Res<impl Responder> {
    services::auth::reset_password(&pool, &body).await?;
    Success::message("Password has been reset")
}

/// Confirms the email address and logs the user in.
#[post("/verify-email")]
pub async fn post_verify_email(
    http_req: HttpRequest,
    body: web::Json<VerifyEmailRequest>,
    config: web::Data<Arc<Config>>,
    pool: web::Data<Arc<PgPool>>,
) -> Res<impl Responder> {
    let pg_pool: &PgPool = &pool;
    let user = services::auth::verify_email(pg_pool, &body.token).await?;
    let tokens =
        services::auth::issue_session(pg_pool, &user, &request_meta(&http_req), &config).await?;
    Success::ok(AuthResponse::authenticated(user, tokens))
}
