use std::sync::Arc;

use actix_web::web;
use common::env_config::Config;
use middleware::auth::AuthMiddleware;

pub mod middleware {
    pub mod auth;
}

pub mod routes {
    pub mod auth;
    pub mod user;
}

mod services {
    pub(crate) mod auth;
    pub(crate) mod device;
    pub(crate) mod notify;
    pub(crate) mod password;
    pub(crate) mod user;
}

mod dtos {
    pub(crate) mod auth;
    pub(crate) mod user;
}

pub use services::notify::{LogNotifier, Notice, Notifier};

/// Paths reachable without an access token. Everything else under the app
/// requires `Authorization: Bearer <access token>`.
pub const PUBLIC_PATHS: &[&str] = &[
    "/auth/login",
    "/auth/register",
    "/auth/refresh",
    "/auth/logout",
    "/auth/request-password-reset",
    "/auth/reset-password",
    "/auth/verify-email",
    "/subscription/plans",
    "/stripe/public-key",
    "/stripe/webhook",
];

pub fn mount_auth() -> actix_web::Scope {
    web::scope("/auth")
        .service(routes::auth::post_register)
        .service(routes::auth::post_login)
        .service(routes::auth::post_refresh)
        .service(routes::auth::post_logout)
        .service(routes::auth::post_request_password_reset)
        .service(routes::auth::post_reset_password)
        .service(routes::auth::post_verify_email)
        .service(routes::user::get_me)
}

/// Account self-service. Every route requires an access token.
pub fn mount_users() -> actix_web::Scope {
    web::scope("/users")
        .service(routes::user::get_profile)
        .service(routes::user::put_profile)
        .service(routes::user::get_devices)
        .service(routes::user::get_usage)
        .service(routes::user::get_requests)
}

// Auth middleware
pub fn auth_middleware(config: Arc<Config>) -> AuthMiddleware {
    AuthMiddleware::new(config.jwt_config.clone(), PUBLIC_PATHS)
}
