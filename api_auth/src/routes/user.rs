use std::sync::Arc;

use actix_web::{Responder, get, put, web};
use common::{error::Res, http::Success, jwt::AccessClaims};
use sqlx::PgPool;

use crate::{
    dtos::user::{RequestsQuery, UpdateProfileRequest, UsageQuery},
    services,
};

/// Returns the authenticated user's profile.
///
/// # Input
/// - `claims`: access token claims placed in the request by the auth middleware
///
/// # Output
/// - Success: the user record, without the password hash
/// - Error: 401 without a valid token, 404 if the user no longer exists
#[get("/me")]
pub async fn get_me(
    claims: web::ReqData<AccessClaims>,
    pool: web::Data<Arc<PgPool>>,
) -> Res<impl Responder> {
    let user = services::user::get_user_by_id(&pool, claims.sub).await?;
    Success::ok(user)
}

/// The user record together with this month's quota and the registered devices.
#[get("/profile")]
pub async fn get_profile(
    claims: web::ReqData<AccessClaims>,
    pool: web::Data<Arc<PgPool>>,
) -> Res<impl Responder> {
    let profile = services::user::get_profile(&pool, claims.sub).await?;
    Success::ok(profile)
}

/// Updates `full_name`. Any other field in the body is ignored.
///
/// # Output
/// - 200 with the updated user
/// - 400 when the body carries no updatable field
#[put("/profile")]
pub async fn put_profile(
    claims: web::ReqData<AccessClaims>,
    body: web::Json<UpdateProfileRequest>,
    pool: web::Data<Arc<PgPool>>,
) -> Res<impl Responder> {
    let user = services::user::update_profile(&pool, claims.sub, body.full_name.as_deref()).await?;
    Success::ok(user)
}

#[get("/devices")]
pub async fn get_devices(
    claims: web::ReqData<AccessClaims>,
    pool: web::Data<Arc<PgPool>>,
) -> Res<impl Responder> {
    let devices = services::device::list_devices(&pool, claims.sub).await?;
    Success::ok(devices)
}

/// Daily usage rows, optionally bounded by `start_date` and `end_date`
/// (`YYYY-MM-DD`, inclusive).
#[get("/usage")]
pub async fn get_usage(
    claims: web::ReqData<AccessClaims>,
    query: web::Query<UsageQuery>,
    pool: web::Data<Arc<PgPool>>,
) -> Res<impl Responder> {
    let usage = services::user::get_usage(&pool, claims.sub, query.start_date, query.end_date).await?;
    Success::ok(usage)
}

/// Request history, newest first. `limit` is 1..=100 (default 10).
#[get("/requests")]
pub async fn get_requests(
    claims: web::ReqData<AccessClaims>,
    query: web::Query<RequestsQuery>,
    pool: web::Data<Arc<PgPool>>,
) -> Res<impl Responder> {
    let requests = services::user::get_requests(&pool, claims.sub, query.limit, query.offset).await?;
    Success::ok(requests)
}
