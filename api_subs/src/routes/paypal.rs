use std::sync::Arc;

use actix_web::{Responder, post, web};
use common::{env_config::Config, error::Res, http::Success, jwt::AccessClaims};
use sqlx::PgPool;

use crate::{
    dtos::paypal::{CaptureOrderRequest, CreateOrderRequest},
    services::payment,
};

/// Creates a PayPal order for a pending transaction.
///
/// # Output
/// - Success: `order_id` and the `approve_url` the buyer is sent to
/// - Error: 502 when PayPal is unreachable or not configured
#[post("/create-order")]
pub async fn post_create_order(
    claims: web::ReqData<AccessClaims>,
    req: web::Json<CreateOrderRequest>,
    pool: web::Data<Arc<PgPool>>,
    config: web::Data<Arc<Config>>,
) -> Res<impl Responder> {
    let response =
        payment::start_paypal_order(&pool, &config, claims.sub, req.transaction_id).await?;
    Success::ok(response)
}

/// Captures an order the buyer approved and applies the purchase.
#[post("/capture-order")]
pub async fn post_capture_order(
    claims: web::ReqData<AccessClaims>,
    req: web::Json<CaptureOrderRequest>,
    pool: web::Data<Arc<PgPool>>,
    config: web::Data<Arc<Config>>,
) -> Res<impl Responder> {
    let outcome = payment::capture_paypal_order(&pool, &config, claims.sub, &req.order_id).await?;
    Success::ok(outcome)
}
