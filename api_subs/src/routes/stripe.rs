use std::sync::Arc;

use actix_web::{HttpRequest, Responder, get, post, web};
use common::{
    env_config::Config,
    error::{AppError, Res},
    http::Success,
    jwt::AccessClaims,
};
use sqlx::PgPool;

use crate::{
    dtos::stripe::{
        BuyCreditCheckoutRequest, CheckoutRequest, PublicKeyResponse, SuccessQuery,
        VerifySetupIntentRequest,
    },
    services::{pay, payment},
};

/// Publishable key for Stripe.js. Public.
#[get("/public-key")]
pub async fn get_public_key(config: web::Data<Arc<Config>>) -> Res<impl Responder> {
    Success::ok(PublicKeyResponse {
        public_key: config.stripe.public_key.clone(),
    })
}

/// Opens a Stripe checkout for a pending transaction created by
/// `/subscription/upgrade`, `/subscription/renew` or `/subscription/buy-credits`.
///
/// # Input
/// - `req`: JSON payload with the `transaction_id`
///
/// # Output
/// - Success: `checkout_url` to redirect the browser to, and the `session_id`
/// - Error: 404 for a transaction of another user, 409 if it is no longer pending
///
/// # Note
/// On success Stripe redirects to
/// `{FRONTEND_URL}/subscription/success?session_id=...`; the portal then
/// calls `/stripe/success` with that id.
#[post("/create-checkout")]
pub async fn post_create_checkout(
    claims: web::ReqData<AccessClaims>,
    req: web::Json<CheckoutRequest>,
    pool: web::Data<Arc<PgPool>>,
    config: web::Data<Arc<Config>>,
) -> Res<impl Responder> {
    let response = payment::start_checkout(&pool, &config, claims.sub, req.transaction_id).await?;
    Success::ok(response)
}

/// Confirms a finished checkout and applies the purchase. Calling it again,
/// or after the webhook already did, returns the same outcome.
#[get("/success")]
pub async fn get_success(
    claims: web::ReqData<AccessClaims>,
    query: web::Query<SuccessQuery>,
    pool: web::Data<Arc<PgPool>>,
    config: web::Data<Arc<Config>>,
) -> Res<impl Responder> {
    let outcome = payment::confirm_checkout(&pool, &config, claims.sub, &query.session_id).await?;
    Success::ok(outcome)
}

/// Starts saving a new card. Refused on the free tier.
#[post("/create-setup-intent")]
pub async fn post_create_setup_intent(
    claims: web::ReqData<AccessClaims>,
    pool: web::Data<Arc<PgPool>>,
    config: web::Data<Arc<Config>>,
) -> Res<impl Responder> {
    let response = payment::start_payment_method_update(&pool, claims.sub, &config).await?;
    Success::ok(response)
}

/// Saves the card from a succeeded setup intent as the default payment
/// method. A past due subscription is charged with it immediately.
#[post("/verify-setup-intent")]
pub async fn post_verify_setup_intent(
    claims: web::ReqData<AccessClaims>,
    req: web::Json<VerifySetupIntentRequest>,
    pool: web::Data<Arc<PgPool>>,
    config: web::Data<Arc<Config>>,
) -> Res<impl Responder> {
    let response =
        payment::finish_payment_method_update(&pool, &config, claims.sub, &req.setup_intent_id)
            .await?;
    Success::ok(response)
}

/// Buys a credit bundle (100, 200 or 300 requests) through Stripe checkout.
#[post("/create-buy-credit-checkout")]
pub async fn post_create_buy_credit_checkout(
    claims: web::ReqData<AccessClaims>,
    req: web::Json<BuyCreditCheckoutRequest>,
    pool: web::Data<Arc<PgPool>>,
    config: web::Data<Arc<Config>>,
) -> Res<impl Responder> {
    let response = payment::start_credit_checkout(&pool, &config, claims.sub, req.units).await?;
    Success::ok(response)
}

/// Handles Stripe webhook events.
///
/// # Note
/// Called by Stripe, not the portal. Configure
/// `https://<host>/stripe/webhook` in the Stripe dashboard for
/// `checkout.session.completed` and `checkout.session.expired`, and set the
/// signing secret as `STRIPE_WEBHOOK_SECRET`.
#[post("/webhook")]
pub async fn post_webhook(
    payload: String,
    req: HttpRequest,
    pool: web::Data<Arc<PgPool>>,
    config: web::Data<Arc<Config>>,
) -> Res<impl Responder> {
    let signature = match req.headers().get("stripe-signature") {
        Some(signature) => signature.to_str().unwrap_or(""),
        None => return Err(AppError::BadRequest("Stripe signature missing".to_string())),
    };

    let event = pay::construct_event(&payload, signature, &config.stripe.webhook_secret)?;
    payment::handle_webhook_event(&pool, &config, event).await?;

    Success::message("Webhook processed successfully")
}
