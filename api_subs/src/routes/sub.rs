use std::sync::Arc;

use actix_web::{Responder, get, post, web};
use common::{error::Res, http::Success, jwt::AccessClaims};
use serde_json::json;
use sqlx::PgPool;

use crate::{
    dtos::sub::{
        AutoRenewalRequest, BuyCreditsRequest, SubscriptionResponse, TransactionsQuery,
        TransactionsResponse, UpgradeRequest,
    },
    services::{self, sub::UpgradeOutcome},
};

/// Lists the active plans, cheapest first. Public.
#[get("/plans")]
pub async fn get_plans(pool: web::Data<Arc<PgPool>>) -> Res<impl Responder> {
    let plans = db::plan::get_active_plans(&***pool).await?;
    Success::ok(plans)
}

/// Returns the plan whose limits currently apply and this month's usage.
///
/// # Output
/// - `plan`: the subscribed plan while active or past due, the free plan otherwise
/// - `usage`: subscription status and dates, request and device counters,
///   remaining requests this month and purchased credits
#[get("/user-plan")]
pub async fn get_user_plan(
    claims: web::ReqData<AccessClaims>,
    pool: web::Data<Arc<PgPool>>,
) -> Res<impl Responder> {
    let plan = services::sub::get_user_plan(&pool, claims.sub).await?;
    Success::ok(plan)
}

/// Starts a move to another plan.
///
/// # Input
/// - `req`: JSON payload with the target `plan_id`
///
/// # Output
/// - Paid plan: a pending transaction (`transaction_id`, `amount`,
///   `currency`, `plan`) to be checked out with Stripe or PayPal
/// - Free plan: the active subscription is cancelled and the free limits apply
/// - 409 when already on that plan or the current status forbids upgrading
#[post("/upgrade")]
pub async fn post_upgrade(
    claims: web::ReqData<AccessClaims>,
    req: web::Json<UpgradeRequest>,
    pool: web::Data<Arc<PgPool>>,
) -> Res<impl Responder> {
    match services::sub::initiate_upgrade(&pool, claims.sub, req.plan_id).await? {
        UpgradeOutcome::Pending(pending) => Success::ok(json!(pending)),
        UpgradeOutcome::Downgraded(subscription) => Success::ok(json!(SubscriptionResponse {
            success: true,
            message: "Switched to the free plan".to_string(),
            subscription,
        })),
        UpgradeOutcome::AlreadyFree => Success::ok(json!({
            "success": true,
            "message": "Already on the free plan",
        })),
    }
}

/// Cancels the active subscription immediately. The row stays with status
/// `cancelled` and the account falls back to free-plan limits.
#[post("/cancel")]
pub async fn post_cancel(
    claims: web::ReqData<AccessClaims>,
    pool: web::Data<Arc<PgPool>>,
) -> Res<impl Responder> {
    let subscription = services::sub::cancel_subscription(&pool, claims.sub).await?;
    Success::ok(SubscriptionResponse {
        success: true,
        message: "Subscription cancelled".to_string(),
        subscription,
    })
}

/// Creates a pending renewal for an expired or payment failed subscription.
#[post("/renew")]
pub async fn post_renew(
    claims: web::ReqData<AccessClaims>,
    pool: web::Data<Arc<PgPool>>,
) -> Res<impl Responder> {
    let pending = services::sub::initiate_renewal(&pool, claims.sub).await?;
    Success::ok(pending)
}

/// Same flow as `/stripe/create-setup-intent`. Refused on the free tier.
#[post("/update-payment-method")]
pub async fn post_update_payment_method(
    claims: web::ReqData<AccessClaims>,
    pool: web::Data<Arc<PgPool>>,
    config: web::Data<Arc<common::env_config::Config>>,
) -> Res<impl Responder> {
    let response = services::payment::start_payment_method_update(&pool, claims.sub, &config).await?;
    Success::ok(response)
}

#[post("/auto-renewal")]
pub async fn post_auto_renewal(
    claims: web::ReqData<AccessClaims>,
    req: web::Json<AutoRenewalRequest>,
    pool: web::Data<Arc<PgPool>>,
) -> Res<impl Responder> {
    let subscription = services::sub::set_auto_renewal(&pool, claims.sub, req.enabled).await?;
    let message = if req.enabled {
        "Auto renewal enabled"
    } else {
        "Auto renewal disabled"
    };
    Success::ok(SubscriptionResponse {
        success: true,
        message: message.to_string(),
        subscription,
    })
}

/// Creates a pending credit bundle purchase (100, 200 or 300 requests).
#[post("/buy-credits")]
pub async fn post_buy_credits(
    claims: web::ReqData<AccessClaims>,
    req: web::Json<BuyCreditsRequest>,
    pool: web::Data<Arc<PgPool>>,
) -> Res<impl Responder> {
    let pending = services::sub::initiate_credit_purchase(&pool, claims.sub, req.units).await?;
    Success::ok(pending)
}

/// Payment history, newest first. `limit` is clamped to 1..=100, default 10.
#[get("/transactions")]
pub async fn get_transactions(
    claims: web::ReqData<AccessClaims>,
    query: web::Query<TransactionsQuery>,
    pool: web::Data<Arc<PgPool>>,
) -> Res<impl Responder> {
    let (transactions, limit, offset) =
        services::sub::list_transactions(&pool, claims.sub, query.limit, query.offset).await?;
    Success::ok(TransactionsResponse {
        transactions,
        limit,
        offset,
    })
}
