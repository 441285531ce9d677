use std::sync::Arc;

use actix_web::web::{self};
use common::env_config::Config;
use sqlx::PgPool;

pub mod routes {
    pub mod paypal;
    pub mod stripe;
    pub mod sub;
}

pub mod services {
    pub mod lifecycle;
    pub mod pay;
    pub mod payment;
    pub mod paypal;
    pub mod plan;
    pub mod scheduler;
    pub mod sub;
}

pub mod dtos {
    pub mod paypal;
    pub mod stripe;
    pub mod sub;
}

pub fn mount_subscription() -> actix_web::Scope {
    web::scope("/subscription")
        .service(routes::sub::get_plans)
        .service(routes::sub::get_user_plan)
        .service(routes::sub::post_upgrade)
        .service(routes::sub::post_cancel)
        .service(routes::sub::post_renew)
        .service(routes::sub::post_update_payment_method)
        .service(routes::sub::post_auto_renewal)
        .service(routes::sub::post_buy_credits)
        .service(routes::sub::get_transactions)
}

pub fn mount_stripe() -> actix_web::Scope {
    web::scope("/stripe")
        .service(routes::stripe::get_public_key)
        .service(routes::stripe::post_create_checkout)
        .service(routes::stripe::get_success)
        .service(routes::stripe::post_create_setup_intent)
        .service(routes::stripe::post_verify_setup_intent)
        .service(routes::stripe::post_create_buy_credit_checkout)
        .service(routes::stripe::post_webhook)
}

pub fn mount_paypal() -> actix_web::Scope {
    web::scope("/paypal")
        .service(routes::paypal::post_create_order)
        .service(routes::paypal::post_capture_order)
}

/// Starts the background renewal pass on the current tokio runtime.
pub fn start_renewal_scheduler(pool: Arc<PgPool>, config: Arc<Config>) {
    services::scheduler::spawn(pool, config);
}
