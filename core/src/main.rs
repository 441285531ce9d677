mod cors;

use std::sync::Arc;

use actix_web::{App, HttpServer, web};
use api_auth::{LogNotifier, Notifier};
use common::env_config::Config;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // get env vars
    let config = Config::from_env();
    let config_data = config.clone();
    let origin = config.cors_allowed_origin.clone();

    // init logger
    logger::setup(&config).expect("Failed to set up logger");

    // init db connection
    let pool = db::setup(&config.database_url, config.is_production())
        .await
        .expect("Failed to set up database");

    if config.stripe.secret_key.is_empty() {
        log::warn!("STRIPE_SECRET_KEY is not set; Stripe checkout and renewals are disabled");
    }
    api_subs::start_renewal_scheduler(pool.clone(), config.clone());

    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);

    log::info!(
        "Listening on {}:{} with {} workers",
        config.server_host,
        config.server_port,
        config.num_workers
    );

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(pool.clone()))
            .app_data(web::Data::new(config_data.clone()))
            .app_data(web::Data::new(notifier.clone()))
            .wrap(api_auth::auth_middleware(config_data.clone())) // 3rd
            .wrap(logger::middleware(config_data.console_logging_enabled)) // 2nd
            .wrap(cors::middleware(&origin)) // 1st
            .service(api_auth::mount_auth())
            .service(api_auth::mount_users())
            .service(api_subs::mount_subscription())
            .service(api_subs::mount_stripe())
            .service(api_subs::mount_paypal())
    })
    .bind((config.server_host.as_str(), config.server_port))?
    .workers(config.num_workers)
    .run()
    .await
}
