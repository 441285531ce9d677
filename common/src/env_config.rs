use std::{env, sync::Arc};

#[derive(Clone, Debug)]
/// Configuration struct for the server.
///
/// Holds everything the backend needs to start: database connection,
/// token signing, listener and worker settings, CORS, logging, the
/// payment providers and the billing policy knobs.
pub struct Config {
    // environment
    pub environment: String, // development or production
    /// The URL of the database to connect to.
    pub database_url: String,
    /// Configuration for access and refresh tokens.
    pub jwt_config: JwtConfig,
    /// The hostname or IP address the server will bind to.
    pub server_host: String,
    /// The port number the server will listen on.
    pub server_port: u16,
    /// The number of worker threads to spawn for handling requests.
    pub num_workers: usize,
    /// The allowed origin for CORS (Cross-Origin Resource Sharing).
    pub cors_allowed_origin: String,
    /// A boolean indicating whether console logging is enabled.
    pub console_logging_enabled: bool,
    /// File the logger mirrors its output to.
    pub log_file: String,
    /// Base URL of the web portal, used to build vendor redirect URLs.
    pub frontend_url: String,
    /// When set, registration does not log the user in until the email is verified.
    pub signup_requires_verification: bool,
    /// Stripe credentials.
    pub stripe: StripeConfig,
    /// PayPal REST credentials.
    pub paypal: PayPalConfig,
    /// Billing periods, grace window and scheduler cadence.
    pub billing: BillingConfig,
}

#[derive(Clone, Debug)]
/// Configuration for JSON Web Token (JWT) authentication.
///
/// Access and refresh tokens are signed with different secrets so a
/// refresh token can never be replayed as an access token.
pub struct JwtConfig {
    /// The secret key used to sign and verify access tokens.
    pub access_secret: String,
    /// The secret key used to sign and verify refresh tokens.
    pub refresh_secret: String,
    /// Access token lifetime in minutes.
    pub access_expiration_minutes: i64,
    /// Refresh token lifetime in days.
    pub refresh_expiration_days: i64,
}

#[derive(Clone, Debug, Default)]
pub struct StripeConfig {
    pub secret_key: String,
    pub public_key: String,
    pub webhook_secret: String,
}

#[derive(Clone, Debug)]
pub struct PayPalConfig {
    pub client_id: String,
    pub client_secret: String,
    /// REST API root, sandbox by default.
    pub api_base: String,
}

#[derive(Clone, Debug)]
pub struct BillingConfig {
    /// Length of one paid period.
    pub period_days: i64,
    /// Access retained after a failed renewal charge.
    pub grace_period_days: i64,
    /// How often the renewal scheduler scans subscriptions.
    pub scheduler_interval_secs: u64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        BillingConfig {
            period_days: 30,
            grace_period_days: 5,
            scheduler_interval_secs: 3600,
        }
    }
}

impl JwtConfig {
    /// Creates a new `JwtConfig` instance from environment variables.
    ///
    /// - `JWT_SECRET`: Required. Secret for access tokens.
    /// - `JWT_REFRESH_SECRET`: Optional. Defaults to `JWT_SECRET` with a suffix.
    /// - `JWT_ACCESS_EXPIRATION_MINUTES`: Optional. Defaults to 15.
    /// - `JWT_REFRESH_EXPIRATION_DAYS`: Optional. Defaults to 30.
    ///
    /// # Panics
    ///
    /// Panics if `JWT_SECRET` is not set or a lifetime cannot be parsed.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let access_secret = env::var("JWT_SECRET").expect("JWT_SECRET must be set");
        let refresh_secret =
            env::var("JWT_REFRESH_SECRET").unwrap_or_else(|_| format!("{}:refresh", access_secret));

        JwtConfig {
            access_secret,
            refresh_secret,
            access_expiration_minutes: env::var("JWT_ACCESS_EXPIRATION_MINUTES")
                .unwrap_or_else(|_| "15".to_string())
                .parse()
                .expect("JWT_ACCESS_EXPIRATION_MINUTES must be a valid number"),
            refresh_expiration_days: env::var("JWT_REFRESH_EXPIRATION_DAYS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .expect("JWT_REFRESH_EXPIRATION_DAYS must be a valid number"),
        }
    }
}

impl BillingConfig {
    pub fn from_env() -> Self {
        let defaults = BillingConfig::default();
        BillingConfig {
            period_days: env::var("BILLING_PERIOD_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.period_days),
            grace_period_days: env::var("BILLING_GRACE_PERIOD_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.grace_period_days),
            scheduler_interval_secs: env::var("BILLING_SCHEDULER_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.scheduler_interval_secs),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance from environment variables.
    ///
    /// # Environment Variables
    ///
    /// Required:
    /// - `ENVIRONMENT`: `development` or `production`
    /// - `DATABASE_URL`: Connection string for the database
    /// - `JWT_SECRET`: Secret key for JWT signing (via `JwtConfig::from_env()`)
    ///
    /// Optional (with defaults):
    /// - `IP`: Server host (default: "127.0.0.1")
    /// - `PORT`: Server port (default: 5000)
    /// - `WORKERS`: Number of worker threads (default: 4)
    /// - `CORS_ALLOWED_ORIGIN`: Allowed CORS origin (default: "http://localhost:3000")
    /// - `ENABLE_CONSOLE_LOGGING`: Whether to enable console logging (default: true)
    /// - `LOG_FILE`: Log file path (default: "textextract.log")
    /// - `FRONTEND_URL`: Portal URL (default: "http://localhost:3000")
    /// - `SIGNUP_REQUIRES_VERIFICATION`: (default: false)
    /// - `STRIPE_SECRET_KEY`, `STRIPE_PUBLIC_KEY`, `STRIPE_WEBHOOK_SECRET`
    /// - `PAYPAL_CLIENT_ID`, `PAYPAL_CLIENT_SECRET`, `PAYPAL_API_BASE`
    /// - `BILLING_PERIOD_DAYS`, `BILLING_GRACE_PERIOD_DAYS`, `BILLING_SCHEDULER_INTERVAL_SECS`
    ///
    /// # Panics
    ///
    /// This function will panic if required environment variables are missing.
    pub fn from_env() -> Arc<Self> {
        dotenvy::dotenv().ok();

        Arc::new(Config {
            environment: env::var("ENVIRONMENT").expect("ENVIRONMENT must be set"),
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            jwt_config: JwtConfig::from_env(),
            server_host: env::var("IP").unwrap_or_else(|_| "127.0.0.1".to_string()),
            server_port: env::var("PORT")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .unwrap_or(5000),
            num_workers: env::var("WORKERS")
                .unwrap_or_else(|_| "4".to_string())
                .parse()
                .unwrap_or(4),
            cors_allowed_origin: env::var("CORS_ALLOWED_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            console_logging_enabled: env::var("ENABLE_CONSOLE_LOGGING")
                .unwrap_or_else(|_| "true".to_string())
                .to_lowercase()
                == "true",
            log_file: env::var("LOG_FILE").unwrap_or_else(|_| "textextract.log".to_string()),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            signup_requires_verification: env::var("SIGNUP_REQUIRES_VERIFICATION")
                .unwrap_or_else(|_| "false".to_string())
                .to_lowercase()
                == "true",
            stripe: StripeConfig {
                secret_key: env::var("STRIPE_SECRET_KEY").unwrap_or_default(),
                public_key: env::var("STRIPE_PUBLIC_KEY").unwrap_or_default(),
                webhook_secret: env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_default(),
            },
            paypal: PayPalConfig {
                client_id: env::var("PAYPAL_CLIENT_ID").unwrap_or_default(),
                client_secret: env::var("PAYPAL_CLIENT_SECRET").unwrap_or_default(),
                api_base: env::var("PAYPAL_API_BASE")
                    .unwrap_or_else(|_| "https://api-m.sandbox.paypal.com".to_string()),
            },
            billing: BillingConfig::from_env(),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
