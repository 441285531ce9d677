//! Client core for the TextExtract portal and desktop app: session handling,
//! an API client that refreshes expired tokens, the Stripe and PayPal
//! checkout adapters and the subscription page model.

pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod models;
pub mod paypal;
pub mod provider;
pub mod session;
pub mod stripe;
pub mod subscription;
pub mod view_model;

use std::sync::Arc;

pub use auth::AuthService;
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use http::ApiClient;
pub use provider::{Checkout, PaymentProvider};
pub use session::{FileStorage, SessionStore};

/// Everything a front end needs, sharing one session.
#[derive(Clone)]
pub struct Client {
    pub auth: Arc<AuthService>,
    pub api: ApiClient,
    pub subscriptions: subscription::SubscriptionApi,
    pub stripe: stripe::StripeAdapter,
    pub paypal: paypal::PayPalAdapter,
}

impl Client {
    /// Builds a client whose session is persisted in `config.session_file`.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let store = SessionStore::new(Box::new(FileStorage::new(&config.session_file)));
        Client::with_store(config, store)
    }

    pub fn with_store(config: &ClientConfig, store: SessionStore) -> Result<Self> {
        let auth = AuthService::new(config, store)?;
        let api = ApiClient::new(auth.clone());
        Ok(Client {
            subscriptions: subscription::SubscriptionApi::new(api.clone()),
            stripe: stripe::StripeAdapter::new(api.clone()),
            paypal: paypal::PayPalAdapter::new(api.clone()),
            auth,
            api,
        })
    }

    pub fn provider(&self, kind: common::sub::PaymentProvider) -> &dyn PaymentProvider {
        match kind {
            common::sub::PaymentProvider::Stripe => &self.stripe,
            common::sub::PaymentProvider::Paypal => &self.paypal,
        }
    }
}
