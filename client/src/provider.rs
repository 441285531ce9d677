use async_trait::async_trait;
use common::sub::{CreditBundle, PaymentProvider as ProviderKind};
use uuid::Uuid;

use crate::{
    error::Result,
    models::{Completion, Redirect},
};

/// What starting a plan checkout led to.
#[derive(Debug, Clone, PartialEq)]
pub enum Checkout {
    /// Send the user to the vendor page; confirm with the returned reference.
    Redirect(Redirect),
    /// No payment was needed (switched to the free plan).
    Done { message: String },
}

/// One checkout vendor as seen by the subscription page. Every call is a
/// single request/response; errors come back unchanged and are never retried.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn checkout_plan(&self, plan_id: Uuid) -> Result<Checkout>;

    /// Renews an expired or payment failed subscription.
    async fn checkout_renewal(&self) -> Result<Redirect>;

    async fn checkout_credits(&self, bundle: CreditBundle) -> Result<Redirect>;

    /// Settles a payment the user completed on the vendor page. `reference`
    /// is the Stripe session id or the PayPal order id.
    async fn confirm(&self, reference: &str) -> Result<Completion>;
}
