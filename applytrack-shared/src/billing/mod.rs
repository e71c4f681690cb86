/// Subscription billing
///
/// The API talks to the payment provider through [`PaymentProvider`]; the
/// production implementation is [`stripe::StripeClient`]. Provider callbacks
/// arrive as signed webhooks handled by [`webhook`].

pub mod stripe;
pub mod webhook;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

pub use stripe::{StripeClient, StripeConfig};
pub use webhook::{parse_event, verify_signature, BillingEvent, WebhookEvent};

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(&'static str),

    #[error("Malformed webhook event: {0}")]
    MalformedEvent(String),

    #[error("Payment provider error: {0}")]
    Provider(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Hosted page the client is redirected to
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RedirectSession {
    pub id: Option<String>,
    pub url: String,
}

/// Customer details sent to the provider
#[derive(Debug, Clone)]
pub struct NewCustomer<'a> {
    pub user_id: Uuid,
    pub email: &'a str,
    pub name: Option<&'a str>,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Creates a customer and returns its provider id
    async fn create_customer(&self, customer: NewCustomer<'_>) -> Result<String, BillingError>;

    /// Starts a hosted checkout for the PRO subscription
    async fn create_checkout_session(
        &self,
        customer_id: &str,
        user_id: Uuid,
    ) -> Result<RedirectSession, BillingError>;

    /// Opens the self-service billing portal
    async fn create_portal_session(&self, customer_id: &str) -> Result<RedirectSession, BillingError>;

    /// Secret used to verify webhook signatures
    fn webhook_secret(&self) -> &str;
}
