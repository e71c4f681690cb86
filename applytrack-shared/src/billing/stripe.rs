/// Stripe REST client
///
/// Only the three calls the service needs, sent as form posts with the
/// secret key as bearer credential.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

use super::{BillingError, NewCustomer, PaymentProvider, RedirectSession};

pub const DEFAULT_API_BASE: &str = "https://api.stripe.com/v1";

const REQUEST_TIMEOUT_SECONDS: u64 = 20;

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    /// Recurring price of the PRO plan
    pub price_id: String,
    pub success_url: String,
    pub cancel_url: String,
    pub portal_return_url: String,
    pub api_base: String,
}

impl StripeConfig {
    /// Reads `STRIPE_*` variables; `None` when `STRIPE_SECRET_KEY` is unset
    ///
    /// Redirect URLs default to pages under `app_url`.
    pub fn from_env(app_url: &str) -> anyhow::Result<Option<Self>> {
        let secret_key = match std::env::var("STRIPE_SECRET_KEY") {
            Ok(key) if !key.trim().is_empty() => key,
            _ => return Ok(None),
        };

        let webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET")
            .map_err(|_| anyhow::anyhow!("STRIPE_WEBHOOK_SECRET is required when STRIPE_SECRET_KEY is set"))?;
        let price_id = std::env::var("STRIPE_PRICE_ID")
            .map_err(|_| anyhow::anyhow!("STRIPE_PRICE_ID is required when STRIPE_SECRET_KEY is set"))?;

        let app_url = app_url.trim_end_matches('/');

        Ok(Some(Self {
            secret_key,
            webhook_secret,
            price_id,
            success_url: std::env::var("STRIPE_SUCCESS_URL")
                .unwrap_or_else(|_| format!("{}/billing?checkout=success", app_url)),
            cancel_url: std::env::var("STRIPE_CANCEL_URL")
                .unwrap_or_else(|_| format!("{}/billing?checkout=cancelled", app_url)),
            portal_return_url: format!("{}/billing", app_url),
            api_base: std::env::var("STRIPE_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string()),
        }))
    }
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

pub struct StripeClient {
    config: StripeConfig,
    client: Client,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Result<Self, BillingError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .build()?;

        Ok(Self { config, client })
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, BillingError> {
        let url = format!("{}/{}", self.config.api_base.trim_end_matches('/'), path);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.secret_key)
            .form(params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorEnvelope>()
                .await
                .ok()
                .and_then(|e| e.error.message)
                .unwrap_or_else(|| format!("HTTP {}", status));

            tracing::warn!(path, status = %status, message = %message, "Stripe request failed");
            return Err(BillingError::Provider(message));
        }

        Ok(response.json::<T>().await?)
    }
}

fn into_redirect(session: SessionResponse) -> Result<RedirectSession, BillingError> {
    let url = session
        .url
        .ok_or_else(|| BillingError::Provider("session response has no url".to_string()))?;

    Ok(RedirectSession { id: session.id, url })
}

/// Form fields for a PRO subscription checkout
pub fn checkout_params(config: &StripeConfig, customer_id: &str, user_id: Uuid) -> Vec<(&'static str, String)> {
    vec![
        ("mode", "subscription".to_string()),
        ("customer", customer_id.to_string()),
        ("client_reference_id", user_id.to_string()),
        ("line_items[0][price]", config.price_id.clone()),
        ("line_items[0][quantity]", "1".to_string()),
        ("success_url", config.success_url.clone()),
        ("cancel_url", config.cancel_url.clone()),
        ("metadata[user_id]", user_id.to_string()),
    ]
}

#[async_trait]
impl PaymentProvider for StripeClient {
    async fn create_customer(&self, customer: NewCustomer<'_>) -> Result<String, BillingError> {
        let mut params = vec![
            ("email", customer.email.to_string()),
            ("metadata[user_id]", customer.user_id.to_string()),
        ];
        if let Some(name) = customer.name {
            params.push(("name", name.to_string()));
        }

        let created: IdResponse = self.post_form("customers", &params).await?;
        tracing::info!(user_id = %customer.user_id, customer_id = %created.id, "Stripe customer created");
        Ok(created.id)
    }

    async fn create_checkout_session(
        &self,
        customer_id: &str,
        user_id: Uuid,
    ) -> Result<RedirectSession, BillingError> {
        let params = checkout_params(&self.config, customer_id, user_id);
        let session: SessionResponse = self.post_form("checkout/sessions", &params).await?;
        into_redirect(session)
    }

    async fn create_portal_session(&self, customer_id: &str) -> Result<RedirectSession, BillingError> {
        let params = [
            ("customer", customer_id.to_string()),
            ("return_url", self.config.portal_return_url.clone()),
        ];
        let session: SessionResponse = self.post_form("billing_portal/sessions", &params).await?;
        into_redirect(session)
    }

    fn webhook_secret(&self) -> &str {
        &self.config.webhook_secret
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> StripeConfig {
        StripeConfig {
            secret_key: "sk_test_123".to_string(),
            webhook_secret: "whsec_123".to_string(),
            price_id: "price_pro".to_string(),
            success_url: "https://app.test/billing?checkout=success".to_string(),
            cancel_url: "https://app.test/billing?checkout=cancelled".to_string(),
            portal_return_url: "https://app.test/billing".to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    #[test]
    fn test_checkout_params() {
        let user_id = Uuid::new_v4();
        let params = checkout_params(&config(), "cus_1", user_id);

        assert!(params.contains(&("mode", "subscription".to_string())));
        assert!(params.contains(&("customer", "cus_1".to_string())));
        assert!(params.contains(&("line_items[0][price]", "price_pro".to_string())));
        assert!(params.contains(&("client_reference_id", user_id.to_string())));
    }

    #[test]
    fn test_into_redirect_requires_url() {
        let ok = into_redirect(SessionResponse {
            id: Some("cs_1".to_string()),
            url: Some("https://checkout.stripe.com/c/cs_1".to_string()),
        })
        .unwrap();
        assert_eq!(ok.id.as_deref(), Some("cs_1"));

        let err = into_redirect(SessionResponse { id: None, url: None });
        assert!(matches!(err, Err(BillingError::Provider(_))));
    }

    #[test]
    fn test_client_exposes_webhook_secret() {
        let client = StripeClient::new(config()).unwrap();
        assert_eq!(client.webhook_secret(), "whsec_123");
    }
}
