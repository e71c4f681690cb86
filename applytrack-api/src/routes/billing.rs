/// Subscription billing
///
/// - `GET  /v1/billing` - Plan, subscription state, limits and usage
/// - `POST /v1/billing/checkout` - Hosted checkout for PRO
/// - `POST /v1/billing/portal` - Hosted self-service portal
/// - `POST /v1/billing/webhook` - Provider callbacks (public, signed)
///
/// Webhooks are the only writer of plan state. Each event id is claimed
/// once; a failed event releases its claim so the provider's retry is
/// processed again.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use applytrack_shared::{
    auth::middleware::AuthContext,
    billing::{
        parse_event, verify_signature, webhook::SIGNATURE_HEADER, BillingEvent, NewCustomer, RedirectSession,
    },
    models::{
        audit_log::{AuditAction, AuditEntry, AuditLog},
        user::{SubscriptionUpdate, User},
        webhook_event::ProcessedWebhookEvent,
    },
    plan::{Plan, PlanLimits, Usage},
};
use axum::{body::Bytes, extract::State, http::HeaderMap, Extension, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct BillingSummary {
    pub plan: Plan,
    pub subscription_status: Option<String>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub limits: PlanLimits,
    pub usage: Usage,
    pub billing_enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub duplicate: bool,
}

async fn current_user(state: &AppState, auth: &AuthContext) -> ApiResult<User> {
    User::find_by_id(&state.db, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Account no longer exists".to_string()))
}

pub async fn summary(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<BillingSummary>> {
    let user = current_user(&state, &auth).await?;
    let usage = state.quota.usage(user.id).await?;

    Ok(Json(BillingSummary {
        limits: user.plan.limits(),
        plan: user.plan,
        subscription_status: user.subscription_status,
        current_period_end: user.current_period_end,
        usage,
        billing_enabled: state.payments.is_some(),
    }))
}

/// Starts a checkout, creating the provider customer on first use
///
/// # Errors
///
/// - `409 Conflict`: Already on PRO
/// - `502 Bad Gateway`: Provider failure
/// - `503 Service Unavailable`: Billing not configured
pub async fn checkout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<RedirectSession>> {
    let payments = state.payments()?.clone();
    let user = current_user(&state, &auth).await?;

    if user.plan == Plan::Pro {
        return Err(ApiError::Conflict("Already subscribed to PRO".to_string()));
    }

    let customer_id = match user.stripe_customer_id.clone() {
        Some(id) => id,
        None => {
            let id = payments
                .create_customer(NewCustomer {
                    user_id: user.id,
                    email: &user.email,
                    name: user.name.as_deref(),
                })
                .await?;
            User::set_stripe_customer(&state.db, user.id, &id).await?;
            tracing::info!(user_id = %user.id, customer_id = %id, "Created billing customer");
            id
        }
    };

    let session = payments.create_checkout_session(&customer_id, user.id).await?;
    Ok(Json(session))
}

pub async fn portal(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<RedirectSession>> {
    let payments = state.payments()?.clone();
    let user = current_user(&state, &auth).await?;

    let customer_id = user
        .stripe_customer_id
        .ok_or_else(|| ApiError::BadRequest("No billing account yet; start a checkout first".to_string()))?;

    Ok(Json(payments.create_portal_session(&customer_id).await?))
}

/// Subscription state implied by an event, `None` when the plan is untouched
fn subscription_update(
    event: &BillingEvent,
    current_period_end: Option<DateTime<Utc>>,
) -> Option<SubscriptionUpdate> {
    match event {
        BillingEvent::CheckoutCompleted { subscription_id, .. } => Some(SubscriptionUpdate {
            plan: Plan::Pro,
            subscription_id: subscription_id.clone(),
            status: Some("active".to_string()),
            current_period_end,
        }),
        BillingEvent::SubscriptionUpdated {
            subscription_id,
            status,
            current_period_end,
            ..
        } => Some(SubscriptionUpdate {
            plan: Plan::from_subscription_status(status),
            subscription_id: Some(subscription_id.clone()),
            status: Some(status.clone()),
            current_period_end: *current_period_end,
        }),
        BillingEvent::SubscriptionDeleted { .. } => Some(SubscriptionUpdate {
            plan: Plan::Free,
            subscription_id: None,
            status: Some("canceled".to_string()),
            current_period_end: None,
        }),
        BillingEvent::PaymentFailed { .. } | BillingEvent::Ignored => None,
    }
}

fn customer_of(event: &BillingEvent) -> Option<&str> {
    match event {
        BillingEvent::CheckoutCompleted { customer_id, .. }
        | BillingEvent::SubscriptionUpdated { customer_id, .. }
        | BillingEvent::SubscriptionDeleted { customer_id }
        | BillingEvent::PaymentFailed { customer_id } => Some(customer_id),
        BillingEvent::Ignored => None,
    }
}

/// Finds the account an event is about
///
/// Checkout events carry our user id and bind the customer to it; every
/// other event is matched by customer id.
async fn event_user(state: &AppState, event: &BillingEvent, customer_id: &str) -> ApiResult<Option<User>> {
    if let BillingEvent::CheckoutCompleted {
        user_id: Some(user_id),
        ..
    } = event
    {
        if let Some(user) = User::find_by_id(&state.db, *user_id).await? {
            if user.stripe_customer_id.as_deref() != Some(customer_id) {
                User::set_stripe_customer(&state.db, user.id, customer_id).await?;
            }
            return Ok(Some(user));
        }
    }

    Ok(User::find_by_stripe_customer(&state.db, customer_id).await?)
}

async fn apply_event(state: &AppState, event_type: &str, event: &BillingEvent) -> ApiResult<()> {
    let Some(customer_id) = customer_of(event) else {
        tracing::debug!(event_type, "Ignoring webhook event");
        return Ok(());
    };

    let Some(user) = event_user(state, event, customer_id).await? else {
        tracing::warn!(event_type, customer_id, "Webhook for unknown customer");
        return Ok(());
    };

    if let BillingEvent::PaymentFailed { .. } = event {
        User::set_subscription_status(&state.db, user.id, "past_due").await?;
        tracing::warn!(user_id = %user.id, "Subscription payment failed");
        return Ok(());
    }

    if let Some(update) = subscription_update(event, user.current_period_end) {
        let new_plan = update.plan;
        User::apply_subscription(&state.db, user.id, update).await?;

        if new_plan != user.plan {
            AuditLog::record(
                &state.db,
                AuditEntry::new(AuditAction::PlanChange).user(user.id).metadata(serde_json::json!({
                    "from": user.plan,
                    "to": new_plan,
                    "event": event_type,
                })),
            )
            .await;

            tracing::info!(user_id = %user.id, from = %user.plan, to = %new_plan, "Plan changed");
        }
    }

    Ok(())
}

/// Receives a signed provider event
///
/// # Errors
///
/// - `400 Bad Request`: Missing or invalid signature, malformed event
/// - `503 Service Unavailable`: Billing not configured
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let payments = state.payments()?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing Stripe-Signature header".to_string()))?;

    verify_signature(&body, signature, payments.webhook_secret(), Utc::now().timestamp())?;
    let event = parse_event(&body)?;

    if !ProcessedWebhookEvent::claim(&state.db, &event.id, &event.event_type).await? {
        tracing::debug!(event_id = %event.id, "Duplicate webhook delivery");
        return Ok(Json(WebhookAck {
            received: true,
            duplicate: true,
        }));
    }

    if let Err(err) = apply_event(&state, &event.event_type, &event.event).await {
        tracing::error!(event_id = %event.id, error = %err, "Webhook processing failed");
        if let Err(release_err) = ProcessedWebhookEvent::release(&state.db, &event.id).await {
            tracing::error!(event_id = %event.id, error = %release_err, "Failed to release webhook claim");
        }
        return Err(err);
    }

    Ok(Json(WebhookAck {
        received: true,
        duplicate: false,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkout_upgrades_to_pro() {
        let event = BillingEvent::CheckoutCompleted {
            customer_id: "cus_1".to_string(),
            subscription_id: Some("sub_1".to_string()),
            user_id: None,
        };
        let update = subscription_update(&event, None).unwrap();

        assert_eq!(update.plan, Plan::Pro);
        assert_eq!(update.subscription_id.as_deref(), Some("sub_1"));
        assert_eq!(update.status.as_deref(), Some("active"));
    }

    #[test]
    fn test_subscription_status_drives_plan() {
        let updated = |status: &str| BillingEvent::SubscriptionUpdated {
            customer_id: "cus_1".to_string(),
            subscription_id: "sub_1".to_string(),
            status: status.to_string(),
            current_period_end: None,
        };

        assert_eq!(subscription_update(&updated("trialing"), None).unwrap().plan, Plan::Pro);
        assert_eq!(subscription_update(&updated("active"), None).unwrap().plan, Plan::Pro);
        assert_eq!(subscription_update(&updated("unpaid"), None).unwrap().plan, Plan::Free);
        assert_eq!(subscription_update(&updated("past_due"), None).unwrap().plan, Plan::Free);
    }

    #[test]
    fn test_deletion_downgrades_and_clears() {
        let event = BillingEvent::SubscriptionDeleted {
            customer_id: "cus_1".to_string(),
        };
        let update = subscription_update(&event, Some(Utc::now())).unwrap();

        assert_eq!(update.plan, Plan::Free);
        assert!(update.subscription_id.is_none());
        assert!(update.current_period_end.is_none());
    }

    #[test]
    fn test_events_without_plan_change() {
        let failed = BillingEvent::PaymentFailed {
            customer_id: "cus_1".to_string(),
        };
        assert!(subscription_update(&failed, None).is_none());
        assert_eq!(customer_of(&failed), Some("cus_1"));

        assert!(subscription_update(&BillingEvent::Ignored, None).is_none());
        assert_eq!(customer_of(&BillingEvent::Ignored), None);
    }

    #[test]
    fn test_ack_serialization() {
        let ack = serde_json::to_value(WebhookAck {
            received: true,
            duplicate: false,
        })
        .unwrap();
        assert_eq!(ack, serde_json::json!({ "received": true }));
    }
}
