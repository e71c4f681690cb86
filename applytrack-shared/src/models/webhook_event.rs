/// Idempotency ledger for payment-provider webhooks
///
/// Providers retry deliveries, so each event id is claimed once. A claim is
/// an `INSERT .. ON CONFLICT DO NOTHING`; only the first delivery wins.

use sqlx::PgPool;

pub struct ProcessedWebhookEvent;

impl ProcessedWebhookEvent {
    /// Claims an event id; false when it was already processed
    pub async fn claim(pool: &PgPool, event_id: &str, event_type: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO processed_webhook_events (event_id, event_type) VALUES ($1, $2) \
             ON CONFLICT (event_id) DO NOTHING",
        )
        .bind(event_id)
        .bind(event_type)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Releases a claim so a failed event can be retried by the provider
    pub async fn release(pool: &PgPool, event_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM processed_webhook_events WHERE event_id = $1")
            .bind(event_id)
            .execute(pool)
            .await?;

        Ok(())
    }
}
