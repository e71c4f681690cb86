/// Subscription plans and quota enforcement
///
/// # Limits by Plan
///
/// **Free:**
/// - Live applications: 50
/// - Labels: 10
/// - Documents: 10
/// - CSV import: no
/// - API requests: 60 / minute
///
/// **Pro:**
/// - Everything unlimited, CSV import, 300 requests / minute
///
/// Quotas count live (not soft-deleted) rows only.
///
/// # Example
///
/// ```no_run
/// use applytrack_shared::plan::{Plan, QuotaEnforcer, Resource};
/// use sqlx::PgPool;
/// use uuid::Uuid;
///
/// # async fn example(pool: PgPool, user_id: Uuid) -> Result<(), Box<dyn std::error::Error>> {
/// let enforcer = QuotaEnforcer::new(pool);
///
/// // Fails with QuotaError::LimitExceeded when one more application would not fit
/// enforcer.enforce(user_id, Plan::Free, Resource::Applications, 1).await?;
/// # Ok(())
/// # }
/// ```

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::fmt;
use uuid::Uuid;

/// Subscription tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Plan {
    Free,
    Pro,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "FREE",
            Plan::Pro => "PRO",
        }
    }

    pub fn limits(&self) -> PlanLimits {
        PlanLimits::for_plan(*self)
    }

    /// Plan implied by a payment-provider subscription status
    pub fn from_subscription_status(status: &str) -> Self {
        match status {
            "active" | "trialing" => Plan::Pro,
            _ => Plan::Free,
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Countable resource limited by plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Applications,
    Labels,
    Documents,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Applications => "applications",
            Resource::Labels => "labels",
            Resource::Documents => "documents",
        }
    }

    fn count_sql(&self) -> &'static str {
        match self {
            Resource::Applications => {
                "SELECT COUNT(*) FROM job_applications WHERE user_id = $1 AND deleted_at IS NULL"
            }
            Resource::Labels => "SELECT COUNT(*) FROM labels WHERE user_id = $1 AND deleted_at IS NULL",
            Resource::Documents => {
                "SELECT COUNT(*) FROM documents WHERE user_id = $1 AND deleted_at IS NULL"
            }
        }
    }
}

/// Plan limits; `None` means unlimited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanLimits {
    pub applications: Option<u32>,
    pub labels: Option<u32>,
    pub documents: Option<u32>,
    pub csv_import: bool,
    pub requests_per_minute: u32,
}

impl PlanLimits {
    pub fn for_plan(plan: Plan) -> Self {
        match plan {
            Plan::Free => PlanLimits {
                applications: Some(50),
                labels: Some(10),
                documents: Some(10),
                csv_import: false,
                requests_per_minute: 60,
            },
            Plan::Pro => PlanLimits {
                applications: None,
                labels: None,
                documents: None,
                csv_import: true,
                requests_per_minute: 300,
            },
        }
    }

    pub fn get(&self, resource: Resource) -> Option<u32> {
        match resource {
            Resource::Applications => self.applications,
            Resource::Labels => self.labels,
            Resource::Documents => self.documents,
        }
    }
}

/// Quota violation
#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    /// Creating `requested` more items would exceed the limit
    #[error("Your plan allows {limit} {}; you have {current}", .resource.as_str())]
    LimitExceeded {
        resource: Resource,
        limit: u32,
        current: u32,
        requested: u32,
    },

    /// The plan does not include the feature
    #[error("{0} requires the PRO plan")]
    FeatureUnavailable(&'static str),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result of a quota check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaCheck {
    pub current: u32,
    pub limit: Option<u32>,
}

impl QuotaCheck {
    /// Whether `additional` more items fit under the limit
    pub fn allows(&self, additional: u32) -> bool {
        match self.limit {
            Some(limit) => self.current.saturating_add(additional) <= limit,
            None => true,
        }
    }

    pub fn remaining(&self) -> Option<u32> {
        self.limit.map(|limit| limit.saturating_sub(self.current))
    }
}

/// Current usage of every limited resource
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Usage {
    pub applications: u32,
    pub labels: u32,
    pub documents: u32,
}

/// Checks usage against plan limits
#[derive(Clone)]
pub struct QuotaEnforcer {
    db: PgPool,
}

impl QuotaEnforcer {
    pub fn new(db: PgPool) -> Self {
        QuotaEnforcer { db }
    }

    /// Counts live rows of a resource for a user
    pub async fn count(&self, user_id: Uuid, resource: Resource) -> Result<u32, sqlx::Error> {
        let count: i64 = sqlx::query_scalar(resource.count_sql())
            .bind(user_id)
            .fetch_one(&self.db)
            .await?;

        Ok(count.max(0) as u32)
    }

    pub async fn check(
        &self,
        user_id: Uuid,
        plan: Plan,
        resource: Resource,
    ) -> Result<QuotaCheck, sqlx::Error> {
        let limit = plan.limits().get(resource);
        let current = match limit {
            // unlimited plans skip the count
            None => 0,
            Some(_) => self.count(user_id, resource).await?,
        };

        Ok(QuotaCheck { current, limit })
    }

    /// Fails when `additional` more items would exceed the limit
    pub async fn enforce(
        &self,
        user_id: Uuid,
        plan: Plan,
        resource: Resource,
        additional: u32,
    ) -> Result<(), QuotaError> {
        let check = self.check(user_id, plan, resource).await?;

        match check.limit {
            Some(limit) if !check.allows(additional) => Err(QuotaError::LimitExceeded {
                resource,
                limit,
                current: check.current,
                requested: additional,
            }),
            _ => Ok(()),
        }
    }

    /// Fails unless the plan includes CSV import
    pub fn require_csv_import(plan: Plan) -> Result<(), QuotaError> {
        if plan.limits().csv_import {
            Ok(())
        } else {
            Err(QuotaError::FeatureUnavailable("CSV import"))
        }
    }

    pub async fn usage(&self, user_id: Uuid) -> Result<Usage, sqlx::Error> {
        Ok(Usage {
            applications: self.count(user_id, Resource::Applications).await?,
            labels: self.count(user_id, Resource::Labels).await?,
            documents: self.count(user_id, Resource::Documents).await?,
        })
    }
}
