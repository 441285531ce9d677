use chrono::{DateTime, Utc};
use common::sub::SubscriptionStatus;
use uuid::Uuid;

pub struct SubscriptionCreateRequest {
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub status: SubscriptionStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub auto_renewal: bool,
    pub payment_provider: Option<String>,
    pub external_subscription_id: Option<String>,
}
