use chrono::{DateTime, Utc};
use uuid::Uuid;

pub struct SessionCreateRequest {
    pub id: Uuid,
    pub user_id: Uuid,
    pub csrf_token: String,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub expires_at: DateTime<Utc>,
}
