use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Current month's consumption for one user.
#[derive(Debug, Clone, Default, sqlx::FromRow, Serialize)]
pub struct MonthlyUsage {
    pub requests: i64,
    pub billable_requests: i64,
    pub devices: i64,
}

/// One `usage_stats` row.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct DailyUsage {
    pub date: NaiveDate,
    pub requests_count: i32,
    pub billable_requests_count: i32,
    pub error_count: i32,
    pub total_response_time_ms: i64,
    pub average_response_time_ms: i32,
}

/// One extraction call, as logged by the API.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ApiRequest {
    pub id: Uuid,
    pub request_type: String,
    pub status: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_info: Option<serde_json::Value>,
    pub response_time_ms: Option<i32>,
    pub error_message: Option<String>,
    pub request_size_bytes: Option<i32>,
    pub response_size_bytes: Option<i32>,
    pub created_at: DateTime<Utc>,
}
