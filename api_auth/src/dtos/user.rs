use chrono::NaiveDate;
use db::models::{device::Device, user::User};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub full_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct RequestsQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// This month's request quota as stored on the account.
#[derive(Debug, Serialize)]
pub struct ProfileUsage {
    pub current_month: String,
    pub month_requests: i64,
    pub max_requests: i32,
    pub remaining_requests: i64,
    pub credit_requests: i32,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub user: User,
    pub usage: ProfileUsage,
    pub devices: Vec<Device>,
}
