pub struct UserCreateRequest {
    pub email: String,
    pub password_hash: String,
    pub full_name: Option<String>,
    pub plan_type: String,
    pub device_limit: i32,
    pub max_requests_per_month: i32,
    pub email_verified: bool,
    pub stripe_customer_id: Option<String>,
}
