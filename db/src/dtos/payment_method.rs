use uuid::Uuid;

pub struct PaymentMethodCreateRequest {
    pub user_id: Uuid,
    pub provider: String,
    pub provider_payment_id: String,
    pub card_last4: Option<String>,
    pub card_brand: Option<String>,
    pub card_exp_month: Option<i32>,
    pub card_exp_year: Option<i32>,
}
