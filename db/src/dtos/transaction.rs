use common::sub::TransactionKind;
use uuid::Uuid;

pub struct TransactionCreateRequest {
    pub user_id: Uuid,
    pub kind: TransactionKind,
    pub plan_id: Option<Uuid>,
    pub subscription_id: Option<Uuid>,
    pub credit_units: Option<i32>,
    pub amount: i64,
    pub currency: String,
}
