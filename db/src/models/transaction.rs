use chrono::{DateTime, Utc};
use common::{
    error::{AppError, Res},
    sub::{TransactionKind, TransactionStatus},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct PaymentTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Option<Uuid>,
    pub subscription_id: Option<Uuid>,
    pub kind: String,
    pub credit_units: Option<i32>,
    pub payment_provider: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    pub external_id: Option<String>,
    #[serde(skip_serializing)]
    pub payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentTransaction {
    pub fn kind(&self) -> Res<TransactionKind> {
        TransactionKind::parse(&self.kind).ok_or_else(|| {
            AppError::Internal(format!("Transaction {} has unknown kind {}", self.id, self.kind))
        })
    }

    pub fn status(&self) -> Res<TransactionStatus> {
        TransactionStatus::parse(&self.status).ok_or_else(|| {
            AppError::Internal(format!(
                "Transaction {} has unknown status {}",
                self.id, self.status
            ))
        })
    }
}
