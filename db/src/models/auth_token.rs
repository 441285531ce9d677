use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthTokenKind {
    EmailVerification,
    PasswordReset,
}

impl AuthTokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthTokenKind::EmailVerification => "email_verification",
            AuthTokenKind::PasswordReset => "password_reset",
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuthToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
