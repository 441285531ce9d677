//! Out-of-band delivery of single-use account tokens.

use async_trait::async_trait;
use common::error::Res;
use db::models::user::User;
use uuid::Uuid;

/// A message carrying a single-use token to the account owner.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    EmailVerification { token: Uuid },
    PasswordReset { token: Uuid },
}

impl Notice {
    pub fn token(&self) -> Uuid {
        match self {
            Notice::EmailVerification { token } | Notice::PasswordReset { token } => *token,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Notice::EmailVerification { .. } => "email verification",
            Notice::PasswordReset { .. } => "password reset",
        }
    }

    /// Log-safe summary. Never includes the token.
    pub fn describe(&self, user: &User) -> String {
        format!("{} notice for user {}", self.kind(), user.id)
    }
}

/// Delivers account notices, typically by email.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, user: &User, notice: Notice) -> Res<()>;
}

/// Records that a notice was produced without delivering it. Used when no
/// mail transport is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, user: &User, notice: Notice) -> Res<()> {
        log::info!("Queued {} (no mail transport configured)", notice.describe(user));
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Mutex;

    /// Keeps every notice so tests can read the delivered token.
    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        pub(crate) sent: Mutex<Vec<(Uuid, Notice)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, user: &User, notice: Notice) -> Res<()> {
            self.sent.lock().unwrap().push((user.id, notice));
            Ok(())
        }
    }

    pub(crate) fn user() -> User {
        User {
            id: Uuid::new_v4(),
            email: "reader@example.com".to_string(),
            full_name: None,
            plan_type: "free".to_string(),
            device_limit: 2,
            max_requests_per_month: 20,
            credit_requests: 0,
            email_verified: false,
            status: "active".to_string(),
            stripe_customer_id: None,
            last_login: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn description_leaves_out_the_token_and_email() {
        let user = user();
        for notice in [
            Notice::EmailVerification { token: Uuid::new_v4() },
            Notice::PasswordReset { token: Uuid::new_v4() },
        ] {
            let line = notice.describe(&user);
            assert!(!line.contains(&notice.token().to_string()));
            assert!(!line.contains(&user.email));
            assert!(line.contains(&user.id.to_string()));
        }
    }

    #[tokio::test]
    async fn notifier_receives_the_token() {
        let notifier = RecordingNotifier::default();
        let user = user();
        let token = Uuid::new_v4();

        notifier
            .send(&user, Notice::PasswordReset { token })
            .await
            .unwrap();

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, user.id);
        assert_eq!(sent[0].1.token(), token);
        assert_eq!(sent[0].1.kind(), "password reset");
    }
}
