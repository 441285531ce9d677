use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Error, Debug)]
pub enum ClientError {
    /// Bad credentials, or a session that could not be refreshed.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Authenticated but refused, e.g. a CSRF mismatch or an inactive account.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    /// Stripe or PayPal failed behind the backend.
    #[error("Payment provider error: {0}")]
    Vendor(String),

    /// The subscription status does not allow the requested action.
    #[error("Not allowed in the current subscription state: {0}")]
    State(String),

    #[error("Request failed with status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Session storage error: {0}")]
    Storage(String),
}

impl ClientError {
    /// Maps a non-success backend response, whose body is `{"error": ...}`.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 => ClientError::Auth(message),
            403 => ClientError::Forbidden(message),
            400 | 422 => ClientError::Validation(message),
            409 => ClientError::State(message),
            502 => ClientError::Vendor(message),
            _ => ClientError::Api { status, message },
        }
    }

    /// True only for a rejected or missing session (401).
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ClientError::Auth(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_map_to_the_error_taxonomy() {
        assert!(matches!(ClientError::from_status(401, "x".into()), ClientError::Auth(_)));
        assert!(matches!(ClientError::from_status(403, "x".into()), ClientError::Forbidden(_)));
        assert!(matches!(ClientError::from_status(400, "x".into()), ClientError::Validation(_)));
        assert!(matches!(ClientError::from_status(409, "x".into()), ClientError::State(_)));
        assert!(matches!(ClientError::from_status(502, "x".into()), ClientError::Vendor(_)));
        assert!(matches!(
            ClientError::from_status(500, "x".into()),
            ClientError::Api { status: 500, .. }
        ));
    }

    #[test]
    fn forbidden_is_not_an_auth_failure() {
        assert!(ClientError::from_status(401, "Invalid or expired token".into()).is_unauthorized());
        assert!(!ClientError::from_status(403, "CSRF token mismatch".into()).is_unauthorized());
    }
}
