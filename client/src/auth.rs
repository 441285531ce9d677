use std::sync::{Arc, Mutex, PoisonError};

use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use reqwest::Method;
use serde_json::json;

use crate::{
    config::ClientConfig,
    error::{ClientError, Result},
    http::{AuthContext, Transport, read_json},
    models::{AuthPayload, MessagePayload, RefreshPayload, SignupOutcome, UserProfile},
    session::SessionStore,
};

type RefreshFlight = Shared<BoxFuture<'static, bool>>;

/// Login, signup, logout and token refresh on top of a [`SessionStore`].
pub struct AuthService {
    transport: Transport,
    store: SessionStore,
    in_flight: Mutex<Option<RefreshFlight>>,
}

impl AuthService {
    pub fn new(config: &ClientConfig, store: SessionStore) -> Result<Arc<Self>> {
        Ok(Arc::new(AuthService {
            transport: Transport::new(config)?,
            store,
            in_flight: Mutex::new(None),
        }))
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn context(&self) -> AuthContext {
        self.store.context()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.store.refresh_token()
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        self.store.user()
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.is_authenticated()
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<UserProfile> {
        let response = self
            .transport
            .send(
                Method::POST,
                "/auth/login",
                Some(&json!({ "email": email, "password": password })),
                &self.context(),
            )
            .await?;
        let payload: AuthPayload = read_json(response).await?;
        let tokens = payload
            .tokens
            .ok_or_else(|| ClientError::Auth("Login response carried no session".to_string()))?;

        self.store.set_tokens(tokens);
        self.store.set_user(payload.user.clone());
        log::info!("Logged in as {}", payload.user.email);
        Ok(payload.user)
    }

    /// Registers an account. Depending on the server policy the user is
    /// logged in right away or has to confirm the email first.
    pub async fn signup(&self, email: &str, password: &str, full_name: Option<&str>) -> Result<SignupOutcome> {
        let response = self
            .transport
            .send(
                Method::POST,
                "/auth/register",
                Some(&json!({ "email": email, "password": password, "full_name": full_name })),
                &self.context(),
            )
            .await?;
        let payload: AuthPayload = read_json(response).await?;

        match payload.tokens {
            Some(tokens) if !payload.verification_required => {
                self.store.set_tokens(tokens);
                self.store.set_user(payload.user.clone());
                Ok(SignupOutcome::Authenticated(payload.user))
            }
            _ => Ok(SignupOutcome::VerificationRequired {
                message: payload
                    .message
                    .unwrap_or_else(|| "Please verify your email address".to_string()),
            }),
        }
    }

    /// Refreshes the access token. Concurrent callers share one in-flight
    /// refresh and all see its result. A failed refresh logs out.
    pub async fn refresh_access_token(self: &Arc<Self>) -> bool {
        let flight = {
            let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(flight) => flight.clone(),
                None => {
                    let this = Arc::clone(self);
                    let flight = async move { this.perform_refresh().await }.boxed().shared();
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };

        let refreshed = flight.clone().await;

        let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|current| current.ptr_eq(&flight)) {
            *slot = None;
        }
        refreshed
    }

    async fn perform_refresh(&self) -> bool {
        let Some(refresh_token) = self.store.refresh_token() else {
            self.store.clear();
            return false;
        };

        let result = async {
            let response = self
                .transport
                .send(
                    Method::POST,
                    "/auth/refresh",
                    Some(&json!({ "refresh_token": refresh_token })),
                    &AuthContext::default(),
                )
                .await?;
            read_json::<RefreshPayload>(response).await
        }
        .await;

        match result {
            Ok(payload) => {
                self.store.set_tokens(payload.tokens);
                log::debug!("Access token refreshed");
                true
            }
            Err(e) => {
                log::warn!("Token refresh failed, logging out: {}", e);
                self.logout().await;
                false
            }
        }
    }

    /// Revokes the refresh token on the server if possible, then always
    /// clears the local session and rotates the CSRF token. Returns whether
    /// the server acknowledged the logout.
    pub async fn logout(&self) -> bool {
        let revoked = match self.store.refresh_token() {
            Some(refresh_token) => {
                let response = self
                    .transport
                    .send(
                        Method::POST,
                        "/auth/logout",
                        Some(&json!({ "refresh_token": refresh_token })),
                        &self.context(),
                    )
                    .await;
                match response {
                    Ok(response) if response.status().is_success() => true,
                    Ok(response) => {
                        log::warn!("Server logout answered {}", response.status());
                        false
                    }
                    Err(e) => {
                        log::warn!("Server logout failed: {}", e);
                        false
                    }
                }
            }
            None => false,
        };

        self.store.clear();
        revoked
    }

    pub async fn request_password_reset(&self, email: &str) -> Result<String> {
        let response = self
            .transport
            .send(
                Method::POST,
                "/auth/request-password-reset",
                Some(&json!({ "email": email })),
                &self.context(),
            )
            .await?;
        Ok(read_json::<MessagePayload>(response).await?.message)
    }

    pub async fn reset_password(&self, token: &str, password: &str, confirm_password: &str) -> Result<String> {
        if password != confirm_password {
            return Err(ClientError::Validation("Passwords do not match".to_string()));
        }
        let response = self
            .transport
            .send(
                Method::POST,
                "/auth/reset-password",
                Some(&json!({
                    "token": token,
                    "password": password,
                    "confirm_password": confirm_password,
                })),
                &self.context(),
            )
            .await?;
        Ok(read_json::<MessagePayload>(response).await?.message)
    }

    /// Confirms the email and stores the session the server issues for it.
    pub async fn verify_email(&self, token: &str) -> Result<UserProfile> {
        let response = self
            .transport
            .send(
                Method::POST,
                "/auth/verify-email",
                Some(&json!({ "token": token })),
                &self.context(),
            )
            .await?;
        let payload: AuthPayload = read_json(response).await?;
        if let Some(tokens) = payload.tokens {
            self.store.set_tokens(tokens);
        }
        self.store.set_user(payload.user.clone());
        Ok(payload.user)
    }
}
