//! Outbound requests. Auth headers come from an immutable [`AuthContext`]
//! taken per request; a 401 is retried once after a token refresh.

use std::sync::Arc;

use reqwest::{
    Method, Response, StatusCode,
    header::{HeaderMap, HeaderValue},
};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    auth::AuthService,
    config::ClientConfig,
    error::{ClientError, Result},
};

pub const CSRF_HEADER: &str = "X-CSRF-TOKEN";
pub const DEVICE_ID_HEADER: &str = "X-Device-ID";
const APP_VERSION_HEADER: &str = "X-App-Version";

/// Identifies this install on every request.
fn device_headers(config: &ClientConfig) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(APP_VERSION_HEADER, HeaderValue::from_static(env!("CARGO_PKG_VERSION")));
    if let Some(device_id) = &config.device_id {
        let value = HeaderValue::from_str(device_id)
            .map_err(|_| ClientError::Validation(format!("Device id {:?} is not a valid header", device_id)))?;
        headers.insert(DEVICE_ID_HEADER, value);
    }
    Ok(headers)
}

/// Paths that never carry the CSRF header.
const CSRF_EXEMPT_PATHS: &[&str] = &["/auth/login", "/auth/register", "/auth/refresh"];

/// Headers for one request, captured before it is sent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthContext {
    pub access_token: Option<String>,
    pub csrf_token: Option<String>,
}

fn needs_csrf(method: &Method, path: &str) -> bool {
    *method != Method::GET && !CSRF_EXEMPT_PATHS.contains(&path)
}

/// The configured HTTP client, without any retry logic.
#[derive(Clone)]
pub struct Transport {
    http: reqwest::Client,
    base_url: String,
}

impl Transport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(device_headers(config)?)
            .build()?;
        Ok(Transport {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        ctx: &AuthContext,
    ) -> Result<Response> {
        let mut request = self
            .http
            .request(method.clone(), format!("{}{}", self.base_url, path));

        if let Some(token) = &ctx.access_token {
            request = request.bearer_auth(token);
        }
        if needs_csrf(&method, path) {
            if let Some(csrf) = &ctx.csrf_token {
                request = request.header(CSRF_HEADER, csrf);
            }
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        Ok(request.send().await?)
    }
}

/// Turns a response into `T`, or into the matching [`ClientError`].
pub async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    Err(read_error(response).await)
}

pub async fn read_error(response: Response) -> ClientError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or(body);
    ClientError::from_status(status, message)
}

/// Authenticated API client shared by the payment adapters.
#[derive(Clone)]
pub struct ApiClient {
    auth: Arc<AuthService>,
}

impl ApiClient {
    pub fn new(auth: Arc<AuthService>) -> Self {
        ApiClient { auth }
    }

    pub fn auth(&self) -> &Arc<AuthService> {
        &self.auth
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(Method::GET, path, None).await
    }

    pub async fn post<T: DeserializeOwned>(&self, path: &str, body: &impl Serialize) -> Result<T> {
        let body = serde_json::to_value(body).map_err(|e| ClientError::Validation(e.to_string()))?;
        self.request(Method::POST, path, Some(body)).await
    }

    /// Sends once; on 401 with a refresh token available, refreshes (or picks
    /// up a refresh another request already did) and resends exactly once.
    /// If the refresh fails the session has been logged out and the original
    /// error is returned.
    pub async fn request<T: DeserializeOwned>(&self, method: Method, path: &str, body: Option<Value>) -> Result<T> {
        let transport = self.auth.transport();
        let ctx = self.auth.context();
        let response = transport.send(method.clone(), path, body.as_ref(), &ctx).await?;

        if response.status() != StatusCode::UNAUTHORIZED || self.auth.refresh_token().is_none() {
            return read_json(response).await;
        }
        let original = read_error(response).await;

        let current = self.auth.context();
        let retry_ctx = if current.access_token.is_some() && current.access_token != ctx.access_token {
            log::debug!("Access token changed while {} was in flight", path);
            current
        } else if self.auth.refresh_access_token().await {
            self.auth.context()
        } else {
            return Err(original);
        };

        let retried = transport.send(method, path, body.as_ref(), &retry_ctx).await?;
        read_json(retried).await
    }
}
