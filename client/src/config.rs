use std::{env, path::PathBuf, time::Duration};

/// Client-side settings.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Backend root, e.g. `http://localhost:5000`.
    pub api_base_url: String,
    /// Applied to every request.
    pub timeout: Duration,
    /// Where the session is persisted between runs.
    pub session_file: PathBuf,
    /// Sent as `X-Device-ID`; the backend counts it against the plan's
    /// device limit at login.
    pub device_id: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            api_base_url: "http://localhost:5000".to_string(),
            timeout: Duration::from_secs(30),
            session_file: PathBuf::from("textextract_session.json"),
            device_id: None,
        }
    }
}

impl ClientConfig {
    /// Reads `TEXTEXTRACT_API_URL`, `TEXTEXTRACT_TIMEOUT_SECS`,
    /// `TEXTEXTRACT_SESSION_FILE` and `TEXTEXTRACT_DEVICE_ID`, falling back to
    /// the defaults.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = ClientConfig::default();

        ClientConfig {
            api_base_url: env::var("TEXTEXTRACT_API_URL").unwrap_or(defaults.api_base_url),
            timeout: env::var("TEXTEXTRACT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            session_file: env::var("TEXTEXTRACT_SESSION_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.session_file),
            device_id: env::var("TEXTEXTRACT_DEVICE_ID").ok().filter(|id| !id.trim().is_empty()),
        }
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        ClientConfig {
            api_base_url: base_url.into(),
            ..ClientConfig::default()
        }
    }
}
