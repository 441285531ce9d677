use actix_web::{HttpMessage, dev::ServiceRequest};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    env_config::JwtConfig,
    error::{AppError, Res},
};

/// Claims carried by a short-lived access token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AccessClaims {
    pub sub: Uuid,
    pub email: String,
    /// CSRF token the client must echo in `X-CSRF-TOKEN` on state-changing requests.
    pub csrf: String,
    pub iat: usize,
    pub exp: usize,
}

/// Claims carried by a refresh token. `jti` is the id of the refresh session row.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RefreshClaims {
    pub sub: Uuid,
    pub jti: Uuid,
    pub iat: usize,
    pub exp: usize,
}

pub struct ClaimsSpec<'a> {
    pub user_id: Uuid,
    pub email: &'a str,
    pub csrf: &'a str,
}

/// Generates access token for the given user and CSRF token
pub fn generate_access_token(spec: ClaimsSpec<'_>, config: &JwtConfig) -> Res<String> {
    let now = Utc::now();
    let expiration = now
        .checked_add_signed(Duration::minutes(config.access_expiration_minutes))
        .ok_or_else(|| AppError::Internal("Access token expiry overflow".to_string()))?;

    let claims = AccessClaims {
        sub: spec.user_id,
        email: spec.email.to_string(),
        csrf: spec.csrf.to_string(),
        iat: now.timestamp() as usize,
        exp: expiration.timestamp() as usize,
    };

    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.access_secret.as_bytes()),
    )
    .map_err(AppError::from)
}

/// Generates refresh token bound to a refresh session.
/// Returns the token together with its expiry so the session row can store it.
pub fn generate_refresh_token(
    user_id: Uuid,
    session_id: Uuid,
    config: &JwtConfig,
) -> Res<(String, DateTime<Utc>)> {
    let now = Utc::now();
    let expiration = now
        .checked_add_signed(Duration::days(config.refresh_expiration_days))
        .ok_or_else(|| AppError::Internal("Refresh token expiry overflow".to_string()))?;

    let claims = RefreshClaims {
        sub: user_id,
        jti: session_id,
        iat: now.timestamp() as usize,
        exp: expiration.timestamp() as usize,
    };

    let token = jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.refresh_secret.as_bytes()),
    )?;
    Ok((token, expiration))
}

/// Extracts claims object from access token.
pub fn validate_access_token(token: &str, config: &JwtConfig) -> Res<AccessClaims> {
    let token_data = jsonwebtoken::decode::<AccessClaims>(
        token,
        &DecodingKey::from_secret(config.access_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| AppError::Unauthorized(format!("Invalid or expired token: {}", e)))?;
    Ok(token_data.claims)
}

/// Extracts claims object from refresh token.
pub fn validate_refresh_token(token: &str, config: &JwtConfig) -> Res<RefreshClaims> {
    let token_data = jsonwebtoken::decode::<RefreshClaims>(
        token,
        &DecodingKey::from_secret(config.refresh_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| AppError::Unauthorized(format!("Invalid or expired refresh token: {}", e)))?;
    Ok(token_data.claims)
}

/// Pulls the bearer token out of an `Authorization` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

pub fn get_access_claims(req: &ServiceRequest) -> Option<AccessClaims> {
    req.extensions().get::<AccessClaims>().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> JwtConfig {
        JwtConfig {
            access_secret: "access-secret".to_string(),
            refresh_secret: "refresh-secret".to_string(),
            access_expiration_minutes: 15,
            refresh_expiration_days: 30,
        }
    }

    #[test]
    fn access_token_round_trips_claims() {
        let user_id = Uuid::new_v4();
        let token = generate_access_token(
            ClaimsSpec {
                user_id,
                email: "user@example.com",
                csrf: "csrf-1",
            },
            &config(),
        )
        .unwrap();

        let claims = validate_access_token(&token, &config()).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.email, "user@example.com");
        assert_eq!(claims.csrf, "csrf-1");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn expired_access_token_is_unauthorized() {
        let mut cfg = config();
        cfg.access_expiration_minutes = -120;
        let token = generate_access_token(
            ClaimsSpec {
                user_id: Uuid::new_v4(),
                email: "user@example.com",
                csrf: "csrf",
            },
            &cfg,
        )
        .unwrap();

        let err = validate_access_token(&token, &cfg).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let (refresh, _) = generate_refresh_token(Uuid::new_v4(), Uuid::new_v4(), &config()).unwrap();
        assert!(validate_access_token(&refresh, &config()).is_err());

        let claims = validate_refresh_token(&refresh, &config()).unwrap();
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn bearer_prefix_is_required() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
    }
}
