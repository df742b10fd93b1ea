//! Admin authentication.
//!
//! A single admin account is configured with an argon2 PHC hash. A
//! successful login issues an HS256 JWT which is returned both in the body
//! and as the `admin_token` cookie; admin routes accept either the cookie or
//! an `Authorization: Bearer` header through the [`AdminSession`] extractor.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{Error as PasswordHashError, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::{FromRequestParts, State},
    http::{
        header::{AUTHORIZATION, COOKIE, SET_COOKIE},
        request::Parts,
        HeaderMap,
    },
    response::IntoResponse,
    Json,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::config::AuthConfig;
use crate::error::{AppError, ApiResult, FieldError};
use crate::models::ts_to_rfc3339;
use crate::server::AppState;
use crate::validate::{Checker, ValidJson, Validate};

pub const COOKIE_NAME: &str = "admin_token";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: usize,
    pub exp: usize,
}

pub struct AuthManager {
    username: String,
    password_hash: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    session_secs: u64,
    cookie_secure: bool,
}

impl AuthManager {
    /// Build from config. Returns `Ok(None)` when the password hash or the
    /// JWT secret is missing, in which case every login is refused.
    pub fn from_config(config: &AuthConfig) -> Result<Option<Self>> {
        let (Some(hash), Some(secret)) = (&config.password_hash, &config.jwt_secret) else {
            tracing::warn!("admin auth not configured; admin login is disabled");
            return Ok(None);
        };
        PasswordHash::new(hash).map_err(|e| anyhow!("invalid admin password hash: {}", e))?;
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        Ok(Some(Self {
            username: config.username.clone(),
            password_hash: hash.clone(),
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            session_secs: (config.session_hours.max(1) as u64) * 3600,
            cookie_secure: config.cookie_secure,
        }))
    }

    pub fn verify_credentials(&self, username: &str, password: &str) -> Result<bool> {
        let parsed = PasswordHash::new(&self.password_hash)
            .map_err(|e| anyhow!("invalid admin password hash: {}", e))?;
        let password_ok = match Argon2::default().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => true,
            Err(PasswordHashError::Password) => false,
            Err(other) => return Err(anyhow!("password verification failed: {}", other)),
        };
        Ok(password_ok && username == self.username)
    }

    /// [`Self::verify_credentials`] on the blocking thread pool, keeping
    /// argon2's CPU cost off the async workers.
    pub async fn check_login(self: Arc<Self>, username: String, password: String) -> Result<bool> {
        tokio::task::spawn_blocking(move || self.verify_credentials(&username, &password)).await?
    }

    pub fn issue_token(&self) -> Result<(String, Claims)> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
        let claims = Claims {
            sub: self.username.clone(),
            iat: now as usize,
            exp: (now + self.session_secs) as usize,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;
        Ok((token, claims))
    }

    /// Decoded claims, or `None` for a malformed, forged or expired token.
    pub fn validate_token(&self, token: &str) -> Option<Claims> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .ok()
    }

    pub fn session_cookie(&self, token: &str) -> String {
        let mut cookie = format!(
            "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
            COOKIE_NAME, token, self.session_secs
        );
        if self.cookie_secure {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

/// Expired `admin_token` cookie that makes the browser drop the session.
pub fn clear_cookie(secure: bool) -> String {
    let mut cookie = format!("{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0", COOKIE_NAME);
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Produce an argon2 PHC string for `[auth] password_hash`.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("failed to hash password: {}", e))?;
    Ok(hash.to_string())
}

/// Token from the bearer header, else from the `admin_token` cookie.
fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("Bearer"))
        .map(|(_, token)| token.trim().to_string())
        .filter(|t| !t.is_empty());
    if bearer.is_some() {
        return bearer;
    }
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == COOKIE_NAME)
        .map(|(_, value)| value.to_string())
        .filter(|t| !t.is_empty())
}

/// An authenticated admin request.
#[derive(Debug, Clone)]
pub struct AdminSession {
    pub username: String,
    pub expires_at: i64,
}

impl FromRequestParts<AppState> for AdminSession {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let auth = state
            .auth
            .as_ref()
            .ok_or_else(|| AppError::unauthorized("admin authentication is not configured"))?;
        let token = token_from_headers(&parts.headers)
            .ok_or_else(|| AppError::unauthorized("missing admin token"))?;
        let claims = auth
            .validate_token(&token)
            .ok_or_else(|| AppError::unauthorized("invalid or expired admin token"))?;
        Ok(AdminSession {
            username: claims.sub,
            expires_at: claims.exp as i64,
        })
    }
}

// ============ Handlers ============

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

impl Validate for LoginRequest {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut c = Checker::new();
        c.required("username", &self.username, 120);
        c.required("password", &self.password, 1024);
        c.finish()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub authenticated: bool,
    pub username: String,
    pub expires_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

pub async fn login(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let auth = state
        .auth
        .clone()
        .ok_or_else(|| AppError::unauthorized("invalid credentials"))?;
    if !auth
        .clone()
        .check_login(req.username.trim().to_string(), req.password.clone())
        .await?
    {
        tracing::warn!(username = %req.username.trim(), "admin login failed");
        return Err(AppError::unauthorized("invalid credentials"));
    }
    let (token, claims) = auth.issue_token()?;
    tracing::info!(username = %claims.sub, "admin logged in");
    let body = SessionResponse {
        authenticated: true,
        username: claims.sub,
        expires_at: ts_to_rfc3339(claims.exp as i64),
        token: Some(token.clone()),
    };
    Ok(([(SET_COOKIE, auth.session_cookie(&token))], Json(body)))
}

pub async fn logout(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(SET_COOKIE, clear_cookie(state.config.auth.cookie_secure))],
        Json(serde_json::json!({ "success": true })),
    )
}

pub async fn verify(session: AdminSession) -> Json<SessionResponse> {
    Json(SessionResponse {
        authenticated: true,
        username: session.username,
        expires_at: ts_to_rfc3339(session.expires_at),
        token: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn manager(password: &str) -> AuthManager {
        let config = AuthConfig {
            username: "admin".into(),
            password_hash: Some(hash_password(password).unwrap()),
            jwt_secret: Some("test-secret-test-secret-test-secret".into()),
            session_hours: 2,
            cookie_secure: true,
        };
        AuthManager::from_config(&config).unwrap().unwrap()
    }

    #[test]
    fn test_unconfigured_auth_is_none() {
        assert!(AuthManager::from_config(&AuthConfig::default()).unwrap().is_none());
    }

    #[test]
    fn test_invalid_hash_rejected() {
        let config = AuthConfig {
            password_hash: Some("not-a-phc-string".into()),
            jwt_secret: Some("secret".into()),
            ..AuthConfig::default()
        };
        assert!(AuthManager::from_config(&config).is_err());
    }

    #[test]
    fn test_verify_credentials() {
        let auth = manager("hunter22");
        assert!(auth.verify_credentials("admin", "hunter22").unwrap());
        assert!(!auth.verify_credentials("admin", "wrong").unwrap());
        assert!(!auth.verify_credentials("root", "hunter22").unwrap());
    }

    #[tokio::test]
    async fn test_check_login_runs_off_thread() {
        let auth = Arc::new(manager("hunter22"));
        assert!(auth
            .clone()
            .check_login("admin".into(), "hunter22".into())
            .await
            .unwrap());
        assert!(!auth.check_login("admin".into(), "nope".into()).await.unwrap());
    }

    #[test]
    fn test_token_roundtrip_and_tamper() {
        let auth = manager("pw");
        let (token, claims) = auth.issue_token().unwrap();
        assert_eq!(claims.exp - claims.iat, 2 * 3600);
        assert_eq!(auth.validate_token(&token).unwrap().sub, "admin");

        let mut forged = token.clone();
        forged.push('x');
        assert!(auth.validate_token(&forged).is_none());
    }

    #[test]
    fn test_expired_token_rejected() {
        let auth = manager("pw");
        let claims = Claims {
            sub: "admin".into(),
            iat: 1_000,
            exp: 2_000,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &auth.encoding_key).unwrap();
        assert!(auth.validate_token(&token).is_none());
    }

    #[test]
    fn test_session_cookie_attributes() {
        let cookie = manager("pw").session_cookie("abc");
        assert!(cookie.starts_with("admin_token=abc;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(cookie.contains("Max-Age=7200"));
        assert!(cookie.ends_with("; Secure"));
        assert!(clear_cookie(false).contains("Max-Age=0"));
    }

    #[test]
    fn test_token_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("theme=dark; admin_token=fromcookie"));
        assert_eq!(token_from_headers(&headers).as_deref(), Some("fromcookie"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer frombearer"));
        assert_eq!(token_from_headers(&headers).as_deref(), Some("frombearer"));

        let mut empty = HeaderMap::new();
        empty.insert(COOKIE, HeaderValue::from_static("admin_token="));
        assert!(token_from_headers(&empty).is_none());
    }
}
