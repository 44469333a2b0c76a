//! Dual-token session lifecycle: a short-lived access token carrying
//! `{user_id, role}` and a long-lived refresh token carrying `user_id` only.
//! Role is deliberately absent from the refresh token so a role change takes
//! effect at the next refresh, when the user row is re-read.

use base64::Engine as _;
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::models::{Role, User};
use crate::store::{StoreError, UserRepo};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("password hashing failed: {0}")]
    Hash(String),

    #[error("token signing failed: {0}")]
    Token(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The authenticated identity threaded explicitly through every call that
/// needs one. Derived from a verified access token, never ambient state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub role: Role,
}

#[derive(Debug, Serialize, Deserialize)]
struct AccessClaims {
    sub: Uuid,
    role: Role,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct RefreshClaims {
    sub: Uuid,
    iat: i64,
    exp: i64,
}

pub struct SessionTokens {
    pub access: String,
    pub refresh: String,
}

/// Mint the access/refresh pair for a freshly authenticated user.
pub fn issue_session(cfg: &AuthConfig, user: &User) -> Result<SessionTokens, AuthError> {
    Ok(SessionTokens {
        access: mint_access_token(cfg, user.id, user.role)?,
        refresh: mint_refresh_token(cfg, user.id)?,
    })
}

pub fn mint_access_token(cfg: &AuthConfig, user_id: Uuid, role: Role) -> Result<String, AuthError> {
    let now = Utc::now();
    let claims = AccessClaims {
        sub: user_id,
        role,
        iat: now.timestamp(),
        exp: (now + cfg.access_ttl).timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(cfg.access_secret.as_bytes()),
    )
    .map_err(|e| AuthError::Token(e.to_string()))
}

fn mint_refresh_token(cfg: &AuthConfig, user_id: Uuid) -> Result<String, AuthError> {
    let now = Utc::now();
    let claims = RefreshClaims {
        sub: user_id,
        iat: now.timestamp(),
        exp: (now + cfg.refresh_ttl).timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(cfg.refresh_secret.as_bytes()),
    )
    .map_err(|e| AuthError::Token(e.to_string()))
}

/// Verify signature and expiry of an access token and extract the principal.
pub fn verify_access_token(cfg: &AuthConfig, token: &str) -> Result<Principal, AuthError> {
    let data = decode::<AccessClaims>(
        token,
        &DecodingKey::from_secret(cfg.access_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AuthError::InvalidToken)?;
    Ok(Principal {
        user_id: data.claims.sub,
        role: data.claims.role,
    })
}

fn verify_refresh_token(cfg: &AuthConfig, token: &str) -> Result<Uuid, AuthError> {
    let data = decode::<RefreshClaims>(
        token,
        &DecodingKey::from_secret(cfg.refresh_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AuthError::InvalidToken)?;
    Ok(data.claims.sub)
}

/// Silent refresh: verify the refresh token, re-read the user (picking up
/// any role change), mint a new access token. The refresh token itself is
/// not rotated; it stays valid until its own expiry.
pub async fn refresh_session(
    cfg: &AuthConfig,
    users: &dyn UserRepo,
    refresh_token: &str,
) -> Result<(String, User), AuthError> {
    let user_id = verify_refresh_token(cfg, refresh_token)?;
    let user = users
        .user_by_id(user_id)
        .await?
        .ok_or(AuthError::InvalidToken)?;
    let access = mint_access_token(cfg, user.id, user.role)?;
    Ok((access, user))
}

/// What logout could learn from the refresh cookie, if anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogoutSummary {
    pub user_id: Option<Uuid>,
    pub session_secs: Option<i64>,
}

/// Best-effort, unverified decode of the refresh token for logout
/// observability. An expired or garbage token must still produce a clean
/// logout, so this never fails; it just reports what it could extract.
pub fn logout_summary(refresh_token: Option<&str>) -> LogoutSummary {
    let Some(token) = refresh_token else {
        return LogoutSummary::default();
    };
    let Some(claims) = decode_payload_unverified(token) else {
        return LogoutSummary::default();
    };
    let user_id = claims
        .get("sub")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok());
    let session_secs = claims
        .get("iat")
        .and_then(|v| v.as_i64())
        .map(|iat| Utc::now().timestamp() - iat);
    LogoutSummary {
        user_id,
        session_secs,
    }
}

/// Decode a JWT payload without signature or expiry checks.
fn decode_payload_unverified(jwt: &str) -> Option<serde_json::Value> {
    let parts: Vec<&str> = jwt.split('.').collect();
    if parts.len() != 3 {
        return None;
    }
    let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(parts[1])
        .ok()?;
    serde_json::from_slice(&payload).ok()
}

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST).map_err(|e| AuthError::Hash(e.to_string()))
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    bcrypt::verify(password, hash).map_err(|e| AuthError::Hash(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use chrono::Duration;

    fn test_config() -> AuthConfig {
        AuthConfig {
            access_secret: "access-secret-for-tests".into(),
            refresh_secret: "refresh-secret-for-tests".into(),
            access_ttl: Duration::hours(6),
            refresh_ttl: Duration::days(7),
            secure_cookies: false,
        }
    }

    fn test_user(role: Role) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            name: "Ada".into(),
            email: "ada@example.com".into(),
            password_hash: "unused".into(),
            role,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn access_token_round_trips_principal() {
        let cfg = test_config();
        let user = test_user(Role::Admin);
        let token = mint_access_token(&cfg, user.id, user.role).unwrap();
        let principal = verify_access_token(&cfg, &token).unwrap();
        assert_eq!(principal.user_id, user.id);
        assert_eq!(principal.role, Role::Admin);
    }

    #[test]
    fn tampered_access_token_is_rejected() {
        let cfg = test_config();
        let user = test_user(Role::Student);
        let mut token = mint_access_token(&cfg, user.id, user.role).unwrap();
        token.push('x');
        assert!(verify_access_token(&cfg, &token).is_err());
    }

    #[test]
    fn access_token_signed_with_wrong_secret_is_rejected() {
        let cfg = test_config();
        let other = AuthConfig {
            access_secret: "some-other-secret".into(),
            ..test_config()
        };
        let user = test_user(Role::Student);
        let token = mint_access_token(&other, user.id, user.role).unwrap();
        assert!(verify_access_token(&cfg, &token).is_err());
    }

    #[test]
    fn refresh_claims_exclude_role() {
        let cfg = test_config();
        let token = mint_refresh_token(&cfg, Uuid::new_v4()).unwrap();
        let payload = decode_payload_unverified(&token).unwrap();
        assert!(payload.get("sub").is_some());
        assert!(payload.get("role").is_none());
    }

    #[tokio::test]
    async fn refresh_rejects_expired_token() {
        let cfg = AuthConfig {
            refresh_ttl: Duration::hours(-2),
            ..test_config()
        };
        let store = Store::in_memory();
        let user = test_user(Role::Student);
        store.users.insert_user(&user).await.unwrap();

        let stale = mint_refresh_token(&cfg, user.id).unwrap();
        let err = refresh_session(&cfg, store.users.as_ref(), &stale)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn refresh_rejects_unknown_user() {
        let cfg = test_config();
        let store = Store::in_memory();
        let token = mint_refresh_token(&cfg, Uuid::new_v4()).unwrap();
        let err = refresh_session(&cfg, store.users.as_ref(), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn refresh_picks_up_role_change() {
        // Access token minted on refresh reflects the CURRENT user row, not
        // whatever role the session started with.
        let cfg = test_config();
        let store = Store::in_memory();
        let user = test_user(Role::Admin);
        store.users.insert_user(&user).await.unwrap();

        let refresh = mint_refresh_token(&cfg, user.id).unwrap();
        let (access, fetched) = refresh_session(&cfg, store.users.as_ref(), &refresh)
            .await
            .unwrap();
        assert_eq!(fetched.id, user.id);
        let principal = verify_access_token(&cfg, &access).unwrap();
        assert_eq!(principal.role, Role::Admin);
    }

    #[test]
    fn logout_summary_survives_garbage() {
        assert!(logout_summary(None).user_id.is_none());
        assert!(logout_summary(Some("not-a-jwt")).user_id.is_none());
        assert!(logout_summary(Some("a.b.c")).user_id.is_none());
    }

    #[test]
    fn logout_summary_reads_expired_tokens() {
        let cfg = AuthConfig {
            refresh_ttl: Duration::hours(-2),
            ..test_config()
        };
        let user_id = Uuid::new_v4();
        let stale = mint_refresh_token(&cfg, user_id).unwrap();
        let summary = logout_summary(Some(&stale));
        assert_eq!(summary.user_id, Some(user_id));
        assert!(summary.session_secs.is_some());
    }

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("hunter2!").unwrap();
        assert!(verify_password("hunter2!", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
    }
}
