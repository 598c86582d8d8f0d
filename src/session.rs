//! Login sessions for the console
//!
//! A successful login issues an opaque bearer token that expires after the
//! configured TTL. Tokens live in memory only.

use crate::config::AuthConfig;
use crate::error::{DeskError, Result};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Hex SHA-256 of a password, the format `auth.password_sha256` expects
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub username: String,
    pub expires_at: DateTime<Utc>,
}

pub struct SessionStore {
    username: String,
    password_sha256: Option<String>,
    ttl: Duration,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    /// Fails when `auth.session_ttl_secs` cannot be added to the current time
    pub fn new(auth: &AuthConfig) -> Result<Self> {
        let ttl = i64::try_from(auth.session_ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .filter(|ttl| Utc::now().checked_add_signed(*ttl).is_some())
            .ok_or_else(|| {
                config::ConfigError::Message(format!(
                    "auth.session_ttl_secs {} is out of range",
                    auth.session_ttl_secs
                ))
            })?;
        Ok(Self {
            username: auth.username.clone(),
            password_sha256: auth.password_sha256.as_ref().map(|h| h.trim().to_lowercase()),
            ttl,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    pub fn login(&self, username: &str, password: &str) -> Result<Session> {
        let Some(expected) = &self.password_sha256 else {
            return Err(DeskError::Unauthorized(
                "Login disabled: auth.password_sha256 is not configured".into(),
            ));
        };
        if username != self.username || hash_password(password) != *expected {
            tracing::warn!(username, "Login rejected");
            return Err(DeskError::Unauthorized("Invalid username or password".into()));
        }

        let expires_at = Utc::now()
            .checked_add_signed(self.ttl)
            .ok_or_else(|| DeskError::Internal("Session expiry out of range".into()))?;
        let session = Session {
            token: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            expires_at,
        };
        let mut sessions = self.sessions.lock();
        let now = Utc::now();
        sessions.retain(|_, s| s.expires_at > now);
        sessions.insert(session.token.clone(), session.clone());
        tracing::info!(username, "Session opened");
        Ok(session)
    }

    /// Look up a live session; expired tokens are dropped on sight
    pub fn validate(&self, token: &str) -> Result<Session> {
        let mut sessions = self.sessions.lock();
        match sessions.get(token) {
            Some(s) if s.expires_at > Utc::now() => Ok(s.clone()),
            Some(_) => {
                sessions.remove(token);
                Err(DeskError::Unauthorized("Session expired".into()))
            }
            None => Err(DeskError::Unauthorized("Unknown session token".into())),
        }
    }

    pub fn logout(&self, token: &str) -> bool {
        self.sessions.lock().remove(token).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(ttl: u64) -> SessionStore {
        SessionStore::new(&AuthConfig {
            username: "admin".to_string(),
            password_sha256: Some(hash_password("secret")),
            session_ttl_secs: ttl,
        })
        .unwrap()
    }

    #[test]
    fn test_hash_password_is_hex_sha256() {
        assert_eq!(
            hash_password("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_login_validate_logout() {
        let store = store(60);
        let session = store.login("admin", "secret").unwrap();

        assert_eq!(store.validate(&session.token).unwrap().username, "admin");
        assert!(store.logout(&session.token));
        assert!(store.validate(&session.token).is_err());
        assert!(!store.logout(&session.token));
    }

    #[test]
    fn test_bad_credentials() {
        let store = store(60);
        assert!(matches!(store.login("admin", "nope"), Err(DeskError::Unauthorized(_))));
        assert!(matches!(store.login("root", "secret"), Err(DeskError::Unauthorized(_))));
    }

    #[test]
    fn test_login_disabled_without_hash() {
        let store = SessionStore::new(&AuthConfig::default()).unwrap();
        assert!(store.login("admin", "").is_err());
    }

    #[test]
    fn test_out_of_range_ttl_is_config_error() {
        for ttl in [u64::MAX, i64::MAX as u64, 9_300_000_000_000_000] {
            let result = SessionStore::new(&AuthConfig {
                session_ttl_secs: ttl,
                ..AuthConfig::default()
            });
            assert!(matches!(result, Err(DeskError::Config(_))), "ttl {}", ttl);
        }
    }

    #[test]
    fn test_year_long_ttl_accepted() {
        let store = store(365 * 24 * 3600);
        let session = store.login("admin", "secret").unwrap();
        assert!(session.expires_at > Utc::now() + Duration::days(364));
    }

    #[test]
    fn test_expired_session_rejected() {
        let store = store(0);
        let session = store.login("admin", "secret").unwrap();
        assert!(matches!(store.validate(&session.token), Err(DeskError::Unauthorized(_))));
    }
}
