//! Session management for authentication

use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};

use super::types::{Claims, User};
use crate::error::Error;

/// Session data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// The access token
    pub access_token: String,

    /// The refresh token
    pub refresh_token: String,

    /// The token type
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// The expiry time in seconds
    pub expires_in: i64,

    /// The expiry timestamp
    #[serde(default)]
    pub expires_at: Option<i64>,

    /// The signed-in user
    pub user: User,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl Session {
    /// Fill in `expires_at` from `expires_in` when the server left it out
    pub(crate) fn stamp_expiry(mut self) -> Self {
        if self.expires_at.is_none() {
            self.expires_at = Some(chrono::Utc::now().timestamp() + self.expires_in);
        }
        self
    }

    /// Check if the session has expired
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => chrono::Utc::now().timestamp() >= expires_at,
            None => false,
        }
    }

    /// Decode the access token claims.
    ///
    /// The signature is not checked; the backend verifies every request, this
    /// is only for reading `sub`, `exp` and the account role locally.
    pub fn claims(&self) -> Result<Claims, Error> {
        let mut validation = Validation::default();
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = decode::<Claims>(
            &self.access_token,
            &DecodingKey::from_secret(&[]),
            &validation,
        )?;
        Ok(data.claims)
    }
}

/// Session slot shared by every client built from one `Dispatch`
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<Option<Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Session> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set(&self, session: Session) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Some(session);
    }

    pub fn clear(&self) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Current access token, if signed in
    pub fn access_token(&self) -> Option<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|s| s.access_token.clone())
    }

    /// Id of the signed-in user, if any
    pub fn user_id(&self) -> Option<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|s| s.user.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    fn session_with_token(token: String, expires_at: Option<i64>) -> Session {
        Session {
            access_token: token,
            refresh_token: "refresh".into(),
            token_type: "bearer".into(),
            expires_in: 3600,
            expires_at,
            user: serde_json::from_value(json!({ "id": "user-1" })).unwrap(),
        }
    }

    #[test]
    fn claims_are_read_without_the_project_secret() {
        let token = encode(
            &Header::default(),
            &json!({
                "sub": "user-1",
                "exp": 1_700_000_000i64,
                "role": "authenticated",
                "user_metadata": { "role": "mechanic" }
            }),
            &EncodingKey::from_secret(b"project-secret"),
        )
        .unwrap();

        let claims = session_with_token(token, None).claims().unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.role.as_deref(), Some("authenticated"));
        assert_eq!(claims.account_role(), Some(Role::Mechanic));
    }

    #[test]
    fn garbage_token_is_a_jwt_error() {
        let err = session_with_token("not-a-jwt".into(), None).claims().unwrap_err();
        assert!(matches!(err, Error::Jwt(_)));
    }

    #[test]
    fn expiry() {
        let past = chrono::Utc::now().timestamp() - 10;
        assert!(session_with_token("t".into(), Some(past)).is_expired());

        let fresh = session_with_token("t".into(), None).stamp_expiry();
        assert!(!fresh.is_expired());
    }

    #[test]
    fn store_is_shared_between_clones() {
        let store = SessionStore::new();
        let other = store.clone();
        store.set(session_with_token("abc".into(), None));
        assert_eq!(other.access_token().as_deref(), Some("abc"));
        assert_eq!(other.user_id().as_deref(), Some("user-1"));
        other.clear();
        assert!(store.get().is_none());
    }
}
