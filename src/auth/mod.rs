//! Authentication for customers and mechanics

mod session;
mod types;

use reqwest::Client;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::Error;
use crate::fetch::Fetch;

pub use session::*;
pub use types::*;

const CLIENT_INFO: &str = concat!("mechanic-dispatch/", env!("CARGO_PKG_VERSION"));

/// Client for the auth service
pub struct Auth {
    /// The base URL for the project
    url: String,

    /// The anonymous API key for the project
    key: String,

    /// HTTP client used for requests
    client: Client,

    /// The current session, shared with the other clients
    session: SessionStore,
}

impl Auth {
    /// Create a new Auth client
    pub(crate) fn new(url: &str, key: &str, client: Client, session: SessionStore) -> Self {
        Self {
            url: url.to_string(),
            key: key.to_string(),
            client,
            session,
        }
    }

    fn get_auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1{}", self.url, path)
    }

    fn current_token(&self) -> Result<String, Error> {
        self.session
            .access_token()
            .ok_or_else(|| Error::auth("Not logged in"))
    }

    fn store_session(&self, session: Session) -> Session {
        let session = session.stamp_expiry();
        self.session.set(session.clone());
        session
    }

    /// Sign up a new account. The role is kept in the user metadata so
    /// the app can route the user to the right dashboard after sign-in.
    pub async fn sign_up(&self, email: &str, password: &str, role: Role) -> Result<AuthResponse, Error> {
        let url = self.get_auth_url("/signup");

        let body = json!({
            "email": email,
            "password": password,
            "data": { "role": role.as_str() },
        });

        let value = Fetch::post(&self.client, &url)
            .header("apikey", &self.key)
            .header("X-Client-Info", CLIENT_INFO)
            .json(&body)?
            .execute::<Value>()
            .await?;

        // With email confirmation enabled the body is the bare user.
        let response = if value.get("access_token").is_some() {
            let session: Session = serde_json::from_value(value)?;
            let session = self.store_session(session);
            AuthResponse {
                user: session.user.clone(),
                session: Some(session),
            }
        } else {
            let user: User = match value.get("user") {
                Some(user) => serde_json::from_value(user.clone())?,
                None => serde_json::from_value(value)?,
            };
            AuthResponse {
                user,
                session: None,
            }
        };

        info!("Signed up {} account {}", role, response.user.id);
        Ok(response)
    }

    /// Sign in with email and password
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthResponse, Error> {
        let url = self.get_auth_url("/token?grant_type=password");

        let body = json!({ "email": email, "password": password });

        let session = Fetch::post(&self.client, &url)
            .header("apikey", &self.key)
            .header("X-Client-Info", CLIENT_INFO)
            .json(&body)?
            .execute::<Session>()
            .await?;

        let session = self.store_session(session);
        info!("Signed in user {}", session.user.id);
        Ok(AuthResponse {
            user: session.user.clone(),
            session: Some(session),
        })
    }

    /// Exchange the refresh token for a new session
    pub async fn refresh_session(&self) -> Result<Session, Error> {
        let url = self.get_auth_url("/token?grant_type=refresh_token");

        let refresh_token = self
            .session
            .get()
            .map(|s| s.refresh_token)
            .ok_or_else(|| Error::auth("Not logged in"))?;

        let result = Fetch::post(&self.client, &url)
            .header("apikey", &self.key)
            .header("X-Client-Info", CLIENT_INFO)
            .json(&json!({ "refresh_token": refresh_token }))?
            .execute::<Session>()
            .await;

        match result {
            Ok(session) => Ok(self.store_session(session)),
            Err(e) => {
                if e.is_auth_failure() {
                    warn!("Refresh token rejected, clearing session: {}", e);
                    self.session.clear();
                }
                Err(e)
            }
        }
    }

    /// Sign out the current user. The local session is cleared even when
    /// the server call fails.
    pub async fn sign_out(&self) -> Result<(), Error> {
        let url = self.get_auth_url("/logout");
        let token = self.current_token()?;

        let result = Fetch::post(&self.client, &url)
            .header("apikey", &self.key)
            .header("X-Client-Info", CLIENT_INFO)
            .bearer_auth(&token)
            .execute_empty()
            .await;

        self.session.clear();

        match result {
            Ok(()) => Ok(()),
            // The server already forgot this session.
            Err(e) if e.is_auth_failure() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Get the user data for the currently authenticated user
    pub async fn get_user(&self) -> Result<User, Error> {
        let url = self.get_auth_url("/user");
        let token = self.current_token()?;

        Fetch::get(&self.client, &url)
            .header("apikey", &self.key)
            .header("X-Client-Info", CLIENT_INFO)
            .bearer_auth(&token)
            .execute::<User>()
            .await
    }

    /// Get the current session
    pub fn get_session(&self) -> Option<Session> {
        self.session.get()
    }

    /// Set the session
    pub fn set_session(&self, session: Session) {
        self.session.set(session);
    }

    /// Role of the signed-in account, from the token claims or the user
    /// metadata
    pub fn current_role(&self) -> Option<Role> {
        let session = self.session.get()?;
        session
            .claims()
            .ok()
            .and_then(|c| c.account_role())
            .or_else(|| session.user.account_role())
    }
}
