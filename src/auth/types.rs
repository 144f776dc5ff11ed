//! Types for authentication and account roles

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

use super::session::Session;

/// Which side of the marketplace an account is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Mechanic,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Mechanic => "mechanic",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "customer" => Ok(Role::Customer),
            "mechanic" => Ok(Role::Mechanic),
            other => Err(Error::validation(format!("unknown role: {}", other))),
        }
    }
}

/// User data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// The user ID
    pub id: String,

    /// The user's email address
    #[serde(default)]
    pub email: Option<String>,

    /// The user's phone number
    #[serde(default)]
    pub phone: Option<String>,

    /// The database role (`authenticated`, `anon`, ...)
    #[serde(default)]
    pub role: Option<String>,

    /// The app metadata
    #[serde(default)]
    pub app_metadata: HashMap<String, serde_json::Value>,

    /// The user metadata
    #[serde(default)]
    pub user_metadata: HashMap<String, serde_json::Value>,

    #[serde(default)]
    pub created_at: Option<String>,

    #[serde(default)]
    pub last_sign_in_at: Option<String>,
}

impl User {
    /// Marketplace role stored in the user metadata at sign-up
    pub fn account_role(&self) -> Option<Role> {
        self.user_metadata
            .get("role")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
    }
}

/// Result of a sign-up or sign-in call.
///
/// Sign-up on a project with email confirmation returns only the user.
#[derive(Debug, Clone)]
pub struct AuthResponse {
    pub user: User,
    pub session: Option<Session>,
}

/// Claims carried by the access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject, the auth user id
    pub sub: String,

    /// Expiry, seconds since the epoch
    pub exp: i64,

    #[serde(default)]
    pub role: Option<String>,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub user_metadata: HashMap<String, serde_json::Value>,
}

impl Claims {
    /// Marketplace role, when the token carries one
    pub fn account_role(&self) -> Option<Role> {
        self.user_metadata
            .get("role")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
    }
}
