//! Error handling for the dispatch client

use std::fmt;

use serde::Deserialize;
use thiserror::Error;

use crate::request::RequestStatus;

/// GoTrue error codes that mean the stored session can no longer be used.
const SESSION_ERROR_CODES: &[&str] = &[
    "bad_jwt",
    "session_not_found",
    "session_expired",
    "refresh_token_not_found",
    "refresh_token_already_used",
    "user_not_found",
];

/// Error body returned by the REST, auth and realtime endpoints.
///
/// The three services disagree on field names, so every known spelling is
/// folded into `code` and `message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// HTTP status code
    pub status: u16,
    /// Machine readable error code, when the service sent one
    pub code: Option<String>,
    /// Human readable message
    pub message: String,
}

#[derive(Deserialize)]
struct RawApiError {
    code: Option<serde_json::Value>,
    error_code: Option<String>,
    error: Option<String>,
    message: Option<String>,
    msg: Option<String>,
    error_description: Option<String>,
}

impl ApiError {
    /// Build an `ApiError` from a status code and a raw response body
    pub fn from_body(status: u16, body: &str) -> Self {
        let parsed = serde_json::from_str::<RawApiError>(body).ok();
        let (code, message) = match parsed {
            Some(raw) => {
                let code = raw
                    .error_code
                    .or_else(|| match raw.code {
                        Some(serde_json::Value::String(s)) => Some(s),
                        _ => None,
                    })
                    .or_else(|| raw.error.clone());
                let message = raw
                    .message
                    .or(raw.msg)
                    .or(raw.error_description)
                    .or(raw.error)
                    .unwrap_or_else(|| body.to_string());
                (code, message)
            }
            None => (None, body.to_string()),
        };

        Self {
            status,
            code,
            message,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({}): {}", self.status, code, self.message),
            None => write!(f, "{}: {}", self.status, self.message),
        }
    }
}

/// Unified error type for the dispatch client
#[derive(Error, Debug)]
pub enum Error {
    /// Network or HTTP related errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization or deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing errors
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// JWT decoding errors
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// A service answered with a non-success status
    #[error("API error {0}")]
    Api(ApiError),

    /// Authentication errors raised locally
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Database errors that are not plain API failures
    #[error("Database error: {0}")]
    Database(String),

    /// Realtime subscription errors
    #[error("Realtime error: {0}")]
    Realtime(String),

    /// Reverse geocoding errors
    #[error("Geocoding error: {0}")]
    Geocoding(String),

    /// Input rejected before reaching the backend
    #[error("Validation error: {0}")]
    Validation(String),

    /// The requested row does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The workflow does not allow this status change
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: RequestStatus,
        to: RequestStatus,
    },

    /// Another mechanic already holds the request
    #[error("Request {0} was already taken by another mechanic")]
    AlreadyTaken(String),

    /// The acting mechanic is not the one assigned to the request
    #[error("Mechanic {mechanic_id} is not assigned to request {request_id}")]
    NotAssigned {
        request_id: String,
        mechanic_id: String,
    },

    /// The mechanic already has an unresolved request
    #[error("Mechanic {mechanic_id} already has active request {active_request_id}")]
    MechanicBusy {
        mechanic_id: String,
        active_request_id: String,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// General errors
    #[error("{0}")]
    General(String),
}

impl Error {
    /// Create a new authentication error
    pub fn auth<T: fmt::Display>(msg: T) -> Self {
        Error::Auth(msg.to_string())
    }

    /// Create a new database error
    pub fn database<T: fmt::Display>(msg: T) -> Self {
        Error::Database(msg.to_string())
    }

    /// Create a new realtime error
    pub fn realtime<T: fmt::Display>(msg: T) -> Self {
        Error::Realtime(msg.to_string())
    }

    /// Create a new geocoding error
    pub fn geocoding<T: fmt::Display>(msg: T) -> Self {
        Error::Geocoding(msg.to_string())
    }

    /// Create a new validation error
    pub fn validation<T: fmt::Display>(msg: T) -> Self {
        Error::Validation(msg.to_string())
    }

    /// Create a new not-found error
    pub fn not_found<T: fmt::Display>(msg: T) -> Self {
        Error::NotFound(msg.to_string())
    }

    /// Create a new configuration error
    pub fn config<T: fmt::Display>(msg: T) -> Self {
        Error::Config(msg.to_string())
    }

    /// Create a new general error
    pub fn general<T: fmt::Display>(msg: T) -> Self {
        Error::General(msg.to_string())
    }

    /// Whether retrying the same call may succeed.
    ///
    /// Covers connection failures, timeouts, 408, 429 and 5xx answers.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(e) => {
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    return true;
                }
                e.status()
                    .map(|s| s.is_server_error() || s.as_u16() == 408 || s.as_u16() == 429)
                    .unwrap_or(false)
            }
            Error::Api(api) => api.status >= 500 || api.status == 408 || api.status == 429,
            _ => false,
        }
    }

    /// Whether the error means the current session is dead and the user
    /// must sign in again. Decided from status codes and error codes only.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            Error::Api(api) => {
                let session_code = api
                    .code
                    .as_deref()
                    .map(|c| SESSION_ERROR_CODES.contains(&c) || c.starts_with("PGRST30"))
                    .unwrap_or(false);
                api.status == 401 || session_code
            }
            Error::Jwt(_) => true,
            Error::Http(e) => e.status().map(|s| s.as_u16() == 401).unwrap_or(false),
            _ => false,
        }
    }
}
