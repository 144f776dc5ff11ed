//! Mechanic dispatch client
//!
//! Domain layer for a roadside-repair marketplace on a Supabase-style
//! backend: the service-request lifecycle, distance labels, mechanic
//! location broadcast, realtime change feeds and reverse geocoding, sharing
//! one authenticated session.

pub mod auth;
pub mod config;
pub mod error;
pub mod fetch;
pub mod geo;
pub mod geocoding;
pub mod location;
pub mod postgrest;
pub mod profiles;
pub mod realtime;
pub mod request;
pub mod retry;

use reqwest::Client;
use tracing::debug;

use crate::auth::{Auth, SessionStore};
use crate::config::{ClientOptions, DispatchConfig};
use crate::error::Error;
use crate::geocoding::ReverseGeocoder;
use crate::location::TablePositionSink;
use crate::postgrest::TableClient;
use crate::profiles::{ProfileClient, CUSTOMERS_TABLE, MECHANICS_TABLE};
use crate::realtime::RealtimeClient;
use crate::request::{PostgrestRequestStore, RequestService};

/// Table holding service requests
pub const REQUESTS_TABLE: &str = "requests";

/// Main entry point. Every client it hands out shares the same session.
pub struct Dispatch {
    /// The base URL for the project
    pub url: String,
    /// The anonymous API key for the project
    pub key: String,
    /// HTTP client used for requests
    pub http_client: Client,
    /// Auth client for sign up, sign in and session handling
    pub auth: Auth,
    session: SessionStore,
    /// Client options
    pub options: ClientOptions,
}

impl Dispatch {
    /// Create a client with default options
    ///
    /// ```
    /// use mechanic_dispatch::Dispatch;
    ///
    /// let dispatch = Dispatch::new("https://your-project.supabase.co", "your-anon-key").unwrap();
    /// ```
    pub fn new(url: &str, key: &str) -> Result<Self, Error> {
        Self::new_with_options(url, key, ClientOptions::default())
    }

    /// Create a client with custom options
    ///
    /// ```
    /// use std::time::Duration;
    /// use mechanic_dispatch::{config::ClientOptions, Dispatch};
    ///
    /// let options = ClientOptions::default().with_geocode_debounce(Duration::from_secs(10));
    /// let dispatch = Dispatch::new_with_options(
    ///     "https://your-project.supabase.co",
    ///     "your-anon-key",
    ///     options,
    /// )
    /// .unwrap();
    /// ```
    pub fn new_with_options(url: &str, key: &str, options: ClientOptions) -> Result<Self, Error> {
        let config = DispatchConfig::new(url, key)?;
        Self::from_config(&config, options)
    }

    pub fn from_config(config: &DispatchConfig, options: ClientOptions) -> Result<Self, Error> {
        let mut builder = Client::builder();
        if let Some(timeout) = options.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http_client = builder.build()?;

        let url = config.base_url();
        let session = SessionStore::new();
        let auth = Auth::new(&url, &config.anon_key, http_client.clone(), session.clone());
        debug!("dispatch client created for {}", url);

        Ok(Self {
            url,
            key: config.anon_key.clone(),
            http_client,
            auth,
            session,
            options,
        })
    }

    /// Create a client from `SUPABASE_URL` and `SUPABASE_ANON_KEY`
    pub fn from_env() -> Result<Self, Error> {
        Self::from_config(&DispatchConfig::from_env()?, ClientOptions::default())
    }

    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    /// The session shared by every client
    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    /// Table client for `table` in the configured schema
    pub fn from(&self, table: &str) -> TableClient {
        TableClient::new(
            &self.url,
            &self.key,
            &self.options.db_schema,
            table,
            self.http_client.clone(),
            self.session.clone(),
        )
    }

    /// Request lifecycle service over the `requests` table
    pub fn requests(&self) -> RequestService<PostgrestRequestStore> {
        RequestService::new(
            PostgrestRequestStore::new(self.from(REQUESTS_TABLE)),
            self.options.retry.clone(),
        )
    }

    pub fn profiles(&self) -> ProfileClient {
        ProfileClient::new(self.from(CUSTOMERS_TABLE), self.from(MECHANICS_TABLE))
    }

    /// A realtime client; call `connect` to open the socket
    pub fn realtime(&self) -> RealtimeClient {
        RealtimeClient::new(
            &self.url,
            &self.key,
            &self.options.db_schema,
            self.session.clone(),
            self.options.realtime.clone(),
        )
    }

    pub fn geocoder(&self) -> ReverseGeocoder {
        ReverseGeocoder::new(
            self.http_client.clone(),
            &self.options.geocoder_url,
            &self.options.user_agent,
            self.options.geocode_debounce,
        )
    }

    /// Sink writing a mechanic's position to their profile and active job
    pub fn location_sink(&self, mechanic_id: &str) -> TablePositionSink<PostgrestRequestStore> {
        TablePositionSink::new(mechanic_id, self.profiles(), self.requests())
    }
}

/// A convenience module for common imports
pub mod prelude {
    pub use crate::auth::{Role, Session};
    pub use crate::config::{ClientOptions, DispatchConfig, RetryPolicy};
    pub use crate::error::Error;
    pub use crate::geo::{distance_label, haversine_km, Coordinates};
    pub use crate::location::{CadenceProfile, LocationBroadcaster};
    pub use crate::request::{NewRequest, RequestId, RequestStatus, ServiceRequest};
    pub use crate::Dispatch;
}
