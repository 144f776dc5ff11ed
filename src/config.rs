//! Configuration for the dispatch client

use std::time::Duration;

use url::Url;

use crate::error::Error;

/// Default reverse geocoding endpoint
pub const DEFAULT_GEOCODER_URL: &str = "https://nominatim.openstreetmap.org";

/// Project location and key.
///
/// Load these from the environment or a secure config source rather than
/// compiling them in.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub url: Url,
    pub anon_key: String,
}

impl DispatchConfig {
    /// Create a new configuration, validating the URL and key
    pub fn new(url: &str, anon_key: &str) -> Result<Self, Error> {
        let url = Url::parse(url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::config(format!(
                "unsupported URL scheme: {}",
                url.scheme()
            )));
        }
        if anon_key.trim().is_empty() {
            return Err(Error::config("anon_key cannot be empty"));
        }
        Ok(Self {
            url,
            anon_key: anon_key.to_string(),
        })
    }

    /// Read `SUPABASE_URL` and `SUPABASE_ANON_KEY` from the environment
    pub fn from_env() -> Result<Self, Error> {
        let url = std::env::var("SUPABASE_URL")
            .map_err(|_| Error::config("SUPABASE_URL environment variable not found"))?;
        let anon_key = std::env::var("SUPABASE_ANON_KEY")
            .map_err(|_| Error::config("SUPABASE_ANON_KEY environment variable not found"))?;
        Self::new(&url, &anon_key)
    }

    /// Project URL without the trailing slash `Url` adds
    pub fn base_url(&self) -> String {
        self.url.as_str().trim_end_matches('/').to_string()
    }
}

/// Backoff policy for writes that fail with a transient error
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before the given retry (1-based), capped at `max_backoff`
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exp = self.backoff_factor.powi(retry.saturating_sub(1) as i32);
        let millis = self.initial_backoff.as_millis() as f64 * exp;
        Duration::from_millis(millis as u64).min(self.max_backoff)
    }
}

/// Location broadcast timing, shared by every screen
#[derive(Debug, Clone, PartialEq)]
pub struct LocationOptions {
    /// Interval while only the dashboard is open
    pub dashboard_interval: Duration,
    /// Interval while a live map is open
    pub map_interval: Duration,
    /// Interval during turn-by-turn navigation
    pub navigation_interval: Duration,
    /// Fixes closer than this to the last published one are skipped
    pub min_displacement_m: f64,
    /// Publish even without movement once this much time has passed
    pub max_silence: Duration,
}

impl Default for LocationOptions {
    fn default() -> Self {
        Self {
            dashboard_interval: Duration::from_secs(60),
            map_interval: Duration::from_secs(5),
            navigation_interval: Duration::from_secs(2),
            min_displacement_m: 10.0,
            max_silence: Duration::from_secs(60),
        }
    }
}

/// Realtime connection options
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeOptions {
    pub auto_reconnect: bool,
    pub max_reconnect_attempts: Option<u32>,
    pub reconnect_interval: Duration,
    pub reconnect_backoff_factor: f64,
    pub max_reconnect_interval: Duration,
    pub heartbeat_interval: Duration,
    /// Buffered events per subscription; further events are dropped until the subscriber catches up
    pub subscription_buffer: usize,
}

impl Default for RealtimeOptions {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            max_reconnect_attempts: None,
            reconnect_interval: Duration::from_secs(1),
            reconnect_backoff_factor: 1.5,
            max_reconnect_interval: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(30),
            subscription_buffer: 64,
        }
    }
}

/// Configuration options for the dispatch client
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// The request timeout
    pub request_timeout: Option<Duration>,

    /// The database schema holding the dispatch tables
    pub db_schema: String,

    /// Retry policy for reads and guarded updates
    pub retry: RetryPolicy,

    /// Location broadcast timing
    pub location: LocationOptions,

    /// Realtime connection behaviour
    pub realtime: RealtimeOptions,

    /// Base URL of the reverse geocoding service
    pub geocoder_url: String,

    /// Minimum time between reverse geocoding lookups per location class
    pub geocode_debounce: Duration,

    /// User agent sent to third-party services
    pub user_agent: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(30)),
            db_schema: "public".to_string(),
            retry: RetryPolicy::default(),
            location: LocationOptions::default(),
            realtime: RealtimeOptions::default(),
            geocoder_url: DEFAULT_GEOCODER_URL.to_string(),
            geocode_debounce: Duration::from_secs(5),
            user_agent: format!("mechanic-dispatch/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ClientOptions {
    /// Set the request timeout
    pub fn with_request_timeout(mut self, value: Option<Duration>) -> Self {
        self.request_timeout = value;
        self
    }

    /// Set the database schema
    pub fn with_db_schema(mut self, value: &str) -> Self {
        self.db_schema = value.to_string();
        self
    }

    /// Set the retry policy for writes
    pub fn with_retry(mut self, value: RetryPolicy) -> Self {
        self.retry = value;
        self
    }

    /// Set the location broadcast timing
    pub fn with_location(mut self, value: LocationOptions) -> Self {
        self.location = value;
        self
    }

    /// Set the realtime connection options
    pub fn with_realtime(mut self, value: RealtimeOptions) -> Self {
        self.realtime = value;
        self
    }

    /// Set the reverse geocoding endpoint
    pub fn with_geocoder_url(mut self, value: &str) -> Self {
        self.geocoder_url = value.trim_end_matches('/').to_string();
        self
    }

    /// Set the reverse geocoding debounce window
    pub fn with_geocode_debounce(mut self, value: Duration) -> Self {
        self.geocode_debounce = value;
        self
    }

    /// Set the user agent
    pub fn with_user_agent(mut self, value: &str) -> Self {
        self.user_agent = value.to_string();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_new_valid() {
        let config = DispatchConfig::new("http://localhost:54321", "anon").unwrap();
        assert_eq!(config.url.to_string(), "http://localhost:54321/");
        assert_eq!(config.base_url(), "http://localhost:54321");
        assert_eq!(config.anon_key, "anon");
    }

    #[test]
    fn config_new_invalid_url() {
        match DispatchConfig::new("not a valid url", "anon") {
            Err(Error::Url(_)) => {}
            other => panic!("Expected Url error, got {:?}", other),
        }
    }

    #[test]
    fn config_new_empty_key() {
        match DispatchConfig::new("http://localhost:54321", "  ") {
            Err(Error::Config(msg)) => assert!(msg.contains("anon_key cannot be empty")),
            other => panic!("Expected Config error, got {:?}", other),
        }
    }

    #[test]
    fn config_rejects_websocket_scheme() {
        assert!(matches!(
            DispatchConfig::new("ws://localhost:54321", "anon"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn retry_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(300),
            backoff_factor: 2.0,
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(300));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(300));
    }

    #[test]
    fn builder_overrides_defaults() {
        let options = ClientOptions::default()
            .with_db_schema("dispatch")
            .with_geocoder_url("http://geo.local/")
            .with_retry(RetryPolicy::none());
        assert_eq!(options.db_schema, "dispatch");
        assert_eq!(options.geocoder_url, "http://geo.local");
        assert_eq!(options.retry.max_attempts, 1);
        assert_eq!(options.geocode_debounce, Duration::from_secs(5));
        assert_eq!(options.location.dashboard_interval, Duration::from_secs(60));
    }
}
