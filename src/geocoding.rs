//! Reverse geocoding with a per-role debounce

use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::Error;
use crate::fetch::Fetch;
use crate::geo::Coordinates;

/// Whose position is being looked up. Each class has its own debounce
/// window and cached address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocationClass {
    Customer,
    Mechanic,
}

/// A human-readable address
#[derive(Debug, Clone, PartialEq)]
pub struct Address {
    pub display_name: String,
    /// Structured parts such as `road`, `suburb`, `city`, `country`
    pub parts: BTreeMap<String, String>,
}

impl Address {
    pub fn part(&self, key: &str) -> Option<&str> {
        self.parts.get(key).map(String::as_str)
    }

    /// Road and city when known, otherwise the full name
    pub fn short_label(&self) -> String {
        let city = self
            .part("city")
            .or_else(|| self.part("town"))
            .or_else(|| self.part("village"));
        match (self.part("road"), city) {
            (Some(road), Some(city)) => format!("{}, {}", road, city),
            _ => self.display_name.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReverseReply {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    address: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

struct CachedAddress {
    address: Address,
    looked_up_at: Instant,
}

/// Client for a Nominatim-compatible `/reverse` endpoint
pub struct ReverseGeocoder {
    client: Client,
    base_url: String,
    user_agent: String,
    debounce: Duration,
    customer: Mutex<Option<CachedAddress>>,
    mechanic: Mutex<Option<CachedAddress>>,
}

impl ReverseGeocoder {
    pub fn new(client: Client, base_url: &str, user_agent: &str, debounce: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            user_agent: user_agent.to_string(),
            debounce,
            customer: Mutex::new(None),
            mechanic: Mutex::new(None),
        }
    }

    /// Cache slot for `class`. Lookups of one class wait for each other
    /// but never for the other class.
    fn slot(&self, class: LocationClass) -> &Mutex<Option<CachedAddress>> {
        match class {
            LocationClass::Customer => &self.customer,
            LocationClass::Mechanic => &self.mechanic,
        }
    }

    /// Address for `coordinates`. Within the debounce window of the last
    /// successful lookup for `class`, the cached address is returned
    /// without a network call.
    pub async fn lookup(&self, class: LocationClass, coordinates: Coordinates) -> Result<Address, Error> {
        let mut cached_slot = self.slot(class).lock().await;
        if let Some(cached) = cached_slot.as_ref() {
            if cached.looked_up_at.elapsed() < self.debounce {
                debug!("reverse geocode for {:?} served from cache", class);
                return Ok(cached.address.clone());
            }
        }

        let address = self.reverse(coordinates).await?;
        *cached_slot = Some(CachedAddress {
            address: address.clone(),
            looked_up_at: Instant::now(),
        });
        Ok(address)
    }

    /// Forget cached addresses so the next lookup goes to the network
    pub async fn clear(&self) {
        self.customer.lock().await.take();
        self.mechanic.lock().await.take();
    }

    /// Look up an address without touching the cache
    pub async fn reverse(&self, coordinates: Coordinates) -> Result<Address, Error> {
        coordinates.validate()?;
        let url = format!("{}/reverse", self.base_url);
        info!("reverse geocoding {:.5},{:.5}", coordinates.lat, coordinates.lng);

        let reply: ReverseReply = Fetch::get(&self.client, &url)
            .header("User-Agent", &self.user_agent)
            .header("Accept", "application/json")
            .query([
                ("format", "jsonv2".to_string()),
                ("lat", coordinates.lat.to_string()),
                ("lon", coordinates.lng.to_string()),
            ])
            .execute()
            .await?;

        if let Some(error) = reply.error {
            return Err(Error::geocoding(error));
        }
        let display_name = reply
            .display_name
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| Error::geocoding("no address for this position"))?;

        let parts = reply
            .address
            .into_iter()
            .filter_map(|(key, value)| match value {
                serde_json::Value::String(s) => Some((key, s)),
                serde_json::Value::Number(n) => Some((key, n.to_string())),
                _ => None,
            })
            .collect();

        Ok(Address {
            display_name,
            parts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_label_prefers_road_and_city() {
        let mut parts = BTreeMap::new();
        parts.insert("road".to_string(), "Tahrir Street".to_string());
        parts.insert("town".to_string(), "Dokki".to_string());
        let address = Address {
            display_name: "Tahrir Street, Dokki, Giza, Egypt".into(),
            parts,
        };
        assert_eq!(address.short_label(), "Tahrir Street, Dokki");

        let bare = Address {
            display_name: "Somewhere".into(),
            parts: BTreeMap::new(),
        };
        assert_eq!(bare.short_label(), "Somewhere");
    }

    #[tokio::test]
    async fn invalid_coordinates_fail_before_any_request() {
        let geocoder = ReverseGeocoder::new(
            Client::new(),
            "http://127.0.0.1:9",
            "test-agent",
            Duration::from_secs(5),
        );
        let err = geocoder
            .reverse(Coordinates { lat: 120.0, lng: 0.0 })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
