//! Customer and mechanic profile rows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Error;
use crate::geo::{self, Coordinates};
use crate::postgrest::TableClient;
use crate::request::lenient_time_opt;

pub const CUSTOMERS_TABLE: &str = "customers";
pub const MECHANICS_TABLE: &str = "mechanics";

/// Row of the `customers` table, keyed by the auth user id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Row of the `mechanics` table, keyed by the auth user id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mechanic {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specialty: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_time_opt"
    )]
    pub location_updated_at: Option<DateTime<Utc>>,
}

impl Mechanic {
    pub fn location(&self) -> Option<Coordinates> {
        Coordinates::from_parts(self.lat, self.lng)
    }
}

/// Position columns of a mechanic row, as carried by change feeds
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MechanicPosition {
    pub id: String,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
    #[serde(default, deserialize_with = "lenient_time_opt")]
    pub location_updated_at: Option<DateTime<Utc>>,
}

impl MechanicPosition {
    pub fn location(&self) -> Option<Coordinates> {
        Coordinates::from_parts(self.lat, self.lng)
    }
}

/// Position update for a mechanic row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MechanicLocationUpdate {
    pub lat: f64,
    pub lng: f64,
    pub location_updated_at: DateTime<Utc>,
}

/// A mechanic paired with their distance from the viewer, if known
#[derive(Debug, Clone, PartialEq)]
pub struct MechanicListing {
    pub mechanic: Mechanic,
    pub distance_km: Option<f64>,
}

impl MechanicListing {
    pub fn distance_label(&self) -> Option<String> {
        self.distance_km.map(geo::km_label)
    }
}

/// Access to the `customers` and `mechanics` tables
pub struct ProfileClient {
    customers: TableClient,
    mechanics: TableClient,
}

impl ProfileClient {
    pub(crate) fn new(customers: TableClient, mechanics: TableClient) -> Self {
        Self {
            customers,
            mechanics,
        }
    }

    pub async fn customer(&self, id: &str) -> Result<Customer, Error> {
        self.customers
            .select("*")
            .eq("id", id)
            .execute_one()
            .await?
            .ok_or_else(|| Error::not_found(format!("customer {}", id)))
    }

    pub async fn mechanic(&self, id: &str) -> Result<Mechanic, Error> {
        self.mechanics
            .select("*")
            .eq("id", id)
            .execute_one()
            .await?
            .ok_or_else(|| Error::not_found(format!("mechanic {}", id)))
    }

    /// Create or replace the customer's profile row
    pub async fn save_customer(&self, customer: &Customer) -> Result<Customer, Error> {
        let rows: Vec<Customer> = self
            .customers
            .upsert(customer)
            .on_conflict("id")
            .execute()
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| Error::database("customer upsert returned no row"))
    }

    /// Create or replace the mechanic's profile row
    pub async fn save_mechanic(&self, mechanic: &Mechanic) -> Result<Mechanic, Error> {
        let rows: Vec<Mechanic> = self
            .mechanics
            .upsert(mechanic)
            .on_conflict("id")
            .execute()
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| Error::database("mechanic upsert returned no row"))
    }

    /// All mechanics in table order, with distances from `viewer` when
    /// given. The order is not changed by distance.
    pub async fn list_mechanics(&self, viewer: Option<Coordinates>) -> Result<Vec<MechanicListing>, Error> {
        let mechanics: Vec<Mechanic> = self.mechanics.select("*").execute().await?;
        debug!("loaded {} mechanics", mechanics.len());

        let listings = match viewer {
            Some(origin) => geo::with_distances(mechanics, origin, Mechanic::location)
                .into_iter()
                .map(|(mechanic, distance_km)| MechanicListing {
                    mechanic,
                    distance_km,
                })
                .collect(),
            None => mechanics
                .into_iter()
                .map(|mechanic| MechanicListing {
                    mechanic,
                    distance_km: None,
                })
                .collect(),
        };
        Ok(listings)
    }

    /// Write the mechanic's current position
    pub async fn update_mechanic_location(&self, id: &str, location: Coordinates) -> Result<(), Error> {
        location.validate()?;
        let update = MechanicLocationUpdate {
            lat: location.lat,
            lng: location.lng,
            location_updated_at: Utc::now(),
        };
        let rows: Vec<serde_json::Value> = self.mechanics.update(&update).eq("id", id).execute().await?;
        if rows.is_empty() {
            return Err(Error::not_found(format!("mechanic {}", id)));
        }
        Ok(())
    }
}
