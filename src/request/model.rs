//! Service request rows and inputs

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use super::status::RequestStatus;
use crate::error::Error;
use crate::geo::Coordinates;

const MAX_DESCRIPTION_LEN: usize = 2000;
const MAX_CAR_TYPE_LEN: usize = 100;

/// Opaque request identifier. Rows may carry it as a string (uuid) or a
/// number (bigint); both are kept as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Int(i64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => RequestId(s),
            Raw::Int(n) => RequestId(n.to_string()),
        })
    }
}

/// Timestamp accepting RFC 3339 as well as the offset-less form realtime
/// payloads use for `timestamp` columns (read as UTC).
#[derive(Debug, Clone, Copy)]
struct LenientTime(DateTime<Utc>);

impl<'de> Deserialize<'de> for LenientTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if let Ok(t) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(LenientTime(t.with_timezone(&Utc)));
        }
        for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f%#z"] {
            if let Ok(t) = NaiveDateTime::parse_from_str(&raw, format) {
                return Ok(LenientTime(t.and_utc()));
            }
            if let Ok(t) = DateTime::parse_from_str(&raw, format) {
                return Ok(LenientTime(t.with_timezone(&Utc)));
            }
        }
        Err(serde::de::Error::custom(format!("invalid timestamp: {}", raw)))
    }
}

/// `deserialize_with` for optional timestamp columns in any form
/// [`LenientTime`] accepts
pub(crate) fn lenient_time_opt<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    Ok(Option::<LenientTime>::deserialize(deserializer)?.map(|t| t.0))
}

/// Wire shape of a `requests` row, with every column spelling seen in the
/// wild.
#[derive(Deserialize)]
struct RawServiceRequest {
    id: RequestId,
    customer_id: String,
    #[serde(default)]
    mechanic_id: Option<String>,
    #[serde(default)]
    car_type: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    issue: Option<String>,
    #[serde(default)]
    customer_lat: Option<f64>,
    #[serde(default)]
    customer_lng: Option<f64>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lng: Option<f64>,
    #[serde(default)]
    mechanic_lat: Option<f64>,
    #[serde(default)]
    mechanic_lng: Option<f64>,
    status: RequestStatus,
    #[serde(default)]
    created_at: Option<LenientTime>,
    #[serde(default)]
    accepted_at: Option<LenientTime>,
    #[serde(default)]
    arrived_at: Option<LenientTime>,
    #[serde(default)]
    completed_at: Option<LenientTime>,
    #[serde(default)]
    declined_at: Option<LenientTime>,
}

/// A customer's service ticket
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceRequest {
    pub id: RequestId,
    pub customer_id: String,
    pub mechanic_id: Option<String>,
    pub car_type: Option<String>,
    pub description: Option<String>,
    pub customer_lat: Option<f64>,
    pub customer_lng: Option<f64>,
    pub mechanic_lat: Option<f64>,
    pub mechanic_lng: Option<f64>,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub arrived_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub declined_at: Option<DateTime<Utc>>,
}

impl<'de> Deserialize<'de> for ServiceRequest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawServiceRequest::deserialize(deserializer)?;
        let created_at = raw.created_at.map(|t| t.0).ok_or_else(|| {
            serde::de::Error::custom(format!("request {} has no created_at", raw.id))
        })?;

        Ok(Self {
            id: raw.id,
            customer_id: raw.customer_id,
            mechanic_id: raw.mechanic_id,
            car_type: raw.car_type,
            description: raw.description.or(raw.issue),
            customer_lat: raw.customer_lat.or(raw.lat),
            customer_lng: raw.customer_lng.or(raw.lng),
            mechanic_lat: raw.mechanic_lat,
            mechanic_lng: raw.mechanic_lng,
            status: raw.status,
            created_at,
            accepted_at: raw.accepted_at.map(|t| t.0),
            arrived_at: raw.arrived_at.map(|t| t.0),
            completed_at: raw.completed_at.map(|t| t.0),
            declined_at: raw.declined_at.map(|t| t.0),
        })
    }
}

impl ServiceRequest {
    pub fn customer_location(&self) -> Option<Coordinates> {
        Coordinates::from_parts(self.customer_lat, self.customer_lng)
    }

    pub fn mechanic_location(&self) -> Option<Coordinates> {
        Coordinates::from_parts(self.mechanic_lat, self.mechanic_lng)
    }

    /// Whether `mechanic_id` is the assigned mechanic
    pub fn is_assigned_to(&self, mechanic_id: &str) -> bool {
        self.mechanic_id.as_deref() == Some(mechanic_id)
    }

    /// Distance label between mechanic and customer, when both are known
    pub fn distance_label(&self) -> Option<String> {
        Some(crate::geo::distance_label(
            self.mechanic_location()?,
            self.customer_location()?,
        ))
    }
}

/// Customer input for a new request
#[derive(Debug, Clone, PartialEq)]
pub struct NewRequest {
    pub customer_id: String,
    /// Set when the customer picked a mechanic from the list
    pub mechanic_id: Option<String>,
    pub car_type: Option<String>,
    pub description: String,
    /// Captured once when the request is sent
    pub location: Coordinates,
}

impl NewRequest {
    pub fn validate(&self) -> Result<(), Error> {
        if self.customer_id.trim().is_empty() {
            return Err(Error::validation("customer_id is required"));
        }
        if let Some(mechanic_id) = &self.mechanic_id {
            if mechanic_id.trim().is_empty() {
                return Err(Error::validation("mechanic_id must not be blank"));
            }
        }
        let description = self.description.trim();
        if description.is_empty() {
            return Err(Error::validation("description is required"));
        }
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(Error::validation(format!(
                "description is longer than {} characters",
                MAX_DESCRIPTION_LEN
            )));
        }
        if let Some(car_type) = &self.car_type {
            if car_type.trim().chars().count() > MAX_CAR_TYPE_LEN {
                return Err(Error::validation(format!(
                    "car_type is longer than {} characters",
                    MAX_CAR_TYPE_LEN
                )));
            }
        }
        self.location.validate()
    }

    /// Row to insert; always starts `pending`
    pub fn to_row(&self) -> NewRequestRow {
        NewRequestRow {
            customer_id: self.customer_id.clone(),
            mechanic_id: self.mechanic_id.clone(),
            car_type: self
                .car_type
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            description: self.description.trim().to_string(),
            customer_lat: self.location.lat,
            customer_lng: self.location.lng,
            status: RequestStatus::Pending,
        }
    }
}

/// Insert payload for the `requests` table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewRequestRow {
    pub customer_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mechanic_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub car_type: Option<String>,
    pub description: String,
    pub customer_lat: f64,
    pub customer_lng: f64,
    pub status: RequestStatus,
}

/// Partial update of a `requests` row; unset fields are left alone
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RequestPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RequestStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mechanic_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mechanic_lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mechanic_lng: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arrived_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub declined_at: Option<DateTime<Utc>>,
}

impl RequestPatch {
    /// Patch moving a request to `status`, stamping the matching timestamp
    pub fn transition(status: RequestStatus, at: DateTime<Utc>) -> Self {
        let mut patch = Self {
            status: Some(status),
            ..Self::default()
        };
        match status {
            RequestStatus::Accepted => patch.accepted_at = Some(at),
            RequestStatus::Arrived => patch.arrived_at = Some(at),
            RequestStatus::Completed => patch.completed_at = Some(at),
            RequestStatus::Declined => patch.declined_at = Some(at),
            RequestStatus::Pending => {}
        }
        patch
    }

    pub fn with_mechanic(mut self, mechanic_id: &str) -> Self {
        self.mechanic_id = Some(mechanic_id.to_string());
        self
    }

    pub fn with_mechanic_location(mut self, location: Coordinates) -> Self {
        self.mechanic_lat = Some(location.lat);
        self.mechanic_lng = Some(location.lng);
        self
    }

    /// Apply the patch to a row in memory
    pub fn apply_to(&self, request: &mut ServiceRequest) {
        if let Some(status) = self.status {
            request.status = status;
        }
        if let Some(mechanic_id) = &self.mechanic_id {
            request.mechanic_id = Some(mechanic_id.clone());
        }
        if self.mechanic_lat.is_some() {
            request.mechanic_lat = self.mechanic_lat;
        }
        if self.mechanic_lng.is_some() {
            request.mechanic_lng = self.mechanic_lng;
        }
        if self.accepted_at.is_some() {
            request.accepted_at = self.accepted_at;
        }
        if self.arrived_at.is_some() {
            request.arrived_at = self.arrived_at;
        }
        if self.completed_at.is_some() {
            request.completed_at = self.completed_at;
        }
        if self.declined_at.is_some() {
            request.declined_at = self.declined_at;
        }
    }
}
