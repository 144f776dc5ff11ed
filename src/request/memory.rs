//! In-process request store

use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Mutex, MutexGuard};

use super::model::{NewRequestRow, RequestId, RequestPatch, ServiceRequest};
use super::store::{RequestQuery, RequestStore, UpdateGuard};
use crate::error::Error;

/// [`RequestStore`] kept in memory. Guarded updates hold the lock across
/// check and write, so they behave like the conditional update and the
/// one-active-job index on the server.
#[derive(Default)]
pub struct MemoryRequestStore {
    rows: Mutex<Vec<ServiceRequest>>,
}

impl MemoryRequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an existing row
    pub fn with_row(self, row: ServiceRequest) -> Self {
        self.lock().push(row);
        self
    }

    pub fn snapshot(&self) -> Vec<ServiceRequest> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ServiceRequest>> {
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl RequestStore for MemoryRequestStore {
    async fn insert(&self, row: NewRequestRow) -> Result<ServiceRequest, Error> {
        let request = ServiceRequest {
            id: RequestId::new(uuid::Uuid::new_v4().to_string()),
            customer_id: row.customer_id,
            mechanic_id: row.mechanic_id,
            car_type: row.car_type,
            description: Some(row.description),
            customer_lat: Some(row.customer_lat),
            customer_lng: Some(row.customer_lng),
            mechanic_lat: None,
            mechanic_lng: None,
            status: row.status,
            created_at: Utc::now(),
            accepted_at: None,
            arrived_at: None,
            completed_at: None,
            declined_at: None,
        };
        self.lock().push(request.clone());
        Ok(request)
    }

    async fn fetch(&self, id: &RequestId) -> Result<Option<ServiceRequest>, Error> {
        Ok(self.lock().iter().find(|r| &r.id == id).cloned())
    }

    async fn list(&self, query: &RequestQuery) -> Result<Vec<ServiceRequest>, Error> {
        let mut rows: Vec<ServiceRequest> = self
            .lock()
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.created_at);
        if query.newest_first {
            rows.reverse();
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn update_guarded(
        &self,
        id: &RequestId,
        guard: &UpdateGuard,
        patch: &RequestPatch,
    ) -> Result<Option<ServiceRequest>, Error> {
        let mut rows = self.lock();
        let Some(index) = rows.iter().position(|r| &r.id == id) else {
            return Ok(None);
        };
        if !guard.matches(&rows[index]) {
            return Ok(None);
        }
        if let Some(mechanic_id) = &guard.sole_active_for {
            let holder = rows
                .iter()
                .find(|r| &r.id != id && r.status.is_active() && r.is_assigned_to(mechanic_id));
            if let Some(holder) = holder {
                return Err(Error::MechanicBusy {
                    mechanic_id: mechanic_id.clone(),
                    active_request_id: holder.id.to_string(),
                });
            }
        }
        let row = &mut rows[index];
        patch.apply_to(row);
        Ok(Some(row.clone()))
    }
}
