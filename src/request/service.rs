//! Request lifecycle operations shared by the customer and mechanic apps

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::model::{NewRequest, RequestId, RequestPatch, ServiceRequest};
use super::status::RequestStatus;
use super::store::{MechanicGuard, RequestQuery, RequestStore, UpdateGuard};
use crate::config::RetryPolicy;
use crate::error::Error;
use crate::geo::Coordinates;
use crate::retry::with_backoff;

/// Service-request workflow on top of a [`RequestStore`]
pub struct RequestService<S: RequestStore> {
    store: Arc<S>,
    retry: RetryPolicy,
}

impl<S: RequestStore> Clone for RequestService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            retry: self.retry.clone(),
        }
    }
}

impl<S: RequestStore> RequestService<S> {
    pub fn new(store: S, retry: RetryPolicy) -> Self {
        Self::from_shared(Arc::new(store), retry)
    }

    pub fn from_shared(store: Arc<S>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Send a new request. Inserts are not retried.
    pub async fn create(&self, request: NewRequest) -> Result<ServiceRequest, Error> {
        request.validate()?;
        let created = self.store.insert(request.to_row()).await?;
        info!(
            "request {} created by customer {}",
            created.id, created.customer_id
        );
        Ok(created)
    }

    pub async fn get(&self, id: &RequestId) -> Result<ServiceRequest, Error> {
        self.find(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("request {}", id)))
    }

    async fn find(&self, id: &RequestId) -> Result<Option<ServiceRequest>, Error> {
        with_backoff(&self.retry, "fetch request", || self.store.fetch(id)).await
    }

    async fn list(&self, query: RequestQuery) -> Result<Vec<ServiceRequest>, Error> {
        with_backoff(&self.retry, "list requests", || self.store.list(&query)).await
    }

    /// Pending requests the mechanic may accept: unassigned ones and those
    /// sent to this mechanic. Newest first.
    pub async fn pending_for_mechanic(&self, mechanic_id: &str) -> Result<Vec<ServiceRequest>, Error> {
        self.list(RequestQuery {
            mechanic: MechanicGuard::UnassignedOr(mechanic_id.to_string()),
            statuses: vec![RequestStatus::Pending],
            newest_first: true,
            ..RequestQuery::default()
        })
        .await
    }

    /// All of a customer's requests, newest first
    pub async fn for_customer(&self, customer_id: &str) -> Result<Vec<ServiceRequest>, Error> {
        self.list(RequestQuery {
            customer_id: Some(customer_id.to_string()),
            newest_first: true,
            ..RequestQuery::default()
        })
        .await
    }

    /// Every request assigned to the mechanic, newest first
    pub async fn for_mechanic(&self, mechanic_id: &str) -> Result<Vec<ServiceRequest>, Error> {
        self.list(RequestQuery {
            mechanic: MechanicGuard::Is(mechanic_id.to_string()),
            newest_first: true,
            ..RequestQuery::default()
        })
        .await
    }

    /// The mechanic's accepted or arrived job, if any
    pub async fn active_for_mechanic(&self, mechanic_id: &str) -> Result<Option<ServiceRequest>, Error> {
        let active = self
            .list(RequestQuery {
                mechanic: MechanicGuard::Is(mechanic_id.to_string()),
                statuses: vec![RequestStatus::Accepted, RequestStatus::Arrived],
                newest_first: true,
                limit: Some(2),
                ..RequestQuery::default()
            })
            .await?;
        if active.len() > 1 {
            warn!(
                "mechanic {} has more than one active request; using {}",
                mechanic_id, active[0].id
            );
        }
        Ok(active.into_iter().next())
    }

    /// Take a pending request. Attaches the mechanic, and their position
    /// when known, in the same write as the status change.
    pub async fn accept(
        &self,
        id: &RequestId,
        mechanic_id: &str,
        location: Option<Coordinates>,
    ) -> Result<ServiceRequest, Error> {
        if let Some(location) = location {
            location.validate()?;
        }
        let current = self.get(id).await?;
        current.status.check_transition(RequestStatus::Accepted)?;
        check_target(&current, mechanic_id)?;

        if let Some(active) = self.active_for_mechanic(mechanic_id).await? {
            if active.id != *id {
                return Err(Error::MechanicBusy {
                    mechanic_id: mechanic_id.to_string(),
                    active_request_id: active.id.to_string(),
                });
            }
        }

        let mut patch = RequestPatch::transition(RequestStatus::Accepted, Utc::now())
            .with_mechanic(mechanic_id);
        if let Some(location) = location {
            patch = patch.with_mechanic_location(location);
        }
        let guard = UpdateGuard::status(RequestStatus::Pending)
            .with_mechanic(MechanicGuard::UnassignedOr(mechanic_id.to_string()))
            .sole_active_for(mechanic_id);

        let accepted = self
            .transition(id, mechanic_id, RequestStatus::Accepted, guard, patch)
            .await?;
        info!("request {} accepted by mechanic {}", id, mechanic_id);
        Ok(accepted)
    }

    /// Turn down a pending request sent to this mechanic. Open requests
    /// stay available to everyone else, so only their target may decline.
    pub async fn decline(&self, id: &RequestId, mechanic_id: &str) -> Result<ServiceRequest, Error> {
        let current = self.get(id).await?;
        current.status.check_transition(RequestStatus::Declined)?;
        if !current.is_assigned_to(mechanic_id) {
            return Err(not_assigned(&current, mechanic_id));
        }

        let patch = RequestPatch::transition(RequestStatus::Declined, Utc::now());
        let guard = UpdateGuard::status(RequestStatus::Pending)
            .with_mechanic(MechanicGuard::Is(mechanic_id.to_string()));

        let declined = self
            .transition(id, mechanic_id, RequestStatus::Declined, guard, patch)
            .await?;
        info!("request {} declined by mechanic {}", id, mechanic_id);
        Ok(declined)
    }

    pub async fn mark_arrived(&self, id: &RequestId, mechanic_id: &str) -> Result<ServiceRequest, Error> {
        let arrived = self
            .advance(id, mechanic_id, RequestStatus::Arrived)
            .await?;
        info!("mechanic {} arrived for request {}", mechanic_id, id);
        Ok(arrived)
    }

    /// Finish the job, from `arrived` or straight from `accepted`
    pub async fn complete(&self, id: &RequestId, mechanic_id: &str) -> Result<ServiceRequest, Error> {
        let completed = self
            .advance(id, mechanic_id, RequestStatus::Completed)
            .await?;
        info!("request {} completed by mechanic {}", id, mechanic_id);
        Ok(completed)
    }

    /// Publish the assigned mechanic's position on an active request
    pub async fn update_mechanic_location(
        &self,
        id: &RequestId,
        mechanic_id: &str,
        location: Coordinates,
    ) -> Result<ServiceRequest, Error> {
        location.validate()?;
        let patch = RequestPatch::default().with_mechanic_location(location);
        let guard = UpdateGuard::statuses(&[RequestStatus::Accepted, RequestStatus::Arrived])
            .with_mechanic(MechanicGuard::Is(mechanic_id.to_string()));

        let updated = with_backoff(&self.retry, "update mechanic location", || {
            self.store.update_guarded(id, &guard, &patch)
        })
        .await?;

        match updated {
            Some(request) => {
                debug!("request {} mechanic position updated", id);
                Ok(request)
            }
            None => {
                let current = self.get(id).await?;
                if !current.is_assigned_to(mechanic_id) {
                    Err(not_assigned(&current, mechanic_id))
                } else {
                    Err(Error::validation(format!(
                        "request {} is {}, not active",
                        id, current.status
                    )))
                }
            }
        }
    }

    /// Move an assigned request forward by its own mechanic
    async fn advance(
        &self,
        id: &RequestId,
        mechanic_id: &str,
        target: RequestStatus,
    ) -> Result<ServiceRequest, Error> {
        let current = self.get(id).await?;
        current.status.check_transition(target)?;
        if !current.is_assigned_to(mechanic_id) {
            return Err(not_assigned(&current, mechanic_id));
        }

        let patch = RequestPatch::transition(target, Utc::now());
        let guard = UpdateGuard::statuses(&[current.status])
            .with_mechanic(MechanicGuard::Is(mechanic_id.to_string()));
        self.transition(id, mechanic_id, target, guard, patch).await
    }

    /// Run the guarded write; when it matches nothing, re-read the row to
    /// say why.
    async fn transition(
        &self,
        id: &RequestId,
        mechanic_id: &str,
        target: RequestStatus,
        guard: UpdateGuard,
        patch: RequestPatch,
    ) -> Result<ServiceRequest, Error> {
        let label = format!("move request to {}", target);
        let updated = with_backoff(&self.retry, &label, || {
            self.store.update_guarded(id, &guard, &patch)
        })
        .await?;
        if let Some(request) = updated {
            return Ok(request);
        }

        let current = self.get(id).await?;
        // A retried write may have landed on an earlier attempt.
        if current.status == target && current.is_assigned_to(mechanic_id) {
            debug!("request {} already {} by {}", id, target, mechanic_id);
            return Ok(current);
        }
        Err(explain_conflict(&current, mechanic_id, target))
    }
}

fn not_assigned(request: &ServiceRequest, mechanic_id: &str) -> Error {
    Error::NotAssigned {
        request_id: request.id.to_string(),
        mechanic_id: mechanic_id.to_string(),
    }
}

/// A request sent to one mechanic can only be answered by that mechanic
fn check_target(request: &ServiceRequest, mechanic_id: &str) -> Result<(), Error> {
    match &request.mechanic_id {
        Some(assigned) if assigned != mechanic_id => Err(not_assigned(request, mechanic_id)),
        _ => Ok(()),
    }
}

fn explain_conflict(current: &ServiceRequest, mechanic_id: &str, target: RequestStatus) -> Error {
    if target == RequestStatus::Accepted
        && current.status.is_active()
        && !current.is_assigned_to(mechanic_id)
    {
        return Error::AlreadyTaken(current.id.to_string());
    }
    if current.mechanic_id.is_some() && !current.is_assigned_to(mechanic_id) {
        return not_assigned(current, mechanic_id);
    }
    Error::InvalidTransition {
        from: current.status,
        to: target,
    }
}
