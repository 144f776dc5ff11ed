//! Persistence seam for service requests

use async_trait::async_trait;
use tracing::warn;

use super::model::{NewRequestRow, RequestId, RequestPatch, ServiceRequest};
use super::status::RequestStatus;
use crate::error::Error;
use crate::postgrest::{FilterOperator, TableClient};

/// Constraint on the `mechanic_id` column
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MechanicGuard {
    #[default]
    Any,
    Unassigned,
    /// Unassigned, or assigned to this mechanic
    UnassignedOr(String),
    Is(String),
}

impl MechanicGuard {
    pub fn matches(&self, mechanic_id: Option<&str>) -> bool {
        match self {
            MechanicGuard::Any => true,
            MechanicGuard::Unassigned => mechanic_id.is_none(),
            MechanicGuard::UnassignedOr(id) => mechanic_id.map_or(true, |m| m == id),
            MechanicGuard::Is(id) => mechanic_id == Some(id.as_str()),
        }
    }
}

/// Conditions a row must still meet for an update to apply. The store
/// checks them in the same statement as the write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateGuard {
    pub statuses: Vec<RequestStatus>,
    pub mechanic: MechanicGuard,
    /// No other request may be active for this mechanic once the write
    /// lands. A violation is [`Error::MechanicBusy`].
    pub sole_active_for: Option<String>,
}

impl UpdateGuard {
    pub fn status(status: RequestStatus) -> Self {
        Self {
            statuses: vec![status],
            mechanic: MechanicGuard::Any,
            sole_active_for: None,
        }
    }

    pub fn statuses(statuses: &[RequestStatus]) -> Self {
        Self {
            statuses: statuses.to_vec(),
            mechanic: MechanicGuard::Any,
            sole_active_for: None,
        }
    }

    pub fn with_mechanic(mut self, mechanic: MechanicGuard) -> Self {
        self.mechanic = mechanic;
        self
    }

    pub fn sole_active_for(mut self, mechanic_id: &str) -> Self {
        self.sole_active_for = Some(mechanic_id.to_string());
        self
    }

    pub fn matches(&self, request: &ServiceRequest) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&request.status))
            && self.mechanic.matches(request.mechanic_id.as_deref())
    }
}

/// Listing criteria
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestQuery {
    pub customer_id: Option<String>,
    pub mechanic: MechanicGuard,
    /// Empty means any status
    pub statuses: Vec<RequestStatus>,
    pub newest_first: bool,
    pub limit: Option<usize>,
}

impl RequestQuery {
    pub fn matches(&self, request: &ServiceRequest) -> bool {
        self.customer_id
            .as_deref()
            .map_or(true, |id| request.customer_id == id)
            && self.mechanic.matches(request.mechanic_id.as_deref())
            && (self.statuses.is_empty() || self.statuses.contains(&request.status))
    }
}

/// Storage for the `requests` table
#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn insert(&self, row: NewRequestRow) -> Result<ServiceRequest, Error>;

    async fn fetch(&self, id: &RequestId) -> Result<Option<ServiceRequest>, Error>;

    async fn list(&self, query: &RequestQuery) -> Result<Vec<ServiceRequest>, Error>;

    /// Apply `patch` only if the row still satisfies `guard`. `None` means
    /// no row matched.
    async fn update_guarded(
        &self,
        id: &RequestId,
        guard: &UpdateGuard,
        patch: &RequestPatch,
    ) -> Result<Option<ServiceRequest>, Error>;
}

/// [`RequestStore`] backed by PostgREST
pub struct PostgrestRequestStore {
    table: TableClient,
}

impl PostgrestRequestStore {
    pub fn new(table: TableClient) -> Self {
        Self { table }
    }
}

fn status_names(statuses: &[RequestStatus]) -> Vec<&'static str> {
    statuses.iter().map(RequestStatus::as_str).collect()
}

const ACTIVE: [RequestStatus; 2] = [RequestStatus::Accepted, RequestStatus::Arrived];

/// Unique violation, raised by the partial index that allows one active
/// request per mechanic
fn is_unique_violation(err: &Error) -> bool {
    match err {
        Error::Api(api) => match api.code.as_deref() {
            Some(code) => code == "23505",
            None => api.status == 409,
        },
        _ => false,
    }
}

impl PostgrestRequestStore {
    /// Turn a unique violation on a guarded write into `MechanicBusy`,
    /// naming the request that holds the mechanic when it can be found
    async fn busy_error(&self, id: &RequestId, mechanic_id: &str) -> Error {
        let mut select = self.table.select("id");
        select
            .eq("mechanic_id", mechanic_id)
            .in_list("status", &status_names(&ACTIVE))
            .neq("id", id);
        let holder: Result<Option<IdRow>, Error> = select.execute_one().await;
        let active_request_id = match holder {
            Ok(Some(row)) => row.id.to_string(),
            Ok(None) => "unknown".to_string(),
            Err(e) => {
                warn!("could not look up active request for {}: {}", mechanic_id, e);
                "unknown".to_string()
            }
        };
        Error::MechanicBusy {
            mechanic_id: mechanic_id.to_string(),
            active_request_id,
        }
    }
}

#[derive(serde::Deserialize)]
struct IdRow {
    id: RequestId,
}

#[async_trait]
impl RequestStore for PostgrestRequestStore {
    async fn insert(&self, row: NewRequestRow) -> Result<ServiceRequest, Error> {
        let rows: Vec<ServiceRequest> = self.table.insert(&row).execute().await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| Error::database("insert returned no row"))
    }

    async fn fetch(&self, id: &RequestId) -> Result<Option<ServiceRequest>, Error> {
        self.table.select("*").eq("id", id).execute_one().await
    }

    async fn list(&self, query: &RequestQuery) -> Result<Vec<ServiceRequest>, Error> {
        let mut select = self.table.select("*");
        if let Some(customer_id) = &query.customer_id {
            select.eq("customer_id", customer_id);
        }
        match &query.mechanic {
            MechanicGuard::Any => {}
            MechanicGuard::Unassigned => {
                select.is_null("mechanic_id");
            }
            MechanicGuard::UnassignedOr(id) => {
                select.or(&[
                    ("mechanic_id", FilterOperator::Is, "null"),
                    ("mechanic_id", FilterOperator::Eq, id.as_str()),
                ]);
            }
            MechanicGuard::Is(id) => {
                select.eq("mechanic_id", id);
            }
        }
        if !query.statuses.is_empty() {
            select.in_list("status", &status_names(&query.statuses));
        }
        select.order("created_at", !query.newest_first);
        if let Some(limit) = query.limit {
            select.limit(limit);
        }
        select.execute().await
    }

    async fn update_guarded(
        &self,
        id: &RequestId,
        guard: &UpdateGuard,
        patch: &RequestPatch,
    ) -> Result<Option<ServiceRequest>, Error> {
        let mut update = self.table.update(patch);
        update.eq("id", id);
        if !guard.statuses.is_empty() {
            update.in_list("status", &status_names(&guard.statuses));
        }
        match &guard.mechanic {
            MechanicGuard::Any => {}
            MechanicGuard::Unassigned => {
                update.is_null("mechanic_id");
            }
            MechanicGuard::UnassignedOr(mechanic_id) => {
                update.or(&[
                    ("mechanic_id", FilterOperator::Is, "null"),
                    ("mechanic_id", FilterOperator::Eq, mechanic_id.as_str()),
                ]);
            }
            MechanicGuard::Is(mechanic_id) => {
                update.eq("mechanic_id", mechanic_id);
            }
        }
        let rows: Vec<ServiceRequest> = match update.execute().await {
            Ok(rows) => rows,
            Err(e) => match &guard.sole_active_for {
                Some(mechanic_id) if is_unique_violation(&e) => {
                    return Err(self.busy_error(id, mechanic_id).await);
                }
                _ => return Err(e),
            },
        };
        Ok(rows.into_iter().next())
    }
}
