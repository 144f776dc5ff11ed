//! Request status workflow

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Where a service request is in its lifecycle.
///
/// ```text
/// pending ──► accepted ──► arrived ──► completed
///    │            └───────────────────────▲
///    └──► declined
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Arrived,
    Completed,
    /// Also read from the legacy spelling `rejected`
    #[serde(alias = "rejected")]
    Declined,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 5] = [
        RequestStatus::Pending,
        RequestStatus::Accepted,
        RequestStatus::Arrived,
        RequestStatus::Completed,
        RequestStatus::Declined,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Arrived => "arrived",
            RequestStatus::Completed => "completed",
            RequestStatus::Declined => "declined",
        }
    }

    /// Statuses reachable in one step
    pub fn allowed_transitions(&self) -> &'static [RequestStatus] {
        match self {
            RequestStatus::Pending => &[RequestStatus::Accepted, RequestStatus::Declined],
            RequestStatus::Accepted => &[RequestStatus::Arrived, RequestStatus::Completed],
            RequestStatus::Arrived => &[RequestStatus::Completed],
            RequestStatus::Completed | RequestStatus::Declined => &[],
        }
    }

    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    /// `Ok` when `next` is reachable in one step
    pub fn check_transition(&self, next: RequestStatus) -> Result<(), Error> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                from: *self,
                to: next,
            })
        }
    }

    /// No further transitions exist
    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }

    /// A mechanic is assigned and the job is not finished
    pub fn is_active(&self) -> bool {
        matches!(self, RequestStatus::Accepted | RequestStatus::Arrived)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(RequestStatus::Pending),
            "accepted" => Ok(RequestStatus::Accepted),
            "arrived" => Ok(RequestStatus::Arrived),
            "completed" => Ok(RequestStatus::Completed),
            "declined" | "rejected" => Ok(RequestStatus::Declined),
            other => Err(Error::validation(format!("unknown request status: {}", other))),
        }
    }
}
