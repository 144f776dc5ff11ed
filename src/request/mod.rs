//! Service requests: data model, status workflow and lifecycle service

mod memory;
mod model;
mod service;
mod status;
mod store;

pub use memory::MemoryRequestStore;
pub(crate) use model::lenient_time_opt;
pub use model::{NewRequest, NewRequestRow, RequestId, RequestPatch, ServiceRequest};
pub use service::RequestService;
pub use status::RequestStatus;
pub use store::{MechanicGuard, PostgrestRequestStore, RequestQuery, RequestStore, UpdateGuard};
