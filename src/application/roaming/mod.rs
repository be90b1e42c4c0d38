//! Roaming: routing authorization and charge detail records to external
//! backends with session affinity

pub mod affinity;
pub mod backend;
pub mod local;
pub mod router;

pub use affinity::{AffinityCache, DEFAULT_AFFINITY_CAPACITY};
pub use backend::{
    AuthorizationResult, AuthorizationStatus, AuthorizeStartRequest, AuthorizeStopRequest,
    BackendId, ChargeDetailRecord, RoamingBackend, SessionId, SharedBackend,
};
pub use local::LocalBackend;
pub use router::{
    create_affinity_router, AffinityRouter, RouterSettings, SharedAffinityRouter,
    DEFAULT_REQUEST_TIMEOUT,
};
