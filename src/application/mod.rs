pub mod aggregation;
pub mod events;
pub mod network;
pub mod reports;
pub mod roaming;

// Re-export key types for convenience
pub use aggregation::{default_aggregator, majority, AggregationFn, AggregationTree};
pub use events::{
    create_event_bus, Event, EventBus, EventSubscriber, SharedEventBus, StatusEventForwarder,
};
pub use network::{ChargingNetwork, SharedChargingNetwork};
pub use reports::{
    generate_admin_status_report, generate_status_report, ReportChannel, StatusReport,
    StatusReportEntry,
};
pub use roaming::{
    create_affinity_router, AffinityRouter, AuthorizationResult, AuthorizationStatus,
    AuthorizeStartRequest, AuthorizeStopRequest, BackendId, ChargeDetailRecord, LocalBackend,
    RoamingBackend, RouterSettings, SessionId, SharedAffinityRouter, SharedBackend,
};
