//! Roaming backend contract
//!
//! A backend is an external system (roaming provider) the router delegates
//! authorize-start, authorize-stop and charge detail records to. The wire
//! protocol behind an implementation is not the router's concern.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::CommandResult;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendId(String);

impl BackendId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BackendId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Charging session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random session id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthorizationStatus {
    Authorized,
    Blocked,
    NotAuthorized,
    Timeout,
    Error,
}

impl AuthorizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authorized => "Authorized",
            Self::Blocked => "Blocked",
            Self::NotAuthorized => "NotAuthorized",
            Self::Timeout => "Timeout",
            Self::Error => "Error",
        }
    }

    /// Whether the answer ends the search over backends
    pub fn is_conclusive(&self) -> bool {
        matches!(self, Self::Authorized | Self::Blocked)
    }
}

impl std::fmt::Display for AuthorizationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answer to an authorize start or stop
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizationResult {
    pub status: AuthorizationStatus,
    /// Backend that produced the answer; `None` when synthesised by the router
    pub backend_id: Option<BackendId>,
    pub session_id: Option<SessionId>,
    pub description: Option<String>,
    pub runtime: Duration,
}

impl AuthorizationResult {
    fn of(status: AuthorizationStatus, backend_id: Option<BackendId>) -> Self {
        Self {
            status,
            backend_id,
            session_id: None,
            description: None,
            runtime: Duration::ZERO,
        }
    }

    pub fn authorized(backend_id: BackendId, session_id: Option<SessionId>) -> Self {
        Self {
            session_id,
            ..Self::of(AuthorizationStatus::Authorized, Some(backend_id))
        }
    }

    pub fn blocked(backend_id: BackendId, description: impl Into<String>) -> Self {
        Self::of(AuthorizationStatus::Blocked, Some(backend_id)).with_description(description)
    }

    pub fn not_authorized(backend_id: Option<BackendId>, description: impl Into<String>) -> Self {
        Self::of(AuthorizationStatus::NotAuthorized, backend_id).with_description(description)
    }

    pub fn timeout(backend_id: BackendId, elapsed: Duration) -> Self {
        Self {
            runtime: elapsed,
            ..Self::of(AuthorizationStatus::Timeout, Some(backend_id.clone()))
        }
        .with_description(format!(
            "Backend {} did not answer within {} ms",
            backend_id,
            elapsed.as_millis()
        ))
    }

    pub fn error(backend_id: BackendId, description: impl Into<String>) -> Self {
        Self::of(AuthorizationStatus::Error, Some(backend_id)).with_description(description)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_runtime(mut self, runtime: Duration) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn is_authorized(&self) -> bool {
        self.status == AuthorizationStatus::Authorized
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizeStartRequest {
    /// RFID uid, contract id or similar
    pub token: String,
    pub charge_point_id: Option<String>,
    /// Session id proposed by the caller; backends may assign their own
    pub session_id: Option<SessionId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizeStopRequest {
    pub session_id: SessionId,
    pub token: String,
    pub charge_point_id: Option<String>,
}

/// Final billing record of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeDetailRecord {
    pub session_id: SessionId,
    pub token: String,
    pub charge_point_id: String,
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
    pub energy_wh: u64,
}

#[async_trait]
pub trait RoamingBackend: Send + Sync {
    fn id(&self) -> &BackendId;

    async fn authorize_start(&self, request: &AuthorizeStartRequest) -> AuthorizationResult;

    async fn authorize_stop(&self, request: &AuthorizeStopRequest) -> AuthorizationResult;

    /// A `Success` result means the backend accepted the record.
    async fn send_charge_detail_record(&self, cdr: &ChargeDetailRecord) -> CommandResult<SessionId>;
}

pub type SharedBackend = Arc<dyn RoamingBackend>;
