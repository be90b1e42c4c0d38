//! Notification events
//!
//! Defines all event types that can be broadcasted to subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event types for notifications
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    EntityStatusChanged(StatusChangedEvent),
    EntityAdminStatusChanged(StatusChangedEvent),
    AuthorizationResult(AuthorizationEvent),
    ChargeDetailRecordSent(ChargeDetailRecordEvent),
}

impl Event {
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::EntityStatusChanged(_) => "entity_status_changed",
            Event::EntityAdminStatusChanged(_) => "entity_admin_status_changed",
            Event::AuthorizationResult(_) => "authorization_result",
            Event::ChargeDetailRecordSent(_) => "charge_detail_record_sent",
        }
    }

    pub fn entity_id(&self) -> Option<&str> {
        match self {
            Event::EntityStatusChanged(e) => Some(&e.entity_id),
            Event::EntityAdminStatusChanged(e) => Some(&e.entity_id),
            Event::AuthorizationResult(e) => e.charge_point_id.as_deref(),
            Event::ChargeDetailRecordSent(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChangedEvent {
    pub entity_id: String,
    pub entity_kind: String,
    pub old_status: String,
    pub new_status: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationEvent {
    /// "authorize_start" or "authorize_stop"
    pub operation: String,
    pub charge_point_id: Option<String>,
    pub session_id: Option<String>,
    pub backend_id: Option<String>,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeDetailRecordEvent {
    pub session_id: String,
    pub backend_id: Option<String>,
    pub result: String,
    pub timestamp: DateTime<Utc>,
}

/// Wrapper for sending events with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: Event,
}

impl EventMessage {
    pub fn new(event: Event) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event,
        }
    }
}
