//! In-memory roaming backend
//!
//! Decides from local token lists. Used by the demo binary and the router
//! tests; an optional latency simulates a slow remote system.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use tracing::debug;

use crate::domain::CommandResult;

use super::backend::{
    AuthorizationResult, AuthorizeStartRequest, AuthorizeStopRequest, BackendId,
    ChargeDetailRecord, RoamingBackend, SessionId,
};

pub struct LocalBackend {
    id: BackendId,
    accepted: DashSet<String>,
    blocked: DashSet<String>,
    /// session → token
    sessions: DashMap<SessionId, String>,
    records: Mutex<Vec<ChargeDetailRecord>>,
    latency: Duration,
    online: AtomicBool,
    calls: AtomicUsize,
}

impl LocalBackend {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: BackendId::new(id),
            accepted: DashSet::new(),
            blocked: DashSet::new(),
            sessions: DashMap::new(),
            records: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
            online: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn accept_token(&self, token: impl Into<String>) {
        let token = token.into();
        self.blocked.remove(&token);
        self.accepted.insert(token);
    }

    pub fn block_token(&self, token: impl Into<String>) {
        let token = token.into();
        self.accepted.remove(&token);
        self.blocked.insert(token);
    }

    /// While offline every request is answered with an error.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn has_session(&self, session_id: &SessionId) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Number of requests received, including ones answered while offline.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn charge_detail_records(&self) -> Vec<ChargeDetailRecord> {
        self.records.lock().clone()
    }

    async fn enter(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.online.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RoamingBackend for LocalBackend {
    fn id(&self) -> &BackendId {
        &self.id
    }

    async fn authorize_start(&self, request: &AuthorizeStartRequest) -> AuthorizationResult {
        if !self.enter().await {
            return AuthorizationResult::error(self.id.clone(), "Backend offline");
        }
        if self.blocked.contains(&request.token) {
            return AuthorizationResult::blocked(self.id.clone(), "Token blocked");
        }
        if !self.accepted.contains(&request.token) {
            return AuthorizationResult::not_authorized(Some(self.id.clone()), "Unknown token");
        }

        let session_id = request.session_id.clone().unwrap_or_else(SessionId::generate);
        self.sessions.insert(session_id.clone(), request.token.clone());
        debug!(backend_id = %self.id, %session_id, "Local start authorized");
        AuthorizationResult::authorized(self.id.clone(), Some(session_id))
    }

    async fn authorize_stop(&self, request: &AuthorizeStopRequest) -> AuthorizationResult {
        if !self.enter().await {
            return AuthorizationResult::error(self.id.clone(), "Backend offline");
        }
        if self.blocked.contains(&request.token) {
            return AuthorizationResult::blocked(self.id.clone(), "Token blocked");
        }
        let known = self
            .sessions
            .get(&request.session_id)
            .map_or(false, |token| *token == request.token);
        if known || self.accepted.contains(&request.token) {
            self.sessions
                .insert(request.session_id.clone(), request.token.clone());
            return AuthorizationResult::authorized(
                self.id.clone(),
                Some(request.session_id.clone()),
            );
        }
        AuthorizationResult::not_authorized(Some(self.id.clone()), "Unknown session")
    }

    async fn send_charge_detail_record(&self, cdr: &ChargeDetailRecord) -> CommandResult<SessionId> {
        if !self.enter().await {
            return CommandResult::error(cdr.session_id.clone(), "Backend offline");
        }
        if self.sessions.remove(&cdr.session_id).is_none() {
            return CommandResult::failed(cdr.session_id.clone(), "Unknown session");
        }
        self.records.lock().push(cdr.clone());
        CommandResult::success(cdr.session_id.clone())
    }
}
