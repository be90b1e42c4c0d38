//! Affinity router
//!
//! Delegates authorization and charge detail records to an ordered set of
//! roaming backends.
//!
//! ```text
//!  AuthorizeStart ──► B(prio 1) ──► B(prio 2) ──► ... first Authorized/Blocked wins
//!                         │
//!                    Authorized ──► affinity[session] = backend
//!
//!  AuthorizeStop / CDR ──► affinity[session] ──► remaining backends by priority
//! ```
//!
//! Backends are asked one at a time. A backend that does not answer within
//! the request timeout ends the request with `Timeout`; later backends are not asked.
//! The router lock only guards bookkeeping and is never held across a
//! backend call.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::application::events::{
    AuthorizationEvent, ChargeDetailRecordEvent, Event, SharedEventBus,
};
use crate::domain::{CommandResult, ResultKind};
use crate::shared::SharedClock;

use super::affinity::{AffinityCache, DEFAULT_AFFINITY_CAPACITY};
use super::backend::{
    AuthorizationResult, AuthorizeStartRequest, AuthorizeStopRequest,
    BackendId, ChargeDetailRecord, SessionId, SharedBackend,
};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const OP_START: &str = "authorize_start";
const OP_STOP: &str = "authorize_stop";
const OP_CDR: &str = "send_charge_detail_record";

#[derive(Debug, Clone)]
pub struct RouterSettings {
    /// Upper bound for a single backend call
    pub request_timeout: Duration,
    /// `None` keeps affinity entries until evicted or cleared
    pub affinity_ttl: Option<chrono::Duration>,
    pub affinity_capacity: usize,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            affinity_ttl: Some(chrono::Duration::hours(24)),
            affinity_capacity: DEFAULT_AFFINITY_CAPACITY,
        }
    }
}

struct RouterState {
    /// priority → backend, lower is asked first
    backends: BTreeMap<u32, SharedBackend>,
    affinity: AffinityCache,
}

enum Reply<T> {
    Answered(T),
    TimedOut(Duration),
}

pub struct AffinityRouter {
    state: Mutex<RouterState>,
    request_timeout: Duration,
    clock: SharedClock,
    event_bus: Option<SharedEventBus>,
}

impl AffinityRouter {
    /// Router with no backends registered.
    pub fn new(settings: RouterSettings, clock: SharedClock) -> Self {
        Self {
            state: Mutex::new(RouterState {
                backends: BTreeMap::new(),
                affinity: AffinityCache::new(settings.affinity_ttl, settings.affinity_capacity),
            }),
            request_timeout: settings.request_timeout,
            clock,
            event_bus: None,
        }
    }

    /// Publish authorization and charge detail record outcomes on `bus`.
    pub fn with_event_bus(mut self, bus: SharedEventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    // ── Backend registry ───────────────────────────────────────

    /// Returns false if the priority or the backend id is already taken.
    pub fn register_backend(&self, priority: u32, backend: SharedBackend) -> bool {
        let mut state = self.state.lock();
        if state.backends.contains_key(&priority)
            || state.backends.values().any(|b| b.id() == backend.id())
        {
            warn!(backend_id = %backend.id(), priority, "Backend registration rejected");
            return false;
        }
        info!(backend_id = %backend.id(), priority, "Roaming backend registered");
        state.backends.insert(priority, backend);
        true
    }

    /// Remove a backend together with its affinity entries.
    pub fn unregister_backend(&self, backend_id: &BackendId) -> bool {
        let mut state = self.state.lock();
        let priority = state
            .backends
            .iter()
            .find(|(_, b)| b.id() == backend_id)
            .map(|(priority, _)| *priority);
        let Some(priority) = priority else {
            return false;
        };
        state.backends.remove(&priority);
        let dropped = state.affinity.remove_backend(backend_id);
        info!(%backend_id, dropped_sessions = dropped, "Roaming backend unregistered");
        true
    }

    /// Registered backends in the order they are asked.
    pub fn backends(&self) -> Vec<(u32, BackendId)> {
        self.state
            .lock()
            .backends
            .iter()
            .map(|(priority, b)| (*priority, b.id().clone()))
            .collect()
    }

    /// Backend the session is pinned to, if the entry is still live.
    pub fn cached_backend(&self, session_id: &SessionId) -> Option<BackendId> {
        let now = self.clock.now();
        self.state.lock().affinity.get(session_id, now)
    }

    /// Number of affinity entries, expired ones included until evicted.
    pub fn affinity_len(&self) -> usize {
        self.state.lock().affinity.len()
    }

    // ── Operations ─────────────────────────────────────────────

    /// Ask the backends in priority order until one answers `Authorized` or
    /// `Blocked`. An authorizing backend becomes the session's affinity entry.
    pub async fn authorize_start(&self, request: &AuthorizeStartRequest) -> AuthorizationResult {
        let started = Instant::now();
        let charge_point_id = request.charge_point_id.as_deref();

        for backend in self.ordered_backends() {
            let result = match self
                .call_backend(&backend, OP_START, backend.authorize_start(request))
                .await
            {
                Reply::Answered(result) => result,
                Reply::TimedOut(elapsed) => {
                    let result = AuthorizationResult::timeout(backend.id().clone(), elapsed);
                    return self.finish_authorization(OP_START, charge_point_id, result, started);
                }
            };

            if !result.status.is_conclusive() {
                debug!(backend_id = %backend.id(), status = %result.status, "Inconclusive answer, asking next backend");
                continue;
            }

            let result = if result.is_authorized() {
                let session_id = result
                    .session_id
                    .clone()
                    .or_else(|| request.session_id.clone())
                    .unwrap_or_else(SessionId::generate);
                self.remember(session_id.clone(), backend.id().clone());
                result.with_session(session_id)
            } else {
                result
            };
            return self.finish_authorization(OP_START, charge_point_id, result, started);
        }

        let result = AuthorizationResult::not_authorized(None, "No roaming backend authorized the request");
        self.finish_authorization(OP_START, charge_point_id, result, started)
    }

    /// The backend that authorized the session is asked first. An
    /// inconclusive answer from it falls back to the other backends by
    /// priority.
    ///
    /// A backend that authorizes the stop replaces the session's affinity
    /// entry, so a later charge detail record goes to that backend first
    /// even when it is not the one that authorized the start.
    pub async fn authorize_stop(&self, request: &AuthorizeStopRequest) -> AuthorizationResult {
        let started = Instant::now();
        let charge_point_id = request.charge_point_id.as_deref();
        let (candidates, cached) = self.candidates(&request.session_id);

        for backend in candidates {
            let result = match self
                .call_backend(&backend, OP_STOP, backend.authorize_stop(request))
                .await
            {
                Reply::Answered(result) => result,
                Reply::TimedOut(elapsed) => {
                    let result = AuthorizationResult::timeout(backend.id().clone(), elapsed)
                        .with_session(request.session_id.clone());
                    return self.finish_authorization(OP_STOP, charge_point_id, result, started);
                }
            };

            if !result.status.is_conclusive() {
                if cached.as_ref() == Some(backend.id()) {
                    debug!(
                        session_id = %request.session_id,
                        backend_id = %backend.id(),
                        status = %result.status,
                        "Stale affinity, falling back to priority order"
                    );
                }
                continue;
            }

            let result = if result.is_authorized() {
                // re-point the session at whichever backend authorized the stop
                self.remember(request.session_id.clone(), backend.id().clone());
                result.with_session(request.session_id.clone())
            } else {
                result
            };
            return self.finish_authorization(OP_STOP, charge_point_id, result, started);
        }

        let result = AuthorizationResult::not_authorized(None, "No roaming backend authorized the stop")
            .with_session(request.session_id.clone());
        self.finish_authorization(OP_STOP, charge_point_id, result, started)
    }

    /// Deliver a charge detail record. The first backend to accept it wins.
    /// The session's affinity entry is cleared only when the cached backend
    /// accepted; a fallback acceptance leaves it in place.
    pub async fn send_charge_detail_record(&self, cdr: &ChargeDetailRecord) -> CommandResult<SessionId> {
        let started = Instant::now();
        let (candidates, cached) = self.candidates(&cdr.session_id);

        if candidates.is_empty() {
            let result = CommandResult::no_operation(cdr.session_id.clone())
                .with_description("No roaming backend registered");
            return self.finish_charge_detail_record(cdr, None, result, started);
        }

        let mut attempts = Vec::new();
        for backend in candidates {
            match self
                .call_backend(&backend, OP_CDR, backend.send_charge_detail_record(cdr))
                .await
            {
                Reply::TimedOut(elapsed) => {
                    let result = CommandResult::timeout(cdr.session_id.clone(), elapsed);
                    return self.finish_charge_detail_record(cdr, Some(backend.id()), result, started);
                }
                Reply::Answered(result) if result.kind() == ResultKind::Success => {
                    if cached.as_ref() == Some(backend.id()) {
                        self.forget(&cdr.session_id);
                    }
                    return self.finish_charge_detail_record(cdr, Some(backend.id()), result, started);
                }
                Reply::Answered(result) => {
                    let attempt = match result.description() {
                        Some(description) => format!("{}: {} ({})", backend.id(), result.kind(), description),
                        None => format!("{}: {}", backend.id(), result.kind()),
                    };
                    debug!(session_id = %cdr.session_id, attempt = attempt.as_str(), "Charge detail record not accepted");
                    attempts.push(attempt);
                }
            }
        }

        let result = CommandResult::failed(
            cdr.session_id.clone(),
            "No roaming backend accepted the charge detail record",
        )
        .with_warnings(attempts);
        self.finish_charge_detail_record(cdr, None, result, started)
    }

    // ── Internals ──────────────────────────────────────────────

    fn ordered_backends(&self) -> Vec<SharedBackend> {
        self.state.lock().backends.values().cloned().collect()
    }

    /// Cached backend first (if still registered), then everything else by
    /// priority.
    fn candidates(&self, session_id: &SessionId) -> (Vec<SharedBackend>, Option<BackendId>) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let cached_id = state.affinity.get(session_id, now);
        let cached = cached_id
            .as_ref()
            .and_then(|id| state.backends.values().find(|b| b.id() == id).cloned());

        match (&cached_id, &cached) {
            (Some(_), Some(_)) => metrics::counter!("roaming_affinity_lookups_total", "result" => "hit").increment(1),
            (Some(_), None) => {
                state.affinity.remove(session_id);
                metrics::counter!("roaming_affinity_lookups_total", "result" => "stale").increment(1);
            }
            (None, _) => metrics::counter!("roaming_affinity_lookups_total", "result" => "miss").increment(1),
        }

        let cached_id = cached.as_ref().map(|b| b.id().clone());
        let mut candidates: Vec<SharedBackend> = cached.into_iter().collect();
        candidates.extend(
            state
                .backends
                .values()
                .filter(|b| cached_id.as_ref() != Some(b.id()))
                .cloned(),
        );
        (candidates, cached_id)
    }

    fn remember(&self, session_id: SessionId, backend_id: BackendId) {
        let now = self.clock.now();
        self.state.lock().affinity.insert(session_id, backend_id, now);
    }

    fn forget(&self, session_id: &SessionId) {
        self.state.lock().affinity.remove(session_id);
    }

    async fn call_backend<T, F>(&self, backend: &SharedBackend, operation: &'static str, call: F) -> Reply<T>
    where
        F: Future<Output = T>,
    {
        let started = Instant::now();
        let outcome = timeout(self.request_timeout, call).await;
        let elapsed = started.elapsed();
        metrics::histogram!("roaming_request_latency_seconds", "operation" => operation)
            .record(elapsed.as_secs_f64());

        match outcome {
            Ok(answer) => Reply::Answered(answer),
            Err(_) => {
                warn!(
                    backend_id = %backend.id(),
                    operation,
                    timeout_ms = self.request_timeout.as_millis() as u64,
                    "Roaming backend timed out"
                );
                metrics::counter!("roaming_request_timeouts_total", "operation" => operation).increment(1);
                Reply::TimedOut(elapsed)
            }
        }
    }

    fn finish_authorization(
        &self,
        operation: &'static str,
        charge_point_id: Option<&str>,
        result: AuthorizationResult,
        started: Instant,
    ) -> AuthorizationResult {
        let result = result.with_runtime(started.elapsed());
        let status = result.status.as_str();
        metrics::counter!("roaming_authorizations_total", "operation" => operation, "status" => status)
            .increment(1);
        info!(
            operation,
            ?charge_point_id,
            status,
            backend_id = ?result.backend_id.as_ref().map(BackendId::as_str),
            session_id = ?result.session_id.as_ref().map(SessionId::as_str),
            runtime_ms = result.runtime.as_millis() as u64,
            "Authorization routed"
        );

        if let Some(bus) = &self.event_bus {
            bus.publish(Event::AuthorizationResult(AuthorizationEvent {
                operation: operation.to_string(),
                charge_point_id: charge_point_id.map(String::from),
                session_id: result.session_id.as_ref().map(ToString::to_string),
                backend_id: result.backend_id.as_ref().map(ToString::to_string),
                status: status.to_string(),
                timestamp: self.clock.now(),
            }));
        }
        result
    }

    fn finish_charge_detail_record(
        &self,
        cdr: &ChargeDetailRecord,
        backend_id: Option<&BackendId>,
        result: CommandResult<SessionId>,
        started: Instant,
    ) -> CommandResult<SessionId> {
        let result = result.with_runtime(started.elapsed());
        let kind = result.kind().as_str();
        metrics::counter!("roaming_charge_detail_records_total", "result" => kind).increment(1);
        info!(
            session_id = %cdr.session_id,
            charge_point_id = cdr.charge_point_id.as_str(),
            backend_id = ?backend_id.map(BackendId::as_str),
            result = kind,
            "Charge detail record routed"
        );

        if let Some(bus) = &self.event_bus {
            bus.publish(Event::ChargeDetailRecordSent(ChargeDetailRecordEvent {
                session_id: cdr.session_id.to_string(),
                backend_id: backend_id.map(ToString::to_string),
                result: kind.to_string(),
                timestamp: self.clock.now(),
            }));
        }
        result
    }
}

/// Shared router type
pub type SharedAffinityRouter = Arc<AffinityRouter>;

/// Create a new shared router
pub fn create_affinity_router(settings: RouterSettings, clock: SharedClock) -> SharedAffinityRouter {
    Arc::new(AffinityRouter::new(settings, clock))
}
