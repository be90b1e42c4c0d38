//! Aggregation tree
//!
//! Keeps parent → children edges and, for every parent, one aggregator per
//! status channel. An aggregator subscribes to the matching channel of each
//! attached child and rewrites the parent's channel whenever the aggregate
//! changes.
//!
//! Locks are only ever taken upwards (child channel, then the parent's
//! aggregator, then the parent channel), which the acyclic edge set makes
//! deadlock free.

use std::collections::{BTreeMap, BTreeSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::functions::{default_aggregator, AggregationFn};
use crate::domain::{
    AdminStatus, ChargingStatus, EntityKey, ListenerId, SharedEntity, StatusChange, StatusChannel,
    StatusListener, StatusValue, WriteMode,
};
use crate::shared::{DomainError, DomainResult, SharedClock};

struct ChildLink<K, V> {
    channel: Arc<StatusChannel<K, V>>,
    listener: ListenerId,
}

/// Recomputes one channel of one parent
struct ChannelAggregator<K, V> {
    parent: Arc<StatusChannel<K, V>>,
    children: RwLock<BTreeMap<K, ChildLink<K, V>>>,
    function: RwLock<AggregationFn<K, V>>,
    turn: Mutex<()>,
}

impl<K: EntityKey, V: StatusValue> ChannelAggregator<K, V> {
    fn new(parent: Arc<StatusChannel<K, V>>) -> Self {
        Self {
            parent,
            children: RwLock::new(BTreeMap::new()),
            function: RwLock::new(default_aggregator()),
            turn: Mutex::new(()),
        }
    }

    fn add_child(self: &Arc<Self>, child_id: &K, channel: &Arc<StatusChannel<K, V>>) {
        let listener = channel.subscribe(Arc::new(AggregationListener {
            aggregator: Arc::downgrade(self),
        }));
        self.children.write().insert(
            child_id.clone(),
            ChildLink {
                channel: channel.clone(),
                listener,
            },
        );
    }

    fn remove_child(&self, child_id: &K) {
        if let Some(link) = self.children.write().remove(child_id) {
            link.channel.unsubscribe(link.listener);
        }
    }

    fn replace_function(&self, function: AggregationFn<K, V>) {
        *self.function.write() = function;
    }

    /// Recompute the aggregate and write it to the parent if it changed.
    ///
    /// On failure the parent keeps its previous value; the child write that
    /// triggered the recomputation is not undone.
    fn recompute(&self, timestamp: DateTime<Utc>) -> DomainResult<()> {
        let _turn = self.turn.lock();

        let statuses = self
            .children
            .read()
            .iter()
            .map(|(id, link)| Ok((id.clone(), link.channel.current_status()?.value)))
            .collect::<DomainResult<BTreeMap<K, V>>>()?;

        if statuses.is_empty() {
            return Ok(());
        }

        metrics::counter!("aggregation_recomputations_total", "channel" => self.parent.name())
            .increment(1);

        let function = self.function.read().clone();
        let aggregate = match catch_unwind(AssertUnwindSafe(|| function(&statuses))) {
            Ok(Ok(value)) => value,
            Ok(Err(reason)) => return Err(self.failure(reason)),
            Err(_) => return Err(self.failure("aggregation function panicked".to_string())),
        };

        let current = self.parent.current_status()?;
        if current.value == aggregate {
            return Ok(());
        }

        debug!(
            entity_id = %self.parent.entity_id(),
            channel = self.parent.name(),
            children = statuses.len(),
            old = %current.value,
            new = %aggregate,
            "Aggregate changed"
        );

        // never land behind the parent's head, or the new aggregate would be
        // recorded as history instead of becoming current
        let timestamp = timestamp.max(current.timestamp);
        self.parent.set_status_at(aggregate, timestamp, WriteMode::Replace)
    }

    fn failure(&self, reason: String) -> DomainError {
        metrics::counter!("aggregation_failures_total", "channel" => self.parent.name())
            .increment(1);
        warn!(
            entity_id = %self.parent.entity_id(),
            channel = self.parent.name(),
            reason = reason.as_str(),
            "Aggregation failed, keeping previous aggregate"
        );
        DomainError::aggregation(self.parent.entity_id(), reason)
    }
}

/// Registered on a child channel; holds its aggregator weakly so a dropped
/// tree does not keep parents alive through their children.
struct AggregationListener<K, V> {
    aggregator: Weak<ChannelAggregator<K, V>>,
}

impl<K: EntityKey, V: StatusValue> StatusListener<K, V> for AggregationListener<K, V> {
    fn on_status_changed(&self, change: &StatusChange<K, V>) -> DomainResult<()> {
        match self.aggregator.upgrade() {
            Some(aggregator) => aggregator.recompute(change.timestamp),
            None => Ok(()),
        }
    }
}

#[derive(Clone)]
struct ParentNode<K> {
    status: Arc<ChannelAggregator<K, ChargingStatus>>,
    admin_status: Arc<ChannelAggregator<K, AdminStatus>>,
}

impl<K: EntityKey> ParentNode<K> {
    fn new(parent: &SharedEntity<K>) -> Self {
        Self {
            status: Arc::new(ChannelAggregator::new(parent.status_channel().clone())),
            admin_status: Arc::new(ChannelAggregator::new(
                parent.admin_status_channel().clone(),
            )),
        }
    }

    /// Recompute both channels; both run even if the first fails.
    fn recompute(&self, timestamp: DateTime<Utc>) -> DomainResult<()> {
        let status = self.status.recompute(timestamp);
        let admin_status = self.admin_status.recompute(timestamp);
        status.and(admin_status)
    }
}

/// Parent → children edges with per-parent aggregation
pub struct AggregationTree<K: EntityKey> {
    nodes: DashMap<K, ParentNode<K>>,
    edges: Mutex<BTreeMap<K, BTreeSet<K>>>,
    clock: SharedClock,
}

impl<K: EntityKey> AggregationTree<K> {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            nodes: DashMap::new(),
            edges: Mutex::new(BTreeMap::new()),
            clock,
        }
    }

    /// Attach `child` below `parent` and recompute the parent once.
    ///
    /// Fails with [`DomainError::Cycle`] if `parent` already sits in the
    /// subtree of `child`. Attaching an existing edge only recomputes.
    pub fn attach(&self, parent: &SharedEntity<K>, child: &SharedEntity<K>) -> DomainResult<()> {
        let node = {
            let mut edges = self.edges.lock();

            if parent.id() == child.id() || Self::reaches(&edges, child.id(), parent.id()) {
                warn!(parent = %parent.id(), child = %child.id(), "Rejected cyclic attach");
                return Err(DomainError::cycle(parent.id(), child.id()));
            }

            let node = self.node_for(parent);
            let children = edges.entry(parent.id().clone()).or_default();
            if children.insert(child.id().clone()) {
                node.status.add_child(child.id(), child.status_channel());
                node.admin_status.add_child(child.id(), child.admin_status_channel());
                info!(parent = %parent.id(), child = %child.id(), "Attached child");
            }
            node
        };

        node.recompute(self.clock.now())
    }

    /// Detach `child` from `parent` and recompute the parent once.
    ///
    /// Returns `Ok(false)` if there was no such edge. A parent left without
    /// children keeps its last aggregate.
    pub fn detach(&self, parent: &SharedEntity<K>, child: &SharedEntity<K>) -> DomainResult<bool> {
        let node = {
            let mut edges = self.edges.lock();

            let removed = edges
                .get_mut(parent.id())
                .is_some_and(|children| children.remove(child.id()));
            if !removed {
                return Ok(false);
            }
            if edges.get(parent.id()).is_some_and(BTreeSet::is_empty) {
                edges.remove(parent.id());
            }

            let node = self.node_for(parent);
            node.status.remove_child(child.id());
            node.admin_status.remove_child(child.id());
            info!(parent = %parent.id(), child = %child.id(), "Detached child");
            node
        };

        node.recompute(self.clock.now())?;
        Ok(true)
    }

    /// Replace the operational status aggregation of `parent`.
    pub fn set_status_aggregator(
        &self,
        parent: &SharedEntity<K>,
        function: AggregationFn<K, ChargingStatus>,
    ) -> DomainResult<()> {
        let node = self.node_for(parent);
        node.status.replace_function(function);
        node.status.recompute(self.clock.now())
    }

    /// Replace the administrative status aggregation of `parent`.
    pub fn set_admin_status_aggregator(
        &self,
        parent: &SharedEntity<K>,
        function: AggregationFn<K, AdminStatus>,
    ) -> DomainResult<()> {
        let node = self.node_for(parent);
        node.admin_status.replace_function(function);
        node.admin_status.recompute(self.clock.now())
    }

    pub fn children_of(&self, parent: &K) -> Vec<K> {
        self.edges
            .lock()
            .get(parent)
            .map(|children| children.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn parents_of(&self, child: &K) -> Vec<K> {
        self.edges
            .lock()
            .iter()
            .filter(|(_, children)| children.contains(child))
            .map(|(parent, _)| parent.clone())
            .collect()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.lock().values().map(BTreeSet::len).sum()
    }

    fn node_for(&self, parent: &SharedEntity<K>) -> ParentNode<K> {
        self.nodes
            .entry(parent.id().clone())
            .or_insert_with(|| ParentNode::new(parent))
            .clone()
    }

    /// Whether `target` is `from` or one of its descendants.
    fn reaches(edges: &BTreeMap<K, BTreeSet<K>>, from: &K, target: &K) -> bool {
        let mut stack = vec![from];
        let mut visited = BTreeSet::new();
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(children) = edges.get(current) {
                stack.extend(children.iter());
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Entity, EntityKind, TimelineSettings};
    use crate::shared::ManualClock;
    use chrono::{Duration, TimeZone};

    struct Fixture {
        clock: ManualClock,
        tree: AggregationTree<String>,
    }

    impl Fixture {
        fn new() -> Self {
            let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
            let tree = AggregationTree::new(Arc::new(clock.clone()));
            Self { clock, tree }
        }

        fn entity(&self, id: &str, kind: EntityKind, status: ChargingStatus) -> SharedEntity<String> {
            Arc::new(Entity::new(
                id.to_string(),
                kind,
                status,
                AdminStatus::Operational,
                TimelineSettings::default(),
                Arc::new(self.clock.clone()),
            ))
        }

        fn tick(&self) {
            self.clock.advance(Duration::seconds(1));
        }
    }

    fn status(entity: &SharedEntity<String>) -> ChargingStatus {
        entity.current_status().unwrap().value
    }

    #[test]
    fn pool_with_two_stations() {
        let f = Fixture::new();
        let pool = f.entity("Pool", EntityKind::Site, ChargingStatus::Unknown);
        let station_a = f.entity("StationA", EntityKind::Station, ChargingStatus::Unknown);
        let station_b = f.entity("StationB", EntityKind::Station, ChargingStatus::Unknown);
        let e1 = f.entity("E1", EntityKind::ChargePoint, ChargingStatus::Unknown);
        let e2 = f.entity("E2", EntityKind::ChargePoint, ChargingStatus::Unknown);
        let e3 = f.entity("E3", EntityKind::ChargePoint, ChargingStatus::Unknown);

        f.tree.attach(&pool, &station_a).unwrap();
        f.tree.attach(&pool, &station_b).unwrap();
        f.tree.attach(&station_a, &e1).unwrap();
        f.tree.attach(&station_a, &e2).unwrap();
        f.tree.attach(&station_b, &e3).unwrap();

        f.tick();
        e1.set_status(ChargingStatus::Charging, WriteMode::Replace).unwrap();
        e2.set_status(ChargingStatus::Charging, WriteMode::Replace).unwrap();
        e3.set_status(ChargingStatus::Available, WriteMode::Replace).unwrap();

        assert_eq!(status(&station_a), ChargingStatus::Charging);
        assert_eq!(status(&station_b), ChargingStatus::Available);
        // 1-1 tie between Charging and Available: Available sorts first
        assert_eq!(status(&pool), ChargingStatus::Available);
    }

    #[test]
    fn attach_recomputes_immediately() {
        let f = Fixture::new();
        let station = f.entity("S", EntityKind::Station, ChargingStatus::Unknown);
        let cp = f.entity("CP", EntityKind::ChargePoint, ChargingStatus::Faulted);

        f.tree.attach(&station, &cp).unwrap();
        assert_eq!(status(&station), ChargingStatus::Faulted);
        assert_eq!(f.tree.children_of(&"S".to_string()), vec!["CP".to_string()]);
        assert_eq!(f.tree.parents_of(&"CP".to_string()), vec!["S".to_string()]);
    }

    #[test]
    fn detach_recomputes_and_stops_listening() {
        let f = Fixture::new();
        let station = f.entity("S", EntityKind::Station, ChargingStatus::Unknown);
        let cp1 = f.entity("CP1", EntityKind::ChargePoint, ChargingStatus::Charging);
        let cp2 = f.entity("CP2", EntityKind::ChargePoint, ChargingStatus::Faulted);
        let cp3 = f.entity("CP3", EntityKind::ChargePoint, ChargingStatus::Faulted);

        f.tree.attach(&station, &cp1).unwrap();
        f.tree.attach(&station, &cp2).unwrap();
        f.tree.attach(&station, &cp3).unwrap();
        assert_eq!(status(&station), ChargingStatus::Faulted);

        f.tick();
        assert!(f.tree.detach(&station, &cp3).unwrap());
        // Charging vs Faulted tie
        assert_eq!(status(&station), ChargingStatus::Charging);
        assert_eq!(cp3.status_channel().listener_count(), 0);
        assert!(!f.tree.detach(&station, &cp3).unwrap());

        f.tick();
        cp3.set_status(ChargingStatus::Unavailable, WriteMode::Replace)
            .unwrap();
        assert_eq!(status(&station), ChargingStatus::Charging);
    }

    #[test]
    fn attach_rejects_cycles() {
        let f = Fixture::new();
        let network = f.entity("N", EntityKind::Network, ChargingStatus::Unknown);
        let operator = f.entity("O", EntityKind::Operator, ChargingStatus::Unknown);
        let site = f.entity("S", EntityKind::Site, ChargingStatus::Unknown);

        f.tree.attach(&network, &operator).unwrap();
        f.tree.attach(&operator, &site).unwrap();

        assert!(matches!(
            f.tree.attach(&site, &network),
            Err(DomainError::Cycle { .. })
        ));
        assert!(matches!(
            f.tree.attach(&site, &site),
            Err(DomainError::Cycle { .. })
        ));
        assert_eq!(f.tree.edge_count(), 2);
    }

    #[test]
    fn propagates_through_every_level() {
        let f = Fixture::new();
        let network = f.entity("N", EntityKind::Network, ChargingStatus::Unknown);
        let operator = f.entity("O", EntityKind::Operator, ChargingStatus::Unknown);
        let site = f.entity("S", EntityKind::Site, ChargingStatus::Unknown);
        let station = f.entity("ST", EntityKind::Station, ChargingStatus::Unknown);
        let cp = f.entity("CP", EntityKind::ChargePoint, ChargingStatus::Available);

        f.tree.attach(&network, &operator).unwrap();
        f.tree.attach(&operator, &site).unwrap();
        f.tree.attach(&site, &station).unwrap();
        f.tree.attach(&station, &cp).unwrap();
        assert_eq!(status(&network), ChargingStatus::Available);

        f.tick();
        cp.set_status(ChargingStatus::Charging, WriteMode::Replace).unwrap();
        for entity in [&station, &site, &operator, &network] {
            assert_eq!(status(entity), ChargingStatus::Charging);
        }
    }

    #[test]
    fn unchanged_aggregate_does_not_bubble() {
        let f = Fixture::new();
        let site = f.entity("SITE", EntityKind::Site, ChargingStatus::Unknown);
        let station = f.entity("ST", EntityKind::Station, ChargingStatus::Unknown);
        let cp1 = f.entity("CP1", EntityKind::ChargePoint, ChargingStatus::Charging);
        let cp2 = f.entity("CP2", EntityKind::ChargePoint, ChargingStatus::Charging);
        let cp3 = f.entity("CP3", EntityKind::ChargePoint, ChargingStatus::Charging);
        f.tree.attach(&site, &station).unwrap();
        f.tree.attach(&station, &cp1).unwrap();
        f.tree.attach(&station, &cp2).unwrap();
        f.tree.attach(&station, &cp3).unwrap();
        let site_history = site.status_history(100).len();

        f.tick();
        cp1.set_status(ChargingStatus::Finishing, WriteMode::Replace)
            .unwrap();

        assert_eq!(status(&station), ChargingStatus::Charging);
        assert_eq!(site.status_history(100).len(), site_history);
    }

    #[test]
    fn failing_aggregator_keeps_previous_value_and_child_write() {
        let f = Fixture::new();
        let site = f.entity("SITE", EntityKind::Site, ChargingStatus::Unknown);
        let station = f.entity("ST", EntityKind::Station, ChargingStatus::Unknown);
        let cp = f.entity("CP", EntityKind::ChargePoint, ChargingStatus::Available);
        f.tree.attach(&site, &station).unwrap();
        f.tree.attach(&station, &cp).unwrap();
        assert_eq!(status(&station), ChargingStatus::Available);

        f.tree
            .set_status_aggregator(
                &station,
                Arc::new(|children: &BTreeMap<String, ChargingStatus>| {
                    if children.values().any(|s| *s == ChargingStatus::Faulted) {
                        Err("faulted child".to_string())
                    } else {
                        Ok(ChargingStatus::Available)
                    }
                }),
            )
            .unwrap();

        f.tick();
        let result = cp.set_status(ChargingStatus::Faulted, WriteMode::Replace);

        assert!(matches!(result, Err(DomainError::Aggregation { ref entity, .. }) if entity == "ST"));
        assert_eq!(status(&cp), ChargingStatus::Faulted);
        assert_eq!(status(&station), ChargingStatus::Available);
        assert_eq!(status(&site), ChargingStatus::Available);
    }

    #[test]
    fn panicking_aggregator_is_reported() {
        let f = Fixture::new();
        let station = f.entity("ST", EntityKind::Station, ChargingStatus::Unknown);
        let cp = f.entity("CP", EntityKind::ChargePoint, ChargingStatus::Available);
        f.tree.attach(&station, &cp).unwrap();

        let result = f.tree.set_status_aggregator(
            &station,
            Arc::new(|_: &BTreeMap<String, ChargingStatus>| -> Result<ChargingStatus, String> {
                panic!("bad aggregation")
            }),
        );

        assert!(matches!(result, Err(DomainError::Aggregation { .. })));
        assert_eq!(status(&station), ChargingStatus::Available);
    }

    #[test]
    fn admin_status_aggregates_independently() {
        let f = Fixture::new();
        let station = f.entity("ST", EntityKind::Station, ChargingStatus::Unknown);
        let cp1 = f.entity("CP1", EntityKind::ChargePoint, ChargingStatus::Charging);
        let cp2 = f.entity("CP2", EntityKind::ChargePoint, ChargingStatus::Charging);
        f.tree.attach(&station, &cp1).unwrap();
        f.tree.attach(&station, &cp2).unwrap();

        f.tick();
        cp1.set_admin_status(AdminStatus::OutOfService, WriteMode::Replace)
            .unwrap();
        cp2.set_admin_status(AdminStatus::OutOfService, WriteMode::Replace)
            .unwrap();

        assert_eq!(
            station.current_admin_status().unwrap().value,
            AdminStatus::OutOfService
        );
        assert_eq!(status(&station), ChargingStatus::Charging);
    }

    #[test]
    fn concurrent_leaf_writes_converge() {
        let f = Fixture::new();
        let station = f.entity("ST", EntityKind::Station, ChargingStatus::Unknown);
        let leaves: Vec<_> = (0..8)
            .map(|i| f.entity(&format!("CP{}", i), EntityKind::ChargePoint, ChargingStatus::Available))
            .collect();
        for leaf in &leaves {
            f.tree.attach(&station, leaf).unwrap();
        }

        f.tick();
        let handles: Vec<_> = leaves
            .iter()
            .cloned()
            .map(|leaf| {
                std::thread::spawn(move || {
                    leaf.set_status(ChargingStatus::Charging, WriteMode::Replace)
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(status(&station), ChargingStatus::Charging);
    }
}
