//! Per-partner subscription state: resources, options and the
//! per-entity last-broadcast-state cache.

use crate::identifier::ObjectId;
use crate::model::{Reference, StopVisit, VisitStatus};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub const STOP_MONITORING_COLLECT: &str = "StopMonitoringCollect";
pub const STOP_MONITORING_BROADCAST: &str = "StopMonitoringBroadcast";
pub const GENERAL_MESSAGE_COLLECT: &str = "GeneralMessageCollect";
pub const GENERAL_MESSAGE_BROADCAST: &str = "GeneralMessageBroadcast";
pub const ESTIMATED_TIMETABLE_BROADCAST: &str = "EstimatedTimetableBroadcast";
pub const VEHICLE_MONITORING_BROADCAST: &str = "VehicleMonitoringBroadcast";

pub const OPTION_MESSAGE_IDENTIFIER: &str = "MessageIdentifier";
pub const OPTION_CHANGE_BEFORE_UPDATES: &str = "ChangeBeforeUpdates";
pub const OPTION_INITIAL_TERMINATION_TIME: &str = "InitialTerminationTime";

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SubscriptionLifecycle {
    #[default]
    Pending,
    Active,
    Terminated,
}

/// Snapshot of the last broadcast state for one stop visit.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StopVisitLastState {
    pub arrival_status: VisitStatus,
    pub departure_status: VisitStatus,
    pub expected_arrival_time: Option<DateTime<Utc>>,
    pub expected_departure_time: Option<DateTime<Utc>>,
}

impl StopVisitLastState {
    pub fn from_stop_visit(stop_visit: &StopVisit) -> Self {
        Self {
            arrival_status: stop_visit.arrival_status.clone(),
            departure_status: stop_visit.departure_status.clone(),
            expected_arrival_time: stop_visit
                .schedules
                .arrival_time(crate::model::ScheduleKind::Expected),
            expected_departure_time: stop_visit
                .schedules
                .departure_time(crate::model::ScheduleKind::Expected),
        }
    }

    /// A change worth notifying: a status changed, or an expected time moved
    /// by at least `change_before` (any move when no threshold is set).
    pub fn material_change(
        &self,
        current: &StopVisit,
        change_before: Option<Duration>,
    ) -> bool {
        let next = Self::from_stop_visit(current);
        if next.arrival_status != self.arrival_status
            || next.departure_status != self.departure_status
        {
            return true;
        }
        moved_at_least(
            self.expected_arrival_time,
            next.expected_arrival_time,
            change_before,
        ) || moved_at_least(
            self.expected_departure_time,
            next.expected_departure_time,
            change_before,
        )
    }
}

fn moved_at_least(
    previous: Option<DateTime<Utc>>,
    next: Option<DateTime<Utc>>,
    threshold: Option<Duration>,
) -> bool {
    match (previous, next) {
        (None, None) => false,
        (None, Some(_)) | (Some(_), None) => true,
        (Some(previous), Some(next)) => {
            let delta = (next - previous).abs();
            match threshold {
                Some(threshold) => delta >= threshold,
                None => delta > Duration::zero(),
            }
        }
    }
}

/// Tagged last-state variant per entity kind, keeping comparisons total.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LastState {
    StopVisit(StopVisitLastState),
    Situation { version: i64 },
}

/// Binding of a subscription to one entity, identified by ObjectID.
#[derive(Clone, Debug, Default)]
pub struct SubscriptionResource {
    pub reference: Reference,
    pub subscribed_at: Option<DateTime<Utc>>,
    last_states: HashMap<String, LastState>,
}

impl SubscriptionResource {
    pub fn new(reference: Reference) -> Self {
        Self {
            reference,
            subscribed_at: None,
            last_states: HashMap::new(),
        }
    }

    pub fn last_state(&self, entity_key: &str) -> Option<&LastState> {
        self.last_states.get(entity_key)
    }

    pub fn set_last_state(&mut self, entity_key: impl Into<String>, state: LastState) {
        self.last_states.insert(entity_key.into(), state);
    }
}

struct SubscriptionState {
    external_id: String,
    options: BTreeMap<String, String>,
    resources: HashMap<String, SubscriptionResource>,
    lifecycle: SubscriptionLifecycle,
    termination_time: Option<DateTime<Utc>>,
}

/// A long-lived agreement to stream updates for a set of resources.
pub struct Subscription {
    id: SubscriptionId,
    kind: String,
    state: RwLock<SubscriptionState>,
}

impl Subscription {
    fn new(kind: impl Into<String>) -> Self {
        Self {
            id: SubscriptionId::random(),
            kind: kind.into(),
            state: RwLock::new(SubscriptionState {
                external_id: String::new(),
                options: BTreeMap::new(),
                resources: HashMap::new(),
                lifecycle: SubscriptionLifecycle::Pending,
                termination_time: None,
            }),
        }
    }

    pub fn id(&self) -> &SubscriptionId {
        &self.id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The identifier the remote party knows this subscription by; falls
    /// back to the internal id until one is set.
    pub fn external_id(&self) -> String {
        let state = self.state.read();
        if state.external_id.is_empty() {
            self.id.to_string()
        } else {
            state.external_id.clone()
        }
    }

    pub fn set_external_id(&self, external_id: impl Into<String>) {
        self.state.write().external_id = external_id.into();
    }

    pub fn subscription_option(&self, key: &str) -> Option<String> {
        self.state.read().options.get(key).cloned()
    }

    pub fn set_subscription_option(&self, key: impl Into<String>, value: impl Into<String>) {
        self.state.write().options.insert(key.into(), value.into());
    }

    /// `ChangeBeforeUpdates`, parsed.
    pub fn change_before_updates(&self) -> Option<Duration> {
        self.subscription_option(OPTION_CHANGE_BEFORE_UPDATES)
            .as_deref()
            .and_then(crate::partner::settings::parse_iso8601_duration)
    }

    pub fn lifecycle(&self) -> SubscriptionLifecycle {
        self.state.read().lifecycle
    }

    pub fn set_lifecycle(&self, lifecycle: SubscriptionLifecycle) {
        self.state.write().lifecycle = lifecycle;
    }

    pub fn termination_time(&self) -> Option<DateTime<Utc>> {
        self.state.read().termination_time
    }

    pub fn set_termination_time(&self, at: Option<DateTime<Utc>>) {
        self.state.write().termination_time = at;
    }

    /// Registers a resource for the referenced entity; replaces an existing
    /// binding for the same ObjectID.
    pub fn create_and_add_resource(&self, reference: Reference) -> Option<String> {
        let key = reference.object_id.as_ref()?.to_string();
        self.state
            .write()
            .resources
            .insert(key.clone(), SubscriptionResource::new(reference));
        Some(key)
    }

    pub fn resource(&self, object_id: &ObjectId) -> Option<SubscriptionResource> {
        self.state
            .read()
            .resources
            .get(&object_id.to_string())
            .cloned()
    }

    pub fn resources(&self) -> Vec<SubscriptionResource> {
        self.state.read().resources.values().cloned().collect()
    }

    pub fn resources_len(&self) -> usize {
        self.state.read().resources.len()
    }

    pub fn delete_resource(&self, object_id: &ObjectId) -> bool {
        self.state
            .write()
            .resources
            .remove(&object_id.to_string())
            .is_some()
    }

    pub fn mark_resource_subscribed(&self, object_id: &ObjectId, at: DateTime<Utc>) {
        if let Some(resource) = self
            .state
            .write()
            .resources
            .get_mut(&object_id.to_string())
        {
            resource.subscribed_at = Some(at);
        }
    }

    pub fn last_state(&self, object_id: &ObjectId, entity_key: &str) -> Option<LastState> {
        self.state
            .read()
            .resources
            .get(&object_id.to_string())?
            .last_state(entity_key)
            .cloned()
    }

    pub fn set_last_state(&self, object_id: &ObjectId, entity_key: &str, state: LastState) {
        if let Some(resource) = self
            .state
            .write()
            .resources
            .get_mut(&object_id.to_string())
        {
            resource.set_last_state(entity_key, state);
        }
    }
}

/// All subscriptions of one partner.
#[derive(Default)]
pub struct SubscriptionManager {
    by_id: RwLock<HashMap<SubscriptionId, Arc<Subscription>>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, kind: impl Into<String>) -> Arc<Subscription> {
        let subscription = Arc::new(Subscription::new(kind));
        self.by_id
            .write()
            .insert(subscription.id().clone(), subscription.clone());
        subscription
    }

    pub fn find(&self, id: &SubscriptionId) -> Option<Arc<Subscription>> {
        self.by_id.read().get(id).cloned()
    }

    pub fn find_all(&self) -> Vec<Arc<Subscription>> {
        self.by_id.read().values().cloned().collect()
    }

    pub fn find_by_kind(&self, kind: &str) -> Vec<Arc<Subscription>> {
        self.by_id
            .read()
            .values()
            .filter(|subscription| subscription.kind() == kind)
            .cloned()
            .collect()
    }

    pub fn find_or_create_by_kind(&self, kind: &str) -> Arc<Subscription> {
        if let Some(subscription) = self.find_by_kind(kind).into_iter().next() {
            return subscription;
        }
        self.create(kind)
    }

    pub fn find_by_external_id(&self, external_id: &str) -> Option<Arc<Subscription>> {
        self.by_id
            .read()
            .values()
            .find(|subscription| subscription.external_id() == external_id)
            .cloned()
    }

    /// Subscription of `kind` holding a resource for the given ObjectID.
    pub fn find_by_resource(&self, kind: &str, object_id: &ObjectId) -> Option<Arc<Subscription>> {
        self.by_id
            .read()
            .values()
            .find(|subscription| {
                subscription.kind() == kind && subscription.resource(object_id).is_some()
            })
            .cloned()
    }

    pub fn delete(&self, id: &SubscriptionId) -> bool {
        self.by_id.write().remove(id).is_some()
    }

    pub fn delete_all(&self) {
        self.by_id.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::{
        LastState, StopVisitLastState, SubscriptionManager, OPTION_CHANGE_BEFORE_UPDATES,
    };
    use crate::identifier::ObjectId;
    use crate::model::{Reference, ScheduleKind, StopVisit, VisitStatus};
    use chrono::{Duration, TimeZone, Utc};

    fn visit_with_expected_arrival(minutes: i64) -> StopVisit {
        let mut visit = StopVisit::new();
        visit.arrival_status = VisitStatus::OnTime;
        visit.schedules.set_arrival_time(
            ScheduleKind::Expected,
            Utc.with_ymd_and_hms(2017, 1, 1, 12, 0, 0).unwrap() + Duration::minutes(minutes),
        );
        visit
    }

    #[test]
    fn small_expected_moves_are_not_material() {
        let last = StopVisitLastState::from_stop_visit(&visit_with_expected_arrival(0));

        let nearby = visit_with_expected_arrival(0);
        assert!(!last.material_change(&nearby, Some(Duration::minutes(1))));

        let thirty_seconds = {
            let mut visit = visit_with_expected_arrival(0);
            visit.schedules.set_arrival_time(
                ScheduleKind::Expected,
                Utc.with_ymd_and_hms(2017, 1, 1, 12, 0, 30).unwrap(),
            );
            visit
        };
        assert!(!last.material_change(&thirty_seconds, Some(Duration::minutes(1))));

        let two_minutes = visit_with_expected_arrival(2);
        assert!(last.material_change(&two_minutes, Some(Duration::minutes(1))));
    }

    #[test]
    fn status_changes_are_always_material() {
        let last = StopVisitLastState::from_stop_visit(&visit_with_expected_arrival(0));

        let mut cancelled = visit_with_expected_arrival(0);
        cancelled.arrival_status = VisitStatus::Cancelled;

        assert!(last.material_change(&cancelled, Some(Duration::minutes(10))));
    }

    #[test]
    fn resources_hold_last_states_per_entity() {
        let manager = SubscriptionManager::new();
        let subscription = manager.create("StopMonitoringBroadcast");
        let object_id = ObjectId::new("external", "stop:1");
        subscription.create_and_add_resource(Reference::new(object_id.clone()));

        assert!(subscription.last_state(&object_id, "visit-1").is_none());
        subscription.set_last_state(
            &object_id,
            "visit-1",
            LastState::Situation { version: 3 },
        );
        assert_eq!(
            subscription.last_state(&object_id, "visit-1"),
            Some(LastState::Situation { version: 3 })
        );
    }

    #[test]
    fn change_before_updates_is_parsed_from_options() {
        let manager = SubscriptionManager::new();
        let subscription = manager.create("StopMonitoringBroadcast");
        subscription.set_subscription_option(OPTION_CHANGE_BEFORE_UPDATES, "PT1M");

        assert_eq!(subscription.change_before_updates(), Some(Duration::minutes(1)));
    }

    #[test]
    fn find_by_resource_matches_kind_and_object_id() {
        let manager = SubscriptionManager::new();
        let subscription = manager.create("StopMonitoringBroadcast");
        let object_id = ObjectId::new("external", "stop:9");
        subscription.create_and_add_resource(Reference::new(object_id.clone()));

        assert!(manager
            .find_by_resource("StopMonitoringBroadcast", &object_id)
            .is_some());
        assert!(manager
            .find_by_resource("GeneralMessageBroadcast", &object_id)
            .is_none());

        manager.delete(subscription.id());
        assert!(manager
            .find_by_resource("StopMonitoringBroadcast", &object_id)
            .is_none());
    }
}
