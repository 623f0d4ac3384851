//! Stop visits and their aimed/expected/actual schedules.

use crate::error::ModelError;
use crate::identifier::{ObjectId, ObjectIds};
use crate::model::attributes::{Attributes, References};
use crate::model::event::{ChangeKind, EventSender, ModelEventKind};
use crate::model::{
    ModelEntity, ObjectIdIndex, StopAreaId, StopVisitId, VehicleJourneyId,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc::UnboundedSender;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ScheduleKind {
    Aimed,
    Expected,
    Actual,
}

impl ScheduleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleKind::Aimed => "aimed",
            ScheduleKind::Expected => "expected",
            ScheduleKind::Actual => "actual",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "aimed" => Some(ScheduleKind::Aimed),
            "expected" => Some(ScheduleKind::Expected),
            "actual" => Some(ScheduleKind::Actual),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Schedule {
    pub arrival_time: Option<DateTime<Utc>>,
    pub departure_time: Option<DateTime<Utc>>,
}

/// Schedules keyed by kind; missing entries read as empty schedules.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Schedules {
    by_kind: HashMap<ScheduleKind, Schedule>,
}

impl Schedules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&self, kind: ScheduleKind) -> Schedule {
        self.by_kind.get(&kind).copied().unwrap_or_default()
    }

    pub fn arrival_time(&self, kind: ScheduleKind) -> Option<DateTime<Utc>> {
        self.schedule(kind).arrival_time
    }

    pub fn departure_time(&self, kind: ScheduleKind) -> Option<DateTime<Utc>> {
        self.schedule(kind).departure_time
    }

    pub fn set_arrival_time(&mut self, kind: ScheduleKind, time: DateTime<Utc>) {
        self.by_kind.entry(kind).or_default().arrival_time = Some(time);
    }

    pub fn set_departure_time(&mut self, kind: ScheduleKind, time: DateTime<Utc>) {
        self.by_kind.entry(kind).or_default().departure_time = Some(time);
    }

    /// Best known passage time: expected wins over actual, actual over aimed,
    /// arrivals over departures.
    pub fn reference_time(&self) -> Option<DateTime<Utc>> {
        for kind in [ScheduleKind::Expected, ScheduleKind::Actual, ScheduleKind::Aimed] {
            if let Some(time) = self.arrival_time(kind) {
                return Some(time);
            }
        }
        for kind in [ScheduleKind::Expected, ScheduleKind::Actual, ScheduleKind::Aimed] {
            if let Some(time) = self.departure_time(kind) {
                return Some(time);
            }
        }
        None
    }
}

/// Arrival or departure status reported for a visit.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum VisitStatus {
    #[default]
    Undefined,
    OnTime,
    Early,
    Delayed,
    Cancelled,
    Arrived,
    Departed,
    NoReport,
}

impl VisitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisitStatus::Undefined => "",
            VisitStatus::OnTime => "onTime",
            VisitStatus::Early => "early",
            VisitStatus::Delayed => "delayed",
            VisitStatus::Cancelled => "cancelled",
            VisitStatus::Arrived => "arrived",
            VisitStatus::Departed => "departed",
            VisitStatus::NoReport => "noReport",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "onTime" => VisitStatus::OnTime,
            "early" => VisitStatus::Early,
            "delayed" => VisitStatus::Delayed,
            "cancelled" => VisitStatus::Cancelled,
            "arrived" => VisitStatus::Arrived,
            "departed" => VisitStatus::Departed,
            "noReport" => VisitStatus::NoReport,
            _ => VisitStatus::Undefined,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct StopVisit {
    id: StopVisitId,
    object_ids: ObjectIds,
    pub stop_area_id: StopAreaId,
    pub vehicle_journey_id: VehicleJourneyId,
    pub schedules: Schedules,
    pub arrival_status: VisitStatus,
    pub departure_status: VisitStatus,
    pub passage_order: u32,
    pub vehicle_at_stop: bool,
    pub attributes: Attributes,
    pub references: References,
    collected: bool,
    collected_at: Option<DateTime<Utc>>,
}

impl StopVisit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(&self) -> &StopVisitId {
        &self.id
    }

    pub fn object_id(&self, kind: &str) -> Option<ObjectId> {
        self.object_ids.get(kind)
    }

    pub fn set_object_id(&mut self, object_id: ObjectId) {
        self.object_ids.set(object_id);
    }

    pub fn is_collected(&self) -> bool {
        self.collected
    }

    pub fn collected_at(&self) -> Option<DateTime<Utc>> {
        self.collected_at
    }

    pub fn mark_collected(&mut self, at: DateTime<Utc>) {
        self.collected = true;
        self.collected_at = Some(at);
    }

    pub fn mark_not_collected(&mut self) {
        self.collected = false;
    }

    pub fn destination_display(&self) -> &str {
        self.attributes.get("DestinationDisplay").unwrap_or("")
    }
}

impl ModelEntity for StopVisit {
    type Id = StopVisitId;

    fn id(&self) -> &StopVisitId {
        &self.id
    }

    fn set_id(&mut self, id: StopVisitId) {
        self.id = id;
    }

    fn has_id(&self) -> bool {
        !self.id.is_empty()
    }

    fn random_id() -> StopVisitId {
        StopVisitId::random()
    }

    fn object_ids(&self) -> &ObjectIds {
        &self.object_ids
    }
}

#[derive(Default)]
struct StopVisitStoreInner {
    by_id: HashMap<StopVisitId, StopVisit>,
    by_object_id: ObjectIdIndex<StopVisitId>,
    by_stop_area: HashMap<StopAreaId, HashSet<StopVisitId>>,
    by_vehicle_journey: HashMap<VehicleJourneyId, HashSet<StopVisitId>>,
}

impl StopVisitStoreInner {
    fn unindex(&mut self, previous: &StopVisit) {
        let id = previous.id().clone();
        self.by_object_id.remove(previous.object_ids(), &id);
        if let Some(ids) = self.by_stop_area.get_mut(&previous.stop_area_id) {
            ids.remove(&id);
        }
        if let Some(ids) = self.by_vehicle_journey.get_mut(&previous.vehicle_journey_id) {
            ids.remove(&id);
        }
    }

    fn index(&mut self, stop_visit: &StopVisit) {
        let id = stop_visit.id().clone();
        self.by_object_id.insert(stop_visit.object_ids(), &id);
        if !stop_visit.stop_area_id.is_empty() {
            self.by_stop_area
                .entry(stop_visit.stop_area_id.clone())
                .or_default()
                .insert(id.clone());
        }
        if !stop_visit.vehicle_journey_id.is_empty() {
            self.by_vehicle_journey
                .entry(stop_visit.vehicle_journey_id.clone())
                .or_default()
                .insert(id);
        }
    }
}

pub struct StopVisitStore {
    inner: RwLock<StopVisitStoreInner>,
    events: EventSender,
}

impl StopVisitStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: RwLock::new(StopVisitStoreInner::default()),
            events: EventSender::default(),
        }
    }

    pub(crate) fn attach_events(&self, sender: UnboundedSender<crate::model::ModelEvent>) {
        self.events.attach(sender);
    }

    pub fn find(&self, id: &StopVisitId) -> Option<StopVisit> {
        if id.is_empty() {
            return None;
        }
        self.inner.read().by_id.get(id).cloned()
    }

    pub fn find_by_object_id(&self, object_id: &ObjectId) -> Option<StopVisit> {
        let inner = self.inner.read();
        let id = inner.by_object_id.get(object_id)?;
        inner.by_id.get(id).cloned()
    }

    pub fn find_all(&self) -> Vec<StopVisit> {
        self.inner.read().by_id.values().cloned().collect()
    }

    pub fn find_by_stop_area_id(&self, id: &StopAreaId) -> Vec<StopVisit> {
        let inner = self.inner.read();
        inner
            .by_stop_area
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|visit_id| inner.by_id.get(visit_id).cloned())
            .collect()
    }

    pub fn find_by_vehicle_journey_id(&self, id: &VehicleJourneyId) -> Vec<StopVisit> {
        let inner = self.inner.read();
        inner
            .by_vehicle_journey
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|visit_id| inner.by_id.get(visit_id).cloned())
            .collect()
    }

    /// Visits of a journey not yet passed at `after`, in passage order.
    pub fn find_following_by_vehicle_journey_id(
        &self,
        id: &VehicleJourneyId,
        after: DateTime<Utc>,
    ) -> Vec<StopVisit> {
        let mut visits: Vec<StopVisit> = self
            .find_by_vehicle_journey_id(id)
            .into_iter()
            .filter(|visit| {
                visit
                    .schedules
                    .reference_time()
                    .map(|time| time >= after)
                    .unwrap_or(false)
            })
            .collect();
        visits.sort_by_key(|visit| visit.passage_order);
        visits
    }

    pub fn save(&self, stop_visit: &mut StopVisit) -> Result<(), ModelError> {
        if !stop_visit.has_id() {
            stop_visit.set_id(StopVisitId::random());
        }
        let change = {
            let mut inner = self.inner.write();
            let existed = match inner.by_id.remove(stop_visit.id()) {
                Some(previous) => {
                    inner.unindex(&previous);
                    true
                }
                None => false,
            };
            inner.index(stop_visit);
            inner
                .by_id
                .insert(stop_visit.id().clone(), stop_visit.clone());
            if existed {
                ChangeKind::Updated
            } else {
                ChangeKind::Created
            }
        };
        self.events
            .publish(ModelEventKind::StopVisit, stop_visit.id().to_string(), change);
        Ok(())
    }

    pub fn delete(&self, stop_visit: &StopVisit) -> bool {
        let removed = {
            let mut inner = self.inner.write();
            match inner.by_id.remove(stop_visit.id()) {
                Some(previous) => {
                    inner.unindex(&previous);
                    true
                }
                None => false,
            }
        };
        if removed {
            self.events.publish(
                ModelEventKind::StopVisit,
                stop_visit.id().to_string(),
                ChangeKind::Deleted,
            );
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::{ScheduleKind, StopVisit, StopVisitStore, VisitStatus};
    use crate::identifier::ObjectId;
    use crate::model::{StopAreaId, VehicleJourneyId};
    use chrono::{TimeZone, Utc};

    #[test]
    fn save_then_find_returns_an_equal_copy() {
        let store = StopVisitStore::new();
        let mut visit = StopVisit::new();
        visit.stop_area_id = StopAreaId::new("sa-1");
        visit.passage_order = 4;
        visit.arrival_status = VisitStatus::OnTime;
        visit.set_object_id(ObjectId::new("external", "visit:1"));

        store.save(&mut visit).expect("save should succeed");

        let found = store.find(visit.id()).expect("visit should be found");
        assert_eq!(found.stop_area_id, visit.stop_area_id);
        assert_eq!(found.passage_order, 4);
        assert_eq!(found.arrival_status, VisitStatus::OnTime);
        assert_eq!(
            found.object_id("external"),
            Some(ObjectId::new("external", "visit:1"))
        );
    }

    #[test]
    fn find_by_object_id_tracks_save_and_delete() {
        let store = StopVisitStore::new();
        let object_id = ObjectId::new("external", "visit:2");
        let mut visit = StopVisit::new();
        visit.set_object_id(object_id.clone());
        store.save(&mut visit).unwrap();

        assert!(store.find_by_object_id(&object_id).is_some());

        store.delete(&visit);
        assert!(store.find_by_object_id(&object_id).is_none());
    }

    #[test]
    fn following_visits_are_filtered_and_ordered() {
        let store = StopVisitStore::new();
        let journey = VehicleJourneyId::new("vj-1");
        let now = Utc.with_ymd_and_hms(2017, 1, 1, 12, 0, 0).unwrap();

        for (order, offset_minutes) in [(2u32, 20i64), (1, 10), (3, -10)] {
            let mut visit = StopVisit::new();
            visit.vehicle_journey_id = journey.clone();
            visit.passage_order = order;
            visit.schedules.set_arrival_time(
                ScheduleKind::Expected,
                now + chrono::Duration::minutes(offset_minutes),
            );
            store.save(&mut visit).unwrap();
        }

        let following = store.find_following_by_vehicle_journey_id(&journey, now);
        let orders: Vec<u32> = following.iter().map(|visit| visit.passage_order).collect();
        assert_eq!(orders, vec![1, 2]);
    }
}
