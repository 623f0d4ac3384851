//! Vehicle journeys.

use crate::error::ModelError;
use crate::identifier::{ObjectId, ObjectIds};
use crate::model::attributes::{Attributes, References};
use crate::model::event::{ChangeKind, EventSender, ModelEventKind};
use crate::model::{LineId, ModelEntity, ObjectIdIndex, VehicleJourneyId};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc::UnboundedSender;

#[derive(Clone, Debug, Default)]
pub struct VehicleJourney {
    id: VehicleJourneyId,
    object_ids: ObjectIds,
    pub line_id: LineId,
    pub name: String,
    /// Slug of the partner this journey was first collected from; drives the
    /// DestinationRef rewriting exemption.
    pub origin: String,
    pub attributes: Attributes,
    pub references: References,
}

impl VehicleJourney {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(&self) -> &VehicleJourneyId {
        &self.id
    }

    pub fn object_id(&self, kind: &str) -> Option<ObjectId> {
        self.object_ids.get(kind)
    }

    pub fn set_object_id(&mut self, object_id: ObjectId) {
        self.object_ids.set(object_id);
    }

    pub fn reference(&self, key: &str) -> Option<&crate::model::Reference> {
        self.references.get(key)
    }
}

impl ModelEntity for VehicleJourney {
    type Id = VehicleJourneyId;

    fn id(&self) -> &VehicleJourneyId {
        &self.id
    }

    fn set_id(&mut self, id: VehicleJourneyId) {
        self.id = id;
    }

    fn has_id(&self) -> bool {
        !self.id.is_empty()
    }

    fn random_id() -> VehicleJourneyId {
        VehicleJourneyId::random()
    }

    fn object_ids(&self) -> &ObjectIds {
        &self.object_ids
    }
}

#[derive(Default)]
struct VehicleJourneyStoreInner {
    by_id: HashMap<VehicleJourneyId, VehicleJourney>,
    by_object_id: ObjectIdIndex<VehicleJourneyId>,
    by_line: HashMap<LineId, HashSet<VehicleJourneyId>>,
}

impl VehicleJourneyStoreInner {
    fn unindex(&mut self, previous: &VehicleJourney) {
        let id = previous.id().clone();
        self.by_object_id.remove(previous.object_ids(), &id);
        if let Some(ids) = self.by_line.get_mut(&previous.line_id) {
            ids.remove(&id);
        }
    }

    fn index(&mut self, vehicle_journey: &VehicleJourney) {
        let id = vehicle_journey.id().clone();
        self.by_object_id.insert(vehicle_journey.object_ids(), &id);
        if !vehicle_journey.line_id.is_empty() {
            self.by_line
                .entry(vehicle_journey.line_id.clone())
                .or_default()
                .insert(id);
        }
    }
}

pub struct VehicleJourneyStore {
    inner: RwLock<VehicleJourneyStoreInner>,
    events: EventSender,
}

impl VehicleJourneyStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: RwLock::new(VehicleJourneyStoreInner::default()),
            events: EventSender::default(),
        }
    }

    pub(crate) fn attach_events(&self, sender: UnboundedSender<crate::model::ModelEvent>) {
        self.events.attach(sender);
    }

    pub fn find(&self, id: &VehicleJourneyId) -> Option<VehicleJourney> {
        if id.is_empty() {
            return None;
        }
        self.inner.read().by_id.get(id).cloned()
    }

    pub fn find_by_object_id(&self, object_id: &ObjectId) -> Option<VehicleJourney> {
        let inner = self.inner.read();
        let id = inner.by_object_id.get(object_id)?;
        inner.by_id.get(id).cloned()
    }

    pub fn find_all(&self) -> Vec<VehicleJourney> {
        self.inner.read().by_id.values().cloned().collect()
    }

    pub fn find_by_line_id(&self, id: &LineId) -> Vec<VehicleJourney> {
        let inner = self.inner.read();
        inner
            .by_line
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|journey_id| inner.by_id.get(journey_id).cloned())
            .collect()
    }

    pub fn save(&self, vehicle_journey: &mut VehicleJourney) -> Result<(), ModelError> {
        if !vehicle_journey.has_id() {
            vehicle_journey.set_id(VehicleJourneyId::random());
        }
        let change = {
            let mut inner = self.inner.write();
            let existed = match inner.by_id.remove(vehicle_journey.id()) {
                Some(previous) => {
                    inner.unindex(&previous);
                    true
                }
                None => false,
            };
            inner.index(vehicle_journey);
            inner
                .by_id
                .insert(vehicle_journey.id().clone(), vehicle_journey.clone());
            if existed {
                ChangeKind::Updated
            } else {
                ChangeKind::Created
            }
        };
        self.events.publish(
            ModelEventKind::VehicleJourney,
            vehicle_journey.id().to_string(),
            change,
        );
        Ok(())
    }

    pub fn delete(&self, vehicle_journey: &VehicleJourney) -> bool {
        let removed = {
            let mut inner = self.inner.write();
            match inner.by_id.remove(vehicle_journey.id()) {
                Some(previous) => {
                    inner.unindex(&previous);
                    true
                }
                None => false,
            }
        };
        if removed {
            self.events.publish(
                ModelEventKind::VehicleJourney,
                vehicle_journey.id().to_string(),
                ChangeKind::Deleted,
            );
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::{VehicleJourney, VehicleJourneyStore};
    use crate::identifier::ObjectId;
    use crate::model::LineId;

    #[test]
    fn line_index_tracks_saves() {
        let store = VehicleJourneyStore::new();
        let line = LineId::new("line-1");

        let mut journey = VehicleJourney::new();
        journey.line_id = line.clone();
        journey.set_object_id(ObjectId::new("external", "vj:1"));
        store.save(&mut journey).expect("save should succeed");

        let mut other = VehicleJourney::new();
        other.line_id = LineId::new("line-2");
        store.save(&mut other).expect("save should succeed");

        let matches = store.find_by_line_id(&line);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id(), journey.id());
    }
}
