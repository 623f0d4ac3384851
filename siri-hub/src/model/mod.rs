//! In-memory transit model: per-kind entity stores with deep-copy reads,
//! secondary indexes, change events and a transactional read view.

pub mod attributes;
pub mod csv_loader;
pub mod event;
pub mod line;
pub mod operator;
pub mod situation;
pub mod stop_area;
pub mod stop_visit;
pub mod transaction;
pub mod updater;
pub mod vehicle_journey;

pub use attributes::{Attributes, Reference, References};
pub use event::{
    ChangeKind, ModelEvent, ModelEventKind, SituationAffect, SituationMessage,
    SituationUpdateEvent, StopAreaUpdateEvent, StopVisitUpdateEvent,
};
pub use line::{Line, LineStore};
pub use operator::{Operator, OperatorStore};
pub use situation::{Situation, SituationStore};
pub use stop_area::{StopArea, StopAreaStore};
pub use stop_visit::{Schedule, ScheduleKind, Schedules, StopVisit, StopVisitStore, VisitStatus};
pub use transaction::Transaction;
pub use vehicle_journey::{VehicleJourney, VehicleJourneyStore};

use crate::error::ModelError;
use crate::identifier::{ObjectId, ObjectIds};
use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedSender;

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub(crate) fn random() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

entity_id!(StopAreaId);
entity_id!(LineId);
entity_id!(VehicleJourneyId);
entity_id!(StopVisitId);
entity_id!(SituationId);
entity_id!(OperatorId);

/// Behavior shared by every stored entity; lets the transactional view stage
/// any kind uniformly.
pub trait ModelEntity: Clone + Send + 'static {
    type Id: Clone + Eq + std::hash::Hash + std::fmt::Display + Send;

    fn id(&self) -> &Self::Id;
    fn set_id(&mut self, id: Self::Id);
    fn has_id(&self) -> bool;
    fn random_id() -> Self::Id;
    fn object_ids(&self) -> &ObjectIds;
}

/// Secondary index from `(kind, value)` to an entity id, kept consistent
/// with primary storage under the owning store's write lock.
#[derive(Debug, Default)]
pub(crate) struct ObjectIdIndex<Id> {
    by_kind: HashMap<String, HashMap<String, Id>>,
}

impl<Id: Clone + Eq> ObjectIdIndex<Id> {
    pub(crate) fn insert(&mut self, object_ids: &ObjectIds, id: &Id) {
        for object_id in object_ids.iter() {
            self.by_kind
                .entry(object_id.kind().to_string())
                .or_default()
                .insert(object_id.value().to_string(), id.clone());
        }
    }

    pub(crate) fn remove(&mut self, object_ids: &ObjectIds, id: &Id) {
        for object_id in object_ids.iter() {
            if let Some(values) = self.by_kind.get_mut(object_id.kind()) {
                if values.get(object_id.value()) == Some(id) {
                    values.remove(object_id.value());
                }
            }
        }
    }

    pub(crate) fn get(&self, object_id: &ObjectId) -> Option<&Id> {
        self.by_kind
            .get(object_id.kind())
            .and_then(|values| values.get(object_id.value()))
    }
}

/// One referential's entity model.
pub struct Model {
    date: RwLock<NaiveDate>,
    stop_areas: StopAreaStore,
    lines: LineStore,
    vehicle_journeys: VehicleJourneyStore,
    stop_visits: StopVisitStore,
    situations: SituationStore,
    operators: OperatorStore,
}

impl Model {
    pub fn new() -> Self {
        Self {
            date: RwLock::new(NaiveDate::default()),
            stop_areas: StopAreaStore::new(),
            lines: LineStore::new(),
            vehicle_journeys: VehicleJourneyStore::new(),
            stop_visits: StopVisitStore::new(),
            situations: SituationStore::new(),
            operators: OperatorStore::new(),
        }
    }

    /// Routes every store's change events into the given channel.
    pub fn attach_event_sender(&self, sender: UnboundedSender<ModelEvent>) {
        self.stop_areas.attach_events(sender.clone());
        self.lines.attach_events(sender.clone());
        self.vehicle_journeys.attach_events(sender.clone());
        self.stop_visits.attach_events(sender.clone());
        self.situations.attach_events(sender.clone());
        self.operators.attach_events(sender);
    }

    /// The `model_name` date this model was loaded for.
    pub fn date(&self) -> NaiveDate {
        *self.date.read()
    }

    pub fn set_date(&self, date: NaiveDate) {
        *self.date.write() = date;
    }

    pub fn stop_areas(&self) -> &StopAreaStore {
        &self.stop_areas
    }

    pub fn lines(&self) -> &LineStore {
        &self.lines
    }

    pub fn vehicle_journeys(&self) -> &VehicleJourneyStore {
        &self.vehicle_journeys
    }

    pub fn stop_visits(&self) -> &StopVisitStore {
        &self.stop_visits
    }

    pub fn situations(&self) -> &SituationStore {
        &self.situations
    }

    pub fn operators(&self) -> &OperatorStore {
        &self.operators
    }

    pub fn transaction(&self) -> Transaction<'_> {
        Transaction::new(self)
    }
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

/// Persistence-side collaborator repopulating a model for a referential.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn reload(&self, referential_slug: &str, model: &Model) -> Result<(), ModelError>;
}
