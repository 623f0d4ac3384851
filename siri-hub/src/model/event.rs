//! Model change events and the collection update events applied to it.

use crate::identifier::ObjectId;
use crate::model::attributes::{Attributes, References};
use crate::model::stop_visit::{Schedules, VisitStatus};
use crate::model::StopAreaId;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::mpsc::UnboundedSender;

/// Entity families the model can report changes for.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ModelEventKind {
    StopArea,
    Line,
    VehicleJourney,
    StopVisit,
    Situation,
    Operator,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// `{kind, id, change}` record published on every store write.
#[derive(Clone, Debug)]
pub struct ModelEvent {
    pub kind: ModelEventKind,
    pub id: String,
    pub change: ChangeKind,
}

/// Store-side publishing handle; unset until the broadcaster engine attaches.
#[derive(Default)]
pub(crate) struct EventSender {
    sender: RwLock<Option<UnboundedSender<ModelEvent>>>,
}

impl EventSender {
    pub(crate) fn attach(&self, sender: UnboundedSender<ModelEvent>) {
        *self.sender.write() = Some(sender);
    }

    pub(crate) fn publish(&self, kind: ModelEventKind, id: String, change: ChangeKind) {
        if let Some(sender) = self.sender.read().as_ref() {
            let _ = sender.send(ModelEvent { kind, id, change });
        }
    }
}

/// One collected visit, expressed in the reporting partner's namespace.
#[derive(Clone, Debug)]
pub struct StopVisitUpdateEvent {
    pub id: String,
    pub origin: String,
    pub created_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
    pub stop_visit_object_id: ObjectId,
    pub monitoring_ref: String,
    pub vehicle_journey_object_id: Option<ObjectId>,
    pub line_object_id: Option<ObjectId>,
    pub passage_order: u32,
    pub vehicle_at_stop: bool,
    pub destination_display: String,
    pub arrival_status: VisitStatus,
    pub departure_status: VisitStatus,
    pub schedules: Schedules,
    pub attributes: Attributes,
    pub references: References,
}

/// Result of one collection round for a stop area, or a monitoring
/// transition decided by the dispatcher.
#[derive(Clone, Debug)]
pub struct StopAreaUpdateEvent {
    pub id: String,
    pub stop_area_id: StopAreaId,
    pub origin: String,
    pub stop_visit_update_events: Vec<StopVisitUpdateEvent>,
    /// ObjectIDs of previously collected visits absent from the response.
    pub stop_visit_not_collected_events: Vec<ObjectId>,
    pub monitored_change: Option<bool>,
}

impl StopAreaUpdateEvent {
    pub fn new(id: impl Into<String>, stop_area_id: StopAreaId, origin: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            stop_area_id,
            origin: origin.into(),
            stop_visit_update_events: Vec::new(),
            stop_visit_not_collected_events: Vec::new(),
            monitored_change: None,
        }
    }

    /// Event carrying only a monitoring transition.
    pub fn monitored(
        id: impl Into<String>,
        stop_area_id: StopAreaId,
        origin: impl Into<String>,
        monitored: bool,
    ) -> Self {
        let mut event = Self::new(id, stop_area_id, origin);
        event.monitored_change = Some(monitored);
        event
    }
}

/// Which entities a situation affects, in the producer's namespace.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SituationAffect {
    Line(ObjectId),
    StopArea(ObjectId),
    LineSection {
        first_stop: ObjectId,
        last_stop: ObjectId,
        line: ObjectId,
    },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SituationMessage {
    pub content: String,
    pub message_type: String,
}

/// One collected situation version.
#[derive(Clone, Debug)]
pub struct SituationUpdateEvent {
    pub id: String,
    pub origin: String,
    pub created_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
    pub situation_object_id: ObjectId,
    pub version: i64,
    pub channel: String,
    pub valid_until: Option<DateTime<Utc>>,
    pub messages: Vec<SituationMessage>,
    pub affects: Vec<SituationAffect>,
}
