//! Applies collection update events to the model.
//!
//! Subscribed to the collection dispatcher: every stop-area or situation
//! update collected from a partner flows through here and lands in the
//! entity stores, which in turn feed the broadcaster engine.

use crate::clock::Clock;
use crate::model::situation::SituationScope;
use crate::model::{
    Line, Model, Situation, SituationAffect, SituationUpdateEvent, StopAreaUpdateEvent,
    StopVisit, StopVisitUpdateEvent, VehicleJourney,
};
use std::sync::Arc;
use tracing::warn;

use crate::observability::events;

const COMPONENT: &str = "model_updater";

pub struct ModelUpdater {
    model: Arc<Model>,
    clock: Arc<dyn Clock>,
}

impl ModelUpdater {
    pub fn new(model: Arc<Model>, clock: Arc<dyn Clock>) -> Self {
        Self { model, clock }
    }

    pub fn handle_stop_area_update_event(&self, event: &StopAreaUpdateEvent) {
        if let Some(monitored) = event.monitored_change {
            self.apply_monitored_change(event, monitored);
            return;
        }
        self.apply_collected_update(event);
    }

    fn apply_monitored_change(&self, event: &StopAreaUpdateEvent, monitored: bool) {
        let Some(mut stop_area) = self.model.stop_areas().find(&event.stop_area_id) else {
            return;
        };
        if monitored && !event.origin.is_empty() {
            stop_area.set_origin(event.origin.clone(), true);
        } else if !monitored {
            stop_area.set_all_origins(false);
        }
        if let Err(err) = self.model.stop_areas().save(&mut stop_area) {
            warn!(
                event = events::COLLECTOR_UNKNOWN_REFERENCE,
                component = COMPONENT,
                err = %err,
                "could not persist monitoring change"
            );
        }
    }

    fn apply_collected_update(&self, event: &StopAreaUpdateEvent) {
        let now = self.clock.now();
        let Some(mut stop_area) = self.model.stop_areas().find(&event.stop_area_id) else {
            warn!(
                event = events::COLLECTOR_UNKNOWN_REFERENCE,
                component = COMPONENT,
                stop_area_id = %event.stop_area_id,
                "update event for unknown stop area"
            );
            return;
        };
        if !event.origin.is_empty() {
            stop_area.set_origin(event.origin.clone(), true);
        }
        stop_area.mark_collected(now);
        if self.model.stop_areas().save(&mut stop_area).is_err() {
            return;
        }

        for visit_event in &event.stop_visit_update_events {
            self.apply_stop_visit_update(event, visit_event);
        }

        for object_id in &event.stop_visit_not_collected_events {
            let Some(mut visit) = self.model.stop_visits().find_by_object_id(object_id) else {
                continue;
            };
            visit.mark_not_collected();
            let _ = self.model.stop_visits().save(&mut visit);
        }
    }

    fn apply_stop_visit_update(&self, parent: &StopAreaUpdateEvent, event: &StopVisitUpdateEvent) {
        let line_id = event
            .line_object_id
            .as_ref()
            .map(|object_id| match self.model.lines().find_by_object_id(object_id) {
                Some(line) => line.id().clone(),
                None => {
                    let mut line = Line::new();
                    line.set_object_id(object_id.clone());
                    let _ = self.model.lines().save(&mut line);
                    line.id().clone()
                }
            });

        let vehicle_journey_id = event.vehicle_journey_object_id.as_ref().map(|object_id| {
            match self.model.vehicle_journeys().find_by_object_id(object_id) {
                Some(journey) => journey.id().clone(),
                None => {
                    let mut journey = VehicleJourney::new();
                    journey.set_object_id(object_id.clone());
                    journey.origin = event.origin.clone();
                    if let Some(line_id) = &line_id {
                        journey.line_id = line_id.clone();
                    }
                    let _ = self.model.vehicle_journeys().save(&mut journey);
                    journey.id().clone()
                }
            }
        });

        let mut visit = self
            .model
            .stop_visits()
            .find_by_object_id(&event.stop_visit_object_id)
            .unwrap_or_else(|| {
                let mut visit = StopVisit::new();
                visit.set_object_id(event.stop_visit_object_id.clone());
                visit
            });
        visit.stop_area_id = parent.stop_area_id.clone();
        if let Some(vehicle_journey_id) = vehicle_journey_id {
            visit.vehicle_journey_id = vehicle_journey_id;
        }
        visit.schedules = event.schedules.clone();
        visit.arrival_status = event.arrival_status.clone();
        visit.departure_status = event.departure_status.clone();
        if event.passage_order != 0 {
            visit.passage_order = event.passage_order;
        }
        visit.vehicle_at_stop = event.vehicle_at_stop;
        for (key, value) in event.attributes.iter() {
            visit.attributes.set(key, value);
        }
        if !event.destination_display.is_empty() {
            visit
                .attributes
                .set("DestinationDisplay", event.destination_display.clone());
        }
        for (key, reference) in event.references.iter() {
            visit.references.set(key, reference.clone());
        }
        visit.mark_collected(self.clock.now());
        let _ = self.model.stop_visits().save(&mut visit);
    }

    pub fn handle_situation_update_events(&self, updates: &[SituationUpdateEvent]) {
        for update in updates {
            let existing = self
                .model
                .situations()
                .find_by_object_id(&update.situation_object_id);
            if let Some(existing) = &existing {
                if existing.version >= update.version {
                    continue;
                }
            }
            let mut situation = existing.unwrap_or_else(|| {
                let mut situation = Situation::new();
                situation.set_object_id(update.situation_object_id.clone());
                situation
            });
            situation.origin = update.origin.clone();
            situation.recorded_at = Some(update.recorded_at);
            situation.version = update.version;
            situation.channel = update.channel.clone();
            situation.valid_until = update.valid_until;
            situation.messages = update.messages.clone();
            situation.scopes = self.resolve_scopes(&update.affects);
            let _ = self.model.situations().save(&mut situation);
        }
    }

    fn resolve_scopes(&self, affects: &[SituationAffect]) -> Vec<SituationScope> {
        let mut scopes = Vec::new();
        for affect in affects {
            match affect {
                SituationAffect::Line(object_id) => {
                    match self.model.lines().find_by_object_id(object_id) {
                        Some(line) => scopes.push(SituationScope::Line(line.id().clone())),
                        None => self.warn_unresolved("LineRef", &object_id.to_string()),
                    }
                }
                SituationAffect::StopArea(object_id) => {
                    match self.model.stop_areas().find_by_object_id(object_id) {
                        Some(stop_area) => {
                            scopes.push(SituationScope::StopArea(stop_area.id().clone()))
                        }
                        None => self.warn_unresolved("StopPointRef", &object_id.to_string()),
                    }
                }
                SituationAffect::LineSection {
                    first_stop,
                    last_stop,
                    line,
                } => {
                    let first = self.model.stop_areas().find_by_object_id(first_stop);
                    let last = self.model.stop_areas().find_by_object_id(last_stop);
                    let line = self.model.lines().find_by_object_id(line);
                    match (first, last, line) {
                        (Some(first), Some(last), Some(line)) => {
                            scopes.push(SituationScope::LineSection {
                                first_stop: first.id().clone(),
                                last_stop: last.id().clone(),
                                line: line.id().clone(),
                            })
                        }
                        _ => self.warn_unresolved("LineSection", "incomplete references"),
                    }
                }
            }
        }
        scopes
    }

    fn warn_unresolved(&self, field: &str, value: &str) {
        warn!(
            event = events::COLLECTOR_UNKNOWN_REFERENCE,
            component = COMPONENT,
            reason = field,
            reference = value,
            "unresolved situation reference"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::ModelUpdater;
    use crate::clock::{Clock, FakeClock};
    use crate::identifier::ObjectId;
    use crate::model::{
        Model, ScheduleKind, StopArea, StopAreaUpdateEvent, StopVisitUpdateEvent, VisitStatus,
    };
    use chrono::Utc;
    use std::sync::Arc;

    fn visit_event(origin: &str, object_id: &str) -> StopVisitUpdateEvent {
        StopVisitUpdateEvent {
            id: "event-1".to_string(),
            origin: origin.to_string(),
            created_at: Utc::now(),
            recorded_at: Utc::now(),
            stop_visit_object_id: ObjectId::new("partner", object_id),
            monitoring_ref: "stop:1".to_string(),
            vehicle_journey_object_id: Some(ObjectId::new("partner", "vj:1")),
            line_object_id: Some(ObjectId::new("partner", "line:1")),
            passage_order: 3,
            vehicle_at_stop: false,
            destination_display: "Mairie".to_string(),
            arrival_status: VisitStatus::OnTime,
            departure_status: VisitStatus::Undefined,
            schedules: Default::default(),
            attributes: Default::default(),
            references: Default::default(),
        }
    }

    #[test]
    fn collected_update_creates_visit_journey_and_line() {
        let model = Arc::new(Model::new());
        let clock = Arc::new(FakeClock::new());
        let updater = ModelUpdater::new(model.clone(), clock.clone());

        let mut stop_area = StopArea::new();
        model.stop_areas().save(&mut stop_area).unwrap();

        let mut event =
            StopAreaUpdateEvent::new("update-1", stop_area.id().clone(), "partner-a");
        let mut visit = visit_event("partner-a", "visit:1");
        visit
            .schedules
            .set_arrival_time(ScheduleKind::Expected, clock.now());
        event.stop_visit_update_events.push(visit);

        updater.handle_stop_area_update_event(&event);

        let saved_visit = model
            .stop_visits()
            .find_by_object_id(&ObjectId::new("partner", "visit:1"))
            .expect("visit should be created");
        assert!(saved_visit.is_collected());
        assert_eq!(saved_visit.stop_area_id, *stop_area.id());
        assert_eq!(saved_visit.destination_display(), "Mairie");

        assert!(model
            .vehicle_journeys()
            .find_by_object_id(&ObjectId::new("partner", "vj:1"))
            .is_some());
        assert!(model
            .lines()
            .find_by_object_id(&ObjectId::new("partner", "line:1"))
            .is_some());

        let updated_area = model.stop_areas().find(stop_area.id()).unwrap();
        assert!(updated_area.monitored());
        assert_eq!(updated_area.origins().origin("partner-a"), Some(true));
    }

    #[test]
    fn monitored_false_downs_every_origin() {
        let model = Arc::new(Model::new());
        let updater = ModelUpdater::new(model.clone(), Arc::new(FakeClock::new()));

        let mut stop_area = StopArea::new();
        stop_area.set_origin("partner-a", true);
        model.stop_areas().save(&mut stop_area).unwrap();

        let event =
            StopAreaUpdateEvent::monitored("update-2", stop_area.id().clone(), "", false);
        updater.handle_stop_area_update_event(&event);

        let updated = model.stop_areas().find(stop_area.id()).unwrap();
        assert!(!updated.monitored());
        assert_eq!(updated.origins().partners_down(), vec!["partner-a".to_string()]);
    }
}
