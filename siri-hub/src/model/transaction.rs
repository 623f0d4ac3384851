//! Point-in-time read view with staged writes.
//!
//! Reads are copy-on-read: the first fetch of an entity is cached for the
//! lifetime of the transaction. Writes are staged and only applied to the
//! parent stores on [`Transaction::commit`]; dropping the transaction (or
//! calling [`Transaction::rollback`]) discards them.

use crate::error::ModelError;
use crate::identifier::ObjectId;
use crate::model::{
    Line, Model, ModelEntity, Operator, Situation, StopArea, StopAreaId, StopVisit, StopVisitId,
    VehicleJourney, VehicleJourneyId,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

enum StagedOp<T> {
    Save(T),
    Delete(T),
}

struct TxStore<T: ModelEntity> {
    reads: Mutex<HashMap<T::Id, Option<T>>>,
    staged: Mutex<Vec<(T::Id, StagedOp<T>)>>,
}

impl<T: ModelEntity> TxStore<T> {
    fn new() -> Self {
        Self {
            reads: Mutex::new(HashMap::new()),
            staged: Mutex::new(Vec::new()),
        }
    }

    fn find(&self, id: &T::Id, fetch: impl FnOnce() -> Option<T>) -> Option<T> {
        {
            let staged = self.staged.lock();
            if let Some((_, op)) = staged.iter().rev().find(|(staged_id, _)| staged_id == id) {
                return match op {
                    StagedOp::Save(entity) => Some(entity.clone()),
                    StagedOp::Delete(_) => None,
                };
            }
        }
        self.reads
            .lock()
            .entry(id.clone())
            .or_insert_with(fetch)
            .clone()
    }

    fn find_by_object_id(
        &self,
        object_id: &ObjectId,
        fetch: impl FnOnce() -> Option<T>,
    ) -> Option<T> {
        {
            let staged = self.staged.lock();
            for (_, op) in staged.iter().rev() {
                if let StagedOp::Save(entity) = op {
                    if entity.object_ids().get(object_id.kind()).as_ref() == Some(object_id) {
                        return Some(entity.clone());
                    }
                }
            }
        }
        let entity = fetch()?;
        self.find(&entity.id().clone(), || Some(entity))
    }

    fn stage_save(&self, mut entity: T) -> T {
        if !entity.has_id() {
            entity.set_id(T::random_id());
        }
        self.staged
            .lock()
            .push((entity.id().clone(), StagedOp::Save(entity.clone())));
        entity
    }

    fn stage_delete(&self, entity: &T) {
        self.staged
            .lock()
            .push((entity.id().clone(), StagedOp::Delete(entity.clone())));
    }

    /// Applies staged operations to a base result set.
    fn overlay(&self, mut base: Vec<T>, matches: impl Fn(&T) -> bool) -> Vec<T> {
        let staged = self.staged.lock();
        for (id, op) in staged.iter() {
            base.retain(|entity| entity.id() != id);
            if let StagedOp::Save(entity) = op {
                if matches(entity) {
                    base.push(entity.clone());
                }
            }
        }
        base
    }

    fn drain(&self) -> Vec<(T::Id, StagedOp<T>)> {
        std::mem::take(&mut *self.staged.lock())
    }
}

pub struct Transaction<'m> {
    model: &'m Model,
    stop_areas: TxStore<StopArea>,
    lines: TxStore<Line>,
    vehicle_journeys: TxStore<VehicleJourney>,
    stop_visits: TxStore<StopVisit>,
    situations: TxStore<Situation>,
    operators: TxStore<Operator>,
}

impl<'m> Transaction<'m> {
    pub(crate) fn new(model: &'m Model) -> Self {
        Self {
            model,
            stop_areas: TxStore::new(),
            lines: TxStore::new(),
            vehicle_journeys: TxStore::new(),
            stop_visits: TxStore::new(),
            situations: TxStore::new(),
            operators: TxStore::new(),
        }
    }

    pub fn model(&self) -> &Model {
        self.model
    }

    pub fn stop_area(&self, id: &StopAreaId) -> Option<StopArea> {
        self.stop_areas
            .find(id, || self.model.stop_areas().find(id))
    }

    pub fn stop_area_by_object_id(&self, object_id: &ObjectId) -> Option<StopArea> {
        self.stop_areas.find_by_object_id(object_id, || {
            self.model.stop_areas().find_by_object_id(object_id)
        })
    }

    pub fn stop_areas(&self) -> Vec<StopArea> {
        self.stop_areas
            .overlay(self.model.stop_areas().find_all(), |_| true)
    }

    /// Referent's identifier of `kind` if it has one, else the stop area's.
    pub fn referent_or_self_object_id(
        &self,
        stop_area: &StopArea,
        kind: &str,
    ) -> Option<ObjectId> {
        if let Some(referent_id) = &stop_area.referent_id {
            if let Some(referent) = self.stop_area(referent_id) {
                if let Some(object_id) = referent.object_id(kind) {
                    return Some(object_id);
                }
            }
        }
        stop_area.object_id(kind)
    }

    /// Identifier of `kind` for the stop area or the nearest ascendant
    /// carrying one.
    pub fn stop_point_ref(&self, id: &StopAreaId, kind: &str) -> Option<(StopArea, String)> {
        let stop_area = self.stop_area(id)?;
        if let Some(object_id) = stop_area.object_id(kind) {
            return Some((stop_area, object_id.value().to_string()));
        }
        if let Some(referent_id) = &stop_area.referent_id {
            if let Some(referent) = self.stop_area(referent_id) {
                if let Some(object_id) = referent.object_id(kind) {
                    return Some((referent, object_id.value().to_string()));
                }
            }
        }
        None
    }

    pub fn line(&self, id: &crate::model::LineId) -> Option<Line> {
        self.lines.find(id, || self.model.lines().find(id))
    }

    pub fn line_by_object_id(&self, object_id: &ObjectId) -> Option<Line> {
        self.lines
            .find_by_object_id(object_id, || self.model.lines().find_by_object_id(object_id))
    }

    pub fn lines(&self) -> Vec<Line> {
        self.lines.overlay(self.model.lines().find_all(), |_| true)
    }

    pub fn vehicle_journey(&self, id: &VehicleJourneyId) -> Option<VehicleJourney> {
        self.vehicle_journeys
            .find(id, || self.model.vehicle_journeys().find(id))
    }

    pub fn vehicle_journey_by_object_id(&self, object_id: &ObjectId) -> Option<VehicleJourney> {
        self.vehicle_journeys.find_by_object_id(object_id, || {
            self.model.vehicle_journeys().find_by_object_id(object_id)
        })
    }

    pub fn vehicle_journeys_by_line_id(&self, id: &crate::model::LineId) -> Vec<VehicleJourney> {
        self.vehicle_journeys.overlay(
            self.model.vehicle_journeys().find_by_line_id(id),
            |journey| journey.line_id == *id,
        )
    }

    pub fn stop_visit(&self, id: &StopVisitId) -> Option<StopVisit> {
        self.stop_visits
            .find(id, || self.model.stop_visits().find(id))
    }

    pub fn stop_visit_by_object_id(&self, object_id: &ObjectId) -> Option<StopVisit> {
        self.stop_visits.find_by_object_id(object_id, || {
            self.model.stop_visits().find_by_object_id(object_id)
        })
    }

    pub fn stop_visits_by_stop_area_id(&self, id: &StopAreaId) -> Vec<StopVisit> {
        self.stop_visits.overlay(
            self.model.stop_visits().find_by_stop_area_id(id),
            |visit| visit.stop_area_id == *id,
        )
    }

    pub fn stop_visits_by_vehicle_journey_id(&self, id: &VehicleJourneyId) -> Vec<StopVisit> {
        self.stop_visits.overlay(
            self.model.stop_visits().find_by_vehicle_journey_id(id),
            |visit| visit.vehicle_journey_id == *id,
        )
    }

    pub fn following_stop_visits(
        &self,
        id: &VehicleJourneyId,
        after: DateTime<Utc>,
    ) -> Vec<StopVisit> {
        let mut visits: Vec<StopVisit> = self
            .stop_visits_by_vehicle_journey_id(id)
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

    pub fn situation(&self, id: &crate::model::SituationId) -> Option<Situation> {
        self.situations
            .find(id, || self.model.situations().find(id))
    }

    pub fn situations(&self) -> Vec<Situation> {
        self.situations
            .overlay(self.model.situations().find_all(), |_| true)
    }

    pub fn operator(&self, id: &crate::model::OperatorId) -> Option<Operator> {
        self.operators.find(id, || self.model.operators().find(id))
    }

    pub fn operator_by_object_id(&self, object_id: &ObjectId) -> Option<Operator> {
        self.operators.find_by_object_id(object_id, || {
            self.model.operators().find_by_object_id(object_id)
        })
    }

    pub fn save_stop_area(&self, stop_area: StopArea) -> StopArea {
        self.stop_areas.stage_save(stop_area)
    }

    pub fn delete_stop_area(&self, stop_area: &StopArea) {
        self.stop_areas.stage_delete(stop_area);
    }

    pub fn save_line(&self, line: Line) -> Line {
        self.lines.stage_save(line)
    }

    pub fn save_vehicle_journey(&self, vehicle_journey: VehicleJourney) -> VehicleJourney {
        self.vehicle_journeys.stage_save(vehicle_journey)
    }

    pub fn save_stop_visit(&self, stop_visit: StopVisit) -> StopVisit {
        self.stop_visits.stage_save(stop_visit)
    }

    pub fn delete_stop_visit(&self, stop_visit: &StopVisit) {
        self.stop_visits.stage_delete(stop_visit);
    }

    pub fn save_situation(&self, situation: Situation) -> Situation {
        self.situations.stage_save(situation)
    }

    pub fn delete_situation(&self, situation: &Situation) {
        self.situations.stage_delete(situation);
    }

    pub fn save_operator(&self, operator: Operator) -> Operator {
        self.operators.stage_save(operator)
    }

    /// Applies staged writes to the parent model, in staging order per store.
    pub fn commit(self) -> Result<(), ModelError> {
        for (_, op) in self.lines.drain() {
            match op {
                StagedOp::Save(mut line) => self.model.lines().save(&mut line)?,
                StagedOp::Delete(line) => {
                    self.model.lines().delete(&line);
                }
            }
        }
        for (_, op) in self.operators.drain() {
            match op {
                StagedOp::Save(mut operator) => self.model.operators().save(&mut operator)?,
                StagedOp::Delete(operator) => {
                    self.model.operators().delete(&operator);
                }
            }
        }
        for (_, op) in self.vehicle_journeys.drain() {
            match op {
                StagedOp::Save(mut journey) => self.model.vehicle_journeys().save(&mut journey)?,
                StagedOp::Delete(journey) => {
                    self.model.vehicle_journeys().delete(&journey);
                }
            }
        }
        for (_, op) in self.stop_areas.drain() {
            match op {
                StagedOp::Save(mut stop_area) => self.model.stop_areas().save(&mut stop_area)?,
                StagedOp::Delete(stop_area) => {
                    self.model.stop_areas().delete(&stop_area);
                }
            }
        }
        for (_, op) in self.stop_visits.drain() {
            match op {
                StagedOp::Save(mut visit) => self.model.stop_visits().save(&mut visit)?,
                StagedOp::Delete(visit) => {
                    self.model.stop_visits().delete(&visit);
                }
            }
        }
        for (_, op) in self.situations.drain() {
            match op {
                StagedOp::Save(mut situation) => self.model.situations().save(&mut situation)?,
                StagedOp::Delete(situation) => {
                    self.model.situations().delete(&situation);
                }
            }
        }
        Ok(())
    }

    /// Discards staged writes.
    pub fn rollback(self) {}
}

#[cfg(test)]
mod tests {
    use super::Transaction;
    use crate::model::{Model, StopArea, StopVisit};

    #[test]
    fn staged_writes_are_invisible_until_commit() {
        let model = Model::new();
        let tx = Transaction::new(&model);

        let staged = tx.save_stop_area(StopArea::new());
        assert!(tx.stop_area(staged.id()).is_some());
        assert!(model.stop_areas().find(staged.id()).is_none());

        tx.commit().expect("commit should succeed");
        assert!(model.stop_areas().find(staged.id()).is_some());
    }

    #[test]
    fn rollback_discards_staged_writes() {
        let model = Model::new();
        let tx = Transaction::new(&model);

        let staged = tx.save_stop_visit(StopVisit::new());
        tx.rollback();

        assert!(model.stop_visits().find(staged.id()).is_none());
    }

    #[test]
    fn reads_are_stable_for_the_transaction_lifetime() {
        let model = Model::new();
        let mut stop_area = StopArea::new();
        stop_area.name = "before".to_string();
        model.stop_areas().save(&mut stop_area).unwrap();

        let tx = Transaction::new(&model);
        assert_eq!(tx.stop_area(stop_area.id()).unwrap().name, "before");

        let mut updated = model.stop_areas().find(stop_area.id()).unwrap();
        updated.name = "after".to_string();
        model.stop_areas().save(&mut updated).unwrap();

        assert_eq!(tx.stop_area(stop_area.id()).unwrap().name, "before");
        drop(tx);

        let tx = Transaction::new(&model);
        assert_eq!(tx.stop_area(stop_area.id()).unwrap().name, "after");
    }

    #[test]
    fn staged_deletes_hide_entities_and_apply_on_commit() {
        let model = Model::new();
        let mut visit = StopVisit::new();
        model.stop_visits().save(&mut visit).unwrap();

        let tx = Transaction::new(&model);
        let seen = tx.stop_visit(visit.id()).expect("visit visible in tx");
        tx.delete_stop_visit(&seen);

        assert!(tx.stop_visit(visit.id()).is_none());
        assert!(model.stop_visits().find(visit.id()).is_some());

        tx.commit().unwrap();
        assert!(model.stop_visits().find(visit.id()).is_none());
    }
}
