//! Stop areas, their origin map and the family/ascendant traversals.

use crate::error::ModelError;
use crate::identifier::{ObjectId, ObjectIds};
use crate::model::attributes::{Attributes, References};
use crate::model::event::{ChangeKind, EventSender, ModelEventKind};
use crate::model::{LineId, ModelEntity, ObjectIdIndex, StopAreaId};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::mpsc::UnboundedSender;

/// Which partners ever reported data for a stop area, and whether each is
/// currently delivering.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StopAreaOrigins {
    by_partner: BTreeMap<String, bool>,
}

impl StopAreaOrigins {
    pub fn origin(&self, partner: &str) -> Option<bool> {
        self.by_partner.get(partner).copied()
    }

    pub(crate) fn set(&mut self, partner: impl Into<String>, delivering: bool) {
        self.by_partner.insert(partner.into(), delivering);
    }

    pub(crate) fn set_all(&mut self, delivering: bool) {
        for value in self.by_partner.values_mut() {
            *value = delivering;
        }
    }

    pub fn any_delivering(&self) -> bool {
        self.by_partner.values().any(|delivering| *delivering)
    }

    /// Partners recorded as currently not delivering.
    pub fn partners_down(&self) -> Vec<String> {
        self.by_partner
            .iter()
            .filter(|(_, delivering)| !**delivering)
            .map(|(partner, _)| partner.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.by_partner
            .iter()
            .map(|(partner, delivering)| (partner.as_str(), *delivering))
    }

    pub fn is_empty(&self) -> bool {
        self.by_partner.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct StopArea {
    id: StopAreaId,
    object_ids: ObjectIds,
    pub parent_id: Option<StopAreaId>,
    pub referent_id: Option<StopAreaId>,
    pub name: String,
    pub line_ids: Vec<LineId>,
    pub collected_always: bool,
    pub collected_until: Option<DateTime<Utc>>,
    pub collect_general_messages: bool,
    pub attributes: Attributes,
    pub references: References,
    monitored: bool,
    origins: StopAreaOrigins,
    next_collect_at: Option<DateTime<Utc>>,
    collected_at: Option<DateTime<Utc>>,
}

impl StopArea {
    pub fn new() -> Self {
        Self {
            id: StopAreaId::default(),
            object_ids: ObjectIds::new(),
            parent_id: None,
            referent_id: None,
            name: String::new(),
            line_ids: Vec::new(),
            collected_always: true,
            collected_until: None,
            collect_general_messages: false,
            attributes: Attributes::new(),
            references: References::new(),
            monitored: false,
            origins: StopAreaOrigins::default(),
            next_collect_at: None,
            collected_at: None,
        }
    }

    pub fn id(&self) -> &StopAreaId {
        &self.id
    }

    pub fn object_id(&self, kind: &str) -> Option<ObjectId> {
        self.object_ids.get(kind)
    }

    pub fn set_object_id(&mut self, object_id: ObjectId) {
        self.object_ids.set(object_id);
    }

    /// Derived from the origin map: at least one origin currently delivers.
    pub fn monitored(&self) -> bool {
        self.monitored
    }

    pub fn origins(&self) -> &StopAreaOrigins {
        &self.origins
    }

    pub fn set_origin(&mut self, partner: impl Into<String>, delivering: bool) {
        self.origins.set(partner, delivering);
        self.monitored = self.origins.any_delivering();
    }

    pub fn set_all_origins(&mut self, delivering: bool) {
        self.origins.set_all(delivering);
        self.monitored = self.origins.any_delivering();
    }

    pub fn next_collect_at(&self) -> Option<DateTime<Utc>> {
        self.next_collect_at
    }

    pub fn set_next_collect(&mut self, at: DateTime<Utc>) {
        self.next_collect_at = Some(at);
    }

    pub fn collected_at(&self) -> Option<DateTime<Utc>> {
        self.collected_at
    }

    pub fn mark_collected(&mut self, at: DateTime<Utc>) {
        self.collected_at = Some(at);
    }

    /// Inside its collection window: always collected, or until a deadline.
    pub fn collectable(&self, now: DateTime<Utc>) -> bool {
        self.collected_always || self.collected_until.map(|until| until > now).unwrap_or(false)
    }

    /// Due for a collection request at `now`.
    pub fn collection_due(&self, now: DateTime<Utc>) -> bool {
        self.collectable(now)
            && self
                .next_collect_at
                .map(|next| next <= now)
                .unwrap_or(true)
    }
}

impl Default for StopArea {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelEntity for StopArea {
    type Id = StopAreaId;

    fn id(&self) -> &StopAreaId {
        &self.id
    }

    fn set_id(&mut self, id: StopAreaId) {
        self.id = id;
    }

    fn has_id(&self) -> bool {
        !self.id.is_empty()
    }

    fn random_id() -> StopAreaId {
        StopAreaId::random()
    }

    fn object_ids(&self) -> &ObjectIds {
        &self.object_ids
    }
}

#[derive(Default)]
struct StopAreaStoreInner {
    by_id: HashMap<StopAreaId, StopArea>,
    by_object_id: ObjectIdIndex<StopAreaId>,
    by_line: HashMap<LineId, HashSet<StopAreaId>>,
}

impl StopAreaStoreInner {
    fn unindex(&mut self, previous: &StopArea) {
        let id = previous.id().clone();
        self.by_object_id.remove(previous.object_ids(), &id);
        for line_id in &previous.line_ids {
            if let Some(ids) = self.by_line.get_mut(line_id) {
                ids.remove(&id);
            }
        }
    }

    fn index(&mut self, stop_area: &StopArea) {
        let id = stop_area.id().clone();
        self.by_object_id.insert(stop_area.object_ids(), &id);
        for line_id in &stop_area.line_ids {
            self.by_line
                .entry(line_id.clone())
                .or_default()
                .insert(id.clone());
        }
    }

    /// Walking up from `start` through parent/referent links, is `target`
    /// reachable? The visited set breaks reference cycles.
    fn reaches(&self, start: &StopAreaId, target: &StopAreaId) -> bool {
        let mut visited = HashSet::new();
        self.reaches_inner(start, target, &mut visited)
    }

    fn reaches_inner(
        &self,
        start: &StopAreaId,
        target: &StopAreaId,
        visited: &mut HashSet<StopAreaId>,
    ) -> bool {
        let mut current = Some(start.clone());
        while let Some(id) = current {
            if id == *target {
                return true;
            }
            if !visited.insert(id.clone()) {
                return false;
            }
            let Some(stop_area) = self.by_id.get(&id) else {
                return false;
            };
            if let Some(referent_id) = &stop_area.referent_id {
                if self.reaches_inner(referent_id, target, visited) {
                    return true;
                }
            }
            current = stop_area.parent_id.clone();
        }
        false
    }
}

pub struct StopAreaStore {
    inner: RwLock<StopAreaStoreInner>,
    events: EventSender,
}

impl StopAreaStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: RwLock::new(StopAreaStoreInner::default()),
            events: EventSender::default(),
        }
    }

    pub(crate) fn attach_events(&self, sender: UnboundedSender<crate::model::ModelEvent>) {
        self.events.attach(sender);
    }

    pub fn find(&self, id: &StopAreaId) -> Option<StopArea> {
        if id.is_empty() {
            return None;
        }
        self.inner.read().by_id.get(id).cloned()
    }

    pub fn find_by_object_id(&self, object_id: &ObjectId) -> Option<StopArea> {
        let inner = self.inner.read();
        let id = inner.by_object_id.get(object_id)?;
        inner.by_id.get(id).cloned()
    }

    pub fn find_all(&self) -> Vec<StopArea> {
        self.inner.read().by_id.values().cloned().collect()
    }

    pub fn find_by_line_id(&self, id: &LineId) -> Vec<StopArea> {
        let inner = self.inner.read();
        inner
            .by_line
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|stop_area_id| inner.by_id.get(stop_area_id).cloned())
            .collect()
    }

    pub fn find_by_origin(&self, origin: &str) -> Vec<StopAreaId> {
        self.inner
            .read()
            .by_id
            .values()
            .filter(|stop_area| stop_area.origins().origin(origin).is_some())
            .map(|stop_area| stop_area.id().clone())
            .collect()
    }

    /// Transitive closure of descendants over parent and referent links,
    /// starting at (and including) `id`.
    pub fn find_family(&self, id: &StopAreaId) -> Vec<StopAreaId> {
        let inner = self.inner.read();
        let mut family = Vec::new();
        let mut pending = vec![id.clone()];
        let mut visited = HashSet::new();
        while let Some(current) = pending.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            for stop_area in inner.by_id.values() {
                if stop_area.parent_id.as_ref() == Some(&current)
                    || stop_area.referent_id.as_ref() == Some(&current)
                {
                    pending.push(stop_area.id().clone());
                }
            }
            family.push(current);
        }
        family
    }

    /// The stop area and its chain of parents and referents.
    pub fn find_ascendants(&self, id: &StopAreaId) -> Vec<StopArea> {
        let inner = self.inner.read();
        let mut ascendants = Vec::new();
        let mut pending = vec![id.clone()];
        let mut visited = HashSet::new();
        while let Some(current) = pending.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            let Some(stop_area) = inner.by_id.get(&current) else {
                continue;
            };
            if let Some(parent_id) = &stop_area.parent_id {
                pending.push(parent_id.clone());
            }
            if let Some(referent_id) = &stop_area.referent_id {
                pending.push(referent_id.clone());
            }
            ascendants.push(stop_area.clone());
        }
        ascendants
    }

    /// ObjectIDs of the given kind found along the ascendant chain, nearest
    /// last so the most specific mapping wins.
    pub fn find_ascendants_with_object_id_kind(
        &self,
        id: &StopAreaId,
        kind: &str,
    ) -> Vec<ObjectId> {
        self.find_ascendants(id)
            .iter()
            .filter_map(|stop_area| stop_area.object_id(kind))
            .collect()
    }

    /// Prefers the referent's identifier of the given kind, then the stop
    /// area's own.
    pub fn referent_or_self_object_id(&self, stop_area: &StopArea, kind: &str) -> Option<ObjectId> {
        if let Some(referent_id) = &stop_area.referent_id {
            if let Some(referent) = self.find(referent_id) {
                if let Some(object_id) = referent.object_id(kind) {
                    return Some(object_id);
                }
            }
        }
        stop_area.object_id(kind)
    }

    pub fn save(&self, stop_area: &mut StopArea) -> Result<(), ModelError> {
        if !stop_area.has_id() {
            stop_area.set_id(StopAreaId::random());
        }
        let change = {
            let mut inner = self.inner.write();
            for link in [&stop_area.parent_id, &stop_area.referent_id]
                .into_iter()
                .flatten()
            {
                if *link == *stop_area.id() || inner.reaches(link, stop_area.id()) {
                    return Err(ModelError::ReferentCycle(stop_area.id().to_string()));
                }
            }
            let existed = match inner.by_id.remove(stop_area.id()) {
                Some(previous) => {
                    inner.unindex(&previous);
                    true
                }
                None => false,
            };
            inner.index(stop_area);
            inner
                .by_id
                .insert(stop_area.id().clone(), stop_area.clone());
            if existed {
                ChangeKind::Updated
            } else {
                ChangeKind::Created
            }
        };
        self.events
            .publish(ModelEventKind::StopArea, stop_area.id().to_string(), change);
        Ok(())
    }

    pub fn delete(&self, stop_area: &StopArea) -> bool {
        let removed = {
            let mut inner = self.inner.write();
            match inner.by_id.remove(stop_area.id()) {
                Some(previous) => {
                    inner.unindex(&previous);
                    true
                }
                None => false,
            }
        };
        if removed {
            self.events.publish(
                ModelEventKind::StopArea,
                stop_area.id().to_string(),
                ChangeKind::Deleted,
            );
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::{StopArea, StopAreaStore};
    use crate::identifier::ObjectId;
    use crate::model::LineId;

    fn saved(store: &StopAreaStore, configure: impl FnOnce(&mut StopArea)) -> StopArea {
        let mut stop_area = StopArea::new();
        configure(&mut stop_area);
        store.save(&mut stop_area).expect("save should succeed");
        stop_area
    }

    #[test]
    fn save_then_find_returns_an_equal_copy() {
        let store = StopAreaStore::new();
        let stop_area = saved(&store, |stop_area| {
            stop_area.name = "Gare de Lyon".to_string();
            stop_area.line_ids = vec![LineId::new("line-1")];
            stop_area.set_object_id(ObjectId::new("external", "stop:1"));
        });

        let found = store.find(stop_area.id()).expect("stop area should be found");
        assert_eq!(found.name, "Gare de Lyon");
        assert_eq!(found.line_ids, vec![LineId::new("line-1")]);
        assert_eq!(
            found.object_id("external"),
            Some(ObjectId::new("external", "stop:1"))
        );
    }

    #[test]
    fn find_by_line_id_follows_saves() {
        let store = StopAreaStore::new();
        let line = LineId::new("line-7");
        let stop_area = saved(&store, |stop_area| {
            stop_area.line_ids = vec![line.clone()];
        });
        saved(&store, |_| {});

        let matches = store.find_by_line_id(&line);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id(), stop_area.id());
    }

    #[test]
    fn monitored_is_derived_from_origins() {
        let mut stop_area = StopArea::new();
        assert!(!stop_area.monitored());

        stop_area.set_origin("partner-a", true);
        stop_area.set_origin("partner-b", false);
        assert!(stop_area.monitored());

        stop_area.set_origin("partner-a", false);
        assert!(!stop_area.monitored());
        assert_eq!(
            stop_area.origins().partners_down(),
            vec!["partner-a".to_string(), "partner-b".to_string()]
        );
    }

    #[test]
    fn family_traversal_survives_reference_cycles() {
        let store = StopAreaStore::new();
        let parent = saved(&store, |_| {});
        let mut child = StopArea::new();
        child.parent_id = Some(parent.id().clone());
        store.save(&mut child).unwrap();

        let family = store.find_family(parent.id());
        assert_eq!(family.len(), 2);

        let ascendants = store.find_ascendants(child.id());
        assert_eq!(ascendants.len(), 2);
    }

    #[test]
    fn save_rejects_a_referent_cycle() {
        let store = StopAreaStore::new();
        let first = saved(&store, |_| {});
        let second = saved(&store, |stop_area| {
            stop_area.referent_id = Some(first.id().clone());
        });

        let mut first = store.find(first.id()).unwrap();
        first.referent_id = Some(second.id().clone());

        assert!(store.save(&mut first).is_err());
    }

    #[test]
    fn referent_object_id_wins_over_self() {
        let store = StopAreaStore::new();
        let referent = saved(&store, |stop_area| {
            stop_area.set_object_id(ObjectId::new("external", "referent:1"));
        });
        let stop_area = saved(&store, |stop_area| {
            stop_area.referent_id = Some(referent.id().clone());
            stop_area.set_object_id(ObjectId::new("external", "self:1"));
        });

        assert_eq!(
            store.referent_or_self_object_id(&stop_area, "external"),
            Some(ObjectId::new("external", "referent:1"))
        );
    }
}
