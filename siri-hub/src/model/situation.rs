//! General-message situations.

use crate::error::ModelError;
use crate::identifier::{ObjectId, ObjectIds};
use crate::model::event::{ChangeKind, EventSender, ModelEventKind};
use crate::model::{LineId, ModelEntity, ObjectIdIndex, SituationId, StopAreaId};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedSender;

pub use crate::model::event::SituationMessage;

/// Model-side affected scope, resolved to internal identifiers.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SituationScope {
    Line(LineId),
    StopArea(StopAreaId),
    LineSection {
        first_stop: StopAreaId,
        last_stop: StopAreaId,
        line: LineId,
    },
}

#[derive(Clone, Debug, Default)]
pub struct Situation {
    id: SituationId,
    object_ids: ObjectIds,
    pub origin: String,
    pub recorded_at: Option<DateTime<Utc>>,
    pub version: i64,
    pub channel: String,
    pub valid_until: Option<DateTime<Utc>>,
    pub messages: Vec<SituationMessage>,
    pub scopes: Vec<SituationScope>,
}

impl Situation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(&self) -> &SituationId {
        &self.id
    }

    pub fn object_id(&self, kind: &str) -> Option<ObjectId> {
        self.object_ids.get(kind)
    }

    pub fn set_object_id(&mut self, object_id: ObjectId) {
        self.object_ids.set(object_id);
    }

    /// Still worth broadcasting at `now`.
    pub fn valid_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_until.map(|until| until > now).unwrap_or(true)
    }

    pub fn affects_line(&self, line_id: &LineId) -> bool {
        self.scopes.iter().any(|scope| match scope {
            SituationScope::Line(id) => id == line_id,
            SituationScope::LineSection { line, .. } => line == line_id,
            SituationScope::StopArea(_) => false,
        })
    }

    pub fn affects_stop_area(&self, stop_area_id: &StopAreaId) -> bool {
        self.scopes.iter().any(|scope| match scope {
            SituationScope::StopArea(id) => id == stop_area_id,
            SituationScope::LineSection {
                first_stop,
                last_stop,
                ..
            } => first_stop == stop_area_id || last_stop == stop_area_id,
            SituationScope::Line(_) => false,
        })
    }
}

impl ModelEntity for Situation {
    type Id = SituationId;

    fn id(&self) -> &SituationId {
        &self.id
    }

    fn set_id(&mut self, id: SituationId) {
        self.id = id;
    }

    fn has_id(&self) -> bool {
        !self.id.is_empty()
    }

    fn random_id() -> SituationId {
        SituationId::random()
    }

    fn object_ids(&self) -> &ObjectIds {
        &self.object_ids
    }
}

#[derive(Default)]
struct SituationStoreInner {
    by_id: HashMap<SituationId, Situation>,
    by_object_id: ObjectIdIndex<SituationId>,
}

pub struct SituationStore {
    inner: RwLock<SituationStoreInner>,
    events: EventSender,
}

impl SituationStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: RwLock::new(SituationStoreInner::default()),
            events: EventSender::default(),
        }
    }

    pub(crate) fn attach_events(&self, sender: UnboundedSender<crate::model::ModelEvent>) {
        self.events.attach(sender);
    }

    pub fn find(&self, id: &SituationId) -> Option<Situation> {
        if id.is_empty() {
            return None;
        }
        self.inner.read().by_id.get(id).cloned()
    }

    pub fn find_by_object_id(&self, object_id: &ObjectId) -> Option<Situation> {
        let inner = self.inner.read();
        let id = inner.by_object_id.get(object_id)?;
        inner.by_id.get(id).cloned()
    }

    pub fn find_all(&self) -> Vec<Situation> {
        self.inner.read().by_id.values().cloned().collect()
    }

    pub fn save(&self, situation: &mut Situation) -> Result<(), ModelError> {
        if !situation.has_id() {
            situation.set_id(SituationId::random());
        }
        let change = {
            let mut inner = self.inner.write();
            let existed = match inner.by_id.remove(situation.id()) {
                Some(previous) => {
                    let id = previous.id().clone();
                    inner.by_object_id.remove(previous.object_ids(), &id);
                    true
                }
                None => false,
            };
            let id = situation.id().clone();
            inner.by_object_id.insert(situation.object_ids(), &id);
            inner.by_id.insert(id, situation.clone());
            if existed {
                ChangeKind::Updated
            } else {
                ChangeKind::Created
            }
        };
        self.events
            .publish(ModelEventKind::Situation, situation.id().to_string(), change);
        Ok(())
    }

    pub fn delete(&self, situation: &Situation) -> bool {
        let removed = {
            let mut inner = self.inner.write();
            match inner.by_id.remove(situation.id()) {
                Some(previous) => {
                    let id = previous.id().clone();
                    inner.by_object_id.remove(previous.object_ids(), &id);
                    true
                }
                None => false,
            }
        };
        if removed {
            self.events.publish(
                ModelEventKind::Situation,
                situation.id().to_string(),
                ChangeKind::Deleted,
            );
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::{Situation, SituationScope, SituationStore};
    use crate::model::{LineId, StopAreaId};

    #[test]
    fn scope_matching_covers_lines_sections_and_stops() {
        let mut situation = Situation::new();
        situation.scopes = vec![
            SituationScope::Line(LineId::new("line-1")),
            SituationScope::LineSection {
                first_stop: StopAreaId::new("sa-1"),
                last_stop: StopAreaId::new("sa-2"),
                line: LineId::new("line-2"),
            },
        ];

        assert!(situation.affects_line(&LineId::new("line-1")));
        assert!(situation.affects_line(&LineId::new("line-2")));
        assert!(!situation.affects_line(&LineId::new("line-3")));
        assert!(situation.affects_stop_area(&StopAreaId::new("sa-2")));
        assert!(!situation.affects_stop_area(&StopAreaId::new("sa-9")));
    }

    #[test]
    fn save_assigns_an_identifier() {
        let store = SituationStore::new();
        let mut situation = Situation::new();
        situation.version = 2;

        store.save(&mut situation).expect("save should succeed");
        assert!(!situation.id().is_empty());
        assert_eq!(store.find(situation.id()).unwrap().version, 2);
    }
}
