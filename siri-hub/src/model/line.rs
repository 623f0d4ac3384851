//! Transit lines.

use crate::error::ModelError;
use crate::identifier::{ObjectId, ObjectIds};
use crate::model::attributes::{Attributes, References};
use crate::model::event::{ChangeKind, EventSender, ModelEventKind};
use crate::model::{LineId, ModelEntity, ObjectIdIndex};
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Clone, Debug, Default)]
pub struct Line {
    id: LineId,
    object_ids: ObjectIds,
    pub name: String,
    pub collect_general_messages: bool,
    pub attributes: Attributes,
    pub references: References,
}

impl Line {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(&self) -> &LineId {
        &self.id
    }

    pub fn object_id(&self, kind: &str) -> Option<ObjectId> {
        self.object_ids.get(kind)
    }

    pub fn set_object_id(&mut self, object_id: ObjectId) {
        self.object_ids.set(object_id);
    }
}

impl ModelEntity for Line {
    type Id = LineId;

    fn id(&self) -> &LineId {
        &self.id
    }

    fn set_id(&mut self, id: LineId) {
        self.id = id;
    }

    fn has_id(&self) -> bool {
        !self.id.is_empty()
    }

    fn random_id() -> LineId {
        LineId::random()
    }

    fn object_ids(&self) -> &ObjectIds {
        &self.object_ids
    }
}

#[derive(Default)]
struct LineStoreInner {
    by_id: HashMap<LineId, Line>,
    by_object_id: ObjectIdIndex<LineId>,
}

pub struct LineStore {
    inner: RwLock<LineStoreInner>,
    events: EventSender,
}

impl LineStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: RwLock::new(LineStoreInner::default()),
            events: EventSender::default(),
        }
    }

    pub(crate) fn attach_events(&self, sender: UnboundedSender<crate::model::ModelEvent>) {
        self.events.attach(sender);
    }

    pub fn find(&self, id: &LineId) -> Option<Line> {
        if id.is_empty() {
            return None;
        }
        self.inner.read().by_id.get(id).cloned()
    }

    pub fn find_by_object_id(&self, object_id: &ObjectId) -> Option<Line> {
        let inner = self.inner.read();
        let id = inner.by_object_id.get(object_id)?;
        inner.by_id.get(id).cloned()
    }

    pub fn find_all(&self) -> Vec<Line> {
        self.inner.read().by_id.values().cloned().collect()
    }

    pub fn save(&self, line: &mut Line) -> Result<(), ModelError> {
        if !line.has_id() {
            line.set_id(LineId::random());
        }
        let change = {
            let mut inner = self.inner.write();
            let existed = match inner.by_id.remove(line.id()) {
                Some(previous) => {
                    let id = previous.id().clone();
                    inner.by_object_id.remove(previous.object_ids(), &id);
                    true
                }
                None => false,
            };
            let id = line.id().clone();
            inner.by_object_id.insert(line.object_ids(), &id);
            inner.by_id.insert(id, line.clone());
            if existed {
                ChangeKind::Updated
            } else {
                ChangeKind::Created
            }
        };
        self.events
            .publish(ModelEventKind::Line, line.id().to_string(), change);
        Ok(())
    }

    pub fn delete(&self, line: &Line) -> bool {
        let removed = {
            let mut inner = self.inner.write();
            match inner.by_id.remove(line.id()) {
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
                ModelEventKind::Line,
                line.id().to_string(),
                ChangeKind::Deleted,
            );
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::{Line, LineStore};
    use crate::identifier::ObjectId;

    #[test]
    fn object_id_lookup_follows_save_and_delete() {
        let store = LineStore::new();
        let object_id = ObjectId::new("external", "line:12");
        let mut line = Line::new();
        line.name = "Ligne 12".to_string();
        line.set_object_id(object_id.clone());

        store.save(&mut line).expect("save should succeed");
        let found = store
            .find_by_object_id(&object_id)
            .expect("line should be found");
        assert_eq!(found.name, "Ligne 12");

        store.delete(&line);
        assert!(store.find_by_object_id(&object_id).is_none());
    }
}
