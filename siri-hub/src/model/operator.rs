//! Transit operators.

use crate::error::ModelError;
use crate::identifier::{ObjectId, ObjectIds};
use crate::model::event::{ChangeKind, EventSender, ModelEventKind};
use crate::model::{ModelEntity, ObjectIdIndex, OperatorId};
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Clone, Debug, Default)]
pub struct Operator {
    id: OperatorId,
    object_ids: ObjectIds,
    pub name: String,
}

impl Operator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(&self) -> &OperatorId {
        &self.id
    }

    pub fn object_id(&self, kind: &str) -> Option<ObjectId> {
        self.object_ids.get(kind)
    }

    pub fn set_object_id(&mut self, object_id: ObjectId) {
        self.object_ids.set(object_id);
    }
}

impl ModelEntity for Operator {
    type Id = OperatorId;

    fn id(&self) -> &OperatorId {
        &self.id
    }

    fn set_id(&mut self, id: OperatorId) {
        self.id = id;
    }

    fn has_id(&self) -> bool {
        !self.id.is_empty()
    }

    fn random_id() -> OperatorId {
        OperatorId::random()
    }

    fn object_ids(&self) -> &ObjectIds {
        &self.object_ids
    }
}

#[derive(Default)]
struct OperatorStoreInner {
    by_id: HashMap<OperatorId, Operator>,
    by_object_id: ObjectIdIndex<OperatorId>,
}

pub struct OperatorStore {
    inner: RwLock<OperatorStoreInner>,
    events: EventSender,
}

impl OperatorStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: RwLock::new(OperatorStoreInner::default()),
            events: EventSender::default(),
        }
    }

    pub(crate) fn attach_events(&self, sender: UnboundedSender<crate::model::ModelEvent>) {
        self.events.attach(sender);
    }

    pub fn find(&self, id: &OperatorId) -> Option<Operator> {
        if id.is_empty() {
            return None;
        }
        self.inner.read().by_id.get(id).cloned()
    }

    pub fn find_by_object_id(&self, object_id: &ObjectId) -> Option<Operator> {
        let inner = self.inner.read();
        let id = inner.by_object_id.get(object_id)?;
        inner.by_id.get(id).cloned()
    }

    pub fn find_all(&self) -> Vec<Operator> {
        self.inner.read().by_id.values().cloned().collect()
    }

    pub fn save(&self, operator: &mut Operator) -> Result<(), ModelError> {
        if !operator.has_id() {
            operator.set_id(OperatorId::random());
        }
        let change = {
            let mut inner = self.inner.write();
            let existed = match inner.by_id.remove(operator.id()) {
                Some(previous) => {
                    let id = previous.id().clone();
                    inner.by_object_id.remove(previous.object_ids(), &id);
                    true
                }
                None => false,
            };
            let id = operator.id().clone();
            inner.by_object_id.insert(operator.object_ids(), &id);
            inner.by_id.insert(id, operator.clone());
            if existed {
                ChangeKind::Updated
            } else {
                ChangeKind::Created
            }
        };
        self.events
            .publish(ModelEventKind::Operator, operator.id().to_string(), change);
        Ok(())
    }

    pub fn delete(&self, operator: &Operator) -> bool {
        let removed = {
            let mut inner = self.inner.write();
            match inner.by_id.remove(operator.id()) {
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
                ModelEventKind::Operator,
                operator.id().to_string(),
                ChangeKind::Deleted,
            );
        }
        removed
    }
}
