//! Referentials: one tenant's model, partners, dispatcher, engine and
//! guardians, assembled and driven together.

use crate::audit::AuditSink;
use crate::broadcast::BroadcastEngine;
use crate::clock::Clock;
use crate::collect::{CollectDispatcher, UpdateEventHub};
use crate::error::{ValidationErrors, ERROR_BLANK, ERROR_UNIQUE};
use crate::guardian::ModelGuardian;
use crate::model::updater::ModelUpdater;
use crate::model::{Model, ModelLoader};
use crate::partner::{PartnerContext, PartnerRegistry};
use crate::transport::SiriTransport;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ReferentialId(String);

impl ReferentialId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReferentialId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ReferentialSlug(String);

impl ReferentialSlug {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReferentialSlug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ReferentialSlug {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Process-wide collaborators shared by every referential.
#[derive(Clone)]
pub struct ReferentialServices {
    pub clock: Arc<dyn Clock>,
    pub transport: Arc<dyn SiriTransport>,
    pub audit: AuditSink,
    pub loader: Option<Arc<dyn ModelLoader>>,
}

/// One tenant: isolated model, partners, subscriptions and workers.
pub struct Referential {
    id: ReferentialId,
    slug: ReferentialSlug,
    settings: RwLock<BTreeMap<String, String>>,
    model: Arc<Model>,
    partners: Arc<PartnerRegistry>,
    dispatcher: Arc<CollectDispatcher>,
    engine: Arc<BroadcastEngine>,
    model_guardian: Arc<ModelGuardian>,
    started_at: RwLock<Option<DateTime<Utc>>>,
}

impl Referential {
    fn build(slug: ReferentialSlug, services: &ReferentialServices) -> Arc<Self> {
        let model = Arc::new(Model::new());
        let update_hub = Arc::new(UpdateEventHub::new());
        let context = Arc::new(PartnerContext {
            referential_slug: slug.to_string(),
            model: model.clone(),
            clock: services.clock.clone(),
            audit: services.audit.clone(),
            transport: services.transport.clone(),
            update_hub: update_hub.clone(),
        });
        let partners = PartnerRegistry::new(context);
        let dispatcher = Arc::new(CollectDispatcher::new(partners.clone()));

        let engine = Arc::new(BroadcastEngine::new(partners.clone()));
        model.attach_event_sender(engine.event_sender());

        // Collected updates land in the model through the updater.
        let updater = Arc::new(ModelUpdater::new(model.clone(), services.clock.clone()));
        {
            let updater = updater.clone();
            update_hub.handle_stop_area_update_event(move |event| {
                updater.handle_stop_area_update_event(event);
            });
        }
        update_hub.handle_situation_update_event(move |updates| {
            updater.handle_situation_update_events(updates);
        });

        let model_guardian = Arc::new(ModelGuardian::new(
            slug.to_string(),
            model.clone(),
            dispatcher.clone(),
            services.loader.clone(),
            services.clock.clone(),
        ));

        Arc::new(Self {
            id: ReferentialId::random(),
            slug,
            settings: RwLock::new(BTreeMap::new()),
            model,
            partners,
            dispatcher,
            engine,
            model_guardian,
            started_at: RwLock::new(None),
        })
    }

    pub fn id(&self) -> &ReferentialId {
        &self.id
    }

    pub fn slug(&self) -> &ReferentialSlug {
        &self.slug
    }

    pub fn setting(&self, key: &str) -> Option<String> {
        self.settings.read().get(key).cloned()
    }

    pub fn set_setting(&self, key: impl Into<String>, value: impl Into<String>) {
        self.settings.write().insert(key.into(), value.into());
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn partners(&self) -> &Arc<PartnerRegistry> {
        &self.partners
    }

    pub fn collect_dispatcher(&self) -> &Arc<CollectDispatcher> {
        &self.dispatcher
    }

    pub fn broadcast_engine(&self) -> &Arc<BroadcastEngine> {
        &self.engine
    }

    pub fn model_guardian(&self) -> &Arc<ModelGuardian> {
        &self.model_guardian
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        *self.started_at.read()
    }

    pub fn start(&self) {
        *self.started_at.write() = Some(self.partners.context().clock.now());
        self.partners.start();
        self.model_guardian.start();
        self.engine.start();
    }

    /// Reverse order of `start`.
    pub fn stop(&self) {
        self.engine.stop();
        self.model_guardian.stop();
        self.partners.stop();
    }
}

/// All referentials of the process; slugs are unique here.
pub struct ReferentialRegistry {
    services: ReferentialServices,
    by_id: RwLock<HashMap<ReferentialId, Arc<Referential>>>,
}

impl ReferentialRegistry {
    pub fn new(services: ReferentialServices) -> Self {
        Self {
            services,
            by_id: RwLock::new(HashMap::new()),
        }
    }

    pub fn create(&self, slug: ReferentialSlug) -> Result<Arc<Referential>, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if slug.is_empty() {
            errors.add("Slug", ERROR_BLANK);
        }
        if self.find_by_slug(&slug).is_some() {
            errors.add("Slug", ERROR_UNIQUE);
        }
        if !errors.is_empty() {
            return Err(errors);
        }
        let referential = Referential::build(slug, &self.services);
        self.by_id
            .write()
            .insert(referential.id().clone(), referential.clone());
        Ok(referential)
    }

    pub fn find(&self, id: &ReferentialId) -> Option<Arc<Referential>> {
        self.by_id.read().get(id).cloned()
    }

    pub fn find_by_slug(&self, slug: &ReferentialSlug) -> Option<Arc<Referential>> {
        self.by_id
            .read()
            .values()
            .find(|referential| referential.slug() == slug)
            .cloned()
    }

    pub fn find_all(&self) -> Vec<Arc<Referential>> {
        self.by_id.read().values().cloned().collect()
    }

    pub fn delete(&self, referential: &Arc<Referential>) -> bool {
        referential.stop();
        self.by_id.write().remove(referential.id()).is_some()
    }

    pub fn start(&self) {
        for referential in self.find_all() {
            referential.start();
        }
    }

    pub fn stop(&self) {
        for referential in self.find_all() {
            referential.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ReferentialRegistry, ReferentialServices, ReferentialSlug};
    use crate::audit::AuditSink;
    use crate::clock::FakeClock;
    use crate::connector::test_support::NullTransport;
    use std::sync::Arc;

    fn registry() -> ReferentialRegistry {
        ReferentialRegistry::new(ReferentialServices {
            clock: Arc::new(FakeClock::new()),
            transport: Arc::new(NullTransport),
            audit: AuditSink::disabled(),
            loader: None,
        })
    }

    #[test]
    fn slugs_are_unique_per_process() {
        let registry = registry();

        let first = registry.create(ReferentialSlug::from("transit"));
        assert!(first.is_ok());

        let duplicate = registry.create(ReferentialSlug::from("transit"));
        assert!(duplicate.is_err());

        let blank = registry.create(ReferentialSlug::from(""));
        assert!(blank.is_err());
    }

    #[test]
    fn referentials_are_found_by_id_and_slug() {
        let registry = registry();
        let referential = registry.create(ReferentialSlug::from("transit")).unwrap();

        assert!(registry.find(referential.id()).is_some());
        assert!(registry
            .find_by_slug(&ReferentialSlug::from("transit"))
            .is_some());

        registry.delete(&referential);
        assert!(registry.find(referential.id()).is_none());
    }
}
