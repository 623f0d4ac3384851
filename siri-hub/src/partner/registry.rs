//! Partner registry: lifecycle, lookups and priority ordering.

use crate::error::{ModelError, ValidationErrors};
use crate::guardian::PartnersGuardian;
use crate::partner::{
    definition::PartnerDefinition, Partner, PartnerContext, PartnerId, PartnerSlug, Settings,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Persistence-side collaborator providing the stored partner definitions
/// of one referential.
#[async_trait]
pub trait PartnerLoader: Send + Sync {
    async fn load(&self, referential_slug: &str) -> Result<Vec<PartnerDefinition>, ModelError>;
}

pub struct PartnerRegistry {
    context: Arc<PartnerContext>,
    by_id: RwLock<HashMap<PartnerId, Arc<Partner>>>,
    guardian: PartnersGuardian,
}

impl PartnerRegistry {
    pub fn new(context: Arc<PartnerContext>) -> Arc<Self> {
        Arc::new_cyclic(|registry| Self {
            context: context.clone(),
            by_id: RwLock::new(HashMap::new()),
            guardian: PartnersGuardian::new(registry.clone(), context),
        })
    }

    pub fn context(&self) -> &Arc<PartnerContext> {
        &self.context
    }

    pub fn guardian(&self) -> &PartnersGuardian {
        &self.guardian
    }

    /// Builds an unregistered partner; it only appears in lookups after
    /// [`PartnerRegistry::save`].
    pub fn new_partner(&self, slug: PartnerSlug) -> Arc<Partner> {
        Partner::new(slug, self.context.clone())
    }

    pub fn find(&self, id: &PartnerId) -> Option<Arc<Partner>> {
        self.by_id.read().get(id).cloned()
    }

    pub fn find_by_slug(&self, slug: &PartnerSlug) -> Option<Arc<Partner>> {
        self.by_id
            .read()
            .values()
            .find(|partner| partner.slug() == *slug)
            .cloned()
    }

    pub fn find_by_local_credential(&self, credential: &str) -> Option<Arc<Partner>> {
        self.by_id
            .read()
            .values()
            .find(|partner| partner.local_credential().as_deref() == Some(credential))
            .cloned()
    }

    pub fn find_all(&self) -> Vec<Arc<Partner>> {
        self.by_id.read().values().cloned().collect()
    }

    /// All partners, highest `collect.priority` first. Ties break on slug so
    /// the order is stable.
    pub fn find_all_by_collect_priority(&self) -> Vec<Arc<Partner>> {
        let mut partners = self.find_all();
        partners.sort_by(|a, b| {
            b.collect_priority()
                .cmp(&a.collect_priority())
                .then_with(|| a.slug().cmp(&b.slug()))
        });
        partners
    }

    pub fn save(&self, partner: &Arc<Partner>) -> bool {
        if partner.id().is_empty() {
            partner.set_id(PartnerId::random());
        }
        partner.refresh_connectors();
        self.by_id
            .write()
            .insert(partner.id(), partner.clone());
        true
    }

    /// Validates and applies an admin definition; on failure nothing is
    /// persisted and the `{field: [error_tag]}` map is returned.
    pub fn save_definition(
        &self,
        definition: PartnerDefinition,
    ) -> Result<Arc<Partner>, ValidationErrors> {
        let errors = definition.validate(self);
        if !errors.is_empty() {
            return Err(errors);
        }

        let partner = definition
            .id
            .as_ref()
            .and_then(|id| self.find(id))
            .unwrap_or_else(|| self.new_partner(PartnerSlug::new(definition.slug.clone())));

        partner.set_slug(PartnerSlug::new(definition.slug.clone()));
        partner.replace_settings(Settings::from_iter(definition.settings.clone()));
        partner.set_connector_types(definition.connector_types.clone());
        self.save(&partner);
        Ok(partner)
    }

    pub fn delete(&self, partner: &Arc<Partner>) -> bool {
        partner.stop();
        self.by_id.write().remove(&partner.id()).is_some()
    }

    /// Repopulates the registry from persistence. Stored definitions were
    /// validated when first saved, so they are applied directly.
    pub async fn load(&self, loader: &dyn PartnerLoader) -> Result<(), ModelError> {
        for definition in loader.load(&self.context.referential_slug).await? {
            let partner = self.new_partner(PartnerSlug::new(definition.slug.clone()));
            if let Some(id) = &definition.id {
                partner.set_id(id.clone());
            }
            partner.replace_settings(Settings::from_iter(definition.settings));
            partner.set_connector_types(definition.connector_types);
            self.save(&partner);
        }
        Ok(())
    }

    /// Starts the liveness guardian and every partner's workers.
    pub fn start(self: &Arc<Self>) {
        self.guardian.start();
        for partner in self.find_all() {
            partner.start();
        }
    }

    pub fn stop(&self) {
        for partner in self.find_all() {
            partner.stop();
        }
        self.guardian.stop();
    }
}

#[cfg(test)]
mod tests {
    use crate::partner::tests::test_context;
    use crate::partner::{settings, PartnerDefinition, PartnerRegistry, PartnerSlug};

    #[test]
    fn save_assigns_an_identifier_and_makes_the_partner_findable() {
        let registry = PartnerRegistry::new(test_context());
        let partner = registry.new_partner(PartnerSlug::from("partner"));
        assert!(partner.id().is_empty());

        assert!(registry.save(&partner));
        assert!(!partner.id().is_empty());
        assert!(registry.find(&partner.id()).is_some());
        assert!(registry.find_by_slug(&PartnerSlug::from("partner")).is_some());
    }

    #[test]
    fn find_by_local_credential_matches_settings() {
        let registry = PartnerRegistry::new(test_context());
        let partner = registry.new_partner(PartnerSlug::from("partner"));
        partner.set_setting(settings::LOCAL_CREDENTIAL, "cred");
        registry.save(&partner);

        let found = registry
            .find_by_local_credential("cred")
            .expect("partner should be found");
        assert_eq!(found.id(), partner.id());
        assert!(registry.find_by_local_credential("other").is_none());
    }

    #[test]
    fn partners_are_ordered_by_descending_priority() {
        let registry = PartnerRegistry::new(test_context());

        let first = registry.new_partner(PartnerSlug::from("first"));
        first.set_setting(settings::COLLECT_PRIORITY, "2");
        registry.save(&first);

        let second = registry.new_partner(PartnerSlug::from("second"));
        second.set_setting(settings::COLLECT_PRIORITY, "1");
        registry.save(&second);

        let ordered = registry.find_all_by_collect_priority();
        assert_eq!(ordered[0].slug(), PartnerSlug::from("first"));
        assert_eq!(ordered[1].slug(), PartnerSlug::from("second"));
    }

    #[test]
    fn save_definition_rejects_invalid_payloads() {
        let registry = PartnerRegistry::new(test_context());

        let result = registry.save_definition(PartnerDefinition::default());
        assert!(result.is_err());
        assert!(registry.find_all().is_empty());
    }

    #[test]
    fn deleted_partners_are_not_findable() {
        let registry = PartnerRegistry::new(test_context());
        let partner = registry.new_partner(PartnerSlug::from("partner"));
        registry.save(&partner);

        assert!(registry.delete(&partner));
        assert!(registry.find(&partner.id()).is_none());
    }
}
