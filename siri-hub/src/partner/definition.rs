//! Admin-facing partner payload validated before a partner is persisted.

use crate::connector::connector_factory;
use crate::error::{ValidationErrors, ERROR_BLANK, ERROR_UNIQUE};
use crate::partner::registry::PartnerRegistry;
use crate::partner::{settings, PartnerId};
use std::collections::BTreeMap;

/// What an admin caller submits; nothing is applied until
/// [`PartnerRegistry::save_definition`] validates it.
#[derive(Clone, Debug, Default)]
pub struct PartnerDefinition {
    pub id: Option<PartnerId>,
    pub slug: String,
    pub settings: BTreeMap<String, String>,
    pub connector_types: Vec<String>,
}

impl PartnerDefinition {
    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    /// Used by connector factories to require a setting.
    pub fn require_setting(&self, key: &str, errors: &mut ValidationErrors) -> bool {
        if self.setting(key).is_some() {
            true
        } else {
            errors.add_setting(key, ERROR_BLANK);
            false
        }
    }

    pub(crate) fn validate(&self, registry: &PartnerRegistry) -> ValidationErrors {
        let mut errors = ValidationErrors::new();

        if self.slug.is_empty() {
            errors.add("Slug", ERROR_BLANK);
        }

        for other in registry.find_all() {
            if Some(other.id()) == self.id {
                continue;
            }
            if !self.slug.is_empty() && other.slug().as_str() == self.slug {
                errors.add("Slug", ERROR_UNIQUE);
            }
            if let Some(credential) = self.setting(settings::LOCAL_CREDENTIAL) {
                if other.local_credential().as_deref() == Some(credential) {
                    errors.add_setting(settings::LOCAL_CREDENTIAL, ERROR_UNIQUE);
                }
            }
        }

        // Unknown tags are ignored; known factories check their settings.
        for tag in &self.connector_types {
            if let Some(factory) = connector_factory(tag) {
                (factory.validate)(self, &mut errors);
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::PartnerDefinition;
    use crate::error::{ERROR_BLANK, ERROR_UNIQUE};
    use crate::partner::registry::PartnerRegistry;
    use crate::partner::settings;

    fn registry() -> std::sync::Arc<PartnerRegistry> {
        PartnerRegistry::new(crate::partner::tests::test_context())
    }

    #[test]
    fn blank_slug_is_rejected() {
        let registry = registry();
        let definition = PartnerDefinition::default();

        let errors = definition.validate(&registry);
        assert_eq!(errors.get("Slug"), [ERROR_BLANK.to_string()]);
    }

    #[test]
    fn duplicate_slug_and_credential_are_rejected() {
        let registry = registry();
        let existing = PartnerDefinition {
            slug: "slug".to_string(),
            settings: [(settings::LOCAL_CREDENTIAL.to_string(), "cred".to_string())].into(),
            ..Default::default()
        };
        registry
            .save_definition(existing)
            .expect("first partner should save");

        let duplicate = PartnerDefinition {
            slug: "slug".to_string(),
            settings: [(settings::LOCAL_CREDENTIAL.to_string(), "cred".to_string())].into(),
            ..Default::default()
        };
        let errors = duplicate.validate(&registry);

        assert_eq!(errors.get("Slug"), [ERROR_UNIQUE.to_string()]);
        assert_eq!(
            errors.get("Settings[\"local_credential\"]"),
            [ERROR_UNIQUE.to_string()]
        );
    }

    #[test]
    fn collector_factories_require_their_settings() {
        let registry = registry();
        let definition = PartnerDefinition {
            slug: "collector".to_string(),
            connector_types: vec!["siri-stop-monitoring-request-collector".to_string()],
            ..Default::default()
        };

        let errors = definition.validate(&registry);
        assert!(!errors.get("Settings[\"remote_objectid_kind\"]").is_empty());
        assert!(!errors.get("Settings[\"remote_url\"]").is_empty());
        assert!(!errors.get("Settings[\"remote_credential\"]").is_empty());
    }

    #[test]
    fn unknown_connector_tags_are_ignored() {
        let registry = registry();
        let definition = PartnerDefinition {
            slug: "partner".to_string(),
            connector_types: vec![
                "unexistant-factory".to_string(),
                "test-check-status-client".to_string(),
            ],
            ..Default::default()
        };

        assert!(definition.validate(&registry).is_empty());
    }
}
