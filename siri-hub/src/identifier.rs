//! External identifiers and the per-partner identifier generators.

use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// A `(kind, value)` pair naming an entity in one identifier namespace.
///
/// `kind` is typically a partner's `remote_objectid_kind` setting, the
/// `"internal"` namespace, or the `"_default"` fallback namespace.
#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct ObjectId {
    kind: String,
    value: String,
}

impl ObjectId {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

/// Identifier namespaces carried by an entity: at most one value per kind.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ObjectIds {
    by_kind: HashMap<String, String>,
}

impl ObjectIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: &str) -> Option<ObjectId> {
        self.by_kind
            .get(kind)
            .map(|value| ObjectId::new(kind, value.clone()))
    }

    /// Inserts or replaces this entity's identifier for the given kind.
    pub fn set(&mut self, object_id: ObjectId) {
        self.by_kind.insert(object_id.kind, object_id.value);
    }

    pub fn is_empty(&self) -> bool {
        self.by_kind.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.by_kind
            .iter()
            .map(|(kind, value)| ObjectId::new(kind.clone(), value.clone()))
    }
}

impl FromIterator<ObjectId> for ObjectIds {
    fn from_iter<T: IntoIterator<Item = ObjectId>>(iter: T) -> Self {
        let mut ids = Self::new();
        for object_id in iter {
            ids.set(object_id);
        }
        ids
    }
}

/// Inputs for [`IdentifierGenerator::new_identifier`].
#[derive(Clone, Debug, Default)]
pub struct IdentifierAttributes<'a> {
    pub kind: &'a str,
    pub default: &'a str,
}

/// Expands an identifier template carrying `{Type}`, `{Default}` and `{UUID}`
/// placeholders. Partners configure one pattern per generated-identifier
/// family (`generators.*` settings).
#[derive(Clone, Debug)]
pub struct IdentifierGenerator {
    pattern: String,
}

pub const MESSAGE_IDENTIFIER: &str = "message_identifier";
pub const RESPONSE_MESSAGE_IDENTIFIER: &str = "response_message_identifier";
pub const REFERENCE_IDENTIFIER: &str = "reference_identifier";
pub const REFERENCE_STOP_AREA_IDENTIFIER: &str = "reference_stop_area_identifier";
pub const SUBSCRIPTION_IDENTIFIER: &str = "subscription_identifier";

impl IdentifierGenerator {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }

    /// Built-in pattern when the partner does not configure one.
    pub fn default_for(family: &str) -> Self {
        let pattern = match family {
            MESSAGE_IDENTIFIER | RESPONSE_MESSAGE_IDENTIFIER | SUBSCRIPTION_IDENTIFIER => "{UUID}",
            _ => "{Type}:{Default}",
        };
        Self::new(pattern)
    }

    pub fn new_identifier(&self, attributes: IdentifierAttributes<'_>) -> String {
        let mut identifier = self.pattern.clone();
        if identifier.contains("{UUID}") {
            identifier = identifier.replace("{UUID}", &Uuid::new_v4().to_string());
        }
        identifier
            .replace("{Type}", attributes.kind)
            .replace("{Default}", attributes.default)
    }

    pub fn new_message_identifier(&self) -> String {
        self.new_identifier(IdentifierAttributes::default())
    }
}

#[cfg(test)]
mod tests {
    use super::{IdentifierAttributes, IdentifierGenerator, ObjectId, ObjectIds};

    #[test]
    fn one_identifier_per_kind() {
        let mut ids = ObjectIds::new();
        ids.set(ObjectId::new("source", "a"));
        ids.set(ObjectId::new("source", "b"));

        assert_eq!(ids.get("source").map(|id| id.value().to_string()), Some("b".into()));
        assert_eq!(ids.iter().count(), 1);
    }

    #[test]
    fn generator_expands_type_and_default() {
        let generator = IdentifierGenerator::new("{Type}::{Default}:LOC");
        let identifier = generator.new_identifier(IdentifierAttributes {
            kind: "VehicleJourney",
            default: "vj-1",
        });

        assert_eq!(identifier, "VehicleJourney::vj-1:LOC");
    }

    #[test]
    fn generator_expands_uuid_to_unique_values() {
        let generator = IdentifierGenerator::default_for(super::MESSAGE_IDENTIFIER);

        let first = generator.new_message_identifier();
        let second = generator.new_message_identifier();

        assert_ne!(first, second);
        assert_eq!(first.len(), 36);
    }
}
