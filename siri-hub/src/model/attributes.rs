//! Free-form attribute and typed reference bags carried by entities.

use crate::identifier::ObjectId;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;

/// Free-form string attributes.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes {
    values: BTreeMap<String, String>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

impl FromIterator<(String, String)> for Attributes {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// A typed pointer from one entity to another, by external identifier.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Reference {
    pub object_id: Option<ObjectId>,
    pub id: Option<String>,
    pub kind: String,
}

impl Reference {
    pub fn new(object_id: ObjectId) -> Self {
        Self {
            object_id: Some(object_id),
            id: None,
            kind: String::new(),
        }
    }

    pub fn with_kind(object_id: ObjectId, kind: impl Into<String>) -> Self {
        Self {
            object_id: Some(object_id),
            id: None,
            kind: kind.into(),
        }
    }

    /// Hex SHA-1 of the referenced identifier, used to derive stable
    /// generated identifiers for unmapped references.
    pub fn sha1_digest(&self) -> String {
        let source = self
            .object_id
            .as_ref()
            .map(ObjectId::to_string)
            .unwrap_or_default();
        let digest = Sha1::digest(source.as_bytes());
        digest.iter().map(|byte| format!("{byte:02x}")).collect()
    }
}

/// Named references (`OriginRef`, `DestinationRef`, `OperatorRef`, ...).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct References {
    values: BTreeMap<String, Reference>,
}

impl References {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Reference> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, reference: Reference) {
        self.values.insert(key.into(), reference);
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Reference)> {
        self.values
            .iter()
            .map(|(key, reference)| (key.as_str(), reference))
    }
}

#[cfg(test)]
mod tests {
    use super::Reference;
    use crate::identifier::ObjectId;

    #[test]
    fn sha1_digest_is_stable_per_identifier() {
        let reference = Reference::new(ObjectId::new("external", "stop:1"));
        let other = Reference::new(ObjectId::new("external", "stop:2"));

        assert_eq!(reference.sha1_digest(), reference.sha1_digest());
        assert_ne!(reference.sha1_digest(), other.sha1_digest());
        assert_eq!(reference.sha1_digest().len(), 40);
    }
}
