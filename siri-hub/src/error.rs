//! Error types crossing the hub's internal boundaries.

use std::collections::BTreeMap;
use thiserror::Error;

pub const ERROR_BLANK: &str = "errors.blank";
pub const ERROR_UNIQUE: &str = "errors.unique";
pub const ERROR_PRESENT: &str = "errors.present";
pub const ERROR_CYCLE: &str = "errors.cycle";

/// Field-indexed validation failures, returned to the admin caller as
/// `{field: [error_tag]}`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ValidationErrors {
    by_field: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, tag: &str) {
        let tags = self.by_field.entry(field.into()).or_default();
        let tag = tag.to_string();
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }

    pub fn add_setting(&mut self, key: &str, tag: &str) {
        self.add(format!("Settings[\"{key}\"]"), tag);
    }

    pub fn is_empty(&self) -> bool {
        self.by_field.is_empty()
    }

    pub fn get(&self, field: &str) -> &[String] {
        self.by_field.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.by_field
            .iter()
            .map(|(field, tags)| (field.as_str(), tags.as_slice()))
    }
}

/// Transport-layer failures; logged to audit, never propagated across the
/// referential boundary.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("remote returned HTTP {0}")]
    Http(u16),
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("referent chain cycles through {0}")]
    ReferentCycle(String),
    #[error("load failed: {0}")]
    Load(String),
}

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("empty import file")]
    EmptyFile,
    #[error("couldn't import anything, import raised {0} errors")]
    NothingImported(usize),
    #[error("error while opening file: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::{ValidationErrors, ERROR_BLANK, ERROR_UNIQUE};

    #[test]
    fn errors_accumulate_per_field_without_duplicates() {
        let mut errors = ValidationErrors::new();
        errors.add("Slug", ERROR_BLANK);
        errors.add("Slug", ERROR_BLANK);
        errors.add_setting("local_credential", ERROR_UNIQUE);

        assert_eq!(errors.get("Slug"), [ERROR_BLANK.to_string()]);
        assert_eq!(
            errors.get("Settings[\"local_credential\"]"),
            [ERROR_UNIQUE.to_string()]
        );
        assert!(!errors.is_empty());
    }
}
