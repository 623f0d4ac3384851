//! Error condition fields shared by every SIRI delivery.

use serde::{Deserialize, Serialize};
use std::fmt;

/// SIRI error categories surfaced in non-success deliveries.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ErrorType {
    OtherError,
    InvalidDataReferencesError,
    CapabilityNotSupportedError,
    UnknownSubscriptionError,
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorType::OtherError => "OtherError",
            ErrorType::InvalidDataReferencesError => "InvalidDataReferencesError",
            ErrorType::CapabilityNotSupportedError => "CapabilityNotSupportedError",
            ErrorType::UnknownSubscriptionError => "UnknownSubscriptionError",
        };
        f.write_str(name)
    }
}

/// Error block attached to a `Status=false` delivery.
///
/// `error_number` is only meaningful for [`ErrorType::OtherError`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ErrorCondition {
    pub error_type: ErrorType,
    pub error_number: Option<i32>,
    pub error_text: String,
}

impl ErrorCondition {
    pub fn other_error(number: i32, text: impl Into<String>) -> Self {
        Self {
            error_type: ErrorType::OtherError,
            error_number: Some(number),
            error_text: text.into(),
        }
    }

    pub fn invalid_data_references(text: impl Into<String>) -> Self {
        Self {
            error_type: ErrorType::InvalidDataReferencesError,
            error_number: None,
            error_text: text.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorCondition, ErrorType};

    #[test]
    fn other_error_carries_a_number() {
        let condition = ErrorCondition::other_error(1, "producer down");

        assert_eq!(condition.error_type, ErrorType::OtherError);
        assert_eq!(condition.error_number, Some(1));
        assert_eq!(condition.error_type.to_string(), "OtherError");
    }

    #[test]
    fn invalid_data_references_carries_no_number() {
        let condition = ErrorCondition::invalid_data_references("unknown MonitoringRef");

        assert_eq!(
            condition.error_type,
            ErrorType::InvalidDataReferencesError
        );
        assert_eq!(condition.error_number, None);
    }
}
