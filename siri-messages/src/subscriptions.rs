//! Subscription control payloads: subscribe, terminate and the
//! producer-side termination notice.

use crate::common::ErrorCondition;
use chrono::{DateTime, Utc};

/// Service a subscription entry applies to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SubscriptionPayloadKind {
    StopMonitoring,
    GeneralMessage,
    EstimatedTimetable,
    VehicleMonitoring,
}

impl SubscriptionPayloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionPayloadKind::StopMonitoring => "StopMonitoring",
            SubscriptionPayloadKind::GeneralMessage => "GeneralMessage",
            SubscriptionPayloadKind::EstimatedTimetable => "EstimatedTimetable",
            SubscriptionPayloadKind::VehicleMonitoring => "VehicleMonitoring",
        }
    }
}

/// One requested subscription inside a SubscribeRequest.
#[derive(Clone, Debug)]
pub struct SubscriptionRequestEntry {
    pub kind: SubscriptionPayloadKind,
    pub subscriber_ref: String,
    pub subscription_identifier: String,
    pub initial_termination_time: Option<DateTime<Utc>>,
    pub message_identifier: String,
    /// MonitoringRefs or LineRefs, depending on `kind`.
    pub resource_refs: Vec<String>,
    /// ISO-8601 duration below which expected-time moves are not notified.
    pub change_before_updates: Option<String>,
}

#[derive(Clone, Debug)]
pub struct SubscribeRequest {
    pub message_identifier: String,
    pub requestor_ref: String,
    pub request_timestamp: Option<DateTime<Utc>>,
    pub consumer_address: String,
    pub entries: Vec<SubscriptionRequestEntry>,
}

/// Per-resource status inside a SubscriptionResponse.
#[derive(Clone, Debug)]
pub struct ResponseStatus {
    pub request_message_ref: String,
    pub subscriber_ref: String,
    pub subscription_ref: String,
    pub status: bool,
    pub error_condition: Option<ErrorCondition>,
    pub valid_until: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default)]
pub struct SubscriptionResponse {
    pub address: String,
    pub responder_ref: String,
    pub response_message_identifier: String,
    pub request_message_ref: String,
    pub response_timestamp: Option<DateTime<Utc>>,
    pub service_started_time: Option<DateTime<Utc>>,
    pub response_statuses: Vec<ResponseStatus>,
}

#[derive(Clone, Debug, Default)]
pub struct TerminateSubscriptionRequest {
    pub message_identifier: String,
    pub requestor_ref: String,
    pub request_timestamp: Option<DateTime<Utc>>,
    pub subscription_refs: Vec<String>,
    pub cancel_all: bool,
}

/// The 1.3-era DeleteSubscription body is field-compatible with
/// TerminateSubscription.
pub type DeleteSubscriptionRequest = TerminateSubscriptionRequest;

#[derive(Clone, Debug)]
pub struct TerminationStatus {
    pub subscription_ref: String,
    pub status: bool,
    pub error_condition: Option<ErrorCondition>,
}

#[derive(Clone, Debug, Default)]
pub struct TerminateSubscriptionResponse {
    pub responder_ref: String,
    pub request_message_ref: String,
    pub response_timestamp: Option<DateTime<Utc>>,
    pub statuses: Vec<TerminationStatus>,
}

/// Producer-initiated notice that a subscription has been terminated.
#[derive(Clone, Debug)]
pub struct NotifySubscriptionTerminated {
    pub response_timestamp: Option<DateTime<Utc>>,
    pub producer_ref: String,
    pub subscriber_ref: String,
    pub subscription_ref: String,
}
