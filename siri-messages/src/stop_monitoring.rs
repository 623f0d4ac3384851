//! StopMonitoring request, response and notify payloads.

use crate::common::ErrorCondition;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;

/// GetStopMonitoring request body.
///
/// `preview_interval`, `start_time`, `maximum_stop_visits` and `line_ref`
/// together form the composite visit selector applied by the broadcaster.
#[derive(Clone, Debug, Default)]
pub struct GetStopMonitoring {
    pub message_identifier: String,
    pub requestor_ref: String,
    pub request_timestamp: Option<DateTime<Utc>>,
    pub monitoring_ref: String,
    pub preview_interval: Option<Duration>,
    pub start_time: Option<DateTime<Utc>>,
    pub maximum_stop_visits: Option<usize>,
    pub line_ref: Option<String>,
}

/// One monitored call as delivered to or received from a partner.
///
/// `references` holds identifier fields already expressed in the receiving
/// partner's namespace (`OriginRef`, `DestinationRef`, `OperatorRef`, ...).
#[derive(Clone, Debug, Default)]
pub struct MonitoredStopVisit {
    pub item_identifier: String,
    pub monitoring_ref: String,
    pub stop_point_ref: String,
    pub stop_point_name: String,
    pub line_ref: String,
    pub dated_vehicle_journey_ref: String,
    pub order: u32,
    pub vehicle_at_stop: bool,
    pub destination_display: String,
    pub arrival_status: String,
    pub departure_status: String,
    pub aimed_arrival_time: Option<DateTime<Utc>>,
    pub expected_arrival_time: Option<DateTime<Utc>>,
    pub actual_arrival_time: Option<DateTime<Utc>>,
    pub aimed_departure_time: Option<DateTime<Utc>>,
    pub expected_departure_time: Option<DateTime<Utc>>,
    pub actual_departure_time: Option<DateTime<Utc>>,
    pub recorded_at: DateTime<Utc>,
    pub attributes: BTreeMap<String, String>,
    pub references: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default)]
pub struct StopMonitoringDelivery {
    pub request_message_ref: String,
    pub response_timestamp: Option<DateTime<Utc>>,
    pub status: bool,
    pub error_condition: Option<ErrorCondition>,
    pub monitoring_ref: String,
    pub monitored_stop_visits: Vec<MonitoredStopVisit>,
    /// Item references of visits no longer present at the stop.
    pub cancelled_visit_refs: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct StopMonitoringResponse {
    pub address: String,
    pub producer_ref: String,
    pub response_message_identifier: String,
    pub response_timestamp: Option<DateTime<Utc>>,
    pub delivery: StopMonitoringDelivery,
}

/// Server-initiated delivery for one StopMonitoring subscription.
#[derive(Clone, Debug, Default)]
pub struct NotifyStopMonitoring {
    pub address: String,
    pub producer_ref: String,
    pub response_message_identifier: String,
    pub response_timestamp: Option<DateTime<Utc>>,
    pub subscriber_ref: String,
    pub subscription_identifier: String,
    pub request_message_ref: String,
    pub status: bool,
    pub error_condition: Option<ErrorCondition>,
    pub monitored_stop_visits: Vec<MonitoredStopVisit>,
}
