//! EstimatedTimetable request, response and notify payloads.

use crate::common::ErrorCondition;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Clone, Debug, Default)]
pub struct GetEstimatedTimetable {
    pub message_identifier: String,
    pub requestor_ref: String,
    pub request_timestamp: Option<DateTime<Utc>>,
    pub lines: Vec<String>,
    pub preview_interval: Option<Duration>,
    pub start_time: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default)]
pub struct EstimatedCall {
    pub stop_point_ref: String,
    pub stop_point_name: String,
    pub destination_display: String,
    pub order: u32,
    pub vehicle_at_stop: bool,
    pub arrival_status: String,
    pub departure_status: String,
    pub aimed_arrival_time: Option<DateTime<Utc>>,
    pub expected_arrival_time: Option<DateTime<Utc>>,
    pub aimed_departure_time: Option<DateTime<Utc>>,
    pub expected_departure_time: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default)]
pub struct EstimatedVehicleJourney {
    pub line_ref: String,
    pub dated_vehicle_journey_ref: String,
    pub attributes: BTreeMap<String, String>,
    pub references: BTreeMap<String, String>,
    pub estimated_calls: Vec<EstimatedCall>,
}

#[derive(Clone, Debug, Default)]
pub struct EstimatedJourneyVersionFrame {
    pub recorded_at_time: Option<DateTime<Utc>>,
    pub estimated_vehicle_journeys: Vec<EstimatedVehicleJourney>,
}

#[derive(Clone, Debug, Default)]
pub struct EstimatedTimetableDelivery {
    pub request_message_ref: String,
    pub response_timestamp: Option<DateTime<Utc>>,
    pub status: bool,
    pub error_condition: Option<ErrorCondition>,
    pub estimated_journey_version_frames: Vec<EstimatedJourneyVersionFrame>,
}

#[derive(Clone, Debug, Default)]
pub struct EstimatedTimetableResponse {
    pub address: String,
    pub producer_ref: String,
    pub response_message_identifier: String,
    pub delivery: EstimatedTimetableDelivery,
}

#[derive(Clone, Debug, Default)]
pub struct NotifyEstimatedTimetable {
    pub address: String,
    pub producer_ref: String,
    pub response_message_identifier: String,
    pub response_timestamp: Option<DateTime<Utc>>,
    pub subscriber_ref: String,
    pub subscription_identifier: String,
    pub request_message_ref: String,
    pub status: bool,
    pub error_condition: Option<ErrorCondition>,
    pub estimated_journey_version_frames: Vec<EstimatedJourneyVersionFrame>,
}
