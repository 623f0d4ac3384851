//! VehicleMonitoring request, response and notify payloads.

use crate::common::ErrorCondition;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default)]
pub struct GetVehicleMonitoring {
    pub message_identifier: String,
    pub requestor_ref: String,
    pub request_timestamp: Option<DateTime<Utc>>,
    pub line_ref: Option<String>,
    pub vehicle_monitoring_ref: Option<String>,
}

/// The call the vehicle is currently serving.
#[derive(Clone, Debug, Default)]
pub struct MonitoredCall {
    pub stop_point_ref: String,
    pub stop_point_name: String,
    pub order: u32,
    pub vehicle_at_stop: bool,
    pub destination_display: String,
    pub expected_arrival_time: Option<DateTime<Utc>>,
    pub expected_departure_time: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default)]
pub struct VehicleActivity {
    pub recorded_at_time: Option<DateTime<Utc>>,
    pub line_ref: String,
    pub dated_vehicle_journey_ref: String,
    pub monitored: bool,
    pub attributes: BTreeMap<String, String>,
    pub references: BTreeMap<String, String>,
    pub monitored_call: Option<MonitoredCall>,
}

#[derive(Clone, Debug, Default)]
pub struct VehicleMonitoringDelivery {
    pub request_message_ref: String,
    pub response_timestamp: Option<DateTime<Utc>>,
    pub status: bool,
    pub error_condition: Option<ErrorCondition>,
    pub vehicle_activities: Vec<VehicleActivity>,
}

#[derive(Clone, Debug, Default)]
pub struct VehicleMonitoringResponse {
    pub address: String,
    pub producer_ref: String,
    pub response_message_identifier: String,
    pub delivery: VehicleMonitoringDelivery,
}

#[derive(Clone, Debug, Default)]
pub struct NotifyVehicleMonitoring {
    pub address: String,
    pub producer_ref: String,
    pub response_message_identifier: String,
    pub response_timestamp: Option<DateTime<Utc>>,
    pub subscriber_ref: String,
    pub subscription_identifier: String,
    pub request_message_ref: String,
    pub status: bool,
    pub error_condition: Option<ErrorCondition>,
    pub vehicle_activities: Vec<VehicleActivity>,
}
