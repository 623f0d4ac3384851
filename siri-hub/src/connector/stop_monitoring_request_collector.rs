//! StopMonitoring request-response collector.

use crate::collect::StopAreaUpdateRequest;
use crate::connector::StopAreaCollector;
use crate::identifier::{ObjectId, MESSAGE_IDENTIFIER};
use crate::model::{
    Attributes, References, ScheduleKind, Schedules, StopAreaUpdateEvent, StopVisitUpdateEvent,
    VisitStatus,
};
use crate::observability::events;
use crate::partner::Partner;
use async_trait::async_trait;
use siri_messages::{GetStopMonitoring, MonitoredStopVisit, StopMonitoringResponse};
use std::sync::{Arc, Weak};
use tracing::debug;

const COMPONENT: &str = "stop_monitoring_request_collector";

pub struct SiriStopMonitoringRequestCollector {
    partner: Weak<Partner>,
}

impl SiriStopMonitoringRequestCollector {
    pub fn new(partner: &Arc<Partner>) -> Self {
        Self {
            partner: Arc::downgrade(partner),
        }
    }

    fn audit_response(partner: &Partner, response: &StopMonitoringResponse, elapsed: String) {
        let mut audit_event = partner.new_audit_event();
        audit_event.set("siriType", "StopMonitoringResponse");
        audit_event.set("producerRef", response.producer_ref.clone());
        audit_event.set(
            "responseMessageIdentifier",
            response.response_message_identifier.clone(),
        );
        audit_event.set("status", response.delivery.status.to_string());
        audit_event.set("responseTime", elapsed);
        if let Some(error) = &response.delivery.error_condition {
            audit_event.set("errorType", error.error_type.to_string());
            audit_event.set("errorText", error.error_text.clone());
        }
        partner.context().audit.write_event(audit_event);
    }
}

/// Turns one monitored visit of a delivery into an update event in the
/// partner's namespace.
pub(crate) fn stop_visit_update_event(
    partner: &Partner,
    kind: &str,
    visit: &MonitoredStopVisit,
) -> StopVisitUpdateEvent {
    let mut schedules = Schedules::new();
    let times = [
        (ScheduleKind::Aimed, visit.aimed_arrival_time, visit.aimed_departure_time),
        (
            ScheduleKind::Expected,
            visit.expected_arrival_time,
            visit.expected_departure_time,
        ),
        (
            ScheduleKind::Actual,
            visit.actual_arrival_time,
            visit.actual_departure_time,
        ),
    ];
    for (schedule_kind, arrival, departure) in times {
        if let Some(arrival) = arrival {
            schedules.set_arrival_time(schedule_kind, arrival);
        }
        if let Some(departure) = departure {
            schedules.set_departure_time(schedule_kind, departure);
        }
    }

    let mut attributes = Attributes::new();
    for (key, value) in &visit.attributes {
        attributes.set(key.clone(), value.clone());
    }
    let mut references = References::new();
    for (key, value) in &visit.references {
        references.set(
            key.clone(),
            crate::model::Reference::new(ObjectId::new(kind, value.clone())),
        );
    }

    StopVisitUpdateEvent {
        id: uuid::Uuid::new_v4().to_string(),
        origin: partner.slug().to_string(),
        created_at: partner.context().clock.now(),
        recorded_at: visit.recorded_at,
        stop_visit_object_id: ObjectId::new(kind, visit.item_identifier.clone()),
        monitoring_ref: visit.monitoring_ref.clone(),
        vehicle_journey_object_id: (!visit.dated_vehicle_journey_ref.is_empty())
            .then(|| ObjectId::new(kind, visit.dated_vehicle_journey_ref.clone())),
        line_object_id: (!visit.line_ref.is_empty())
            .then(|| ObjectId::new(kind, visit.line_ref.clone())),
        passage_order: visit.order,
        vehicle_at_stop: visit.vehicle_at_stop,
        destination_display: visit.destination_display.clone(),
        arrival_status: VisitStatus::parse(&visit.arrival_status),
        departure_status: VisitStatus::parse(&visit.departure_status),
        schedules,
        attributes,
        references,
    }
}

#[async_trait]
impl StopAreaCollector for SiriStopMonitoringRequestCollector {
    async fn request_stop_area_update(&self, request: &StopAreaUpdateRequest) {
        let Some(partner) = self.partner.upgrade() else {
            return;
        };
        let context = partner.context();
        let start_time = context.clock.now();

        let Some(stop_area) = context.model.stop_areas().find(request.stop_area_id()) else {
            debug!(
                event = events::COLLECTOR_UNKNOWN_REFERENCE,
                component = COMPONENT,
                stop_area_id = %request.stop_area_id(),
                "refresh for unknown stop area"
            );
            return;
        };
        let Some(kind) = partner.remote_object_id_kind() else {
            return;
        };
        let Some(object_id) = stop_area.object_id(&kind) else {
            debug!(
                event = events::COLLECTOR_UNKNOWN_REFERENCE,
                component = COMPONENT,
                stop_area_id = %request.stop_area_id(),
                reason = "no_object_id_for_partner_kind",
                "stop area is not mapped for this partner"
            );
            return;
        };

        let siri_request = GetStopMonitoring {
            message_identifier: partner
                .identifier_generator(MESSAGE_IDENTIFIER)
                .new_message_identifier(),
            requestor_ref: partner.requestor_ref(),
            request_timestamp: Some(start_time),
            monitoring_ref: object_id.value().to_string(),
            ..Default::default()
        };

        let response = context
            .transport
            .stop_monitoring(&partner.remote_target(), &siri_request)
            .await;
        let elapsed = (context.clock.now() - start_time).to_string();

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                debug!(
                    event = events::COLLECTOR_REQUEST_FAILED,
                    component = COMPONENT,
                    partner = %partner.slug(),
                    err = %err,
                    "stop monitoring request failed"
                );
                let mut audit_event = partner.new_audit_event();
                audit_event.set("siriType", "StopMonitoringResponse");
                audit_event.set("response", format!("Error during StopMonitoring: {err}"));
                audit_event.set("responseTime", elapsed);
                context.audit.write_event(audit_event);
                return;
            }
        };
        Self::audit_response(&partner, &response, elapsed);
        if !response.delivery.status {
            return;
        }

        let mut event = StopAreaUpdateEvent::new(
            uuid::Uuid::new_v4().to_string(),
            stop_area.id().clone(),
            partner.slug().to_string(),
        );
        for visit in &response.delivery.monitored_stop_visits {
            event
                .stop_visit_update_events
                .push(stop_visit_update_event(&partner, &kind, visit));
        }

        // Previously collected visits absent from the response.
        let delivered: std::collections::HashSet<&str> = event
            .stop_visit_update_events
            .iter()
            .map(|visit| visit.stop_visit_object_id.value())
            .collect();
        for visit in context
            .model
            .stop_visits()
            .find_by_stop_area_id(stop_area.id())
        {
            if !visit.is_collected() {
                continue;
            }
            let Some(object_id) = visit.object_id(&kind) else {
                continue;
            };
            if !delivered.contains(object_id.value()) {
                event.stop_visit_not_collected_events.push(object_id);
            }
        }

        context.update_hub.broadcast_stop_area_update_event(&event);
    }
}

/// Collector double recording refresh requests.
pub struct TestStopMonitoringRequestCollector {
    requests: parking_lot::Mutex<Vec<String>>,
}

impl TestStopMonitoringRequestCollector {
    pub fn new() -> Self {
        Self {
            requests: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn requested_stop_areas(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

impl Default for TestStopMonitoringRequestCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StopAreaCollector for TestStopMonitoringRequestCollector {
    async fn request_stop_area_update(&self, request: &StopAreaUpdateRequest) {
        self.requests
            .lock()
            .push(request.stop_area_id().to_string());
    }
}
