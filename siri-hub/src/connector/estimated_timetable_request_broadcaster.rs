//! EstimatedTimetable request broadcaster: answers GetEstimatedTimetable
//! with journeys nested per requested line.

use crate::connector::siri_support;
use crate::identifier::{ObjectId, RESPONSE_MESSAGE_IDENTIFIER};
use crate::model::{ScheduleKind, StopVisit, Transaction};
use crate::observability::events;
use crate::partner::Partner;
use chrono::{DateTime, Utc};
use siri_messages::{
    ErrorCondition, EstimatedCall, EstimatedJourneyVersionFrame, EstimatedTimetableDelivery,
    EstimatedTimetableResponse, EstimatedVehicleJourney, GetEstimatedTimetable,
};
use std::sync::{Arc, Weak};
use tracing::warn;

const COMPONENT: &str = "estimated_timetable_request_broadcaster";

pub struct SiriEstimatedTimetableRequestBroadcaster {
    partner: Weak<Partner>,
}

impl SiriEstimatedTimetableRequestBroadcaster {
    pub fn new(partner: &Arc<Partner>) -> Self {
        Self {
            partner: Arc::downgrade(partner),
        }
    }

    pub fn handle_request(&self, request: &GetEstimatedTimetable) -> EstimatedTimetableResponse {
        let Some(partner) = self.partner.upgrade() else {
            return EstimatedTimetableResponse::default();
        };
        let context = partner.context();
        let now = context.clock.now();

        let mut response = EstimatedTimetableResponse {
            address: partner.address(),
            producer_ref: partner.producer_ref(),
            response_message_identifier: partner
                .identifier_generator(RESPONSE_MESSAGE_IDENTIFIER)
                .new_message_identifier(),
            delivery: EstimatedTimetableDelivery {
                request_message_ref: request.message_identifier.clone(),
                response_timestamp: Some(now),
                status: true,
                ..Default::default()
            },
        };

        let Some(kind) = partner.remote_object_id_kind() else {
            response.delivery.status = false;
            response.delivery.error_condition = Some(ErrorCondition::other_error(
                1,
                "partner has no identifier namespace",
            ));
            return response;
        };

        let tx = context.model.transaction();
        let mut missing_lines = 0;
        for line_ref in &request.lines {
            let line_object_id = ObjectId::new(kind.clone(), line_ref.clone());
            let Some(line) = tx.line_by_object_id(&line_object_id) else {
                missing_lines += 1;
                warn!(
                    event = events::BROADCASTER_UNKNOWN_REFERENCE,
                    component = COMPONENT,
                    partner = %partner.slug(),
                    line_id = line_ref.as_str(),
                    reason = "unknown_line",
                    "requested line is not mapped"
                );
                continue;
            };

            let mut frame = EstimatedJourneyVersionFrame {
                recorded_at_time: Some(now),
                ..Default::default()
            };
            for journey in tx.vehicle_journeys_by_line_id(line.id()) {
                let Some(dated_vehicle_journey_ref) =
                    siri_support::vehicle_journey_ref(&partner, &journey)
                else {
                    continue;
                };
                let mut estimated_journey = EstimatedVehicleJourney {
                    line_ref: line_ref.clone(),
                    dated_vehicle_journey_ref,
                    attributes: journey
                        .attributes
                        .iter()
                        .map(|(key, value)| (key.to_string(), value.to_string()))
                        .collect(),
                    references: siri_support::journey_references(&partner, &tx, &journey, None),
                    estimated_calls: Vec::new(),
                };

                for visit in tx.following_stop_visits(journey.id(), now) {
                    if !selected(request, &visit, now) {
                        continue;
                    }
                    match self.estimated_call(&partner, &tx, &visit, &kind) {
                        Some((call, producers_down)) => {
                            if let Some(producers_down) = producers_down {
                                response.delivery.status = false;
                                response.delivery.error_condition =
                                    Some(ErrorCondition::other_error(
                                        1,
                                        format!(
                                            "Erreur [PRODUCER_UNAVAILABLE] : {producers_down} indisponible"
                                        ),
                                    ));
                            }
                            estimated_journey.estimated_calls.push(call);
                        }
                        None => {
                            warn!(
                                event = events::BROADCASTER_UNKNOWN_REFERENCE,
                                component = COMPONENT,
                                partner = %partner.slug(),
                                reason = "missing_stop_area",
                                "skipping stop visit"
                            );
                        }
                    }
                }
                if !estimated_journey.estimated_calls.is_empty() {
                    frame.estimated_vehicle_journeys.push(estimated_journey);
                }
            }
            if !frame.estimated_vehicle_journeys.is_empty() {
                response
                    .delivery
                    .estimated_journey_version_frames
                    .push(frame);
            }
        }

        if request.lines.len() == 1 && missing_lines == 1 {
            response.delivery.status = false;
            response.delivery.error_condition = Some(ErrorCondition::invalid_data_references(
                format!("Line not found: '{}'", request.lines[0]),
            ));
        }

        self.audit(&partner, &response);
        response
    }

    /// Builds one estimated call; the second member names unavailable
    /// producers when the stop area is unmonitored.
    fn estimated_call(
        &self,
        partner: &Partner,
        tx: &Transaction<'_>,
        visit: &StopVisit,
        kind: &str,
    ) -> Option<(EstimatedCall, Option<String>)> {
        let (stop_area, stop_point_ref) = tx.stop_point_ref(&visit.stop_area_id, kind)?;
        let schedules = &visit.schedules;
        let mut call = EstimatedCall {
            stop_point_ref,
            stop_point_name: stop_area.name.clone(),
            destination_display: visit.destination_display().to_string(),
            order: visit.passage_order,
            vehicle_at_stop: visit.vehicle_at_stop,
            arrival_status: visit.arrival_status.as_str().to_string(),
            departure_status: visit.departure_status.as_str().to_string(),
            aimed_arrival_time: schedules.arrival_time(ScheduleKind::Aimed),
            aimed_departure_time: schedules.departure_time(ScheduleKind::Aimed),
            expected_arrival_time: None,
            expected_departure_time: None,
        };
        if stop_area.monitored() {
            call.expected_arrival_time = schedules.arrival_time(ScheduleKind::Expected);
            call.expected_departure_time = schedules.departure_time(ScheduleKind::Expected);
            Some((call, None))
        } else {
            let producers = stop_area.origins().partners_down().join(", ");
            Some((call, Some(producers)))
        }
    }

    fn audit(&self, partner: &Partner, response: &EstimatedTimetableResponse) {
        let mut audit_event = partner.new_audit_event();
        audit_event.set("siriType", "EstimatedTimetableResponse");
        audit_event.set("status", response.delivery.status.to_string());
        audit_event.set(
            "responseMessageIdentifier",
            response.response_message_identifier.clone(),
        );
        audit_event.set(
            "frames",
            response
                .delivery
                .estimated_journey_version_frames
                .len()
                .to_string(),
        );
        if let Some(error) = &response.delivery.error_condition {
            audit_event.set("errorType", error.error_type.to_string());
            if let Some(number) = error.error_number {
                audit_event.set("errorNumber", number.to_string());
            }
            audit_event.set("errorText", error.error_text.clone());
        }
        partner.context().audit.write_event(audit_event);
    }
}

fn selected(request: &GetEstimatedTimetable, visit: &StopVisit, now: DateTime<Utc>) -> bool {
    let Some(interval) = request.preview_interval else {
        return true;
    };
    let window_start = request.start_time.unwrap_or(now);
    let window_end =
        window_start + chrono::Duration::from_std(interval).unwrap_or_else(|_| chrono::Duration::zero());
    visit
        .schedules
        .reference_time()
        .map(|time| time >= window_start && time <= window_end)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use crate::connector::Connector;
    use crate::identifier::ObjectId;
    use crate::model::{Line, ScheduleKind, StopArea, StopVisit, VehicleJourney};
    use crate::partner::tests::test_context;
    use crate::partner::{settings, Partner, PartnerSlug};
    use siri_messages::{ErrorType, GetEstimatedTimetable};
    use std::sync::Arc;

    fn broadcaster_partner() -> Arc<Partner> {
        let partner = Partner::new(PartnerSlug::from("partner"), test_context());
        partner.set_setting(settings::REMOTE_OBJECTID_KIND, "x");
        partner.set_setting(settings::LOCAL_CREDENTIAL, "secret");
        partner.set_connector_types(vec![
            super::super::SIRI_ESTIMATED_TIMETABLE_REQUEST_BROADCASTER.to_string(),
        ]);
        partner.refresh_connectors();
        partner
    }

    fn broadcaster(
        partner: &Arc<Partner>,
    ) -> Arc<super::SiriEstimatedTimetableRequestBroadcaster> {
        match partner.connector(super::super::SIRI_ESTIMATED_TIMETABLE_REQUEST_BROADCASTER) {
            Some(Connector::EstimatedTimetableRequestBroadcaster(connector)) => connector,
            _ => panic!("connector should be materialized"),
        }
    }

    #[test]
    fn one_missing_line_yields_invalid_data_references() {
        let partner = broadcaster_partner();
        let response = broadcaster(&partner).handle_request(&GetEstimatedTimetable {
            message_identifier: "req-1".to_string(),
            lines: vec!["unknown".to_string()],
            ..Default::default()
        });

        assert!(!response.delivery.status);
        assert_eq!(
            response.delivery.error_condition.unwrap().error_type,
            ErrorType::InvalidDataReferencesError
        );
    }

    #[test]
    fn journeys_are_nested_per_line() {
        let partner = broadcaster_partner();
        let model = partner.context().model.clone();
        let now = partner.context().clock.now();

        let mut stop_area = StopArea::new();
        stop_area.set_object_id(ObjectId::new("x", "stop:1"));
        stop_area.set_origin("producer", true);
        model.stop_areas().save(&mut stop_area).unwrap();

        let mut line = Line::new();
        line.set_object_id(ObjectId::new("x", "line:1"));
        model.lines().save(&mut line).unwrap();

        let mut journey = VehicleJourney::new();
        journey.line_id = line.id().clone();
        journey.set_object_id(ObjectId::new("x", "vj:1"));
        model.vehicle_journeys().save(&mut journey).unwrap();

        let mut visit = StopVisit::new();
        visit.stop_area_id = stop_area.id().clone();
        visit.vehicle_journey_id = journey.id().clone();
        visit.passage_order = 1;
        visit
            .schedules
            .set_arrival_time(ScheduleKind::Expected, now + chrono::Duration::minutes(5));
        model.stop_visits().save(&mut visit).unwrap();

        let response = broadcaster(&partner).handle_request(&GetEstimatedTimetable {
            message_identifier: "req-2".to_string(),
            lines: vec!["line:1".to_string()],
            ..Default::default()
        });

        assert!(response.delivery.status);
        let frames = &response.delivery.estimated_journey_version_frames;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].estimated_vehicle_journeys.len(), 1);
        let journey = &frames[0].estimated_vehicle_journeys[0];
        assert_eq!(journey.line_ref, "line:1");
        assert_eq!(journey.estimated_calls.len(), 1);
        assert!(journey.estimated_calls[0].expected_arrival_time.is_some());
    }

    #[test]
    fn unmonitored_stop_reports_producer_unavailable() {
        let partner = broadcaster_partner();
        let model = partner.context().model.clone();
        let now = partner.context().clock.now();

        let mut stop_area = StopArea::new();
        stop_area.set_object_id(ObjectId::new("x", "stop:2"));
        stop_area.set_origin("producer", false);
        model.stop_areas().save(&mut stop_area).unwrap();

        let mut line = Line::new();
        line.set_object_id(ObjectId::new("x", "line:2"));
        model.lines().save(&mut line).unwrap();

        let mut journey = VehicleJourney::new();
        journey.line_id = line.id().clone();
        journey.set_object_id(ObjectId::new("x", "vj:2"));
        model.vehicle_journeys().save(&mut journey).unwrap();

        let mut visit = StopVisit::new();
        visit.stop_area_id = stop_area.id().clone();
        visit.vehicle_journey_id = journey.id().clone();
        visit
            .schedules
            .set_arrival_time(ScheduleKind::Expected, now + chrono::Duration::minutes(5));
        model.stop_visits().save(&mut visit).unwrap();

        let response = broadcaster(&partner).handle_request(&GetEstimatedTimetable {
            message_identifier: "req-3".to_string(),
            lines: vec!["line:2".to_string()],
            ..Default::default()
        });

        assert!(!response.delivery.status);
        let error = response.delivery.error_condition.unwrap();
        assert_eq!(error.error_number, Some(1));
        assert_eq!(
            error.error_text,
            "Erreur [PRODUCER_UNAVAILABLE] : producer indisponible"
        );
        let journey = &response.delivery.estimated_journey_version_frames[0]
            .estimated_vehicle_journeys[0];
        assert!(journey.estimated_calls[0].expected_arrival_time.is_none());
    }
}
