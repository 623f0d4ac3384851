//! VehicleMonitoring request broadcaster: answers GetVehicleMonitoring
//! with one activity per journey on the requested line.

use crate::connector::siri_support;
use crate::identifier::{ObjectId, RESPONSE_MESSAGE_IDENTIFIER};
use crate::model::{ScheduleKind, Transaction, VehicleJourney};
use crate::partner::Partner;
use siri_messages::{
    ErrorCondition, GetVehicleMonitoring, MonitoredCall, VehicleActivity,
    VehicleMonitoringDelivery, VehicleMonitoringResponse,
};
use std::sync::{Arc, Weak};

pub struct SiriVehicleMonitoringRequestBroadcaster {
    partner: Weak<Partner>,
}

impl SiriVehicleMonitoringRequestBroadcaster {
    pub fn new(partner: &Arc<Partner>) -> Self {
        Self {
            partner: Arc::downgrade(partner),
        }
    }

    pub fn handle_request(&self, request: &GetVehicleMonitoring) -> VehicleMonitoringResponse {
        let Some(partner) = self.partner.upgrade() else {
            return VehicleMonitoringResponse::default();
        };
        let context = partner.context();
        let now = context.clock.now();
        let tx = context.model.transaction();

        let mut response = VehicleMonitoringResponse {
            address: partner.address(),
            producer_ref: partner.producer_ref(),
            response_message_identifier: partner
                .identifier_generator(RESPONSE_MESSAGE_IDENTIFIER)
                .new_message_identifier(),
            delivery: VehicleMonitoringDelivery {
                request_message_ref: request.message_identifier.clone(),
                response_timestamp: Some(now),
                status: true,
                ..Default::default()
            },
        };
        let Some(kind) = partner.remote_object_id_kind() else {
            return response;
        };

        let journeys: Vec<VehicleJourney> = if let Some(line_ref) = &request.line_ref {
            let line_object_id = ObjectId::new(kind.clone(), line_ref.clone());
            match tx.line_by_object_id(&line_object_id) {
                Some(line) => tx.vehicle_journeys_by_line_id(line.id()),
                None => {
                    response.delivery.status = false;
                    response.delivery.error_condition =
                        Some(ErrorCondition::invalid_data_references(format!(
                            "Line not found: '{line_ref}'"
                        )));
                    return response;
                }
            }
        } else if let Some(vehicle_ref) = &request.vehicle_monitoring_ref {
            let journey_object_id = ObjectId::new(kind.clone(), vehicle_ref.clone());
            match tx.vehicle_journey_by_object_id(&journey_object_id) {
                Some(journey) => vec![journey],
                None => {
                    response.delivery.status = false;
                    response.delivery.error_condition =
                        Some(ErrorCondition::invalid_data_references(format!(
                            "VehicleJourney not found: '{vehicle_ref}'"
                        )));
                    return response;
                }
            }
        } else {
            Vec::new()
        };

        for journey in &journeys {
            if let Some(activity) = vehicle_activity(&partner, &tx, journey, &kind, now) {
                response.delivery.vehicle_activities.push(activity);
            }
        }

        let mut audit_event = partner.new_audit_event();
        audit_event.set("siriType", "VehicleMonitoringResponse");
        audit_event.set("status", response.delivery.status.to_string());
        audit_event.set(
            "vehicleActivities",
            response.delivery.vehicle_activities.len().to_string(),
        );
        context.audit.write_event(audit_event);

        response
    }
}

/// One activity for a journey: its identity plus the call it is currently
/// serving, when any remains.
pub(crate) fn vehicle_activity(
    partner: &Partner,
    tx: &Transaction<'_>,
    journey: &VehicleJourney,
    kind: &str,
    now: chrono::DateTime<chrono::Utc>,
) -> Option<VehicleActivity> {
    let line = tx.line(&journey.line_id)?;
    let line_ref = line.object_id(kind)?.value().to_string();
    let dated_vehicle_journey_ref = siri_support::vehicle_journey_ref(partner, journey)?;

    let mut activity = VehicleActivity {
        recorded_at_time: Some(now),
        line_ref,
        dated_vehicle_journey_ref,
        monitored: false,
        attributes: journey
            .attributes
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect(),
        references: siri_support::journey_references(partner, tx, journey, None),
        monitored_call: None,
    };

    if let Some(visit) = tx.following_stop_visits(journey.id(), now).into_iter().next() {
        if let Some((stop_area, stop_point_ref)) = tx.stop_point_ref(&visit.stop_area_id, kind) {
            activity.monitored = stop_area.monitored();
            activity.monitored_call = Some(MonitoredCall {
                stop_point_ref,
                stop_point_name: stop_area.name.clone(),
                order: visit.passage_order,
                vehicle_at_stop: visit.vehicle_at_stop,
                destination_display: visit.destination_display().to_string(),
                expected_arrival_time: visit.schedules.arrival_time(ScheduleKind::Expected),
                expected_departure_time: visit.schedules.departure_time(ScheduleKind::Expected),
            });
        }
    }
    Some(activity)
}

#[cfg(test)]
mod tests {
    use crate::connector::Connector;
    use crate::identifier::ObjectId;
    use crate::model::{Line, ScheduleKind, StopArea, StopVisit, VehicleJourney};
    use crate::partner::tests::test_context;
    use crate::partner::{settings, Partner, PartnerSlug};
    use siri_messages::{ErrorType, GetVehicleMonitoring};
    use std::sync::Arc;

    fn broadcaster_partner() -> Arc<Partner> {
        let partner = Partner::new(PartnerSlug::from("partner"), test_context());
        partner.set_setting(settings::REMOTE_OBJECTID_KIND, "x");
        partner.set_setting(settings::LOCAL_CREDENTIAL, "secret");
        partner.set_connector_types(vec![
            super::super::SIRI_VEHICLE_MONITORING_REQUEST_BROADCASTER.to_string(),
        ]);
        partner.refresh_connectors();
        partner
    }

    fn broadcaster(
        partner: &Arc<Partner>,
    ) -> Arc<super::SiriVehicleMonitoringRequestBroadcaster> {
        match partner.connector(super::super::SIRI_VEHICLE_MONITORING_REQUEST_BROADCASTER) {
            Some(Connector::VehicleMonitoringRequestBroadcaster(connector)) => connector,
            _ => panic!("connector should be materialized"),
        }
    }

    #[test]
    fn unknown_line_yields_invalid_data_references() {
        let partner = broadcaster_partner();
        let response = broadcaster(&partner).handle_request(&GetVehicleMonitoring {
            message_identifier: "req-1".to_string(),
            line_ref: Some("unknown".to_string()),
            ..Default::default()
        });

        assert!(!response.delivery.status);
        assert_eq!(
            response.delivery.error_condition.unwrap().error_type,
            ErrorType::InvalidDataReferencesError
        );
    }

    #[test]
    fn activities_carry_the_current_call() {
        let partner = broadcaster_partner();
        let model = partner.context().model.clone();
        let now = partner.context().clock.now();

        let mut stop_area = StopArea::new();
        stop_area.name = "Nation".to_string();
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
        visit.passage_order = 2;
        visit
            .schedules
            .set_arrival_time(ScheduleKind::Expected, now + chrono::Duration::minutes(3));
        model.stop_visits().save(&mut visit).unwrap();

        let response = broadcaster(&partner).handle_request(&GetVehicleMonitoring {
            message_identifier: "req-2".to_string(),
            line_ref: Some("line:1".to_string()),
            ..Default::default()
        });

        assert!(response.delivery.status);
        assert_eq!(response.delivery.vehicle_activities.len(), 1);
        let activity = &response.delivery.vehicle_activities[0];
        assert!(activity.monitored);
        assert_eq!(activity.dated_vehicle_journey_ref, "vj:1");
        let call = activity.monitored_call.as_ref().expect("call expected");
        assert_eq!(call.stop_point_ref, "stop:1");
        assert_eq!(call.stop_point_name, "Nation");
    }
}
