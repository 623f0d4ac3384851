//! StopMonitoring request broadcaster: answers GetStopMonitoring.

use crate::connector::siri_support::{self, BuildSkip};
use crate::identifier::{ObjectId, RESPONSE_MESSAGE_IDENTIFIER};
use crate::model::StopVisit;
use crate::observability::events;
use crate::partner::Partner;
use siri_messages::{
    ErrorCondition, GetStopMonitoring, MonitoredStopVisit, StopMonitoringDelivery,
    StopMonitoringResponse,
};
use std::sync::{Arc, Weak};
use tracing::warn;

const COMPONENT: &str = "stop_monitoring_request_broadcaster";

pub struct SiriStopMonitoringRequestBroadcaster {
    partner: Weak<Partner>,
}

impl SiriStopMonitoringRequestBroadcaster {
    pub fn new(partner: &Arc<Partner>) -> Self {
        Self {
            partner: Arc::downgrade(partner),
        }
    }

    pub fn handle_request(&self, request: &GetStopMonitoring) -> StopMonitoringResponse {
        let Some(partner) = self.partner.upgrade() else {
            return StopMonitoringResponse::default();
        };
        let context = partner.context();
        let now = context.clock.now();

        let mut response = StopMonitoringResponse {
            address: partner.address(),
            producer_ref: partner.producer_ref(),
            response_message_identifier: partner
                .identifier_generator(RESPONSE_MESSAGE_IDENTIFIER)
                .new_message_identifier(),
            response_timestamp: Some(now),
            delivery: StopMonitoringDelivery {
                request_message_ref: request.message_identifier.clone(),
                response_timestamp: Some(now),
                monitoring_ref: request.monitoring_ref.clone(),
                ..Default::default()
            },
        };

        let Some(kind) = partner.remote_object_id_kind() else {
            response.delivery.error_condition = Some(ErrorCondition::other_error(
                1,
                "partner has no identifier namespace",
            ));
            return response;
        };
        let object_id = ObjectId::new(kind.clone(), request.monitoring_ref.clone());
        let tx = context.model.transaction();
        let Some(stop_area) = tx.stop_area_by_object_id(&object_id) else {
            response.delivery.error_condition = Some(ErrorCondition::invalid_data_references(
                format!("StopArea not found: '{}'", request.monitoring_ref),
            ));
            self.audit(&partner, &response);
            return response;
        };

        let mut visits: Vec<StopVisit> = Vec::new();
        for family_id in context.model.stop_areas().find_family(stop_area.id()) {
            visits.extend(tx.stop_visits_by_stop_area_id(&family_id));
        }
        visits.retain(|visit| self.selected(request, &tx, visit, now));
        visits.sort_by_key(|visit| visit.schedules.reference_time());
        if let Some(maximum) = request.maximum_stop_visits {
            visits.truncate(maximum);
        }

        let abort_on_missing = partner.abort_notify_on_missing_reference();
        let mut monitored_stop_visits: Vec<MonitoredStopVisit> = Vec::new();
        for visit in &visits {
            match siri_support::build_monitored_stop_visit(&partner, &tx, visit) {
                Ok(monitored) => monitored_stop_visits.push(monitored),
                Err(skip) => {
                    warn!(
                        event = events::BROADCASTER_UNKNOWN_REFERENCE,
                        component = COMPONENT,
                        partner = %partner.slug(),
                        reason = skip.as_str(),
                        "skipping stop visit"
                    );
                    if abort_on_missing && skip == BuildSkip::MissingVehicleJourney {
                        monitored_stop_visits.clear();
                        break;
                    }
                }
            }
        }

        response.delivery.status = true;
        response.delivery.monitored_stop_visits = monitored_stop_visits;
        self.audit(&partner, &response);
        response
    }

    /// Composite selector: time window, then line filter.
    fn selected(
        &self,
        request: &GetStopMonitoring,
        tx: &crate::model::Transaction<'_>,
        visit: &StopVisit,
        now: chrono::DateTime<chrono::Utc>,
    ) -> bool {
        if let Some(interval) = request.preview_interval {
            let window_start = request.start_time.unwrap_or(now);
            let window_end = window_start
                + chrono::Duration::from_std(interval).unwrap_or_else(|_| chrono::Duration::zero());
            match visit.schedules.reference_time() {
                Some(time) => {
                    if time < window_start || time > window_end {
                        return false;
                    }
                }
                None => return false,
            }
        }
        if let Some(line_ref) = &request.line_ref {
            let Some(journey) = tx.vehicle_journey(&visit.vehicle_journey_id) else {
                return false;
            };
            let Some(line) = tx.line(&journey.line_id) else {
                return false;
            };
            let matches = self
                .partner
                .upgrade()
                .and_then(|partner| partner.remote_object_id_kind())
                .and_then(|kind| line.object_id(&kind))
                .map(|object_id| object_id.value() == line_ref)
                .unwrap_or(false);
            if !matches {
                return false;
            }
        }
        true
    }

    fn audit(&self, partner: &Partner, response: &StopMonitoringResponse) {
        let mut audit_event = partner.new_audit_event();
        audit_event.set("siriType", "StopMonitoringResponse");
        audit_event.set("monitoringRef", response.delivery.monitoring_ref.clone());
        audit_event.set("status", response.delivery.status.to_string());
        audit_event.set(
            "responseMessageIdentifier",
            response.response_message_identifier.clone(),
        );
        audit_event.set(
            "stopVisits",
            response.delivery.monitored_stop_visits.len().to_string(),
        );
        if let Some(error) = &response.delivery.error_condition {
            audit_event.set("errorType", error.error_type.to_string());
            audit_event.set("errorText", error.error_text.clone());
        }
        partner.context().audit.write_event(audit_event);
    }
}

#[cfg(test)]
mod tests {
    use crate::connector::Connector;
    use crate::identifier::ObjectId;
    use crate::model::{Line, ScheduleKind, StopArea, StopVisit, VehicleJourney};
    use crate::partner::tests::test_context;
    use crate::partner::{settings, Partner, PartnerSlug};
    use siri_messages::{ErrorType, GetStopMonitoring};
    use std::sync::Arc;

    fn broadcaster_partner() -> Arc<Partner> {
        let partner = Partner::new(PartnerSlug::from("partner"), test_context());
        partner.set_setting(settings::REMOTE_OBJECTID_KIND, "x");
        partner.set_setting(settings::LOCAL_CREDENTIAL, "secret");
        partner.set_connector_types(vec![
            super::super::SIRI_STOP_MONITORING_REQUEST_BROADCASTER.to_string()
        ]);
        partner.refresh_connectors();
        partner
    }

    fn broadcaster(
        partner: &Arc<Partner>,
    ) -> Arc<super::SiriStopMonitoringRequestBroadcaster> {
        match partner.connector(super::super::SIRI_STOP_MONITORING_REQUEST_BROADCASTER) {
            Some(Connector::StopMonitoringRequestBroadcaster(connector)) => connector,
            _ => panic!("connector should be materialized"),
        }
    }

    #[test]
    fn unknown_monitoring_ref_yields_invalid_data_references() {
        let partner = broadcaster_partner();
        let response = broadcaster(&partner).handle_request(&GetStopMonitoring {
            message_identifier: "req-1".to_string(),
            monitoring_ref: "unknown".to_string(),
            ..Default::default()
        });

        assert!(!response.delivery.status);
        assert_eq!(
            response.delivery.error_condition.unwrap().error_type,
            ErrorType::InvalidDataReferencesError
        );
        assert_eq!(response.delivery.request_message_ref, "req-1");
    }

    #[test]
    fn visits_are_delivered_with_rewritten_identifiers() {
        let partner = broadcaster_partner();
        let model = partner.context().model.clone();

        let mut stop_area = StopArea::new();
        stop_area.set_object_id(ObjectId::new("x", "stop:1"));
        model.stop_areas().save(&mut stop_area).unwrap();

        let mut line = Line::new();
        line.set_object_id(ObjectId::new("x", "line:1"));
        model.lines().save(&mut line).unwrap();

        let mut journey = VehicleJourney::new();
        journey.line_id = line.id().clone();
        journey.set_object_id(ObjectId::new("_default", "vj-1"));
        model.vehicle_journeys().save(&mut journey).unwrap();

        let mut visit = StopVisit::new();
        visit.stop_area_id = stop_area.id().clone();
        visit.vehicle_journey_id = journey.id().clone();
        visit
            .schedules
            .set_arrival_time(ScheduleKind::Expected, partner.context().clock.now());
        model.stop_visits().save(&mut visit).unwrap();

        let response = broadcaster(&partner).handle_request(&GetStopMonitoring {
            message_identifier: "req-2".to_string(),
            monitoring_ref: "stop:1".to_string(),
            ..Default::default()
        });

        assert!(response.delivery.status);
        assert_eq!(response.delivery.monitored_stop_visits.len(), 1);
        let monitored = &response.delivery.monitored_stop_visits[0];
        assert_eq!(monitored.stop_point_ref, "stop:1");
        assert_eq!(monitored.dated_vehicle_journey_ref, "VehicleJourney:vj-1");
    }
}
