//! Outbound identifier rewriting through a partner's generator templates.

mod support;

use siri_hub::connector::{Connector, SIRI_STOP_MONITORING_REQUEST_BROADCASTER};
use siri_hub::identifier::{IdentifierAttributes, ObjectId, REFERENCE_IDENTIFIER};
use siri_hub::model::{Line, ScheduleKind, StopArea, StopVisit, VehicleJourney};
use siri_hub::Clock;
use siri_messages::GetStopMonitoring;
use support::{test_hub, up_partner};

#[tokio::test]
async fn unmapped_journeys_use_the_partner_template() {
    let hub = test_hub("rewriting");
    let partner = up_partner(
        &hub,
        "consumer",
        "http://consumer",
        &[SIRI_STOP_MONITORING_REQUEST_BROADCASTER],
        &[
            ("remote_objectid_kind", "x"),
            ("generators.reference_identifier", "RATPDev:{Type}::{Default}:LOC"),
        ],
    );
    let connector = match partner.connector(SIRI_STOP_MONITORING_REQUEST_BROADCASTER) {
        Some(Connector::StopMonitoringRequestBroadcaster(connector)) => connector,
        _ => panic!("connector should be materialized"),
    };

    let model = hub.referential.model().clone();
    let mut stop_area = StopArea::new();
    stop_area.set_object_id(ObjectId::new("x", "stop:1"));
    model.stop_areas().save(&mut stop_area).unwrap();

    let mut line = Line::new();
    line.set_object_id(ObjectId::new("x", "line:1"));
    model.lines().save(&mut line).unwrap();

    // The journey is only known in the default namespace.
    let mut journey = VehicleJourney::new();
    journey.line_id = line.id().clone();
    journey.set_object_id(ObjectId::new("_default", "vj-1"));
    model.vehicle_journeys().save(&mut journey).unwrap();

    let mut visit = StopVisit::new();
    visit.stop_area_id = stop_area.id().clone();
    visit.vehicle_journey_id = journey.id().clone();
    visit
        .schedules
        .set_arrival_time(ScheduleKind::Expected, hub.clock.now());
    model.stop_visits().save(&mut visit).unwrap();

    let response = connector.handle_request(&GetStopMonitoring {
        message_identifier: "req-1".to_string(),
        monitoring_ref: "stop:1".to_string(),
        ..Default::default()
    });

    assert!(response.delivery.status);
    assert_eq!(response.delivery.monitored_stop_visits.len(), 1);

    let expected = partner
        .identifier_generator(REFERENCE_IDENTIFIER)
        .new_identifier(IdentifierAttributes {
            kind: "VehicleJourney",
            default: "vj-1",
        });
    assert_eq!(expected, "RATPDev:VehicleJourney::vj-1:LOC");
    assert_eq!(
        response.delivery.monitored_stop_visits[0].dated_vehicle_journey_ref,
        expected
    );
}
