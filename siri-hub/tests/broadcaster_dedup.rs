//! Change suppression in the StopMonitoring subscription broadcaster.

mod support;

use siri_hub::connector::{Connector, SIRI_STOP_MONITORING_SUBSCRIPTION_BROADCASTER};
use siri_hub::identifier::ObjectId;
use siri_hub::Clock;
use siri_hub::model::{Line, Reference, ScheduleKind, StopArea, StopVisit, VehicleJourney};
use siri_hub::partner::subscriptions::{
    OPTION_CHANGE_BEFORE_UPDATES, STOP_MONITORING_BROADCAST,
};
use support::{settle, test_hub, up_partner};

#[tokio::test]
async fn expected_time_moves_below_threshold_are_suppressed() {
    let hub = test_hub("dedup");
    let partner = up_partner(
        &hub,
        "consumer",
        "http://consumer",
        &[SIRI_STOP_MONITORING_SUBSCRIPTION_BROADCASTER],
        &[],
    );
    let connector =
        match partner.connector(SIRI_STOP_MONITORING_SUBSCRIPTION_BROADCASTER) {
            Some(Connector::StopMonitoringSubscriptionBroadcaster(connector)) => connector,
            _ => panic!("connector should be materialized"),
        };

    let model = hub.referential.model().clone();
    let mut stop_area = StopArea::new();
    stop_area.set_object_id(ObjectId::new("internal", "stop:x"));
    model.stop_areas().save(&mut stop_area).unwrap();

    let mut line = Line::new();
    line.set_object_id(ObjectId::new("internal", "line:1"));
    model.lines().save(&mut line).unwrap();

    let mut journey = VehicleJourney::new();
    journey.line_id = line.id().clone();
    journey.set_object_id(ObjectId::new("internal", "vj:1"));
    model.vehicle_journeys().save(&mut journey).unwrap();

    let subscription = partner.subscriptions().create(STOP_MONITORING_BROADCAST);
    subscription.set_external_id("ext-1");
    subscription.set_subscription_option(OPTION_CHANGE_BEFORE_UPDATES, "PT1M");
    subscription.create_and_add_resource(Reference::new(ObjectId::new("internal", "stop:x")));

    hub.referential.broadcast_engine().start();

    let arrival = hub.clock.now() + chrono::Duration::minutes(10);
    let mut visit = StopVisit::new();
    visit.stop_area_id = stop_area.id().clone();
    visit.vehicle_journey_id = journey.id().clone();
    visit.set_object_id(ObjectId::new("internal", "visit:1"));
    visit
        .schedules
        .set_arrival_time(ScheduleKind::Expected, arrival);
    model.stop_visits().save(&mut visit).unwrap();
    settle().await;

    // First delivery carries the visit's initial state.
    connector.flush().await;
    assert_eq!(hub.transport.stop_monitoring_notifies().len(), 1);

    // Thirty seconds is below the PT1M threshold.
    visit.schedules.set_arrival_time(
        ScheduleKind::Expected,
        arrival + chrono::Duration::seconds(30),
    );
    model.stop_visits().save(&mut visit).unwrap();
    settle().await;
    connector.flush().await;
    assert_eq!(
        hub.transport.stop_monitoring_notifies().len(),
        1,
        "a sub-threshold move should not notify"
    );

    // Two minutes clears the threshold.
    visit.schedules.set_arrival_time(
        ScheduleKind::Expected,
        arrival + chrono::Duration::minutes(2),
    );
    model.stop_visits().save(&mut visit).unwrap();
    settle().await;
    connector.flush().await;

    let notifies = hub.transport.stop_monitoring_notifies();
    assert_eq!(notifies.len(), 2);
    let last = notifies.last().unwrap();
    assert!(last.status);
    assert_eq!(last.subscription_identifier, "ext-1");
    assert_eq!(last.monitored_stop_visits.len(), 1);
    assert_eq!(last.monitored_stop_visits[0].item_identifier, "visit:1");
}

#[tokio::test]
async fn one_entry_per_entity_within_a_batch() {
    let hub = test_hub("batch-dedup");
    let partner = up_partner(
        &hub,
        "consumer",
        "http://consumer",
        &[SIRI_STOP_MONITORING_SUBSCRIPTION_BROADCASTER],
        &[],
    );
    let connector =
        match partner.connector(SIRI_STOP_MONITORING_SUBSCRIPTION_BROADCASTER) {
            Some(Connector::StopMonitoringSubscriptionBroadcaster(connector)) => connector,
            _ => panic!("connector should be materialized"),
        };

    let model = hub.referential.model().clone();
    let mut stop_area = StopArea::new();
    stop_area.set_object_id(ObjectId::new("internal", "stop:x"));
    model.stop_areas().save(&mut stop_area).unwrap();

    let mut line = Line::new();
    line.set_object_id(ObjectId::new("internal", "line:1"));
    model.lines().save(&mut line).unwrap();

    let mut journey = VehicleJourney::new();
    journey.line_id = line.id().clone();
    journey.set_object_id(ObjectId::new("internal", "vj:1"));
    model.vehicle_journeys().save(&mut journey).unwrap();

    let subscription = partner.subscriptions().create(STOP_MONITORING_BROADCAST);
    subscription.create_and_add_resource(Reference::new(ObjectId::new("internal", "stop:x")));

    hub.referential.broadcast_engine().start();

    // Three saves inside one flush window collapse to one entry.
    let mut visit = StopVisit::new();
    visit.stop_area_id = stop_area.id().clone();
    visit.vehicle_journey_id = journey.id().clone();
    visit.set_object_id(ObjectId::new("internal", "visit:1"));
    for offset in [10, 20, 30] {
        visit.schedules.set_arrival_time(
            ScheduleKind::Expected,
            hub.clock.now() + chrono::Duration::minutes(offset),
        );
        model.stop_visits().save(&mut visit).unwrap();
    }
    settle().await;
    connector.flush().await;

    let notifies = hub.transport.stop_monitoring_notifies();
    assert_eq!(notifies.len(), 1);
    assert_eq!(notifies[0].monitored_stop_visits.len(), 1);
}
