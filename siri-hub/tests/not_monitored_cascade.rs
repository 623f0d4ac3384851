//! Producer-unavailable cascade: a partner going DOWN surfaces as
//! non-success notifies on every subscription watching its stop areas.

mod support;

use siri_hub::connector::{
    Connector, SIRI_CHECK_STATUS_CLIENT, SIRI_STOP_MONITORING_SUBSCRIPTION_BROADCASTER,
};
use siri_hub::identifier::ObjectId;
use siri_hub::model::{Reference, StopArea};
use siri_hub::partner::subscriptions::STOP_MONITORING_BROADCAST;
use siri_messages::ErrorType;
use support::{settle, test_hub, up_partner};

#[tokio::test]
async fn down_producer_notifies_every_watching_subscription() {
    let hub = test_hub("cascade");

    // The producer partner feeds stop area X and is probed for liveness.
    let producer = up_partner(
        &hub,
        "producer",
        "http://producer",
        &[SIRI_CHECK_STATUS_CLIENT],
        &[],
    );

    // The consumer partner holds a subscription on X.
    let consumer = up_partner(
        &hub,
        "consumer",
        "http://consumer",
        &[SIRI_STOP_MONITORING_SUBSCRIPTION_BROADCASTER],
        &[],
    );
    let connector =
        match consumer.connector(SIRI_STOP_MONITORING_SUBSCRIPTION_BROADCASTER) {
            Some(Connector::StopMonitoringSubscriptionBroadcaster(connector)) => connector,
            _ => panic!("connector should be materialized"),
        };

    let model = hub.referential.model().clone();
    let mut stop_area = StopArea::new();
    stop_area.set_object_id(ObjectId::new("internal", "stop:x"));
    stop_area.set_origin("producer", true);
    model.stop_areas().save(&mut stop_area).unwrap();
    assert!(stop_area.monitored());

    let subscription = consumer.subscriptions().create(STOP_MONITORING_BROADCAST);
    subscription.set_external_id("ext-1");
    subscription.create_and_add_resource(Reference::new(ObjectId::new("internal", "stop:x")));

    hub.referential.broadcast_engine().start();

    // The next probe observes the producer DOWN.
    hub.transport.set_check_status_up(false);
    hub.referential.partners().guardian().probe_now().await;
    assert_eq!(
        producer.operational_status(),
        siri_hub::partner::OperationalStatus::Down
    );

    let updated = model.stop_areas().find(stop_area.id()).unwrap();
    assert!(!updated.monitored());

    settle().await;
    connector.flush().await;

    let notifies = hub.transport.stop_monitoring_notifies();
    assert_eq!(notifies.len(), 1);
    let notify = &notifies[0];
    assert!(!notify.status);
    assert_eq!(notify.subscription_identifier, "ext-1");
    let error = notify.error_condition.as_ref().expect("error expected");
    assert_eq!(error.error_type, ErrorType::OtherError);
    assert_eq!(error.error_number, Some(1));
    assert_eq!(
        error.error_text,
        "Erreur [PRODUCER_UNAVAILABLE] : producer indisponible"
    );
}
