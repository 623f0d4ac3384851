//! Partner election scenarios for the collection dispatcher.

mod support;

use siri_hub::collect::StopAreaUpdateRequest;
use siri_hub::connector::SIRI_STOP_MONITORING_REQUEST_COLLECTOR;
use siri_hub::identifier::ObjectId;
use siri_hub::model::StopArea;
use siri_hub::partner::{settings, OperationalStatus, PartnerStatus};
use siri_hub::Clock;
use support::{settle, test_hub, up_partner};

fn monitored_stop_area(hub: &support::TestHub, value: &str) -> StopArea {
    let mut stop_area = StopArea::new();
    stop_area.set_object_id(ObjectId::new("internal", value));
    hub.referential
        .model()
        .stop_areas()
        .save(&mut stop_area)
        .expect("stop area should save");
    stop_area
}

#[tokio::test]
async fn higher_priority_partner_collects() {
    let hub = test_hub("routing");
    up_partner(
        &hub,
        "partner-a",
        "http://partner-a",
        &[SIRI_STOP_MONITORING_REQUEST_COLLECTOR],
        &[(settings::COLLECT_PRIORITY, "1")],
    );
    up_partner(
        &hub,
        "partner-b",
        "http://partner-b",
        &[SIRI_STOP_MONITORING_REQUEST_COLLECTOR],
        &[(settings::COLLECT_PRIORITY, "2")],
    );

    let stop_area = monitored_stop_area(&hub, "stop:x");
    let request = StopAreaUpdateRequest::new(stop_area.id().clone(), hub.clock.now());
    hub.referential
        .collect_dispatcher()
        .update_stop_area(&request)
        .await;
    settle().await;

    let requests = hub.transport.stop_monitoring_requests();
    assert_eq!(requests.len(), 1, "exactly one collector should be invoked");
    assert_eq!(requests[0].0, "http://partner-b");
    assert_eq!(requests[0].1.monitoring_ref, "stop:x");
}

#[tokio::test]
async fn down_partner_falls_back_to_next_priority() {
    let hub = test_hub("routing-fallback");
    up_partner(
        &hub,
        "partner-a",
        "http://partner-a",
        &[SIRI_STOP_MONITORING_REQUEST_COLLECTOR],
        &[(settings::COLLECT_PRIORITY, "1")],
    );
    let partner_b = up_partner(
        &hub,
        "partner-b",
        "http://partner-b",
        &[SIRI_STOP_MONITORING_REQUEST_COLLECTOR],
        &[(settings::COLLECT_PRIORITY, "2")],
    );
    partner_b.set_partner_status(PartnerStatus {
        operational_status: OperationalStatus::Down,
        service_started_at: None,
    });

    let stop_area = monitored_stop_area(&hub, "stop:x");
    let request = StopAreaUpdateRequest::new(stop_area.id().clone(), hub.clock.now());
    hub.referential
        .collect_dispatcher()
        .update_stop_area(&request)
        .await;
    settle().await;

    let requests = hub.transport.stop_monitoring_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0, "http://partner-a", "no call to the DOWN partner");
}

#[tokio::test]
async fn out_of_scope_partner_is_not_elected() {
    let hub = test_hub("routing-scope");
    up_partner(
        &hub,
        "partner-b",
        "http://partner-b",
        &[SIRI_STOP_MONITORING_REQUEST_COLLECTOR],
        &[
            (settings::COLLECT_PRIORITY, "2"),
            (settings::COLLECT_INCLUDE_STOP_AREAS, "stop:other"),
        ],
    );
    up_partner(
        &hub,
        "partner-a",
        "http://partner-a",
        &[SIRI_STOP_MONITORING_REQUEST_COLLECTOR],
        &[(settings::COLLECT_PRIORITY, "1")],
    );

    let stop_area = monitored_stop_area(&hub, "stop:x");
    let request = StopAreaUpdateRequest::new(stop_area.id().clone(), hub.clock.now());
    hub.referential
        .collect_dispatcher()
        .update_stop_area(&request)
        .await;
    settle().await;

    let requests = hub.transport.stop_monitoring_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0, "http://partner-a");
}
