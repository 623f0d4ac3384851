//! Guardian ticks drive the partner operational state machine.

mod support;

use siri_hub::connector::SIRI_CHECK_STATUS_CLIENT;
use siri_hub::partner::OperationalStatus;
use std::time::Duration;
use support::{test_hub, up_partner};

async fn wait_for_status(
    partner: &std::sync::Arc<siri_hub::partner::Partner>,
    expected: OperationalStatus,
) {
    for _ in 0..200 {
        if partner.operational_status() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "partner never reached {:?}, still {:?}",
        expected,
        partner.operational_status()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn one_tick_flips_the_partner_up_then_down() {
    let hub = test_hub("guardian");
    let partner = up_partner(
        &hub,
        "probed",
        "http://probed",
        &[SIRI_CHECK_STATUS_CLIENT],
        &[],
    );
    partner.set_partner_status(Default::default());
    assert_eq!(partner.operational_status(), OperationalStatus::Unknown);

    let guardian_clock = hub.clock.clone();
    hub.referential.partners().guardian().set_clock(guardian_clock.clone());
    hub.referential.partners().start();

    // Line the guardian loop up on its first tick, then fire it.
    guardian_clock.block_until(1).await;
    guardian_clock.advance(Duration::from_secs(31));
    wait_for_status(&partner, OperationalStatus::Up).await;

    // The next probe observes the remote down.
    hub.transport.set_check_status_up(false);
    guardian_clock.block_until(1).await;
    guardian_clock.advance(Duration::from_secs(31));
    wait_for_status(&partner, OperationalStatus::Down).await;

    hub.referential.partners().stop();
}
