//! Shared fixtures for scenario tests.

use siri_hub::audit::AuditSink;
use siri_hub::clock::FakeClock;
use siri_hub::connector::test_support::RecordingTransport;
use siri_hub::partner::{
    settings, OperationalStatus, Partner, PartnerSlug, PartnerStatus,
};
use siri_hub::referential::{
    Referential, ReferentialRegistry, ReferentialServices, ReferentialSlug,
};
use std::sync::Arc;

pub struct TestHub {
    pub registry: ReferentialRegistry,
    pub referential: Arc<Referential>,
    pub transport: Arc<RecordingTransport>,
    pub clock: Arc<FakeClock>,
}

pub fn test_hub(slug: &str) -> TestHub {
    let transport = Arc::new(RecordingTransport::new());
    let clock = Arc::new(FakeClock::new());
    let registry = ReferentialRegistry::new(ReferentialServices {
        clock: clock.clone(),
        transport: transport.clone(),
        audit: AuditSink::disabled(),
        loader: None,
    });
    let referential = registry
        .create(ReferentialSlug::from(slug))
        .expect("referential should be created");
    TestHub {
        registry,
        referential,
        transport,
        clock,
    }
}

/// A saved partner with the given connectors, marked operational.
pub fn up_partner(
    hub: &TestHub,
    slug: &str,
    remote_url: &str,
    connector_types: &[&str],
    extra_settings: &[(&str, &str)],
) -> Arc<Partner> {
    let partner = hub
        .referential
        .partners()
        .new_partner(PartnerSlug::new(slug));
    partner.set_setting(settings::REMOTE_OBJECTID_KIND, "internal");
    partner.set_setting(settings::REMOTE_URL, remote_url);
    partner.set_setting(settings::REMOTE_CREDENTIAL, "credential");
    partner.set_setting(settings::LOCAL_CREDENTIAL, &format!("local-{slug}"));
    for (key, value) in extra_settings {
        partner.set_setting(key, value);
    }
    partner.set_connector_types(
        connector_types
            .iter()
            .map(|tag| tag.to_string())
            .collect(),
    );
    hub.referential.partners().save(&partner);
    partner.set_partner_status(PartnerStatus {
        operational_status: OperationalStatus::Up,
        service_started_at: None,
    });
    partner
}

/// Lets spawned pump tasks drain their queues.
pub async fn settle() {
    tokio::task::yield_now().await;
    tokio::time::sleep(std::time::Duration::from_millis(25)).await;
}
