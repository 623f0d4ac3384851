//! Guardians: partner liveness probing and periodic model refresh.

use crate::clock::Clock;
use crate::collect::{CollectDispatcher, StopAreaUpdateRequest};
use crate::model::{Model, ModelLoader};
use crate::observability::events;
use crate::partner::{
    OperationalStatus, Partner, PartnerContext, PartnerRegistry, PartnerStatus,
};
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const PARTNER_CHECK_INTERVAL: Duration = Duration::from_secs(30);
const STOP_AREA_REFRESH_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_RELOAD_INTERVAL: Duration = Duration::from_secs(3600);
/// How long a triggered stop area rests before its next refresh.
const COLLECT_BACKOFF: Duration = Duration::from_secs(60);

/// Probes every partner's CheckStatus client and drives the operational
/// state machine.
pub struct PartnersGuardian {
    registry: Weak<PartnerRegistry>,
    clock: RwLock<Arc<dyn Clock>>,
    stop: Mutex<Option<watch::Sender<bool>>>,
}

impl PartnersGuardian {
    pub(crate) fn new(registry: Weak<PartnerRegistry>, context: Arc<PartnerContext>) -> Self {
        Self {
            registry,
            clock: RwLock::new(context.clock.clone()),
            stop: Mutex::new(None),
        }
    }

    /// Swaps the clock; only meaningful before `start`.
    pub fn set_clock(&self, clock: Arc<dyn Clock>) {
        *self.clock.write() = clock;
    }

    pub fn start(&self) {
        self.stop();
        let (stop_sender, mut stop_receiver) = watch::channel(false);
        *self.stop.lock() = Some(stop_sender);
        let registry = self.registry.clone();
        let clock = self.clock.read().clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = stop_receiver.changed() => {
                        if changed.is_err() || *stop_receiver.borrow() {
                            break;
                        }
                    }
                    _ = clock.sleep(PARTNER_CHECK_INTERVAL) => {
                        let Some(registry) = registry.upgrade() else {
                            break;
                        };
                        Self::check_partners(&registry).await;
                    }
                }
            }
            debug!(
                event = events::GUARDIAN_STOPPED,
                component = "partners_guardian",
                "guardian stopped"
            );
        });
    }

    pub fn stop(&self) {
        if let Some(sender) = self.stop.lock().take() {
            let _ = sender.send(true);
        }
    }

    /// Runs one probe round immediately, outside the periodic tick.
    pub async fn probe_now(&self) {
        if let Some(registry) = self.registry.upgrade() {
            Self::check_partners(&registry).await;
        }
    }

    pub(crate) async fn check_partners(registry: &Arc<PartnerRegistry>) {
        for partner in registry.find_all() {
            let Some(client) = partner.check_status_client() else {
                continue;
            };
            let status = match client.status().await {
                Ok(status) => status,
                Err(err) => {
                    warn!(
                        event = events::GUARDIAN_CHECK_FAILED,
                        component = "partners_guardian",
                        partner = %partner.slug(),
                        err = %err,
                        "check status failed"
                    );
                    PartnerStatus {
                        operational_status: OperationalStatus::Unknown,
                        service_started_at: None,
                    }
                }
            };
            Self::apply_status(&partner, status);
        }
    }

    /// Applies one probe result; transitions cascade to stop areas and
    /// restart the partner on recovery.
    pub(crate) fn apply_status(partner: &Arc<Partner>, status: PartnerStatus) {
        let previous = partner.operational_status();
        partner.set_partner_status(status);
        if previous == status.operational_status {
            return;
        }
        info!(
            event = events::GUARDIAN_STATUS_CHANGED,
            component = "partners_guardian",
            partner = %partner.slug(),
            from = previous.as_str(),
            to = status.operational_status.as_str(),
            "operational status changed"
        );

        match status.operational_status {
            OperationalStatus::Down => Self::mark_origins_down(partner),
            OperationalStatus::Up if previous == OperationalStatus::Down => {
                // Subscriptions were preserved; a restart re-establishes them.
                partner.start();
                info!(
                    event = events::GUARDIAN_PARTNER_RESTARTED,
                    component = "partners_guardian",
                    partner = %partner.slug(),
                    "partner restarted after recovery"
                );
            }
            _ => {}
        }
    }

    /// A producer went down: every stop area it fed loses that origin, which
    /// recomputes `Monitored` and feeds the not-monitored queues.
    fn mark_origins_down(partner: &Arc<Partner>) {
        let model = &partner.context().model;
        let slug = partner.slug().to_string();
        for stop_area_id in model.stop_areas().find_by_origin(&slug) {
            let Some(mut stop_area) = model.stop_areas().find(&stop_area_id) else {
                continue;
            };
            stop_area.set_origin(slug.clone(), false);
            let _ = model.stop_areas().save(&mut stop_area);
        }
    }
}

/// Per-referential guardian: reloads the model from persistence and keeps
/// due stop areas collected.
pub struct ModelGuardian {
    referential_slug: String,
    model: Arc<Model>,
    dispatcher: Arc<CollectDispatcher>,
    loader: Option<Arc<dyn ModelLoader>>,
    clock: RwLock<Arc<dyn Clock>>,
    reload_interval: RwLock<Duration>,
    stop: Mutex<Option<watch::Sender<bool>>>,
}

impl ModelGuardian {
    pub fn new(
        referential_slug: impl Into<String>,
        model: Arc<Model>,
        dispatcher: Arc<CollectDispatcher>,
        loader: Option<Arc<dyn ModelLoader>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            referential_slug: referential_slug.into(),
            model,
            dispatcher,
            loader,
            clock: RwLock::new(clock),
            reload_interval: RwLock::new(DEFAULT_RELOAD_INTERVAL),
            stop: Mutex::new(None),
        }
    }

    pub fn set_clock(&self, clock: Arc<dyn Clock>) {
        *self.clock.write() = clock;
    }

    pub fn set_reload_interval(&self, interval: Duration) {
        *self.reload_interval.write() = interval;
    }

    pub fn start(self: &Arc<Self>) {
        self.stop();
        let (stop_sender, stop_receiver) = watch::channel(false);
        *self.stop.lock() = Some(stop_sender);

        let guardian = Arc::downgrade(self);
        let mut refresh_stop = stop_receiver.clone();
        let clock = self.clock.read().clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = refresh_stop.changed() => {
                        if changed.is_err() || *refresh_stop.borrow() {
                            break;
                        }
                    }
                    _ = clock.sleep(STOP_AREA_REFRESH_INTERVAL) => {
                        let Some(guardian) = guardian.upgrade() else {
                            break;
                        };
                        guardian.refresh_stop_areas().await;
                    }
                }
            }
        });

        let guardian = Arc::downgrade(self);
        let mut reload_stop = stop_receiver;
        let clock = self.clock.read().clone();
        tokio::spawn(async move {
            loop {
                let interval = match guardian.upgrade() {
                    Some(guardian) => *guardian.reload_interval.read(),
                    None => break,
                };
                tokio::select! {
                    changed = reload_stop.changed() => {
                        if changed.is_err() || *reload_stop.borrow() {
                            break;
                        }
                    }
                    _ = clock.sleep(interval) => {
                        let Some(guardian) = guardian.upgrade() else {
                            break;
                        };
                        guardian.reload().await;
                    }
                }
            }
        });
    }

    pub fn stop(&self) {
        if let Some(sender) = self.stop.lock().take() {
            let _ = sender.send(true);
        }
    }

    /// Requests a refresh for every stop area due at this tick.
    pub async fn refresh_stop_areas(&self) {
        let now = self.clock.read().now();
        for stop_area in self.model.stop_areas().find_all() {
            if !stop_area.collection_due(now) {
                continue;
            }
            let mut refreshed = stop_area.clone();
            refreshed.set_next_collect(
                now + chrono::Duration::from_std(COLLECT_BACKOFF)
                    .unwrap_or_else(|_| chrono::Duration::seconds(60)),
            );
            let _ = self.model.stop_areas().save(&mut refreshed);

            let request = StopAreaUpdateRequest::new(stop_area.id().clone(), now);
            self.dispatcher.update_stop_area(&request).await;
        }
    }

    /// Full reload from persistence through the loader collaborator.
    pub async fn reload(&self) {
        let Some(loader) = &self.loader else {
            return;
        };
        debug!(
            event = events::MODEL_RELOAD_START,
            component = "model_guardian",
            referential = self.referential_slug.as_str(),
            "model reload starting"
        );
        match loader.reload(&self.referential_slug, &self.model).await {
            Ok(()) => info!(
                event = events::MODEL_RELOAD_OK,
                component = "model_guardian",
                referential = self.referential_slug.as_str(),
                "model reloaded"
            ),
            Err(err) => warn!(
                event = events::MODEL_RELOAD_FAILED,
                component = "model_guardian",
                referential = self.referential_slug.as_str(),
                err = %err,
                "model reload failed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PartnersGuardian;
    use crate::connector::TEST_CHECK_STATUS_CLIENT;
    use crate::model::StopArea;
    use crate::partner::tests::test_context;
    use crate::partner::{OperationalStatus, PartnerRegistry, PartnerSlug, PartnerStatus};

    #[tokio::test]
    async fn check_partners_applies_probe_results() {
        let registry = PartnerRegistry::new(test_context());
        let partner = registry.new_partner(PartnerSlug::from("slug"));
        partner.set_connector_types(vec![TEST_CHECK_STATUS_CLIENT.to_string()]);
        registry.save(&partner);

        assert_eq!(partner.operational_status(), OperationalStatus::Unknown);
        PartnersGuardian::check_partners(&registry).await;
        assert_eq!(partner.operational_status(), OperationalStatus::Up);
    }

    #[tokio::test]
    async fn down_transition_cascades_to_stop_area_origins() {
        let context = test_context();
        let registry = PartnerRegistry::new(context.clone());
        let partner = registry.new_partner(PartnerSlug::from("producer"));
        registry.save(&partner);
        partner.set_partner_status(PartnerStatus {
            operational_status: OperationalStatus::Up,
            service_started_at: None,
        });

        let mut stop_area = StopArea::new();
        stop_area.set_origin("producer", true);
        context.model.stop_areas().save(&mut stop_area).unwrap();
        assert!(stop_area.monitored());

        PartnersGuardian::apply_status(
            &partner,
            PartnerStatus {
                operational_status: OperationalStatus::Down,
                service_started_at: None,
            },
        );

        let updated = context.model.stop_areas().find(stop_area.id()).unwrap();
        assert!(!updated.monitored());
        assert_eq!(updated.origins().partners_down(), vec!["producer".to_string()]);
    }
}
